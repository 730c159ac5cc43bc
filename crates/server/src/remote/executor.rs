//! One-shot remote command execution over SSH.

use async_trait::async_trait;
use ssh2::{ErrorCode, Session};
use std::fmt;
use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::error::RemoteError;

/// libssh2's LIBSSH2_ERROR_TIMEOUT.
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
/// Slack given to the blocking worker to report its own timeout before the
/// async side gives up on it.
const TIMEOUT_GRACE: Duration = Duration::from_secs(2);
/// Pause between non-blocking reads when neither stream had data.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Credential handed to the SSH transport after decryption.
#[derive(Clone, PartialEq, Eq)]
pub enum SshAuth {
    Password(String),
    PrivateKey(PathBuf),
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SshAuth::Password(_) => f.write_str("Password(<redacted>)"),
            SshAuth::PrivateKey(path) => f.debug_tuple("PrivateKey").field(path).finish(),
        }
    }
}

/// Everything needed to open a session to one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SshAuth,
}

impl ConnectionInfo {
    pub fn endpoint(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// Turns a non-zero exit into `CommandFailed`, preferring stderr as the
    /// message.
    pub fn into_success(self) -> Result<Self, RemoteError> {
        if self.success() {
            return Ok(self);
        }
        let message = if self.stderr.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            self.stderr.trim().to_string()
        };
        Err(RemoteError::CommandFailed {
            status: self.exit_status,
            message,
        })
    }
}

/// Runs a single command on a remote host.
///
/// Implementations open exactly one session per call, release it before
/// returning, and never retry.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(
        &self,
        target: &ConnectionInfo,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, RemoteError>;
}

/// libssh2-backed executor. The blocking session runs on Tokio's blocking
/// pool so slow hosts never stall the scheduler.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    connect_timeout: Duration,
}

impl SshExecutor {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(
        &self,
        target: &ConnectionInfo,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, RemoteError> {
        let connect_timeout = self.connect_timeout.min(timeout);
        let worker_target = target.clone();
        let worker_command = command.to_string();
        let socket = SocketHandle::default();
        let worker_socket = socket.clone();
        let mut handle = tokio::task::spawn_blocking(move || {
            run_command(&worker_target, &worker_command, connect_timeout, timeout, &worker_socket)
        });

        match tokio::time::timeout(timeout + TIMEOUT_GRACE, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(RemoteError::Internal(format!(
                "SSH worker for {} failed: {join_error}",
                target.endpoint()
            ))),
            Err(_) => {
                // Cutting the socket makes the worker's pending libssh2 call
                // fail, so it drops the session before we return.
                let cut = socket.shutdown();
                match tokio::time::timeout(TIMEOUT_GRACE, handle).await {
                    Ok(_) => debug!(endpoint = %target.endpoint(), "SSH worker released its session after the socket was cut."),
                    Err(_) => warn!(endpoint = %target.endpoint(), socket_cut = cut, "SSH worker still busy; abandoning it."),
                }
                Err(RemoteError::CommandTimeout(timeout))
            }
        }
    }
}

/// Second handle on a worker's TCP socket, so the async side can shut the
/// connection down under a worker stuck in a blocking call.
#[derive(Debug, Clone, Default)]
struct SocketHandle(Arc<Mutex<Option<TcpStream>>>);

impl SocketHandle {
    fn register(&self, tcp: &TcpStream) {
        match (tcp.try_clone(), self.0.lock()) {
            (Ok(clone), Ok(mut slot)) => *slot = Some(clone),
            (Err(e), _) => debug!(error = %e, "Could not clone SSH socket handle."),
            (_, Err(_)) => debug!("SSH socket slot poisoned."),
        }
    }

    /// Returns whether a registered socket was shut down.
    fn shutdown(&self) -> bool {
        let Ok(mut slot) = self.0.lock() else {
            return false;
        };
        slot.take()
            .map(|tcp| tcp.shutdown(Shutdown::Both).is_ok())
            .unwrap_or(false)
    }
}

fn resolve_address(target: &ConnectionInfo) -> Result<SocketAddr, RemoteError> {
    (target.host.as_str(), target.port)
        .to_socket_addrs()
        .map_err(|e| RemoteError::Connect(format!("cannot resolve {}: {e}", target.host)))?
        .next()
        .ok_or_else(|| RemoteError::Connect(format!("no address found for {}", target.host)))
}

fn is_ssh_timeout(e: &ssh2::Error) -> bool {
    matches!(e.code(), ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT))
}

fn is_io_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

/// Blocking body of one call. The session, and the socket it owns, are
/// dropped on every return path of this function.
fn run_command(
    target: &ConnectionInfo,
    command: &str,
    connect_timeout: Duration,
    timeout: Duration,
    socket: &SocketHandle,
) -> Result<CommandOutput, RemoteError> {
    let endpoint = target.endpoint();
    let addr = resolve_address(target)?;
    let tcp = TcpStream::connect_timeout(&addr, connect_timeout).map_err(|e| {
        if is_io_timeout(&e) {
            RemoteError::Connect(format!("{endpoint}: connect timed out after {connect_timeout:?}"))
        } else {
            RemoteError::Connect(format!("{endpoint}: {e}"))
        }
    })?;
    socket.register(&tcp);

    let mut session = Session::new().map_err(|e| RemoteError::Session(e.to_string()))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));

    let connect_error = |e: ssh2::Error| {
        if is_ssh_timeout(&e) {
            RemoteError::CommandTimeout(timeout)
        } else {
            RemoteError::Connect(format!("{endpoint}: {e}"))
        }
    };
    session.handshake().map_err(connect_error)?;
    match &target.auth {
        SshAuth::Password(password) => session.userauth_password(&target.username, password),
        SshAuth::PrivateKey(key_path) => {
            session.userauth_pubkey_file(&target.username, None, key_path, None)
        }
    }
    .map_err(connect_error)?;
    if !session.authenticated() {
        return Err(RemoteError::Connect(format!("{endpoint}: authentication rejected")));
    }

    let result = exec_on_session(&session, command, timeout);
    if let Err(e) = session.disconnect(None, "command finished", None) {
        debug!(endpoint = %endpoint, error = %e, "SSH disconnect was not clean.");
    }
    result
}

fn exec_on_session(
    session: &Session,
    command: &str,
    timeout: Duration,
) -> Result<CommandOutput, RemoteError> {
    let ssh_error = |e: ssh2::Error| {
        if is_ssh_timeout(&e) {
            RemoteError::CommandTimeout(timeout)
        } else {
            RemoteError::Session(e.to_string())
        }
    };
    let io_error = |e: io::Error| {
        if is_io_timeout(&e) {
            RemoteError::CommandTimeout(timeout)
        } else {
            RemoteError::Session(e.to_string())
        }
    };

    let mut channel = session.channel_session().map_err(ssh_error)?;
    channel.exec(command).map_err(ssh_error)?;

    // Both streams are drained together: a command that fills the stderr
    // window would otherwise stall stdout until the timeout.
    let pumped = {
        let mut out = channel.stream(0);
        let mut err = channel.stderr();
        session.set_blocking(false);
        let pumped = pump_streams(&mut out, &mut err, || channel.eof(), Instant::now() + timeout);
        session.set_blocking(true);
        pumped
    };
    let (stdout, stderr) = pumped.map_err(io_error)?;

    channel.wait_close().map_err(ssh_error)?;
    let exit_status = channel.exit_status().map_err(ssh_error)?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_status,
    })
}

/// Reads `stdout` and `stderr` in turn until `finished` reports remote EOF,
/// then collects whatever is still buffered. Both readers must be
/// non-blocking.
fn pump_streams(
    stdout: &mut impl Read,
    stderr: &mut impl Read,
    mut finished: impl FnMut() -> bool,
    deadline: Instant,
) -> io::Result<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    let mut err = Vec::new();
    loop {
        let done = finished();
        let read = drain(stdout, &mut out)? + drain(stderr, &mut err)?;
        if done {
            return Ok((out, err));
        }
        if read == 0 {
            if Instant::now() >= deadline {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "remote command timed out"));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Reads until the source would block or hits EOF, returning the byte count.
fn drain(source: &mut impl Read, into: &mut Vec<u8>) -> io::Result<usize> {
    let mut buf = [0u8; 8192];
    let mut total = 0;
    loop {
        match source.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => {
                into.extend_from_slice(&buf[..n]);
                total += n;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}
