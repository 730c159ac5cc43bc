pub mod commands;
pub mod container_service;
pub mod error;
pub mod executor;
pub mod resolver;

pub use container_service::RemoteContainerService;
pub use error::RemoteError;
pub use executor::{CommandOutput, ConnectionInfo, RemoteExecutor, SshAuth, SshExecutor};
pub use resolver::ConnectionResolver;
