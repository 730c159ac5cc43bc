//! Docker CLI invocations sent over SSH.
//!
//! Every format string uses `|` as the field delimiter understood by
//! `fleetdock_common::parsers`.

use std::fmt;

use super::error::RemoteError;

pub const LIST_CONTAINERS: &str =
    "docker ps -a --format '{{.ID}}|{{.Names}}|{{.Status}}|{{.Image}}'";

pub const FLEET_STATS: &str = "docker stats --no-stream --format \
    '{{.ID}}|{{.Name}}|{{.CPUPerc}}|{{.MemUsage}}|{{.MemPerc}}|{{.NetIO}}|{{.BlockIO}}'";

/// Cheap command used to check that a host accepts logins and has docker.
pub const CONNECTION_PROBE: &str = "docker ps";

const SINGLE_STATS_FORMAT: &str =
    "'{{.CPUPerc}}|{{.MemUsage}}|{{.MemPerc}}|{{.NetIO}}|{{.BlockIO}}'";

const MAX_IDENTIFIER_LEN: usize = 128;

/// A container id or name that is safe to interpolate into a shell command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn parse(raw: &str) -> Result<Self, RemoteError> {
        let mut chars = raw.chars();
        let valid_first = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
        let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
        if valid_first && valid_rest && raw.len() <= MAX_IDENTIFIER_LEN {
            Ok(Self(raw.to_string()))
        } else {
            Err(RemoteError::InvalidIdentifier(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerAction {
    Start,
    Stop,
    Restart,
}

impl ContainerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerAction::Start => "start",
            ContainerAction::Stop => "stop",
            ContainerAction::Restart => "restart",
        }
    }
}

pub fn container_stats(id: &ContainerId) -> String {
    format!("docker stats {id} --no-stream --format {SINGLE_STATS_FORMAT}")
}

/// `tail = None` returns the full log. stderr is folded into stdout so the
/// caller sees lines in the order docker emitted them.
pub fn container_logs(id: &ContainerId, tail: Option<u32>) -> String {
    match tail {
        Some(lines) => format!("docker logs --tail {lines} {id} 2>&1"),
        None => format!("docker logs {id} 2>&1"),
    }
}

pub fn container_action(action: ContainerAction, id: &ContainerId) -> String {
    format!("docker {} {id}", action.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_docker_ids_and_names() {
        for raw in ["a1b2c3d4e5f6", "web", "my-app_1", "redis.cache", "9abc"] {
            assert!(ContainerId::parse(raw).is_ok(), "{raw}");
        }
    }

    #[test]
    fn rejects_anything_that_could_reach_the_shell() {
        let too_long = "a".repeat(129);
        for raw in [
            "",
            "-rm",
            ".hidden",
            "web; rm -rf /",
            "web && reboot",
            "$(id)",
            "web name",
            "a|b",
            too_long.as_str(),
        ] {
            assert!(
                matches!(ContainerId::parse(raw), Err(RemoteError::InvalidIdentifier(_))),
                "{raw:?}"
            );
        }
        assert!(ContainerId::parse(&"a".repeat(128)).is_ok());
    }

    #[test]
    fn builds_expected_command_lines() {
        let id = ContainerId::parse("web").unwrap();
        assert_eq!(container_logs(&id, Some(100)), "docker logs --tail 100 web 2>&1");
        assert_eq!(container_logs(&id, None), "docker logs web 2>&1");
        assert_eq!(container_action(ContainerAction::Restart, &id), "docker restart web");
        assert_eq!(
            container_stats(&id),
            "docker stats web --no-stream --format '{{.CPUPerc}}|{{.MemUsage}}|{{.MemPerc}}|{{.NetIO}}|{{.BlockIO}}'"
        );
    }
}
