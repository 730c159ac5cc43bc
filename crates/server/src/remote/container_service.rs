use chrono::Utc;
use fleetdock_common::parsers::{parse_container_list, parse_stats_line};
use fleetdock_common::{ContainerStats, RemoteContainer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::commands::{self, ContainerAction, ContainerId};
use super::error::RemoteError;
use super::executor::RemoteExecutor;
use super::resolver::ConnectionResolver;

/// On-demand container operations against a single managed server.
///
/// Each call resolves the server, runs one command and parses its output.
/// Nothing here is persisted.
#[derive(Clone)]
pub struct RemoteContainerService {
    resolver: ConnectionResolver,
    executor: Arc<dyn RemoteExecutor>,
    command_timeout: Duration,
}

impl RemoteContainerService {
    pub fn new(
        resolver: ConnectionResolver,
        executor: Arc<dyn RemoteExecutor>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            executor,
            command_timeout,
        }
    }

    async fn run(&self, server_id: i32, command: &str) -> Result<String, RemoteError> {
        let target = self.resolver.resolve_server(server_id).await?;
        debug!(server_id, command, "Running remote docker command.");
        let output = self
            .executor
            .execute(&target, command, self.command_timeout)
            .await?
            .into_success()?;
        Ok(output.stdout)
    }

    pub async fn list_containers(&self, server_id: i32) -> Result<Vec<RemoteContainer>, RemoteError> {
        let stdout = self.run(server_id, commands::LIST_CONTAINERS).await?;
        Ok(parse_container_list(&stdout, server_id))
    }

    pub async fn get_logs(
        &self,
        server_id: i32,
        container_id: &str,
        tail: Option<u32>,
    ) -> Result<String, RemoteError> {
        let id = ContainerId::parse(container_id)?;
        self.run(server_id, &commands::container_logs(&id, tail)).await
    }

    pub async fn get_stats(
        &self,
        server_id: i32,
        container_id: &str,
    ) -> Result<ContainerStats, RemoteError> {
        let id = ContainerId::parse(container_id)?;
        let stdout = self.run(server_id, &commands::container_stats(&id)).await?;
        parse_stats_line(&stdout, id.as_str(), Utc::now()).ok_or_else(|| {
            RemoteError::NotFound(format!("stats for container {id} on server {server_id}"))
        })
    }

    pub async fn start_container(&self, server_id: i32, container_id: &str) -> bool {
        self.lifecycle(server_id, container_id, ContainerAction::Start)
            .await
    }

    pub async fn stop_container(&self, server_id: i32, container_id: &str) -> bool {
        self.lifecycle(server_id, container_id, ContainerAction::Stop)
            .await
    }

    pub async fn restart_container(&self, server_id: i32, container_id: &str) -> bool {
        self.lifecycle(server_id, container_id, ContainerAction::Restart)
            .await
    }

    async fn lifecycle(&self, server_id: i32, container_id: &str, action: ContainerAction) -> bool {
        let result = match ContainerId::parse(container_id) {
            Ok(id) => self
                .run(server_id, &commands::container_action(action, &id))
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                info!(server_id, container_id, action = action.as_str(), "Container action succeeded.");
                true
            }
            Err(e) => {
                warn!(server_id, container_id, action = action.as_str(), error = %e, "Container action failed.");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::InMemoryServerRegistry;
    use crate::remote::executor::CommandOutput;
    use crate::test_support::{encryption, managed_server, Scripted, ScriptedExecutor};
    use fleetdock_common::ServerStatus;

    fn service(executor: Arc<ScriptedExecutor>) -> RemoteContainerService {
        let registry = InMemoryServerRegistry::new([
            managed_server(1, "10.0.0.1", ServerStatus::Online),
            managed_server(2, "10.0.0.2", ServerStatus::Online),
        ]);
        let resolver = ConnectionResolver::new(Arc::new(registry), encryption());
        RemoteContainerService::new(resolver, executor, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn lists_containers_from_docker_ps() {
        let executor = Arc::new(ScriptedExecutor::new().respond(
            "10.0.0.1",
            Scripted::stdout("a1b2|web|Up 3 hours|nginx:1.27\nc3d4|db|Exited (0) 2 days ago|postgres:16\n"),
        ));
        let containers = service(executor.clone()).list_containers(1).await.unwrap();

        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].name, "web");
        assert_eq!(containers[1].status, "Exited (0) 2 days ago");
        assert!(containers.iter().all(|c| c.server_id == 1));
        assert_eq!(executor.commands(), vec![("10.0.0.1".to_string(), commands::LIST_CONTAINERS.to_string())]);
    }

    #[tokio::test]
    async fn unknown_server_fails_without_running_anything() {
        let executor = Arc::new(ScriptedExecutor::new());
        let result = service(executor.clone()).list_containers(99).await;
        assert!(matches!(result, Err(RemoteError::NotFound(_))));
        assert_eq!(executor.calls(), 0);
    }

    #[tokio::test]
    async fn unreachable_host_propagates_connect_error() {
        let executor = Arc::new(ScriptedExecutor::new().respond("10.0.0.2", Scripted::ConnectFailure));
        let result = service(executor).get_logs(2, "web", Some(50)).await;
        assert!(matches!(result, Err(RemoteError::Connect(_))));
    }

    #[tokio::test]
    async fn stats_without_a_complete_line_are_not_found() {
        let executor = Arc::new(ScriptedExecutor::new().respond("10.0.0.1", Scripted::stdout("\n")));
        let result = service(executor).get_stats(1, "web").await;
        assert!(matches!(result, Err(RemoteError::NotFound(_))));
    }

    #[tokio::test]
    async fn stats_are_parsed() {
        let executor = Arc::new(ScriptedExecutor::new().respond(
            "10.0.0.1",
            Scripted::stdout("45.2%|1.5GiB / 8GiB|18.75%|1.2kB / 3.4kB|0B / 12MB\n"),
        ));
        let stats = service(executor).get_stats(1, "web").await.unwrap();
        assert_eq!(stats.container_id, "web");
        assert_eq!(stats.cpu_percentage, 45.2);
        assert_eq!(stats.memory_usage, "1.5GiB / 8GiB");
    }

    #[tokio::test]
    async fn lifecycle_actions_report_success_as_bool() {
        let executor = Arc::new(
            ScriptedExecutor::new()
                .respond("10.0.0.1", Scripted::stdout("web\n"))
                .respond(
                    "10.0.0.2",
                    Scripted::Output(CommandOutput {
                        stdout: String::new(),
                        stderr: "Error response from daemon: No such container: web".to_string(),
                        exit_status: 1,
                    }),
                ),
        );
        let service = service(executor.clone());

        assert!(service.restart_container(1, "web").await);
        assert!(!service.stop_container(2, "web").await);
        assert!(!service.start_container(1, "web; reboot").await);
        assert_eq!(executor.calls(), 2);
        assert_eq!(executor.commands()[0].1, "docker restart web");
    }

    #[tokio::test]
    async fn failing_log_command_is_an_error() {
        let executor = Arc::new(ScriptedExecutor::new().respond(
            "10.0.0.1",
            Scripted::Output(CommandOutput {
                stdout: String::new(),
                stderr: "permission denied while trying to connect to the Docker daemon socket".to_string(),
                exit_status: 1,
            }),
        ));
        let result = service(executor).get_logs(1, "web", None).await;
        assert!(matches!(result, Err(RemoteError::CommandFailed { status: 1, .. })));
    }
}
