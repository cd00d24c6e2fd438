use super::error::ToolInvokeError;
use super::process::ServerProcess;
use crate::config::ServerConfig;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{info, warn};

/// A tool in the aggregated cross-server catalogue.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub server: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// Seam between the agent and the tool-server processes, so the agent loop
/// is testable without spawning children.
#[async_trait]
pub trait ToolBridge: Send + Sync {
    async fn invoke_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<Value, ToolInvokeError>;

    /// Every tool advertised by every reachable server, in server
    /// configuration order.
    async fn catalogue(&self) -> Vec<ToolDescriptor>;

    async fn server_instructions(&self, server: &str) -> Option<String>;
}

/// Owns one [`ServerProcess`] per configured server, spawning lazily and
/// reusing the running instance across calls.
pub struct ServerManager {
    configs: Vec<ServerConfig>,
    processes: Mutex<HashMap<String, ServerProcess>>,
}

impl ServerManager {
    pub fn new(configs: Vec<ServerConfig>) -> Self {
        Self {
            configs,
            processes: Mutex::new(HashMap::new()),
        }
    }

    /// Boot every configured server up front so the first catalogue request
    /// does not pay the spawn-and-handshake latency. Unreachable servers are
    /// logged and skipped; they retry on their next use.
    pub async fn start_all(&self) {
        for config in &self.configs {
            match self.ensure_process(&config.name).await {
                Ok(process) => {
                    let tools = process.tools().await;
                    info!(
                        server = config.name.as_str(),
                        tools = tools.len(),
                        "Tool server ready"
                    );
                }
                Err(error) => warn!(
                    server = config.name.as_str(),
                    %error,
                    "Tool server failed to start"
                ),
            }
        }
    }

    async fn ensure_process(&self, server: &str) -> Result<ServerProcess, ToolInvokeError> {
        let process = {
            let mut processes = self.processes.lock().expect("server registry lock");
            match processes.get(server) {
                Some(existing) => existing.clone(),
                None => {
                    let config = self
                        .configs
                        .iter()
                        .find(|config| config.name == server)
                        .cloned()
                        .ok_or_else(|| ToolInvokeError::NotConfigured {
                            server: server.to_string(),
                        })?;
                    let process = ServerProcess::new(config);
                    processes.insert(server.to_string(), process.clone());
                    process
                }
            }
        };

        process.ensure_running().await?;
        Ok(process)
    }
}

#[async_trait]
impl ToolBridge for ServerManager {
    async fn invoke_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<Value, ToolInvokeError> {
        let process = self.ensure_process(server).await?;
        process.call_tool(tool, arguments).await
    }

    async fn catalogue(&self) -> Vec<ToolDescriptor> {
        let mut descriptors = Vec::new();
        for config in &self.configs {
            let process = match self.ensure_process(&config.name).await {
                Ok(process) => process,
                Err(error) => {
                    warn!(
                        server = config.name.as_str(),
                        %error,
                        "Skipping unreachable server in catalogue"
                    );
                    continue;
                }
            };
            for tool in process.tools().await {
                descriptors.push(ToolDescriptor {
                    server: config.name.clone(),
                    name: tool.name,
                    description: tool.description,
                    input_schema: tool.input_schema,
                });
            }
        }
        descriptors
    }

    async fn server_instructions(&self, server: &str) -> Option<String> {
        match self.ensure_process(server).await {
            Ok(process) => process.instructions().await,
            Err(error) => {
                warn!(server, %error, "Failed to fetch server instructions");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_server_is_not_configured() {
        let manager = ServerManager::new(vec![]);
        let error = manager
            .invoke_tool("filesystem", "read_file", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(error, ToolInvokeError::NotConfigured { .. }));
    }

    #[tokio::test]
    async fn spawn_failure_surfaces_as_spawn_error() {
        let config = ServerConfig::new("ghost", "/nonexistent/mcp-server-binary");
        let manager = ServerManager::new(vec![config]);
        let error = manager
            .invoke_tool("ghost", "anything", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(error, ToolInvokeError::Spawn { .. }));
    }

    #[tokio::test]
    async fn catalogue_skips_unreachable_servers() {
        let config = ServerConfig::new("ghost", "/nonexistent/mcp-server-binary");
        let manager = ServerManager::new(vec![config]);
        assert!(manager.catalogue().await.is_empty());
    }

    #[tokio::test]
    async fn server_exit_fails_in_flight_call_and_next_call_respawns() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("spawns");
        // Consumes the initialize request, then dies mid-handshake.
        let script = format!("echo up >> {}; read line", marker.display());
        let config = ServerConfig::new("flaky", "sh").with_args(["-c", script.as_str()]);
        let manager = ServerManager::new(vec![config]);

        let error = manager
            .invoke_tool("flaky", "anything", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(error, ToolInvokeError::Terminated { .. }));

        let error = manager
            .invoke_tool("flaky", "anything", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(error, ToolInvokeError::Terminated { .. }));

        let spawns = std::fs::read_to_string(&marker).expect("marker file");
        assert_eq!(spawns.lines().count(), 2);
    }
}
