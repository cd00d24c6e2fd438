use super::*;
use crate::application::client::{AgentClient, ClientConfig};
use crate::application::tooling::{ToolBridge, ToolDescriptor, ToolInvokeError};
use crate::config::WorkspaceConfig;
use crate::infrastructure::model::{ModelError, ModelProvider, ModelRequest, ModelResponse};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

fn workspace() -> WorkspaceConfig {
    WorkspaceConfig {
        working_dir: "/home/dev/projects/notes".to_string(),
        dir_name: "notes".to_string(),
    }
}

#[derive(Clone, Default)]
struct ScriptedProvider {
    responses: Arc<Mutex<VecDeque<String>>>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
}

impl ScriptedProvider {
    fn with_responses(responses: &[&str]) -> Self {
        Self {
            responses: Arc::new(Mutex::new(
                responses.iter().map(|r| r.to_string()).collect(),
            )),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn chat(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let session_id = request.session_id.clone();
        self.requests.lock().await.push(request);
        let content = self
            .responses
            .lock()
            .await
            .pop_front()
            .expect("scripted response available");
        Ok(ModelResponse::new(content, session_id))
    }
}

#[derive(Clone)]
struct FakeBridge {
    tools: Vec<ToolDescriptor>,
    result: Value,
    calls: Arc<Mutex<Vec<(String, String, Value)>>>,
}

impl FakeBridge {
    fn new(tools: Vec<ToolDescriptor>, result: Value) -> Self {
        Self {
            tools,
            result,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn empty() -> Self {
        Self::new(Vec::new(), Value::Null)
    }

    async fn calls(&self) -> Vec<(String, String, Value)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl ToolBridge for FakeBridge {
    async fn invoke_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<Value, ToolInvokeError> {
        self.calls
            .lock()
            .await
            .push((server.to_string(), tool.to_string(), arguments));
        Ok(self.result.clone())
    }

    async fn catalogue(&self) -> Vec<ToolDescriptor> {
        self.tools.clone()
    }

    async fn server_instructions(&self, server: &str) -> Option<String> {
        if server == "filesystem" {
            Some("Paths must stay inside the workspace.".to_string())
        } else {
            None
        }
    }
}

fn read_file_tool() -> ToolDescriptor {
    ToolDescriptor {
        server: "filesystem".to_string(),
        name: "read_file".to_string(),
        description: Some("Read a file from disk".to_string()),
        input_schema: Some(json!({"type": "object", "properties": {"path": {"type": "string"}}})),
    }
}

fn text_result(text: &str) -> Value {
    json!({
        "content": [{"type": "text", "text": text}],
        "isError": false
    })
}

fn agent(provider: ScriptedProvider, bridge: FakeBridge) -> Agent<ScriptedProvider> {
    let client = Arc::new(AgentClient::new(
        provider,
        ClientConfig::new("llama3", workspace()),
    ));
    Agent::new(client, Arc::new(bridge))
}

#[tokio::test]
async fn plain_prose_finishes_without_tool_calls() {
    let provider = ScriptedProvider::with_responses(&["All set, nothing to do."]);
    let agent = agent(provider.clone(), FakeBridge::empty());

    let outcome = agent
        .run("are we done?", AgentOptions::default())
        .await
        .expect("run succeeds");

    assert_eq!(outcome.response, "All set, nothing to do.");
    assert!(outcome.steps.is_empty());

    let requests = provider.requests().await;
    assert_eq!(requests.len(), 1);
    let system = &requests[0].messages[0].content;
    assert!(system.contains("call_tool"));
    assert!(system.contains("No tools are currently available."));
}

#[tokio::test]
async fn tool_call_feeds_result_back_to_model() {
    let provider = ScriptedProvider::with_responses(&[
        r#"{"action":"call_tool","tool":"read_file","input":{"path":"notes.md"}}"#,
        "The file says hello.",
    ]);
    let bridge = FakeBridge::new(vec![read_file_tool()], text_result("hello"));
    let agent = agent(provider.clone(), bridge.clone());

    let outcome = agent
        .run("what is in notes.md?", AgentOptions::default())
        .await
        .expect("run succeeds");

    assert_eq!(outcome.response, "The file says hello.");
    assert_eq!(outcome.steps.len(), 1);
    let step = &outcome.steps[0];
    assert_eq!(step.server.as_deref(), Some("filesystem"));
    assert_eq!(step.tool, "read_file");
    assert!(step.success);
    assert_eq!(step.message.as_deref(), Some("hello"));

    let calls = bridge.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "filesystem");
    assert_eq!(calls[0].1, "read_file");
    assert_eq!(calls[0].2, json!({"path": "notes.md"}));

    let requests = provider.requests().await;
    assert_eq!(requests.len(), 2);
    let feedback = &requests[1].messages.last().unwrap().content;
    assert!(feedback.contains("tool_result"));
    assert!(feedback.contains("read_file"));

    let system = &requests[0].messages[0].content;
    assert!(system.contains("Paths must stay inside the workspace."));
    assert!(system.contains("read_file (server: filesystem)"));
}

#[tokio::test]
async fn streaming_run_orders_tool_results_before_answer_tokens() {
    let provider = ScriptedProvider::with_responses(&[
        r#"{"action":"call_tool","tool":"read_file","server":"filesystem","input":{"path":"a"}}"#,
        "All done.",
    ]);
    let bridge = FakeBridge::new(vec![read_file_tool()], text_result("ok"));
    let agent = agent(provider, bridge);

    let (tx, mut rx) = mpsc::channel(32);
    let outcome = agent
        .run_streaming("go", AgentOptions::default(), tx)
        .await
        .expect("run succeeds");
    assert_eq!(outcome.response, "All done.");

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], AgentEvent::ToolResult(step) if step.tool == "read_file"));
    assert!(matches!(&events[1], AgentEvent::Token(text) if text == "All done."));
}

#[tokio::test]
async fn held_final_directive_replays_its_answer() {
    let provider =
        ScriptedProvider::with_responses(&[r#"{"action":"final","response":"replayed answer"}"#]);
    let agent = agent(provider, FakeBridge::empty());

    let (tx, mut rx) = mpsc::channel(32);
    let outcome = agent
        .run_streaming("hi", AgentOptions::default(), tx)
        .await
        .expect("run succeeds");
    assert_eq!(outcome.response, "replayed answer");

    let event = rx.recv().await.expect("one token event");
    assert!(matches!(event, AgentEvent::Token(text) if text == "replayed answer"));
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn tool_budget_exhaustion_is_an_error() {
    let directive = r#"{"action":"call_tool","tool":"read_file","input":{"path":"a"}}"#;
    let provider = ScriptedProvider::with_responses(&[directive, directive]);
    let bridge = FakeBridge::new(vec![read_file_tool()], text_result("ok"));
    let agent = agent(provider, bridge);

    let options = AgentOptions {
        max_steps: 1,
        ..AgentOptions::default()
    };
    let error = agent.run("loop forever", options).await.unwrap_err();
    assert!(matches!(error, AgentError::InvalidResponse(_)));
}

#[tokio::test]
async fn unknown_tool_is_rejected() {
    let provider = ScriptedProvider::with_responses(&[
        r#"{"action":"call_tool","tool":"teleport","input":{}}"#,
    ]);
    let agent = agent(provider, FakeBridge::new(vec![read_file_tool()], Value::Null));

    let error = agent.run("beam me up", AgentOptions::default()).await.unwrap_err();
    assert!(matches!(
        error,
        AgentError::Tool(ToolError::UnknownTool(name)) if name == "teleport"
    ));
}

#[tokio::test]
async fn list_tools_is_answered_without_a_server() {
    let provider = ScriptedProvider::with_responses(&[
        r#"{"action":"call_tool","tool":"list_tools"}"#,
        "There is one tool available.",
    ]);
    let bridge = FakeBridge::new(vec![read_file_tool()], Value::Null);
    let agent = agent(provider, bridge.clone());

    let outcome = agent
        .run("what can you do?", AgentOptions::default())
        .await
        .expect("run succeeds");

    assert_eq!(outcome.steps.len(), 1);
    let step = &outcome.steps[0];
    assert!(step.server.is_none());
    assert_eq!(step.tool, "list_tools");
    assert!(step.success);
    // The catalogue is answered locally, not through the bridge.
    assert!(bridge.calls().await.is_empty());
}
