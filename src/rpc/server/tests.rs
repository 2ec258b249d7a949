use super::*;
use crate::backend::{BackendFactory, ChatBackend, ChatMessage, Completion, Role};
use crate::config::{ConfigStore, Settings};
use crate::models::ModelInfo;
use crate::parser::AssistantOutput;
use crate::rpc::protocol::{methods, ApplyEditParams, ApplyEditResult, ChatParams, ContextFile};
use crate::rpc::{ClientOptions, RpcClient, TransportError};
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::task::JoinHandle;

/// Replies queued by the test; every request is recorded.
#[derive(Default, Clone)]
struct Script {
    replies: Arc<Mutex<VecDeque<Result<String, String>>>>,
    requests: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
    /// How long each completion takes.
    delay: Duration,
}

impl Script {
    fn reply(&self, reply: Result<&str, &str>) {
        self.replies
            .lock()
            .unwrap()
            .push_back(reply.map(str::to_string).map_err(str::to_string));
    }

    fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

struct ScriptedBackend {
    model: String,
    script: Script,
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage], _temperature: f64) -> anyhow::Result<Completion> {
        tokio::time::sleep(self.script.delay).await;
        self.script.requests.lock().unwrap().push(messages.to_vec());
        let reply = self
            .script
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()));
        match reply {
            Ok(text) => Ok(Completion {
                output: AssistantOutput::Text(text),
                tokens: Some(42),
            }),
            Err(message) => Err(anyhow::anyhow!(message)),
        }
    }
}

struct ScriptedFactory {
    script: Script,
}

impl BackendFactory for ScriptedFactory {
    fn create(&self, model: &ModelInfo, _settings: &Settings) -> anyhow::Result<Box<dyn ChatBackend>> {
        if model.provider == "offline" {
            anyhow::bail!("API key not configured");
        }
        Ok(Box::new(ScriptedBackend {
            model: model.name.clone(),
            script: self.script.clone(),
        }))
    }
}

fn server_state(dir: &Path, script: &Script) -> ServerState {
    let mut config = ConfigStore::new(Some(dir.join("config"))).unwrap();
    config
        .set("models", json!([{"name": "offline-model", "provider": "offline"}]))
        .unwrap();
    let factory = Arc::new(ScriptedFactory {
        script: script.clone(),
    });
    ServerState::new(config, factory, dir.to_path_buf())
}

fn connect(state: ServerState) -> (RpcClient, JoinHandle<Result<()>>) {
    connect_with(state, ClientOptions::default())
}

fn connect_with(state: ServerState, options: ClientOptions) -> (RpcClient, JoinHandle<Result<()>>) {
    let (client_out, server_in) = duplex(64 * 1024);
    let (server_out, client_in) = duplex(64 * 1024);
    let handle = tokio::spawn(async move { RpcServer::new(state).serve(server_in, server_out).await });
    let client = RpcClient::attach(client_in, client_out, options);
    (client, handle)
}

fn chat(message: &str) -> ChatParams {
    ChatParams {
        message: message.to_string(),
        ..ChatParams::default()
    }
}

#[tokio::test]
async fn test_chat_requires_model_and_message() {
    let tmp = tempdir().unwrap();
    let script = Script::default();
    let (client, _server) = connect(server_state(tmp.path(), &script));

    let init = client.initialize(None).await.unwrap();
    assert!(init.success);
    assert!(!init.ready);
    assert!(init.capabilities.chat);

    let result = client.chat(&chat("hello")).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("No model selected"));

    client.set_model("gpt-4").await.unwrap();
    let result = client.chat(&chat("   ")).await.unwrap();
    assert_eq!(result.error.as_deref(), Some("Message is required"));
    assert!(script.requests().is_empty());
}

#[tokio::test]
async fn test_chat_returns_edits_and_actions() {
    let tmp = tempdir().unwrap();
    let script = Script::default();
    script.reply(Ok(concat!(
        "Here is the fix.\n",
        "<file_edit path=\"a.py\" type=\"create\" description=\"Add greeting\">\n",
        "```python\nprint(\"hi\")\n```\n</file_edit>\n",
        "<bash_command description=\"Run it\">python a.py</bash_command>"
    )));
    let (client, _server) = connect(server_state(tmp.path(), &script));

    let init = client.initialize(Some("gpt-4".to_string())).await.unwrap();
    assert!(init.ready);
    assert_eq!(init.model.as_deref(), Some("gpt-4"));

    let params = ChatParams {
        message: "add a greeting".to_string(),
        context: vec![ContextFile {
            path: "b.py".to_string(),
            content: "x = 1".to_string(),
        }],
        temperature: Some(0.1),
    };
    let result = client.chat(&params).await.unwrap();
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.tokens, Some(42));

    let edits = result.edits.unwrap();
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].file_path, "a.py");
    assert_eq!(edits[0].new_content, "print(\"hi\")");
    assert!(result.edits_summary.unwrap().contains("1. a.py"));
    assert_eq!(result.actions.unwrap().len(), 2);

    let sent = &script.requests()[0];
    assert_eq!(sent[0].role, Role::System);
    assert!(sent[1].content.starts_with("File: b.py\n```\nx = 1\n```"));
    assert!(sent[1].content.ends_with("add a greeting"));
}

#[tokio::test]
async fn test_slow_turn_outlasts_request_timeout() {
    let tmp = tempdir().unwrap();
    let script = Script {
        delay: Duration::from_millis(300),
        ..Script::default()
    };
    script.reply(Ok("Done."));
    let options = ClientOptions {
        request_timeout: Duration::from_millis(100),
        chat_timeout: Duration::from_secs(5),
        model: None,
    };
    let (client, _server) = connect_with(server_state(tmp.path(), &script), options);
    client.set_model("gpt-4").await.unwrap();

    let result = client.chat(&chat("hello")).await.unwrap();
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.response.as_deref(), Some("Done."));

    let history = client.get_history().await.unwrap();
    assert_eq!(history.messages.len(), 2);
}

#[tokio::test]
async fn test_history_accumulates_and_clears() {
    let tmp = tempdir().unwrap();
    let script = Script::default();
    script.reply(Ok("first answer"));
    script.reply(Ok("second answer"));
    let (client, _server) = connect(server_state(tmp.path(), &script));
    client.initialize(Some("deepseek-coder".to_string())).await.unwrap();

    let first = client.chat(&chat("one")).await.unwrap();
    assert!(first.edits.is_none());
    assert!(first.actions.is_none());
    client.chat(&chat("two")).await.unwrap();

    // System prompt leads every request, not only the first.
    let requests = script.requests();
    assert_eq!(requests[1].len(), 4);
    assert_eq!(requests[1][0].role, Role::System);

    let history = client.get_history().await.unwrap();
    assert_eq!(history.messages.len(), 4);
    assert_eq!(history.session_id, first.session_id);

    assert!(client.clear_history().await.unwrap().success);
    assert!(client.get_history().await.unwrap().messages.is_empty());
}

#[tokio::test]
async fn test_backend_failure_keeps_history_clean() {
    let tmp = tempdir().unwrap();
    let script = Script::default();
    script.reply(Err("connection refused"));
    let (client, _server) = connect(server_state(tmp.path(), &script));
    client.initialize(Some("gpt-4".to_string())).await.unwrap();

    let result = client.chat(&chat("hello")).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("API error: connection refused"));
    assert!(client.get_history().await.unwrap().messages.is_empty());
}

#[tokio::test]
async fn test_set_model_failures() {
    let tmp = tempdir().unwrap();
    let script = Script::default();
    let (client, _server) = connect(server_state(tmp.path(), &script));

    let unknown = client.set_model("gpt-7").await.unwrap();
    assert_eq!(unknown.error.as_deref(), Some("Model 'gpt-7' not found"));

    let offline = client.set_model("offline-model").await.unwrap();
    assert!(!offline.success);
    assert_eq!(offline.error.as_deref(), Some("API key not configured"));

    let init = client.initialize(Some("offline-model".to_string())).await.unwrap();
    assert!(!init.success);
    assert!(!init.ready);

    let ok = client.set_model("GPT-4").await.unwrap();
    assert!(ok.success);
    assert_eq!(ok.model.as_deref(), Some("gpt-4"));

    let models = client.get_models().await.unwrap();
    assert!(models.models.iter().any(|m| m.name == "offline-model"));
}

#[tokio::test]
async fn test_initialize_falls_back_to_default_model() {
    let tmp = tempdir().unwrap();
    let script = Script::default();
    let (client, _server) = connect(server_state(tmp.path(), &script));

    let unknown = client.initialize(Some("gpt-7".to_string())).await.unwrap();
    assert_eq!(unknown.error.as_deref(), Some("Model 'gpt-7' not found"));

    client
        .set_config("global.default_model", json!("qwen-plus"))
        .await
        .unwrap();
    let fallback = client.initialize(Some("gpt-7".to_string())).await.unwrap();
    assert!(fallback.ready);
    assert_eq!(fallback.model.as_deref(), Some("qwen-plus"));
}

#[tokio::test]
async fn test_config_round_trip() {
    let tmp = tempdir().unwrap();
    let script = Script::default();
    let (client, _server) = connect(server_state(tmp.path(), &script));

    assert!(client.set_config("global.temperature", json!(0.3)).await.unwrap().success);
    let missing_key = client.set_config("", json!(1)).await.unwrap();
    assert_eq!(missing_key.error.as_deref(), Some("Key is required"));

    let value = client.get_config(Some("global.temperature")).await.unwrap();
    assert_eq!(value.value, Some(json!(0.3)));
    let all = client.get_config(None).await.unwrap();
    assert_eq!(all.config.unwrap()["global"]["temperature"], json!(0.3));

    let saved = std::fs::read_to_string(tmp.path().join("config/config.json")).unwrap();
    assert!(saved.contains("temperature"));
}

#[tokio::test]
async fn test_failed_config_save_is_a_result() {
    let tmp = tempdir().unwrap();
    let script = Script::default();
    let (client, _server) = connect(server_state(tmp.path(), &script));
    assert!(client.set_config("global.temperature", json!(0.3)).await.unwrap().success);

    let dir = tmp.path().join("config");
    std::fs::remove_dir_all(&dir).unwrap();
    std::fs::write(&dir, "").unwrap();

    let ack = client.set_config("global.temperature", json!(0.9)).await.unwrap();
    assert!(!ack.success);
    assert!(ack.error.unwrap().contains("Failed to write config file"));

    let value = client.get_config(Some("global.temperature")).await.unwrap();
    assert_eq!(value.value, Some(json!(0.3)));
}

async fn apply_edit(client: &RpcClient, params: ApplyEditParams) -> ApplyEditResult {
    let params = serde_json::to_value(params).unwrap();
    let value = client.call(methods::APPLY_EDIT, params).await.unwrap();
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_apply_edit_validates_paths() {
    let tmp = tempdir().unwrap();
    let script = Script::default();
    let (client, _server) = connect(server_state(tmp.path(), &script));

    let ok = apply_edit(
        &client,
        ApplyEditParams {
            file_path: "src/lib.rs".to_string(),
            new_content: "fn main() {}".to_string(),
            edit_type: Some("create".to_string()),
        },
    )
    .await;
    assert!(ok.success);
    assert_eq!(ok.edit_type.as_deref(), Some("create"));
    // Validation only, nothing is written.
    assert!(!tmp.path().join("src/lib.rs").exists());

    let escaping = apply_edit(
        &client,
        ApplyEditParams {
            file_path: "../outside.rs".to_string(),
            ..ApplyEditParams::default()
        },
    )
    .await;
    assert!(!escaping.success);

    let missing = apply_edit(&client, ApplyEditParams::default()).await;
    assert_eq!(missing.error.as_deref(), Some("file_path is required"));
}

#[tokio::test]
async fn test_protocol_errors() {
    let tmp = tempdir().unwrap();
    let script = Script::default();
    let (client, _server) = connect(server_state(tmp.path(), &script));

    match client.call("browse", json!({})).await {
        Err(TransportError::Rpc { code, .. }) => assert_eq!(code, error_codes::METHOD_NOT_FOUND),
        other => panic!("Expected Rpc error, got {:?}", other),
    }
    match client.call(methods::CHAT, json!({"message": 5})).await {
        Err(TransportError::Rpc { code, .. }) => assert_eq!(code, error_codes::INVALID_PARAMS),
        other => panic!("Expected Rpc error, got {:?}", other),
    }
}

#[test]
fn test_handler_faults_map_to_error_codes() {
    let internal = error_response(
        json!(7),
        methods::CHAT,
        HandlerError::Internal(anyhow::anyhow!("Failed to serialize result")),
    );
    assert_eq!(internal.id, json!(7));
    assert!(internal.result.is_none());
    let error = internal.error.unwrap();
    assert_eq!(error.code, error_codes::INTERNAL_ERROR);
    assert_eq!(error.message, "Failed to serialize result");

    let missing = error_response(json!(8), "browse", HandlerError::MethodNotFound("browse".to_string()));
    assert_eq!(missing.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    let invalid = error_response(json!(9), methods::CHAT, HandlerError::InvalidParams("bad".to_string()));
    assert_eq!(invalid.error.unwrap().code, error_codes::INVALID_PARAMS);
}

async fn send_line(writer: &mut DuplexStream, line: &str) {
    writer.write_all(line.as_bytes()).await.unwrap();
    writer.write_all(b"\n").await.unwrap();
}

async fn next_response(lines: &mut Lines<BufReader<DuplexStream>>) -> Response {
    let line = lines.next_line().await.unwrap().unwrap();
    serde_json::from_str(&line).unwrap()
}

#[tokio::test]
async fn test_raw_lines_and_shutdown() {
    let tmp = tempdir().unwrap();
    let script = Script::default();
    let (mut client_out, server_in) = duplex(64 * 1024);
    let (server_out, client_in) = duplex(64 * 1024);
    let state = server_state(tmp.path(), &script);
    let server = tokio::spawn(async move { RpcServer::new(state).serve(server_in, server_out).await });
    let mut responses = BufReader::new(client_in).lines();

    send_line(&mut client_out, "this is not json").await;
    send_line(&mut client_out, "").await;
    send_line(&mut client_out, r#"{"jsonrpc":"1.0","id":2,"method":"chat"}"#).await;
    send_line(&mut client_out, r#"{"jsonrpc":"2.0","id":"s","method":"shutdown"}"#).await;
    send_line(&mut client_out, r#"{"jsonrpc":"2.0","id":4,"method":"getModels"}"#).await;

    let parse_error = next_response(&mut responses).await;
    assert_eq!(parse_error.id, Value::Null);
    assert_eq!(parse_error.error.unwrap().code, error_codes::PARSE_ERROR);

    let bad_version = next_response(&mut responses).await;
    assert_eq!(bad_version.id, json!(2));
    assert_eq!(bad_version.error.unwrap().code, error_codes::INVALID_REQUEST);

    let shutdown = next_response(&mut responses).await;
    assert_eq!(shutdown.id, json!("s"));
    assert_eq!(shutdown.result, Some(json!({"success": true})));

    // Nothing after shutdown is answered.
    server.await.unwrap().unwrap();
    assert!(responses.next_line().await.unwrap().is_none());
}

#[tokio::test]
async fn test_eof_stops_server() {
    let tmp = tempdir().unwrap();
    let script = Script::default();
    let (client_out, server_in) = duplex(1024);
    let (server_out, _client_in) = duplex(1024);
    let state = server_state(tmp.path(), &script);
    let server = tokio::spawn(async move { RpcServer::new(state).serve(server_in, server_out).await });

    drop(client_out);
    server.await.unwrap().unwrap();
}
