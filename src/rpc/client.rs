//! JSON-RPC client over a subprocess's stdio.
//!
//! Requests are correlated with responses by numeric id only, so several
//! calls may be in flight at once and answered in any order. A background
//! reader routes each response line to the waiting caller; a watcher task
//! notices when the server process exits and fails every pending call.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::error::TransportError;
use crate::backend::turn_deadline;
use super::protocol::{
    methods, Ack, ChatParams, ChatResult, GetConfigParams,
    GetConfigResult, GetModelsResult, HistoryResult, InitializeParams, InitializeResult, Request,
    Response, SetConfigParams, SetModelParams, SetModelResult,
};

/// Default limit for one request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// How long `stop` waits for the server to acknowledge `shutdown`.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

type Outcome = Result<Value, TransportError>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// How to launch the server process.
#[derive(Debug, Clone)]
pub struct ServerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl ServerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub request_timeout: Duration,
    /// Limit for `chat`, which waits on the server's model round trip and
    /// its retries.
    pub chat_timeout: Duration,
    /// Model passed to `initialize` on start.
    pub model: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            chat_timeout: turn_deadline(DEFAULT_REQUEST_TIMEOUT),
            model: None,
        }
    }
}

/// One live connection. Replaced on every `start`.
struct Connection {
    writer: AsyncMutex<Writer>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Outcome>>>,
    running: AtomicBool,
}

impl Connection {
    fn new(writer: Writer) -> Self {
        Self {
            writer: AsyncMutex::new(writer),
            pending: Mutex::new(HashMap::new()),
            running: AtomicBool::new(true),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Outcome>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, id: u64, sender: oneshot::Sender<Outcome>) {
        self.pending().insert(id, sender);
    }

    fn forget(&self, id: u64) {
        self.pending().remove(&id);
    }

    async fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }

    /// Route one line from the server to its waiter.
    fn dispatch(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let response: Response = match serde_json::from_str(line) {
            Ok(response) => response,
            Err(e) => {
                warn!("Dropping unparsable line from server: {}", e);
                return;
            }
        };
        let Some(id) = response.id.as_u64() else {
            warn!("Dropping response with non-numeric id {}", response.id);
            return;
        };
        let Some(sender) = self.pending().remove(&id) else {
            debug!("Dropping response for unknown request {}", id);
            return;
        };
        let outcome = match response.error {
            Some(error) => Err(TransportError::Rpc {
                code: error.code,
                message: error.message,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        if sender.send(outcome).is_err() {
            debug!("Caller for request {} is no longer waiting", id);
        }
    }

    /// Mark the connection dead and fail every pending call with `error`.
    fn close(&self, error: TransportError) {
        self.running.store(false, Ordering::SeqCst);
        let drained: Vec<_> = self.pending().drain().collect();
        for (id, sender) in drained {
            debug!("Failing pending request {}: {}", id, error);
            let _ = sender.send(Err(error.clone()));
        }
    }
}

async fn read_responses<R>(reader: R, connection: Arc<Connection>)
where
    R: AsyncRead + Send + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => connection.dispatch(&line),
            Ok(None) => break,
            Err(e) => {
                warn!("Error reading from server: {}", e);
                break;
            }
        }
    }
    if connection.is_running() {
        info!("Server closed its output");
    }
    connection.close(TransportError::ServerExited);
}

/// Client half of the stdio JSON-RPC channel.
pub struct RpcClient {
    command: Option<ServerCommand>,
    options: ClientOptions,
    next_id: AtomicU64,
    connection: Option<Arc<Connection>>,
    /// Dropping this kills the server process.
    kill: Option<oneshot::Sender<()>>,
}

impl RpcClient {
    pub fn new(command: ServerCommand, options: ClientOptions) -> Self {
        Self {
            command: Some(command),
            options,
            next_id: AtomicU64::new(1),
            connection: None,
            kill: None,
        }
    }

    /// Connect to an already running peer over arbitrary streams.
    pub fn attach<R, W>(reader: R, writer: W, options: ClientOptions) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let connection = Arc::new(Connection::new(Box::new(writer)));
        tokio::spawn(read_responses(reader, connection.clone()));
        Self {
            command: None,
            options,
            next_id: AtomicU64::new(1),
            connection: Some(connection),
            kill: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.connection
            .as_ref()
            .map(|connection| connection.is_running())
            .unwrap_or(false)
    }

    /// Number of calls awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.connection
            .as_ref()
            .map(|connection| connection.pending().len())
            .unwrap_or(0)
    }

    /// Spawn the server and perform the `initialize` handshake.
    ///
    /// A server that answers `initialize` with `success: false` is still
    /// started; the result is returned for the caller to inspect.
    pub async fn start(&mut self) -> Result<InitializeResult, TransportError> {
        if self.is_running() {
            self.stop().await;
        }
        let command = self
            .command
            .clone()
            .ok_or_else(|| TransportError::Startup("no server command configured".to_string()))?;

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &command.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            TransportError::Startup(format!(
                "failed to spawn {}: {}",
                command.program.display(),
                e
            ))
        })?;
        info!(
            "Started server {} (pid {:?})",
            command.program.display(),
            child.id()
        );

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(TransportError::Startup(
                "failed to capture server stdio".to_string(),
            ));
        };

        let connection = Arc::new(Connection::new(Box::new(stdin)));
        tokio::spawn(read_responses(stdout, connection.clone()));

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "aicode::server", "{}", line);
            }
        });

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let watched = connection.clone();
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => info!("Server process exited: {}", status),
                        Err(e) => warn!("Failed to wait for server process: {}", e),
                    }
                    watched.close(TransportError::ServerExited);
                }
                _ = kill_rx => {
                    if let Err(e) = child.kill().await {
                        debug!("Server process already gone: {}", e);
                    }
                }
            }
        });

        self.connection = Some(connection);
        self.kill = Some(kill_tx);

        let model = self.options.model.clone();
        match self.initialize(model).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.stop().await;
                Err(TransportError::Startup(e.to_string()))
            }
        }
    }

    /// Ask the server to shut down, then make sure it is gone.
    pub async fn stop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        if connection.is_running() {
            match self
                .call_on(&connection, methods::SHUTDOWN, json!({}), SHUTDOWN_TIMEOUT)
                .await
            {
                Ok(_) => debug!("Server acknowledged shutdown"),
                Err(e) => debug!("Shutdown request failed: {}", e),
            }
        }
        connection.close(TransportError::Stopped);
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }

    /// Send one request and wait for its response.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        self.call_within(method, params, self.options.request_timeout)
            .await
    }

    async fn call_within(
        &self,
        method: &str,
        params: Value,
        limit: Duration,
    ) -> Result<Value, TransportError> {
        let connection = self
            .connection
            .as_ref()
            .filter(|connection| connection.is_running())
            .ok_or(TransportError::NotRunning)?;
        self.call_on(connection, method, params, limit).await
    }

    async fn call_on(
        &self,
        connection: &Connection,
        method: &str,
        params: Value,
        limit: Duration,
    ) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = serde_json::to_string(&Request::new(id, method, params))?;

        let (sender, receiver) = oneshot::channel();
        connection.register(id, sender);
        // The connection may have closed between the check and registering.
        if !connection.is_running() {
            connection.forget(id);
            return Err(TransportError::NotRunning);
        }

        debug!("-> {} (id {})", method, id);
        if let Err(e) = connection.write_line(&line).await {
            connection.forget(id);
            return Err(e.into());
        }

        match timeout(limit, receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(TransportError::ServerExited),
            Err(_) => {
                connection.forget(id);
                warn!("{} (id {}) timed out after {:?}", method, id, limit);
                Err(TransportError::Timeout(limit))
            }
        }
    }

    async fn request<P, R>(&self, method: &str, params: &P) -> Result<R, TransportError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.request_within(method, params, self.options.request_timeout)
            .await
    }

    async fn request_within<P, R>(
        &self,
        method: &str,
        params: &P,
        limit: Duration,
    ) -> Result<R, TransportError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let value = self
            .call_within(method, serde_json::to_value(params)?, limit)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn initialize(&self, model: Option<String>) -> Result<InitializeResult, TransportError> {
        self.request(methods::INITIALIZE, &InitializeParams { model })
            .await
    }

    pub async fn chat(&self, params: &ChatParams) -> Result<ChatResult, TransportError> {
        self.request_within(methods::CHAT, params, self.options.chat_timeout)
            .await
    }

    pub async fn get_models(&self) -> Result<GetModelsResult, TransportError> {
        self.request(methods::GET_MODELS, &json!({})).await
    }

    pub async fn set_model(&self, model: &str) -> Result<SetModelResult, TransportError> {
        let params = SetModelParams {
            model: model.to_string(),
        };
        self.request(methods::SET_MODEL, &params).await
    }

    pub async fn get_config(&self, key: Option<&str>) -> Result<GetConfigResult, TransportError> {
        let params = GetConfigParams {
            key: key.map(str::to_string),
        };
        self.request(methods::GET_CONFIG, &params).await
    }

    pub async fn set_config(&self, key: &str, value: Value) -> Result<Ack, TransportError> {
        let params = SetConfigParams {
            key: key.to_string(),
            value,
        };
        self.request(methods::SET_CONFIG, &params).await
    }

    pub async fn clear_history(&self) -> Result<Ack, TransportError> {
        self.request(methods::CLEAR_HISTORY, &json!({})).await
    }

    pub async fn get_history(&self) -> Result<HistoryResult, TransportError> {
        self.request(methods::GET_HISTORY, &json!({})).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream, Lines};

    /// The far end of an attached client.
    struct FakeServer {
        requests: Lines<BufReader<DuplexStream>>,
        writer: DuplexStream,
    }

    impl FakeServer {
        async fn next_request(&mut self) -> Request {
            let line = self.requests.next_line().await.unwrap().unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn send_line(&mut self, line: &str) {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
        }

        async fn respond(&mut self, id: &Value, result: Value) {
            let line = serde_json::to_string(&Response::success(id.clone(), result)).unwrap();
            self.send_line(&line).await;
        }
    }

    fn connect(options: ClientOptions) -> (RpcClient, FakeServer) {
        let (client_out, server_in) = duplex(64 * 1024);
        let (server_out, client_in) = duplex(64 * 1024);
        let client = RpcClient::attach(client_in, client_out, options);
        let server = FakeServer {
            requests: BufReader::new(server_in).lines(),
            writer: server_out,
        };
        (client, server)
    }

    #[tokio::test]
    async fn test_out_of_order_responses_correlate_by_id() {
        let (client, mut server) = connect(ClientOptions::default());

        let server_side = async {
            let first = server.next_request().await;
            let second = server.next_request().await;
            server
                .respond(&second.id, json!({ "method": second.method }))
                .await;
            server
                .respond(&first.id, json!({ "method": first.method }))
                .await;
        };

        let (alpha, beta, ()) = tokio::join!(
            client.call("alpha", json!({})),
            client.call("beta", json!({})),
            server_side
        );
        assert_eq!(alpha.unwrap()["method"], "alpha");
        assert_eq!(beta.unwrap()["method"], "beta");
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_timeout_frees_slot_and_connection_survives() {
        let options = ClientOptions {
            request_timeout: Duration::from_millis(100),
            ..ClientOptions::default()
        };
        let (client, mut server) = connect(options);

        let (slow, ignored) = tokio::join!(client.call("slow", json!({})), server.next_request());
        assert_eq!(slow, Err(TransportError::Timeout(Duration::from_millis(100))));
        assert_eq!(client.pending_requests(), 0);
        assert!(client.is_running());

        // A late answer for the timed-out id is dropped.
        server.respond(&ignored.id, json!("late")).await;

        let server_side = async {
            let request = server.next_request().await;
            server.respond(&request.id, json!("fresh")).await;
        };
        let (fresh, ()) = tokio::join!(client.call("fresh", json!({})), server_side);
        assert_eq!(fresh.unwrap(), json!("fresh"));
    }

    #[tokio::test]
    async fn test_unparsable_lines_are_skipped() {
        let (client, mut server) = connect(ClientOptions::default());

        let server_side = async {
            let request = server.next_request().await;
            server.send_line("this is not json").await;
            server.send_line(r#"{"jsonrpc":"2.0","id":9999,"result":1}"#).await;
            server.respond(&request.id, json!({"ok": true})).await;
        };
        let (result, ()) = tokio::join!(client.call("ping", json!({})), server_side);
        assert_eq!(result.unwrap(), json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_error_object_rejects_call() {
        let (client, mut server) = connect(ClientOptions::default());

        let server_side = async {
            let request = server.next_request().await;
            let line = serde_json::to_string(&Response::error(
                request.id,
                -32601,
                "Method not found: nope",
            ))
            .unwrap();
            server.send_line(&line).await;
        };
        let (result, ()) = tokio::join!(client.call("nope", json!({})), server_side);
        assert_eq!(
            result,
            Err(TransportError::Rpc {
                code: -32601,
                message: "Method not found: nope".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_server_exit_fails_pending_then_fast_fails() {
        let (client, mut server) = connect(ClientOptions::default());

        let server_side = async move {
            server.next_request().await;
            drop(server);
        };
        let (result, ()) = tokio::join!(client.call("chat", json!({})), server_side);
        assert_eq!(result, Err(TransportError::ServerExited));
        assert!(!client.is_running());
        assert_eq!(
            client.call("chat", json!({})).await,
            Err(TransportError::NotRunning)
        );
    }

    #[tokio::test]
    async fn test_typed_wrapper_decodes_result() {
        let (client, mut server) = connect(ClientOptions::default());

        let server_side = async {
            let request = server.next_request().await;
            assert_eq!(request.method, methods::SET_MODEL);
            assert_eq!(request.params["model"], "gpt-4");
            server
                .respond(
                    &request.id,
                    json!({"success": true, "model": "gpt-4", "session_id": "s1"}),
                )
                .await;
        };
        let (result, ()) = tokio::join!(client.set_model("gpt-4"), server_side);
        let result = result.unwrap();
        assert!(result.success);
        assert_eq!(result.session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_call_before_start_is_not_running() {
        let client = RpcClient::new(ServerCommand::new("aicode"), ClientOptions::default());
        assert_eq!(
            client.call("chat", json!({})).await,
            Err(TransportError::NotRunning)
        );
    }

    #[tokio::test]
    async fn test_start_fails_for_missing_program() {
        let mut client = RpcClient::new(
            ServerCommand::new("/nonexistent/aicode-server"),
            ClientOptions::default(),
        );
        assert!(matches!(
            client.start().await,
            Err(TransportError::Startup(_))
        ));
        assert!(!client.is_running());
    }

    #[cfg(unix)]
    const ECHO_SERVER: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"method":"die"'*) exit 3 ;;
  esac
  id=$(printf '%s' "$line" | sed 's/.*"id":\([0-9]*\).*/\1/')
  echo "handled $id" >&2
  printf '{"jsonrpc":"2.0","id":%s,"result":{"success":true,"ready":true,"capabilities":{}}}\n' "$id"
done
"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_subprocess_lifecycle() {
        let command = ServerCommand::new("sh").arg("-c").arg(ECHO_SERVER);
        let mut client = RpcClient::new(command, ClientOptions::default());

        let init = client.start().await.unwrap();
        assert!(init.success && init.ready);
        assert!(client.is_running());

        let history = client.get_history().await.unwrap();
        assert!(history.success);

        assert_eq!(
            client.call("die", json!({})).await,
            Err(TransportError::ServerExited)
        );
        assert!(!client.is_running());
        assert_eq!(client.get_models().await, Err(TransportError::NotRunning));

        // Restart after the crash.
        assert!(client.start().await.unwrap().success);
        client.stop().await;
        assert!(!client.is_running());
    }
}
