//! Line-oriented JSON-RPC server.
//!
//! Reads one request per line, answers each in order on the writer, and
//! stops after `shutdown` or at end of input. Logging goes to stderr so the
//! writer carries protocol traffic only.

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

use super::handlers::{HandlerError, ServerState};
use super::protocol::{error_codes, methods, Request, Response, JSONRPC_VERSION};

pub struct RpcServer {
    state: ServerState,
}

impl RpcServer {
    pub fn new(state: ServerState) -> Self {
        Self { state }
    }

    /// Serve until `shutdown` or EOF.
    pub async fn serve<R, W>(&mut self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .context("Failed to read request")?
        {
            if line.trim().is_empty() {
                continue;
            }
            let (response, shutdown) = self.handle_line(&line).await;
            let mut encoded =
                serde_json::to_string(&response).context("Failed to encode response")?;
            encoded.push('\n');
            writer
                .write_all(encoded.as_bytes())
                .await
                .context("Failed to write response")?;
            writer.flush().await.context("Failed to flush response")?;

            if shutdown {
                return Ok(());
            }
        }
        info!("Input closed, stopping server");
        Ok(())
    }

    /// Answer one line; the flag is set once `shutdown` was answered.
    async fn handle_line(&mut self, line: &str) -> (Response, bool) {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!("Unparsable request: {}", e);
                return (
                    Response::error(Value::Null, error_codes::PARSE_ERROR, format!("Parse error: {}", e)),
                    false,
                );
            }
        };
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        let request = match serde_json::from_value::<Request>(value) {
            Ok(request) if request.jsonrpc == JSONRPC_VERSION => request,
            Ok(request) => {
                return (
                    Response::error(
                        id,
                        error_codes::INVALID_REQUEST,
                        format!("Unsupported jsonrpc version: {}", request.jsonrpc),
                    ),
                    false,
                )
            }
            Err(e) => {
                return (
                    Response::error(id, error_codes::INVALID_REQUEST, format!("Invalid request: {}", e)),
                    false,
                )
            }
        };

        debug!("Received request: {}", request.method);
        let shutdown = request.method == methods::SHUTDOWN;
        let response = match self.state.handle(&request.method, request.params).await {
            Ok(result) => Response::success(request.id, result),
            Err(e) => error_response(request.id, &request.method, e),
        };
        (response, shutdown)
    }
}

/// JSON-RPC error object for a handler fault.
fn error_response(id: Value, method: &str, e: HandlerError) -> Response {
    if let HandlerError::Internal(inner) = &e {
        error!("Error handling method {}: {:#}", method, inner);
    }
    Response::error(id, e.code(), format!("{:#}", e))
}

/// Serve on this process's stdin and stdout.
pub async fn run_stdio(state: ServerState) -> Result<()> {
    info!("RPC server starting in stdio mode");
    let mut server = RpcServer::new(state);
    server.serve(tokio::io::stdin(), tokio::io::stdout()).await
}

#[cfg(test)]
mod tests;
