//! JSON-RPC 2.0 over newline-delimited stdio.

mod client;
mod error;
mod handlers;
pub mod protocol;
mod server;

pub use client::{ClientOptions, RpcClient, ServerCommand, DEFAULT_REQUEST_TIMEOUT};
pub use error::TransportError;
pub use handlers::ServerState;
pub use server::{run_stdio, RpcServer};
