//! JSON-RPC 2.0 tool server over line-delimited stdio.

pub mod dispatcher;
pub mod protocol;
pub mod stdio;
pub mod tools;

use thiserror::Error;

pub use dispatcher::{DispatchError, ToolDispatcher};
pub use protocol::{JsonRpcRequest, JsonRpcResponse, ToolCallResult, ToolDefinition};
pub use stdio::Server;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode response: {0}")]
    Json(#[from] serde_json::Error),
}
