//! The remotely invocable surface of a receiver.
//!
//! [`CommService`] is the service interface; [`ServiceCall`] is its
//! transport-independent call shape, keyed by method name. The TCP server
//! decodes frames into a `ServiceCall` and hands it to [`dispatch`], so the
//! service never sees the wire.

use crate::envelope::{DiagnosticId, Envelope};
use crate::{CommError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

/// Remote-callable operations exposed by a receiver.
#[async_trait]
pub trait CommService: Send + Sync + 'static {
    /// Accept one envelope. `id` is the transport's diagnostic stamp.
    async fn post_message(&self, envelope: Envelope, id: DiagnosticId) -> Result<()>;

    /// Begin a file-transfer session targeting `name`.
    async fn open_file_for_write(&self, name: &str) -> bool;

    /// Append `block` to the open session.
    async fn write_file_block(&self, block: &[u8]) -> bool;

    /// Finish the open session.
    async fn close_file(&self) -> bool;
}

/// One decoded remote call.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceCall {
    PostMessage(Envelope),
    OpenFileForWrite { name: String },
    WriteFileBlock(Vec<u8>),
    CloseFile,
}

impl ServiceCall {
    pub const POST_MESSAGE: &'static str = "postMessage";
    pub const OPEN_FILE_FOR_WRITE: &'static str = "openFileForWrite";
    pub const WRITE_FILE_BLOCK: &'static str = "writeFileBlock";
    pub const CLOSE_FILE: &'static str = "closeFile";

    /// Method name used on the wire.
    pub fn method(&self) -> &'static str {
        match self {
            ServiceCall::PostMessage(_) => Self::POST_MESSAGE,
            ServiceCall::OpenFileForWrite { .. } => Self::OPEN_FILE_FOR_WRITE,
            ServiceCall::WriteFileBlock(_) => Self::WRITE_FILE_BLOCK,
            ServiceCall::CloseFile => Self::CLOSE_FILE,
        }
    }

    pub fn is_known(method: &str) -> bool {
        matches!(
            method,
            Self::POST_MESSAGE | Self::OPEN_FILE_FOR_WRITE | Self::WRITE_FILE_BLOCK | Self::CLOSE_FILE
        )
    }

    /// Whether a raw payload frame follows the request frame.
    pub fn carries_block(method: &str) -> bool {
        method == Self::WRITE_FILE_BLOCK
    }

    /// Decode a call from its method name, JSON params and optional raw block.
    pub fn decode(method: &str, params: Value, block: Option<Vec<u8>>) -> Result<Self> {
        match method {
            Self::POST_MESSAGE => {
                #[derive(Deserialize)]
                struct Params {
                    envelope: Envelope,
                }
                let p: Params = serde_json::from_value(params)?;
                Ok(ServiceCall::PostMessage(p.envelope))
            }
            Self::OPEN_FILE_FOR_WRITE => {
                #[derive(Deserialize)]
                struct Params {
                    name: String,
                }
                let p: Params = serde_json::from_value(params)?;
                Ok(ServiceCall::OpenFileForWrite { name: p.name })
            }
            Self::WRITE_FILE_BLOCK => {
                let block = block.ok_or_else(|| CommError::Validation {
                    field: "block".to_string(),
                    message: "writeFileBlock without payload frame".to_string(),
                })?;
                if let Some(len) = params.get("len").and_then(Value::as_u64) {
                    if len != block.len() as u64 {
                        return Err(CommError::Validation {
                            field: "block".to_string(),
                            message: format!(
                                "declared length {} but received {} bytes",
                                len,
                                block.len()
                            ),
                        });
                    }
                }
                Ok(ServiceCall::WriteFileBlock(block))
            }
            Self::CLOSE_FILE => Ok(ServiceCall::CloseFile),
            other => Err(CommError::Validation {
                field: "method".to_string(),
                message: format!("Method not found: {}", other),
            }),
        }
    }

    /// JSON params for the request frame. Block bytes travel separately.
    pub fn params(&self) -> Value {
        match self {
            ServiceCall::PostMessage(envelope) => json!({ "envelope": envelope }),
            ServiceCall::OpenFileForWrite { name } => json!({ "name": name }),
            ServiceCall::WriteFileBlock(block) => json!({ "len": block.len() }),
            ServiceCall::CloseFile => json!({}),
        }
    }
}

/// Route a decoded call to the service and build its JSON result.
pub async fn dispatch<S: CommService + ?Sized>(
    service: &S,
    call: ServiceCall,
    id: DiagnosticId,
) -> Result<Value> {
    match call {
        ServiceCall::PostMessage(envelope) => {
            service.post_message(envelope, id).await?;
            Ok(Value::Bool(true))
        }
        ServiceCall::OpenFileForWrite { name } => {
            Ok(Value::Bool(service.open_file_for_write(&name).await))
        }
        ServiceCall::WriteFileBlock(block) => Ok(Value::Bool(service.write_file_block(&block).await)),
        ServiceCall::CloseFile => Ok(Value::Bool(service.close_file().await)),
    }
}
