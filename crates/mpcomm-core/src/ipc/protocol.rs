//! Wire shapes and length-prefixed framing.
//!
//! Every frame is a 4-byte big-endian length prefix followed by the payload.
//! A remote call is one JSON-RPC 2.0 request frame; `writeFileBlock` is
//! followed by one raw frame holding the block bytes. Each call is answered
//! by exactly one JSON response frame.
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON request]            (every call)
//! [u32 BE: len][raw block bytes]               (writeFileBlock only)
//! [u32 BE: len][UTF-8 JSON response]           (reply)
//! ```

use crate::config::IpcConfig;
use crate::{CommError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const JSONRPC_VERSION: &str = "2.0";

/// One remote call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    pub id: Option<Value>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: Some(params),
            id: Some(Value::from(id)),
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.jsonrpc == JSONRPC_VERSION
    }

    /// Params, or an empty object when the caller sent none.
    pub fn take_params(&mut self) -> Value {
        self.params
            .take()
            .unwrap_or_else(|| Value::Object(Default::default()))
    }
}

/// Answer to one [`RpcRequest`]. Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Option<Value>,
}

impl RpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
            id,
        }
    }

    /// Error response carrying the wire code of `err`.
    pub fn failure(id: Option<Value>, err: &CommError) -> Self {
        Self::error(id, err.to_rpc_error_code(), err.to_string())
    }

    /// Caller-side view: the result value, or the remote error.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(RpcError { code, message }) => Err(CommError::Remote { code, message }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Error member of an [`RpcResponse`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

fn check_frame_len(len: usize) -> Result<()> {
    if len > IpcConfig::MAX_FRAME_SIZE {
        return Err(CommError::Validation {
            field: "frame".to_string(),
            message: format!(
                "frame of {} bytes exceeds the {} byte limit",
                len,
                IpcConfig::MAX_FRAME_SIZE
            ),
        });
    }
    Ok(())
}

/// Read one frame. `None` means the peer closed the stream between frames;
/// a stream that ends inside the length prefix is an error.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        match reader.read(&mut prefix[filled..]).await? {
            0 if filled == 0 => return Ok(None),
            0 => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("stream ended after {} of 4 length prefix bytes", filled),
                )
                .into())
            }
            n => filled += n,
        }
    }

    let len = u32::from_be_bytes(prefix) as usize;
    check_frame_len(len)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write one frame and flush it.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    check_frame_len(payload.len())?;
    writer
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Serialize `value` and write it as one frame.
pub async fn write_json<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    write_frame(writer, &serde_json::to_vec(value)?).await
}

/// Read one frame and decode it as JSON.
pub async fn read_json<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncReadExt + Unpin,
    T: DeserializeOwned,
{
    match read_frame(reader).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}
