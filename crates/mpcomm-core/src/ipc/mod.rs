//! TCP transport between senders and receivers.
//!
//! Wire protocol: length-prefixed JSON-RPC 2.0 frames (4-byte big-endian
//! length + UTF-8 JSON payload), with file blocks carried as a second raw
//! frame. The receiving side serves a [`CommService`]; the sending side
//! drives a [`Channel`].

pub mod client;
pub mod protocol;
pub mod server;
pub mod service;

pub use client::Channel;
pub use protocol::{RpcError, RpcRequest, RpcResponse};
pub use server::{IpcServer, IpcServerHandle};
pub use service::{dispatch, CommService, ServiceCall};
