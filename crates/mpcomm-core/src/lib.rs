//! mpcomm - Point-to-point message passing with chunked file transfer.
//!
//! This crate provides the communication substrate shared by the navigation
//! server and its clients: a message envelope, thread-safe delivery queues,
//! a sender with bounded connection retry, a receiver exposing a small remote
//! service surface, and a [`Comm`] facade pairing the two.
//!
//! # Example
//!
//! ```rust,ignore
//! use mpcomm::{Comm, Envelope};
//!
//! #[tokio::main]
//! async fn main() -> mpcomm::Result<()> {
//!     let client = Comm::new("http://localhost", 8081).await?;
//!
//!     client.post_message(
//!         Envelope::request("getTopFiles")
//!             .with_to("http://localhost:8080/MessagePassingComm")
//!             .with_from(client.endpoint().to_string()),
//!     );
//!
//!     let reply = client.get_message().await?;
//!     println!("{}", reply);
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod config;
pub mod envelope;
pub mod error;
pub mod ipc;
pub mod network;
pub mod queue;

mod comm;
mod receiver;
mod sender;

// Re-export commonly used types
pub use address::EndpointAddress;
pub use comm::Comm;
pub use config::{CommConfig, IpcConfig, ReceiverConfig, SenderConfig};
pub use envelope::{DiagnosticId, Envelope, MessageType};
pub use error::{CommError, Result};
pub use network::{ConnectState, RetryConfig};
pub use queue::DeliveryQueue;
pub use receiver::Receiver;
pub use sender::Sender;
