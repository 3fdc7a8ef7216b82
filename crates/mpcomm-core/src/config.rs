//! Centralized configuration for the communication substrate.
//!
//! Compile-time constants live on unit structs; the runtime-tunable pieces
//! (`SenderConfig`, `ReceiverConfig`) carry builder-style setters so tests
//! can shrink delays and block sizes.

use crate::network::RetryConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Message-passing defaults shared by senders and receivers.
pub struct CommConfig;

impl CommConfig {
    /// Connection attempts made before a destination is declared unreachable.
    pub const CONNECT_MAX_ATTEMPTS: u32 = 10;
    /// Fixed wait between two connection attempts.
    pub const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);
    /// Bytes read from disk and shipped per `writeFileBlock` call.
    pub const FILE_BLOCK_SIZE: usize = 1024;
    /// Service path appended to every endpoint address.
    pub const SERVICE_PATH: &'static str = "MessagePassingComm";
    pub const DEFAULT_BASE_ADDRESS: &'static str = "http://localhost";
}

/// Wire-level limits for the TCP transport.
pub struct IpcConfig;

impl IpcConfig {
    /// Largest frame accepted from a peer (16MB).
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
    /// Concurrent inbound connections a receiver will service.
    pub const MAX_CONNECTIONS: usize = 64;
}

/// Runtime configuration for a [`Sender`](crate::Sender).
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub retry: RetryConfig,
    pub block_size: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            block_size: CommConfig::FILE_BLOCK_SIZE,
        }
    }
}

impl SenderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the upload block size. Zero is bumped to one byte.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }
}

/// Runtime configuration for a [`Receiver`](crate::Receiver).
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Directory uploaded files are written into.
    pub file_root: PathBuf,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            file_root: PathBuf::from("."),
        }
    }
}

impl ReceiverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.file_root = root.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_budget_matches_defaults() {
        let retry = RetryConfig::default();
        assert_eq!(retry.max_attempts, CommConfig::CONNECT_MAX_ATTEMPTS);
        assert_eq!(retry.delay, CommConfig::CONNECT_RETRY_DELAY);
    }

    #[test]
    fn test_block_size_never_zero() {
        let config = SenderConfig::new().with_block_size(0);
        assert_eq!(config.block_size, 1);
    }

    #[test]
    fn test_receiver_file_root() {
        let config = ReceiverConfig::new().with_file_root("/tmp/uploads");
        assert_eq!(config.file_root, PathBuf::from("/tmp/uploads"));
    }
}
