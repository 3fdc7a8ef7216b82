//! Connection resilience.
//!
//! This module provides the fixed-delay bounded retry used when a sender
//! dials a receiver, expressed as an explicit state machine.

mod retry;

pub use retry::{retry_async, ConnectMachine, ConnectState, RetryConfig, RetryStats};
