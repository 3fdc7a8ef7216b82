//! Outbound channel to one remote receiver.
//!
//! A `Channel` is owned by a single task and issues one call at a time, so it
//! needs no internal locking. Any transport failure surfaces as
//! [`CommError::ConnectionLost`] and leaves the channel unusable.

use super::protocol::{read_json, write_frame, write_json, RpcRequest, RpcResponse};
use super::service::ServiceCall;
use crate::address::EndpointAddress;
use crate::envelope::{Envelope, MessageType};
use crate::network::{retry_async, ConnectMachine};
use crate::{CommError, Result};
use serde_json::Value;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// An established connection to a receiver endpoint.
pub struct Channel {
    destination: EndpointAddress,
    stream: TcpStream,
    next_id: u64,
}

impl Channel {
    /// Dial `destination` once, without handshake or retry.
    pub async fn open(destination: &EndpointAddress) -> Result<Self> {
        let stream = TcpStream::connect(destination.socket_target()).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            destination: destination.clone(),
            stream,
            next_id: 1,
        })
    }

    /// Dial `destination` under the machine's retry budget.
    ///
    /// Each attempt opens a socket and posts a `connect` probe from `local`;
    /// the channel counts as established only once the probe is accepted.
    pub async fn connect(
        destination: &EndpointAddress,
        local: &str,
        machine: &mut ConnectMachine,
    ) -> Result<Self> {
        let probe = Envelope::new(MessageType::Connect)
            .with_to(destination.to_string())
            .with_from(local);

        let result = retry_async(
            machine,
            || {
                let probe = probe.clone();
                async move {
                    let mut channel = Channel::open(destination).await?;
                    channel.post_message(probe).await?;
                    Ok::<_, CommError>(channel)
                }
            },
            CommError::is_retryable,
        )
        .await;

        match result {
            Ok(channel) => {
                info!(
                    "Connected to {} after {} attempt(s)",
                    destination,
                    machine.stats().attempts
                );
                Ok(channel)
            }
            Err(e) => Err(CommError::ConnectFailed {
                address: destination.to_string(),
                attempts: machine.stats().attempts,
                message: e.to_string(),
            }),
        }
    }

    pub fn destination(&self) -> &EndpointAddress {
        &self.destination
    }

    /// Issue one call and wait for its response.
    pub async fn invoke(&mut self, call: &ServiceCall) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let request = RpcRequest::new(call.method(), call.params(), id);

        let lost = |e: CommError| {
            debug!("Channel to {} failed: {}", self.destination, e);
            CommError::ConnectionLost {
                address: self.destination.to_string(),
            }
        };

        let (mut reader, mut writer) = self.stream.split();
        write_json(&mut writer, &request).await.map_err(lost)?;
        if let ServiceCall::WriteFileBlock(block) = call {
            write_frame(&mut writer, block).await.map_err(lost)?;
        }

        let response: RpcResponse = read_json(&mut reader)
            .await
            .map_err(lost)?
            .ok_or_else(|| lost(CommError::Other("peer closed the stream".to_string())))?;
        response.into_result()
    }

    pub async fn post_message(&mut self, envelope: Envelope) -> Result<()> {
        self.invoke(&ServiceCall::PostMessage(envelope)).await?;
        Ok(())
    }

    pub async fn open_file_for_write(&mut self, name: &str) -> Result<bool> {
        let result = self
            .invoke(&ServiceCall::OpenFileForWrite {
                name: name.to_string(),
            })
            .await?;
        Ok(result.as_bool().unwrap_or(false))
    }

    pub async fn write_file_block(&mut self, block: Vec<u8>) -> Result<bool> {
        let result = self.invoke(&ServiceCall::WriteFileBlock(block)).await?;
        Ok(result.as_bool().unwrap_or(false))
    }

    pub async fn close_file(&mut self) -> Result<bool> {
        let result = self.invoke(&ServiceCall::CloseFile).await?;
        Ok(result.as_bool().unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::DiagnosticId;
    use crate::ipc::{CommService, IpcServer};
    use crate::network::{ConnectState, RetryConfig};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct Sink {
        envelopes: Mutex<Vec<Envelope>>,
    }

    #[async_trait]
    impl CommService for Sink {
        async fn post_message(&self, envelope: Envelope, _id: DiagnosticId) -> Result<()> {
            self.envelopes.lock().unwrap().push(envelope);
            Ok(())
        }

        async fn open_file_for_write(&self, name: &str) -> bool {
            name.ends_with(".txt")
        }

        async fn write_file_block(&self, _block: &[u8]) -> bool {
            true
        }

        async fn close_file(&self) -> bool {
            true
        }
    }

    fn fast_retry(attempts: u32) -> ConnectMachine {
        ConnectMachine::new(
            RetryConfig::new()
                .with_max_attempts(attempts)
                .with_delay(Duration::from_millis(10)),
        )
    }

    #[tokio::test]
    async fn test_connect_sends_probe() {
        let sink = Arc::new(Sink::default());
        let mut server = IpcServer::bind("127.0.0.1:0", sink.clone()).await.unwrap();
        let dest = EndpointAddress::new("http://127.0.0.1", server.addr().port()).unwrap();

        let mut machine = fast_retry(3);
        let mut channel = Channel::connect(&dest, "http://127.0.0.1:1/MessagePassingComm", &mut machine)
            .await
            .unwrap();
        assert_eq!(machine.state(), ConnectState::Connected);

        channel
            .post_message(Envelope::request("show"))
            .await
            .unwrap();

        let seen = sink.envelopes.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].message_type, MessageType::Connect);
        assert_eq!(seen[0].to, dest.to_string());
        assert_eq!(seen[1].command, "show");

        server.shutdown();
    }

    #[tokio::test]
    async fn test_file_calls_report_remote_status() {
        let sink = Arc::new(Sink::default());
        let mut server = IpcServer::bind("127.0.0.1:0", sink).await.unwrap();
        let dest = EndpointAddress::new("http://127.0.0.1", server.addr().port()).unwrap();

        let mut channel = Channel::open(&dest).await.unwrap();
        assert!(!channel.open_file_for_write("image.png").await.unwrap());
        assert!(channel.open_file_for_write("notes.txt").await.unwrap());
        assert!(channel.write_file_block(vec![1, 2, 3]).await.unwrap());
        assert!(channel.close_file().await.unwrap());

        server.shutdown();
    }

    #[tokio::test]
    async fn test_connect_to_dead_port_exhausts_budget() {
        let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let dest = EndpointAddress::new("http://127.0.0.1", port).unwrap();
        let mut machine = fast_retry(4);
        let err = Channel::connect(&dest, "local", &mut machine)
            .await
            .err()
            .unwrap();

        assert!(matches!(err, CommError::ConnectFailed { attempts: 4, .. }));
        assert_eq!(machine.state(), ConnectState::Failed);
    }

    #[tokio::test]
    async fn test_server_shutdown_loses_channel() {
        let sink = Arc::new(Sink::default());
        let mut server = IpcServer::bind("127.0.0.1:0", sink).await.unwrap();
        let dest = EndpointAddress::new("http://127.0.0.1", server.addr().port()).unwrap();

        let mut channel = Channel::open(&dest).await.unwrap();
        server.shutdown_and_wait().await;

        let err = channel
            .post_message(Envelope::request("late"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommError::ConnectionLost { .. }));
    }
}
