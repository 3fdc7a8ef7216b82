//! Endpoint facade pairing one [`Receiver`] with one [`Sender`].

use crate::address::EndpointAddress;
use crate::config::{ReceiverConfig, SenderConfig};
use crate::envelope::Envelope;
use crate::queue::DeliveryQueue;
use crate::receiver::Receiver;
use crate::sender::Sender;
use crate::{CommError, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// A local endpoint that can both send and receive.
///
/// The receiver listens on `base_address:port`; the sender uses that same
/// endpoint as its identity. The inbound queue outlives individual
/// receivers, so envelopes already queued survive a [`restart`](Comm::restart).
pub struct Comm {
    base_address: String,
    endpoint: EndpointAddress,
    sender_config: SenderConfig,
    receiver_config: ReceiverConfig,
    inbound: Arc<DeliveryQueue<Envelope>>,
    receiver: Receiver,
    sender: Sender,
}

impl Comm {
    /// Bind a receiver on `base_address:port` and start a sender.
    pub async fn new(base_address: &str, port: u16) -> Result<Self> {
        Self::with_config(
            base_address,
            port,
            SenderConfig::default(),
            ReceiverConfig::default(),
        )
        .await
    }

    pub async fn with_config(
        base_address: &str,
        port: u16,
        sender_config: SenderConfig,
        receiver_config: ReceiverConfig,
    ) -> Result<Self> {
        let inbound = Arc::new(DeliveryQueue::new());
        let mut receiver = Receiver::with_queue(receiver_config.clone(), inbound.clone());

        if !receiver.start(base_address, port).await {
            return Err(CommError::Other(format!(
                "receiver failed to start on {}:{}: {}",
                base_address,
                port,
                receiver.last_error().unwrap_or_default()
            )));
        }
        let endpoint = receiver
            .endpoint()
            .cloned()
            .ok_or_else(|| CommError::Other("receiver started without an endpoint".to_string()))?;

        let sender = Sender::with_config(endpoint.clone(), sender_config.clone());
        info!("Comm endpoint ready at {}", endpoint);

        Ok(Self {
            base_address: base_address.to_string(),
            endpoint,
            sender_config,
            receiver_config,
            inbound,
            receiver,
            sender,
        })
    }

    pub fn post_message(&self, envelope: Envelope) {
        self.sender.post_message(envelope);
    }

    pub async fn get_message(&self) -> Result<Envelope> {
        self.receiver.get_message().await
    }

    pub async fn connect(&self, destination: &EndpointAddress) -> bool {
        self.sender.connect(destination).await
    }

    pub async fn post_file(&self, dir: impl AsRef<Path>, filename: &str) -> bool {
        self.sender.post_file(dir, filename).await
    }

    pub async fn post_file_to(
        &self,
        destination: &EndpointAddress,
        dir: impl AsRef<Path>,
        filename: &str,
    ) -> bool {
        self.sender.post_file_to(destination, dir, filename).await
    }

    /// Advisory inbound queue depth.
    pub fn size(&self) -> usize {
        self.inbound.size()
    }

    /// Release the sender's channel. The receiver keeps listening.
    pub async fn close_connection(&self) {
        self.sender.close().await;
    }

    /// Shut down both halves.
    pub async fn close(&self) {
        self.receiver.close().await;
        self.sender.close().await;
        self.sender.stop().await;
    }

    /// Move the receiver to `new_port` on the same base address.
    ///
    /// The replacement receiver is bound first. If that fails, nothing
    /// changes and `false` is returned. On success the old receiver is
    /// closed and a fresh sender, still identified by the original
    /// endpoint, replaces the old one.
    pub async fn restart(&mut self, new_port: u16) -> bool {
        let mut receiver = Receiver::with_queue(self.receiver_config.clone(), self.inbound.clone());
        if !receiver.start(&self.base_address, new_port).await {
            warn!(
                "Restart on port {} failed: {}",
                new_port,
                receiver.last_error().unwrap_or_default()
            );
            return false;
        }

        self.receiver.close().await;
        self.receiver = receiver;

        self.sender.close().await;
        self.sender = Sender::with_config(self.endpoint.clone(), self.sender_config.clone());

        if let Some(endpoint) = self.receiver.endpoint() {
            info!("Comm restarted, now listening on {}", endpoint);
        }
        true
    }

    /// Endpoint the current receiver listens on.
    pub fn endpoint(&self) -> &EndpointAddress {
        self.receiver.endpoint().unwrap_or(&self.endpoint)
    }

    /// Identity the sender was created with.
    pub fn sender_identity(&self) -> &EndpointAddress {
        &self.endpoint
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }
}
