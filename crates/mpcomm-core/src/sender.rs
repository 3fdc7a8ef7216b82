//! Sending half of an endpoint.
//!
//! A [`Sender`] owns one worker task that drains the outbound queue and is
//! the sole owner of the outbound [`Channel`]. Everything touching that
//! channel, including explicit `connect` and `close` requests, travels
//! through the queue so that it is processed in order with envelopes.
//!
//! Delivery is best effort: when a destination cannot be reached within the
//! retry budget the envelope is dropped, logged and recorded as the last
//! error. File uploads bypass the queue and use a dedicated channel.

use crate::address::EndpointAddress;
use crate::config::SenderConfig;
use crate::envelope::{Envelope, MessageType};
use crate::ipc::Channel;
use crate::network::{ConnectMachine, ConnectState};
use crate::queue::DeliveryQueue;
use crate::{CommError, Result};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tokio::io::AsyncReadExt;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

/// Work items consumed by the worker task.
enum Outbound {
    Deliver(Envelope),
    Connect {
        destination: EndpointAddress,
        done: oneshot::Sender<bool>,
    },
    Release {
        done: oneshot::Sender<()>,
    },
}

/// State the worker publishes for observers.
#[derive(Default)]
struct Shared {
    last_error: RwLock<Option<String>>,
    destination: RwLock<Option<EndpointAddress>>,
}

impl Shared {
    fn record_error(&self, message: String) {
        warn!("{}", message);
        *self.last_error.write().expect("last error lock poisoned") = Some(message);
    }

    fn set_destination(&self, destination: Option<EndpointAddress>) {
        *self.destination.write().expect("destination lock poisoned") = destination;
    }
}

/// Outbound side of an endpoint.
pub struct Sender {
    local: EndpointAddress,
    config: SenderConfig,
    outbound: Arc<DeliveryQueue<Outbound>>,
    shared: Arc<Shared>,
    state: watch::Receiver<ConnectState>,
    stopped: watch::Receiver<bool>,
}

impl Sender {
    /// Create a sender identified by `local` and start its worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(local: EndpointAddress) -> Self {
        Self::with_config(local, SenderConfig::default())
    }

    pub fn with_config(local: EndpointAddress, config: SenderConfig) -> Self {
        let outbound = Arc::new(DeliveryQueue::new());
        let shared = Arc::new(Shared::default());
        let (stopped_tx, stopped) = watch::channel(false);
        let (state_tx, state) = watch::channel(ConnectState::Idle);

        let worker = Worker {
            local: local.to_string(),
            outbound: outbound.clone(),
            shared: shared.clone(),
            channel: None,
            machine: ConnectMachine::new(config.retry.clone()).with_observer(state_tx),
        };
        tokio::spawn(worker.run(stopped_tx));

        Self {
            local,
            config,
            outbound,
            shared,
            state,
            stopped,
        }
    }

    /// Queue `envelope` for delivery to `envelope.to`. Never blocks.
    ///
    /// Once the worker has exited nothing drains the queue, so the envelope
    /// is dropped and recorded as the last error instead.
    pub fn post_message(&self, envelope: Envelope) {
        if *self.stopped.borrow() {
            self.shared.record_error(format!(
                "Dropped {} '{}' for {}: sender for {} is stopped",
                envelope.message_type, envelope.command, envelope.to, self.local
            ));
            return;
        }
        self.outbound.enqueue(Outbound::Deliver(envelope));
    }

    /// Connect the worker's channel to `destination`, waiting for the
    /// outcome. Gives up after the configured number of attempts.
    pub async fn connect(&self, destination: &EndpointAddress) -> bool {
        let (done, rx) = oneshot::channel();
        self.outbound.enqueue(Outbound::Connect {
            destination: destination.clone(),
            done,
        });
        self.round_trip(rx).await.unwrap_or(false)
    }

    /// Deliver everything queued so far, then release the channel.
    pub async fn close(&self) {
        let (done, rx) = oneshot::channel();
        self.outbound.enqueue(Outbound::Release { done });
        self.round_trip(rx).await;
    }

    /// Stop the worker after it drains the queue.
    pub async fn stop(&self) {
        self.outbound
            .enqueue(Outbound::Deliver(Envelope::new(MessageType::CloseSender)));
        worker_exit(self.stopped.clone()).await;
    }

    async fn round_trip<T>(&self, rx: oneshot::Receiver<T>) -> Option<T> {
        tokio::select! {
            biased;
            result = rx => result.ok(),
            _ = worker_exit(self.stopped.clone()) => None,
        }
    }

    /// Upload `dir/filename` to the currently connected destination.
    pub async fn post_file(&self, dir: impl AsRef<Path>, filename: &str) -> bool {
        match self.current_destination() {
            Some(destination) => self.post_file_to(&destination, dir, filename).await,
            None => {
                self.shared.record_error(format!(
                    "postFile({}) failed: {}",
                    filename,
                    CommError::NotConnected
                ));
                false
            }
        }
    }

    /// Upload `dir/filename` to `destination` over a dedicated channel.
    ///
    /// The remote file is named `filename`. Any local I/O error or remote
    /// refusal aborts the transfer.
    pub async fn post_file_to(
        &self,
        destination: &EndpointAddress,
        dir: impl AsRef<Path>,
        filename: &str,
    ) -> bool {
        match self.upload(destination, dir.as_ref(), filename).await {
            Ok(bytes) => {
                info!("Uploaded {} ({} bytes) to {}", filename, bytes, destination);
                true
            }
            Err(e) => {
                self.shared
                    .record_error(format!("postFile({}) failed: {}", filename, e));
                false
            }
        }
    }

    async fn upload(&self, destination: &EndpointAddress, dir: &Path, filename: &str) -> Result<u64> {
        let path = dir.join(filename);
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| CommError::io_with_path(e, &path))?;
        let mut remaining = file
            .metadata()
            .await
            .map_err(|e| CommError::io_with_path(e, &path))?
            .len();

        let mut machine = ConnectMachine::new(self.config.retry.clone());
        let mut channel = Channel::connect(destination, &self.local.to_string(), &mut machine).await?;

        if !channel.open_file_for_write(filename).await? {
            return Err(CommError::FileSession {
                message: format!("{} refused to open {}", destination, filename),
            });
        }

        let mut buffer = vec![0u8; self.config.block_size];
        let mut sent = 0u64;
        while remaining > 0 {
            let len = remaining.min(self.config.block_size as u64) as usize;
            file.read_exact(&mut buffer[..len])
                .await
                .map_err(|e| CommError::io_with_path(e, &path))?;
            if !channel.write_file_block(buffer[..len].to_vec()).await? {
                return Err(CommError::FileSession {
                    message: format!("{} rejected block at offset {}", destination, sent),
                });
            }
            remaining -= len as u64;
            sent += len as u64;
        }

        if !channel.close_file().await? {
            return Err(CommError::FileSession {
                message: format!("{} failed to close {}", destination, filename),
            });
        }
        Ok(sent)
    }

    pub fn local_address(&self) -> &EndpointAddress {
        &self.local
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Destination of the worker's open channel, if any.
    pub fn current_destination(&self) -> Option<EndpointAddress> {
        self.shared
            .destination
            .read()
            .expect("destination lock poisoned")
            .clone()
    }

    /// Current state of the worker's connection machine, including each
    /// attempt while a connect is being retried.
    pub fn connect_state(&self) -> ConnectState {
        *self.state.borrow()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared
            .last_error
            .read()
            .expect("last error lock poisoned")
            .clone()
    }

    /// Whether the worker task has exited.
    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        self.outbound
            .enqueue(Outbound::Deliver(Envelope::new(MessageType::CloseSender)));
    }
}

/// Resolves once the worker has exited.
async fn worker_exit(mut stopped: watch::Receiver<bool>) {
    while !*stopped.borrow_and_update() {
        if stopped.changed().await.is_err() {
            return;
        }
    }
}

struct Worker {
    local: String,
    outbound: Arc<DeliveryQueue<Outbound>>,
    shared: Arc<Shared>,
    channel: Option<Channel>,
    machine: ConnectMachine,
}

impl Worker {
    async fn run(mut self, stopped: watch::Sender<bool>) {
        debug!("Sender worker for {} started", self.local);

        loop {
            match self.outbound.dequeue().await {
                Outbound::Deliver(envelope) if envelope.message_type == MessageType::CloseSender => {
                    self.release();
                    break;
                }
                Outbound::Deliver(envelope) => self.deliver(envelope).await,
                Outbound::Connect { destination, done } => {
                    let connected = self.confirm(&destination).await;
                    let _ = done.send(connected);
                }
                Outbound::Release { done } => {
                    self.release();
                    let _ = done.send(());
                }
            }
        }

        stopped.send_replace(true);
        debug!("Sender worker for {} exited", self.local);
    }

    fn is_connected_to(&self, destination: &EndpointAddress) -> bool {
        self.channel
            .as_ref()
            .is_some_and(|channel| channel.destination() == destination)
    }

    /// Probe an already open channel to `destination`, or dial it.
    ///
    /// A channel whose peer has gone away is released and redialed under the
    /// full retry budget.
    async fn confirm(&mut self, destination: &EndpointAddress) -> bool {
        if !self.is_connected_to(destination) {
            return self.switch_to(destination).await;
        }

        let handshake = Envelope::new(MessageType::Connect)
            .with_to(destination.to_string())
            .with_from(self.local.clone());
        match self.send(handshake).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Channel to {} is stale ({}), reconnecting", destination, e);
                self.release();
                self.switch_to(destination).await
            }
        }
    }

    async fn deliver(&mut self, envelope: Envelope) {
        let destination = match EndpointAddress::parse(&envelope.to) {
            Ok(destination) => destination,
            Err(e) => {
                self.drop_envelope(&envelope, &e);
                return;
            }
        };

        if !self.is_connected_to(&destination) && !self.switch_to(&destination).await {
            let err = CommError::ConnectFailed {
                address: destination.to_string(),
                attempts: self.machine.stats().attempts,
                message: self
                    .machine
                    .stats()
                    .last_error
                    .clone()
                    .unwrap_or_default(),
            };
            self.drop_envelope(&envelope, &err);
            return;
        }

        if let Err(e) = self.send(envelope.clone()).await {
            // The peer may have restarted: one fresh connection, then give up.
            debug!("Send to {} failed ({}), reconnecting", destination, e);
            self.release();
            if !self.switch_to(&destination).await {
                self.drop_envelope(&envelope, &e);
                return;
            }
            if let Err(e) = self.send(envelope.clone()).await {
                self.release();
                self.drop_envelope(&envelope, &e);
            }
        }
    }

    async fn send(&mut self, envelope: Envelope) -> Result<()> {
        match self.channel.as_mut() {
            Some(channel) => channel.post_message(envelope).await,
            None => Err(CommError::NotConnected),
        }
    }

    /// Release any open channel, then connect to `destination`.
    async fn switch_to(&mut self, destination: &EndpointAddress) -> bool {
        if let Some(current) = &self.channel {
            info!("Switching destination {} -> {}", current.destination(), destination);
        }
        self.release();

        match Channel::connect(destination, &self.local, &mut self.machine).await {
            Ok(channel) => {
                self.channel = Some(channel);
                self.shared.set_destination(Some(destination.clone()));
                true
            }
            Err(e) => {
                self.shared.record_error(e.to_string());
                false
            }
        }
    }

    fn release(&mut self) {
        if let Some(channel) = self.channel.take() {
            debug!("Releasing channel to {}", channel.destination());
        }
        self.machine.reset();
        self.shared.set_destination(None);
    }

    fn drop_envelope(&self, envelope: &Envelope, reason: &CommError) {
        self.shared.record_error(format!(
            "Dropped {} '{}' for {}: {}",
            envelope.message_type, envelope.command, envelope.to, reason
        ));
    }
}
