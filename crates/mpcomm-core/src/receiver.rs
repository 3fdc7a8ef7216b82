//! Receiving half of an endpoint.
//!
//! A [`Receiver`] binds a listener serving the remote-callable surface and
//! deposits every inbound envelope into its delivery queue. The queue is an
//! explicit instance: it is either created by the receiver or injected so a
//! successor receiver can keep feeding the same consumer.
//!
//! # File sessions
//!
//! At most one upload session exists per receiver. Calls from concurrent
//! uploaders are serialized per call but not per session, so two clients
//! uploading at once interleave into whichever file was opened last.

use crate::address::EndpointAddress;
use crate::config::ReceiverConfig;
use crate::envelope::{DiagnosticId, Envelope, MessageType};
use crate::ipc::{CommService, IpcServer, IpcServerHandle};
use crate::queue::DeliveryQueue;
use crate::{CommError, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

struct FileSession {
    path: PathBuf,
    file: tokio::fs::File,
}

/// Service object reachable from inbound connections.
struct Inbox {
    queue: Arc<DeliveryQueue<Envelope>>,
    file_root: PathBuf,
    session: tokio::sync::Mutex<Option<FileSession>>,
    last_error: RwLock<Option<String>>,
    closed: watch::Sender<bool>,
}

impl Inbox {
    fn record_error(&self, message: String) {
        warn!("{}", message);
        *self.last_error.write().expect("last error lock poisoned") = Some(message);
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn begin_session(&self, name: &str) -> Result<PathBuf> {
        let file_name = Path::new(name)
            .file_name()
            .ok_or_else(|| CommError::FileSession {
                message: format!("invalid upload file name {:?}", name),
            })?;

        tokio::fs::create_dir_all(&self.file_root)
            .await
            .map_err(|e| CommError::io_with_path(e, &self.file_root))?;

        let path = self.file_root.join(file_name);
        let file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| CommError::io_with_path(e, &path))?;

        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            warn!(
                "Abandoning unfinished upload of {} for {}",
                previous.path.display(),
                path.display()
            );
        }
        *session = Some(FileSession {
            path: path.clone(),
            file,
        });
        Ok(path)
    }

    async fn append(&self, block: &[u8]) -> Result<()> {
        let mut session = self.session.lock().await;
        let session = session.as_mut().ok_or_else(|| CommError::FileSession {
            message: "writeFileBlock without an open file".to_string(),
        })?;
        session
            .file
            .write_all(block)
            .await
            .map_err(|e| CommError::io_with_path(e, &session.path))
    }

    async fn finish_session(&self) -> Result<PathBuf> {
        let session = self.session.lock().await.take();
        let mut session = session.ok_or_else(|| CommError::FileSession {
            message: "closeFile without an open file".to_string(),
        })?;
        session
            .file
            .flush()
            .await
            .map_err(|e| CommError::io_with_path(e, &session.path))?;
        Ok(session.path)
    }
}

#[async_trait]
impl CommService for Inbox {
    async fn post_message(&self, mut envelope: Envelope, id: DiagnosticId) -> Result<()> {
        if self.is_closed() {
            return Err(CommError::ReceiverClosed);
        }
        envelope.stamp(id);
        debug!(
            "Received {} '{}' from {} ({})",
            envelope.message_type, envelope.command, envelope.from, id
        );
        self.queue.enqueue(envelope);
        Ok(())
    }

    async fn open_file_for_write(&self, name: &str) -> bool {
        match self.begin_session(name).await {
            Ok(path) => {
                info!("Receiving file {}", path.display());
                true
            }
            Err(e) => {
                self.record_error(format!("openFileForWrite({}) failed: {}", name, e));
                false
            }
        }
    }

    async fn write_file_block(&self, block: &[u8]) -> bool {
        match self.append(block).await {
            Ok(()) => true,
            Err(e) => {
                self.record_error(format!("writeFileBlock failed: {}", e));
                false
            }
        }
    }

    async fn close_file(&self) -> bool {
        match self.finish_session().await {
            Ok(path) => {
                info!("Finished receiving {}", path.display());
                true
            }
            Err(e) => {
                self.record_error(format!("closeFile failed: {}", e));
                false
            }
        }
    }
}

/// Listener plus inbound delivery queue for one local endpoint.
pub struct Receiver {
    inbox: Arc<Inbox>,
    server: Mutex<Option<IpcServerHandle>>,
    endpoint: Option<EndpointAddress>,
    local_addr: Option<SocketAddr>,
    restart_failed: bool,
}

impl Receiver {
    /// Create an unstarted receiver with its own inbound queue.
    pub fn new(config: ReceiverConfig) -> Self {
        Self::with_queue(config, Arc::new(DeliveryQueue::new()))
    }

    /// Create an unstarted receiver that delivers into `queue`.
    pub fn with_queue(config: ReceiverConfig, queue: Arc<DeliveryQueue<Envelope>>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inbox: Arc::new(Inbox {
                queue,
                file_root: config.file_root,
                session: tokio::sync::Mutex::new(None),
                last_error: RwLock::new(None),
                closed,
            }),
            server: Mutex::new(None),
            endpoint: None,
            local_addr: None,
            restart_failed: false,
        }
    }

    /// Bind the listener for `base_address:port`.
    ///
    /// Port 0 binds a free port; `endpoint()` then reports the real one.
    /// Failure is reported once and never retried.
    pub async fn start(&mut self, base_address: &str, port: u16) -> bool {
        if self.server.get_mut().expect("server lock poisoned").is_some() {
            self.inbox
                .record_error(format!("Receiver already listening on {:?}", self.local_addr));
            return false;
        }

        let requested = match EndpointAddress::new(base_address, port) {
            Ok(address) => address,
            Err(e) => {
                self.restart_failed = true;
                self.inbox.record_error(e.to_string());
                return false;
            }
        };

        match IpcServer::bind(&requested.socket_target(), self.inbox.clone()).await {
            Ok(handle) => {
                let addr = handle.addr();
                let endpoint = requested.with_port(addr.port());
                info!("Receiver started on {}", endpoint);
                self.endpoint = Some(endpoint);
                self.local_addr = Some(addr);
                self.restart_failed = false;
                self.inbox.closed.send_replace(false);
                *self.server.get_mut().expect("server lock poisoned") = Some(handle);
                true
            }
            Err(e) => {
                error!("Receiver failed to start on {}: {}", requested, e);
                self.restart_failed = true;
                self.inbox.record_error(e.to_string());
                false
            }
        }
    }

    /// Wait for the next application envelope.
    ///
    /// Handshake probes are discarded. A `closeReceiver` envelope closes
    /// this receiver and is still returned. Once closed, queued envelopes
    /// drain normally and then `ReceiverClosed` is returned.
    pub async fn get_message(&self) -> Result<Envelope> {
        let mut closed = self.inbox.closed.subscribe();

        loop {
            let envelope = match self.inbox.queue.try_dequeue() {
                Some(envelope) => envelope,
                None => {
                    if *closed.borrow_and_update() {
                        return Err(CommError::ReceiverClosed);
                    }
                    tokio::select! {
                        envelope = self.inbox.queue.dequeue() => envelope,
                        _ = closed.changed() => continue,
                    }
                }
            };

            match envelope.message_type {
                MessageType::Connect => {
                    debug!("Discarding handshake probe from {}", envelope.from);
                    continue;
                }
                MessageType::CloseReceiver => {
                    info!("closeReceiver received from {}", envelope.from);
                    self.close().await;
                    return Ok(envelope);
                }
                _ => return Ok(envelope),
            }
        }
    }

    /// Advisory count of queued envelopes.
    pub fn size(&self) -> usize {
        self.inbox.queue.size()
    }

    /// Stop accepting inbound calls and release the listener. Idempotent.
    pub async fn close(&self) {
        self.inbox.closed.send_replace(true);
        let handle = self.server.lock().expect("server lock poisoned").take();
        if let Some(mut handle) = handle {
            handle.shutdown_and_wait().await;
            if let Some(endpoint) = &self.endpoint {
                info!("Receiver on {} closed", endpoint);
            }
        }
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue<Envelope>> {
        &self.inbox.queue
    }

    pub fn endpoint(&self) -> Option<&EndpointAddress> {
        self.endpoint.as_ref()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }

    /// Whether the most recent `start` failed to bind.
    pub fn restart_failed(&self) -> bool {
        self.restart_failed
    }

    pub fn last_error(&self) -> Option<String> {
        self.inbox
            .last_error
            .read()
            .expect("last error lock poisoned")
            .clone()
    }
}
