//! TCP listener exposing a [`CommService`].
//!
//! Binds an explicit `host:port`, accepts connections, and handles each one in
//! its own spawned task. Every request is decoded into a [`ServiceCall`] and
//! dispatched by method name.
//!
//! # Shutdown
//!
//! `IpcServerHandle::shutdown` stops the accept loop and tells every active
//! connection handler to return. A handler that already read a request when
//! the signal lands drops it unanswered, so callers on existing channels
//! observe a lost connection rather than a late delivery.

use super::protocol::{read_frame, write_json, RpcRequest, RpcResponse};
use super::service::{dispatch, CommService, ServiceCall};
use crate::config::IpcConfig;
use crate::envelope::DiagnosticId;
use crate::{CommError, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

/// Handle to a running listener. Dropping it shuts the listener down.
pub struct IpcServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl IpcServerHandle {
    /// Address the listener is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting and signal all connection handlers to close.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
    }

    /// Shut down and wait until the listening socket has been released.
    pub async fn shutdown_and_wait(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                debug!("IPC accept loop ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for IpcServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Listener that serves a [`CommService`] over TCP.
pub struct IpcServer;

impl IpcServer {
    /// Bind `target` (`host:port`, port 0 picks a free one) and start serving.
    pub async fn bind<S: CommService>(target: &str, service: Arc<S>) -> Result<IpcServerHandle> {
        let listener = TcpListener::bind(target)
            .await
            .map_err(|source| CommError::Bind {
                address: target.to_string(),
                source,
            })?;
        let addr = listener.local_addr()?;

        info!("IPC server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            service,
            shutdown_rx,
            conn_shutdown_rx,
        ));

        Ok(IpcServerHandle {
            addr,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop<S: CommService>(
        listener: TcpListener,
        service: Arc<S>,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
    ) {
        let active_connections = Arc::new(AtomicUsize::new(0));
        let next_connection = AtomicU64::new(1);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown_rx => {
                    info!("IPC server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let current = active_connections.load(Ordering::Relaxed);
                            if current >= IpcConfig::MAX_CONNECTIONS {
                                warn!(
                                    "Rejecting connection from {}: at max capacity ({})",
                                    peer_addr,
                                    IpcConfig::MAX_CONNECTIONS
                                );
                                continue;
                            }

                            active_connections.fetch_add(1, Ordering::Relaxed);
                            let connection = next_connection.fetch_add(1, Ordering::Relaxed);
                            let service = service.clone();
                            let conns = active_connections.clone();
                            let mut conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                debug!("Connection {} from {}", connection, peer_addr);
                                if let Err(e) = Self::handle_connection(
                                    stream,
                                    &*service,
                                    connection,
                                    &mut conn_shutdown,
                                )
                                .await
                                {
                                    debug!("Connection {} ended: {}", connection, e);
                                }
                                conns.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection<S: CommService>(
        mut stream: TcpStream,
        service: &S,
        connection: u64,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let (mut reader, mut writer) = stream.split();
        let mut sequence = 0u64;

        loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => return Ok(()),
                result = read_frame(&mut reader) => match result? {
                    Some(f) => f,
                    None => return Ok(()),
                },
            };

            let request: RpcRequest = match serde_json::from_slice(&frame) {
                Ok(req) => req,
                Err(e) => {
                    let response = RpcResponse::error(None, -32700, format!("Parse error: {}", e));
                    write_json(&mut writer, &response).await?;
                    continue;
                }
            };

            let block = if ServiceCall::carries_block(&request.method) {
                match read_frame(&mut reader).await? {
                    Some(bytes) => Some(bytes),
                    None => return Ok(()),
                }
            } else {
                None
            };

            if *shutdown_rx.borrow() {
                return Ok(());
            }

            sequence += 1;
            let id = DiagnosticId {
                connection,
                sequence,
            };
            let response = Self::process_request(request, block, service, id).await;
            write_json(&mut writer, &response).await?;
        }
    }

    async fn process_request<S: CommService>(
        mut request: RpcRequest,
        block: Option<Vec<u8>>,
        service: &S,
        id: DiagnosticId,
    ) -> RpcResponse {
        if !request.is_well_formed() {
            return RpcResponse::error(request.id, -32600, "Invalid Request: expected jsonrpc 2.0");
        }

        if !ServiceCall::is_known(&request.method) {
            return RpcResponse::error(
                request.id,
                -32601,
                format!("Method not found: {}", request.method),
            );
        }

        let params = request.take_params();
        let call = match ServiceCall::decode(&request.method, params, block) {
            Ok(call) => call,
            Err(e) => return RpcResponse::error(request.id, -32602, e.to_string()),
        };

        match dispatch(service, call, id).await {
            Ok(result) => RpcResponse::success(request.id, result),
            Err(e) => RpcResponse::failure(request.id, &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use crate::ipc::protocol::{read_json, write_frame};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Inbox {
        received: Mutex<Vec<(Envelope, DiagnosticId)>>,
        bytes: Mutex<Vec<u8>>,
    }

    #[async_trait]
    impl CommService for Inbox {
        async fn post_message(&self, envelope: Envelope, id: DiagnosticId) -> Result<()> {
            if envelope.command == "fail" {
                return Err(CommError::ReceiverClosed);
            }
            self.received.lock().unwrap().push((envelope, id));
            Ok(())
        }

        async fn open_file_for_write(&self, _name: &str) -> bool {
            true
        }

        async fn write_file_block(&self, block: &[u8]) -> bool {
            self.bytes.lock().unwrap().extend_from_slice(block);
            true
        }

        async fn close_file(&self) -> bool {
            false
        }
    }

    async fn call(stream: &mut TcpStream, call: &ServiceCall) -> RpcResponse {
        let (mut reader, mut writer) = stream.split();
        let request = RpcRequest::new(call.method(), call.params(), 1);
        write_json(&mut writer, &request).await.unwrap();
        if let ServiceCall::WriteFileBlock(block) = call {
            write_frame(&mut writer, block).await.unwrap();
        }
        read_json(&mut reader).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_post_message_is_stamped_per_connection() {
        let inbox = Arc::new(Inbox::default());
        let mut handle = IpcServer::bind("127.0.0.1:0", inbox.clone()).await.unwrap();

        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
        for command in ["one", "two"] {
            let response = call(
                &mut stream,
                &ServiceCall::PostMessage(Envelope::request(command)),
            )
            .await;
            assert_eq!(response.result, Some(serde_json::Value::Bool(true)));
        }

        let received = inbox.received.lock().unwrap().clone();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].0.command, "one");
        assert_eq!(received[0].1.sequence, 1);
        assert_eq!(received[1].1.sequence, 2);
        assert_eq!(received[0].1.connection, received[1].1.connection);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_block_travels_as_raw_frame() {
        let inbox = Arc::new(Inbox::default());
        let mut handle = IpcServer::bind("127.0.0.1:0", inbox.clone()).await.unwrap();

        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
        let response = call(&mut stream, &ServiceCall::WriteFileBlock(vec![0, 159, 255])).await;
        assert_eq!(response.result, Some(serde_json::Value::Bool(true)));

        let response = call(&mut stream, &ServiceCall::CloseFile).await;
        assert_eq!(response.result, Some(serde_json::Value::Bool(false)));

        assert_eq!(*inbox.bytes.lock().unwrap(), vec![0, 159, 255]);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_service_error_becomes_rpc_error() {
        let inbox = Arc::new(Inbox::default());
        let mut handle = IpcServer::bind("127.0.0.1:0", inbox).await.unwrap();

        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
        let response = call(
            &mut stream,
            &ServiceCall::PostMessage(Envelope::request("fail")),
        )
        .await;
        assert_eq!(response.error.unwrap().code, -32002);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_method_and_bad_json() {
        let inbox = Arc::new(Inbox::default());
        let mut handle = IpcServer::bind("127.0.0.1:0", inbox).await.unwrap();

        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
        let (mut reader, mut writer) = stream.split();

        let request = RpcRequest::new("frobnicate", serde_json::json!({}), 9);
        write_json(&mut writer, &request).await.unwrap();
        let response: RpcResponse = read_json(&mut reader).await.unwrap().unwrap();
        assert_eq!(response.error.unwrap().code, -32601);

        write_frame(&mut writer, b"not valid json").await.unwrap();
        let response: RpcResponse = read_json(&mut reader).await.unwrap().unwrap();
        assert_eq!(response.error.unwrap().code, -32700);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_bind_twice_fails() {
        let inbox = Arc::new(Inbox::default());
        let mut first = IpcServer::bind("127.0.0.1:0", inbox.clone()).await.unwrap();
        let target = first.addr().to_string();

        let second = IpcServer::bind(&target, inbox).await;
        assert!(matches!(second, Err(CommError::Bind { .. })));

        first.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_releases_listener_and_connections() {
        let inbox = Arc::new(Inbox::default());
        let mut handle = IpcServer::bind("127.0.0.1:0", inbox).await.unwrap();
        let addr = handle.addr();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        handle.shutdown_and_wait().await;

        assert!(TcpStream::connect(addr).await.is_err());

        let (mut reader, _writer) = stream.split();
        let eof = tokio::time::timeout(std::time::Duration::from_secs(2), read_frame(&mut reader))
            .await
            .expect("connection should be closed by the server");
        assert!(matches!(eof, Ok(None) | Err(_)));
    }
}
