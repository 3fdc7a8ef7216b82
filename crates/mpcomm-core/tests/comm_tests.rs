//! Integration tests for the Comm endpoint facade.
//!
//! Every endpoint binds 127.0.0.1 on an OS-assigned port and uses a short
//! retry delay so failure paths finish quickly.

use mpcomm::{
    Comm, CommError, ConnectState, EndpointAddress, Envelope, MessageType, ReceiverConfig,
    RetryConfig, SenderConfig,
};
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const LOCALHOST: &str = "http://127.0.0.1";

fn fast_retry() -> RetryConfig {
    RetryConfig::new().with_delay(Duration::from_millis(20))
}

async fn endpoint_with(sender: SenderConfig, receiver: ReceiverConfig) -> Comm {
    Comm::with_config(LOCALHOST, 0, sender, receiver)
        .await
        .expect("Failed to start endpoint")
}

async fn endpoint() -> Comm {
    endpoint_with(
        SenderConfig::new().with_retry(fast_retry()),
        ReceiverConfig::default(),
    )
    .await
}

/// A port nothing listens on.
async fn unused_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn next_message(comm: &Comm) -> Envelope {
    tokio::time::timeout(Duration::from_secs(5), comm.get_message())
        .await
        .expect("timed out waiting for an envelope")
        .expect("receiver failed")
}

#[tokio::test]
async fn test_envelopes_arrive_field_equal_and_in_order() {
    let client = endpoint().await;
    let server = endpoint().await;

    let sent: Vec<Envelope> = (0..25)
        .map(|i| {
            Envelope::request(format!("cmd-{}", i))
                .with_to(server.endpoint().to_string())
                .with_from(client.endpoint().to_string())
                .with_author("tester")
                .with_arguments([format!("arg-{}", i), "second".to_string()])
        })
        .collect();

    for envelope in &sent {
        client.post_message(envelope.clone());
    }

    for expected in &sent {
        let got = next_message(&server).await;
        assert_eq!(&got, expected);
        assert!(got.diagnostic_id.is_some());
    }
    assert_eq!(server.size(), 0);
}

#[tokio::test]
async fn test_handshake_probe_is_never_observed() {
    let client = endpoint().await;
    let server = endpoint().await;

    assert!(client.connect(server.endpoint()).await);
    client.post_message(Envelope::request("after").with_to(server.endpoint().to_string()));

    let got = next_message(&server).await;
    assert_eq!(got.message_type, MessageType::Request);
    assert_eq!(got.command, "after");
}

#[tokio::test]
async fn test_close_receiver_observed_once_then_sends_fail() {
    let client = endpoint().await;
    let server = endpoint().await;
    let to = server.endpoint().to_string();

    client.post_message(Envelope::new(MessageType::CloseReceiver).with_to(to.clone()));

    let got = next_message(&server).await;
    assert_eq!(got.message_type, MessageType::CloseReceiver);

    let err = server.get_message().await.unwrap_err();
    assert!(matches!(err, CommError::ReceiverClosed));

    client.post_message(Envelope::request("too late").with_to(to));
    client.close_connection().await;

    let last_error = client.sender().last_error().unwrap();
    assert!(last_error.contains("Dropped request 'too late'"), "{}", last_error);
}

#[tokio::test]
async fn test_routes_to_two_destinations() {
    let client = endpoint().await;
    let first = endpoint().await;
    let second = endpoint().await;

    client.post_message(Envelope::request("for-first").with_to(first.endpoint().to_string()));
    client.post_message(Envelope::request("for-second").with_to(second.endpoint().to_string()));

    assert_eq!(next_message(&first).await.command, "for-first");
    assert_eq!(next_message(&second).await.command, "for-second");
    assert_eq!(
        client.sender().current_destination().as_ref(),
        Some(second.endpoint())
    );
}

#[tokio::test]
async fn test_connect_without_listener_uses_whole_budget() {
    let client = endpoint().await;
    let dead = EndpointAddress::new(LOCALHOST, unused_port().await).unwrap();

    let started = Instant::now();
    assert!(!client.connect(&dead).await);
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(9 * 20), "{:?}", elapsed);
    assert_eq!(client.sender().connect_state(), ConnectState::Failed);
    let last_error = client.sender().last_error().unwrap();
    assert!(last_error.contains("after 10 attempts"), "{}", last_error);
}

#[tokio::test]
async fn test_restart_on_unused_port() {
    let mut comm = endpoint().await;
    let peer = endpoint().await;
    let original = comm.endpoint().clone();
    let new_port = unused_port().await;

    assert!(comm.restart(new_port).await);
    assert_eq!(comm.endpoint().port(), new_port);
    assert_eq!(comm.sender_identity(), &original);

    peer.post_message(Envelope::request("hello again").with_to(comm.endpoint().to_string()));
    assert_eq!(next_message(&comm).await.command, "hello again");

    comm.post_message(Envelope::request("and back").with_to(peer.endpoint().to_string()));
    assert_eq!(next_message(&peer).await.command, "and back");
}

#[tokio::test]
async fn test_restart_on_bound_port_keeps_prior_receiver() {
    let mut comm = endpoint().await;
    let peer = endpoint().await;
    let port = comm.endpoint().port();

    assert!(!comm.restart(port).await);
    assert_eq!(comm.endpoint().port(), port);
    assert!(!comm.receiver().is_closed());

    peer.post_message(Envelope::request("still here").with_to(comm.endpoint().to_string()));
    assert_eq!(next_message(&comm).await.command, "still here");
}

#[tokio::test]
async fn test_close_shuts_down_both_halves() {
    let comm = endpoint().await;
    comm.close().await;

    assert!(comm.receiver().is_closed());
    assert!(comm.sender().is_stopped());
    assert!(matches!(
        comm.get_message().await,
        Err(CommError::ReceiverClosed)
    ));
}

mod post_file {
    use super::*;

    const BLOCK: usize = 16;

    struct Transfer {
        _dir: TempDir,
        source: std::path::PathBuf,
        client: Comm,
        server: Comm,
        uploads: std::path::PathBuf,
    }

    async fn transfer() -> Transfer {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let source = dir.path().join("outgoing");
        let uploads = dir.path().join("incoming");
        std::fs::create_dir_all(&source).unwrap();

        let client = endpoint_with(
            SenderConfig::new()
                .with_retry(fast_retry())
                .with_block_size(BLOCK),
            ReceiverConfig::default(),
        )
        .await;
        let server = endpoint_with(
            SenderConfig::new().with_retry(fast_retry()),
            ReceiverConfig::new().with_file_root(&uploads),
        )
        .await;

        Transfer {
            _dir: dir,
            source,
            client,
            server,
            uploads,
        }
    }

    fn write_source(dir: &Path, name: &str, len: usize) -> Vec<u8> {
        let bytes: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
        std::fs::write(dir.join(name), &bytes).unwrap();
        bytes
    }

    async fn round_trip(len: usize) {
        let t = transfer().await;
        let name = format!("payload-{}.bin", len);
        let bytes = write_source(&t.source, &name, len);

        assert!(t.client.connect(t.server.endpoint()).await);
        assert!(
            t.client.post_file(&t.source, &name).await,
            "{:?}",
            t.client.sender().last_error()
        );

        let received = std::fs::read(t.uploads.join(&name)).unwrap();
        assert_eq!(received, bytes);
    }

    #[tokio::test]
    async fn test_empty_file() {
        round_trip(0).await;
    }

    #[tokio::test]
    async fn test_smaller_than_one_block() {
        round_trip(BLOCK - 3).await;
    }

    #[tokio::test]
    async fn test_exact_multiple_of_block() {
        round_trip(BLOCK * 4).await;
    }

    #[tokio::test]
    async fn test_multiple_blocks_with_partial_tail() {
        round_trip(BLOCK * 5 + 7).await;
    }

    #[tokio::test]
    async fn test_post_file_to_explicit_destination() {
        let t = transfer().await;
        let bytes = write_source(&t.source, "direct.bin", 100);

        assert!(
            t.client
                .post_file_to(t.server.endpoint(), &t.source, "direct.bin")
                .await
        );
        assert_eq!(std::fs::read(t.uploads.join("direct.bin")).unwrap(), bytes);
    }

    #[tokio::test]
    async fn test_missing_source_reports_failure() {
        let t = transfer().await;

        assert!(t.client.connect(t.server.endpoint()).await);
        assert!(!t.client.post_file(&t.source, "absent.bin").await);
        assert!(t
            .client
            .sender()
            .last_error()
            .unwrap()
            .contains("absent.bin"));
        assert!(!t.uploads.join("absent.bin").exists());
    }
    #[tokio::test]
    async fn test_remote_refusal_aborts_transfer() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        write_source(dir.path(), "report.bin", BLOCK * 2);
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"occupied").unwrap();

        let client = endpoint_with(
            SenderConfig::new()
                .with_retry(fast_retry())
                .with_block_size(BLOCK),
            ReceiverConfig::default(),
        )
        .await;
        let server = endpoint_with(
            SenderConfig::new().with_retry(fast_retry()),
            ReceiverConfig::new().with_file_root(&blocker),
        )
        .await;

        assert!(client.connect(server.endpoint()).await);
        assert!(!client.post_file(dir.path(), "report.bin").await);

        let err = client.sender().last_error().unwrap();
        assert!(err.contains("refused to open report.bin"), "{}", err);
        assert!(server.receiver().last_error().is_some());
        assert_eq!(std::fs::read(&blocker).unwrap(), b"occupied");
    }
}
