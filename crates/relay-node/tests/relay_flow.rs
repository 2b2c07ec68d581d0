//! End-to-end relay flows against real TCP listeners

use bytes::Bytes;
use relay_node::{RelayNode, SocketRegistry, StreamEntry};
use relay_proto::{ControlMessage, Payload};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Grace window short enough for tests to observe both sides of it
const TEST_GRACE: Duration = Duration::from_millis(200);

fn test_node() -> (RelayNode, mpsc::Receiver<ControlMessage>) {
    let (tx, rx) = mpsc::channel(64);
    let registry = SocketRegistry::with_grace(TEST_GRACE);
    let node = RelayNode::with_registry(registry, tx, Arc::new(AtomicBool::new(true)));
    (node, rx)
}

async fn expect_message(rx: &mut mpsc::Receiver<ControlMessage>) -> ControlMessage {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for outbound message")
        .expect("outbound channel closed")
}

fn chunk_bytes(message: ControlMessage) -> (String, Vec<u8>) {
    match message {
        ControlMessage::ServerData {
            correlation_id,
            chunk,
        } => (correlation_id, chunk.decode().unwrap().to_vec()),
        other => panic!("expected server-data, got {:?}", other),
    }
}

#[tokio::test]
async fn test_tunneled_ack_precedes_data() {
    // Tunneled establishment pins IPv6; skip where loopback has none.
    let Ok(listener) = TcpListener::bind("[::1]:0").await else {
        eprintln!("IPv6 loopback unavailable, skipping");
        return;
    };
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket.write_all(b"hello from remote").await.unwrap();
        socket.flush().await.unwrap();
        // Hold the socket open until the test is done reading.
        tokio::time::sleep(Duration::from_secs(1)).await;
    });

    let (node, mut rx) = test_node();
    node.handle_message(ControlMessage::CreateConnection {
        correlation_id: "A".to_string(),
        host: "::1".to_string(),
        port,
        local_address: None,
    })
    .await;

    // Exactly one ack, before any server-data.
    assert_eq!(
        expect_message(&mut rx).await,
        ControlMessage::Connected {
            correlation_id: "A".to_string()
        }
    );

    let (id, bytes) = chunk_bytes(expect_message(&mut rx).await);
    assert_eq!(id, "A");
    assert!(b"hello from remote".starts_with(&bytes[..]));

    server.abort();
}

#[tokio::test]
async fn test_immediate_payload_written_first() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let request = b"GET / HTTP/1.1\r\n\r\n";
    let extra = b"extra client bytes";

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        // The initial payload must arrive before any queued client data.
        let mut received = vec![0u8; request.len() + extra.len()];
        socket.read_exact(&mut received).await.unwrap();
        assert_eq!(&received[..request.len()], request);
        assert_eq!(&received[request.len()..], extra);

        socket.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
    });

    let (node, mut rx) = test_node();
    node.handle_message(ControlMessage::Request {
        correlation_id: "B".to_string(),
        host: "127.0.0.1".to_string(),
        port,
        local_address: None,
        initial_payload: Some(Payload::from_bytes(request)),
    })
    .await;

    // Queued right away; the entry already exists even though the
    // connect may still be in flight.
    node.handle_message(ControlMessage::ClientData {
        correlation_id: "B".to_string(),
        chunk: Payload::from_bytes(extra),
    })
    .await;
    assert!(node.registry().get("B").await.is_some());

    // No ack for the immediate protocol: first outbound message is data.
    let (id, bytes) = chunk_bytes(expect_message(&mut rx).await);
    assert_eq!(id, "B");
    assert!(b"HTTP/1.1 200 OK\r\n\r\n".starts_with(&bytes[..]));

    server.await.unwrap();
}

#[tokio::test]
async fn test_client_data_order_preserved() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = vec![0u8; 9];
        socket.read_exact(&mut received).await.unwrap();
        received
    });

    let (node, _rx) = test_node();
    node.handle_message(ControlMessage::Request {
        correlation_id: "C".to_string(),
        host: "127.0.0.1".to_string(),
        port,
        local_address: None,
        initial_payload: None,
    })
    .await;

    for part in [&b"one"[..], &b"two"[..], &b"six"[..]] {
        node.handle_message(ControlMessage::ClientData {
            correlation_id: "C".to_string(),
            chunk: Payload::from_bytes(part),
        })
        .await;
    }

    let received = timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, b"onetwosix");
}

#[tokio::test]
async fn test_connect_failure_emits_single_error() {
    // Bind then drop a listener so the port refuses connections.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let (node, mut rx) = test_node();
    node.handle_message(ControlMessage::Request {
        correlation_id: "D".to_string(),
        host: "127.0.0.1".to_string(),
        port,
        local_address: None,
        initial_payload: None,
    })
    .await;

    match expect_message(&mut rx).await {
        ControlMessage::ConnectionError { correlation_id, .. } => {
            assert_eq!(correlation_id, "D");
        }
        other => panic!("expected connection-error, got {:?}", other),
    }

    // Exactly one error, no ack, and no entry left behind.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
    assert!(node.registry().get("D").await.is_none());
}

#[tokio::test]
async fn test_unknown_correlation_id_is_ignored() {
    let (node, mut rx) = test_node();

    node.handle_message(ControlMessage::ClientData {
        correlation_id: "never-established".to_string(),
        chunk: Payload::from_bytes(b"dropped"),
    })
    .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_malformed_chunk_keeps_socket_open() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = vec![0u8; 5];
        socket.read_exact(&mut received).await.unwrap();
        received
    });

    let (node, mut rx) = test_node();
    node.handle_message(ControlMessage::Request {
        correlation_id: "E".to_string(),
        host: "127.0.0.1".to_string(),
        port,
        local_address: None,
        initial_payload: None,
    })
    .await;

    // A chunk that cannot be interpreted as bytes: error scoped to the
    // id, socket untouched.
    let bad: Payload = serde_json::from_str("\"!!not base64!!\"").unwrap();
    node.handle_message(ControlMessage::ClientData {
        correlation_id: "E".to_string(),
        chunk: bad,
    })
    .await;

    match expect_message(&mut rx).await {
        ControlMessage::ConnectionError { correlation_id, .. } => {
            assert_eq!(correlation_id, "E");
        }
        other => panic!("expected connection-error, got {:?}", other),
    }

    node.handle_message(ControlMessage::ClientData {
        correlation_id: "E".to_string(),
        chunk: Payload::from_bytes(b"still"),
    })
    .await;

    let received = timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, b"still");
}

#[tokio::test]
async fn test_stalled_stream_does_not_block_dispatch() {
    // One server never reads its socket; the other answers normally.
    let stalled = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let stalled_port = stalled.local_addr().unwrap().port();
    let responsive = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let responsive_port = responsive.local_addr().unwrap().port();

    let stalled_server = tokio::spawn(async move {
        let (_socket, _) = stalled.accept().await.unwrap();
        // Hold the socket open without ever reading from it.
        tokio::time::sleep(Duration::from_secs(60)).await;
    });
    let responsive_server = tokio::spawn(async move {
        let (mut socket, _) = responsive.accept().await.unwrap();
        let mut received = vec![0u8; 2];
        socket.read_exact(&mut received).await.unwrap();
        received
    });

    let (node, _rx) = test_node();
    node.handle_message(ControlMessage::Request {
        correlation_id: "X".to_string(),
        host: "127.0.0.1".to_string(),
        port: stalled_port,
        local_address: None,
        initial_payload: None,
    })
    .await;
    node.handle_message(ControlMessage::Request {
        correlation_id: "Y".to_string(),
        host: "127.0.0.1".to_string(),
        port: responsive_port,
        local_address: None,
        initial_payload: None,
    })
    .await;

    // Far more than the write queue and kernel buffers can absorb.
    let chunk = Payload::from_bytes(&vec![0u8; 64 * 1024]);
    for _ in 0..256 {
        node.handle_message(ControlMessage::ClientData {
            correlation_id: "X".to_string(),
            chunk: chunk.clone(),
        })
        .await;
    }

    // The stalled stream must not delay dispatch for the other id.
    node.handle_message(ControlMessage::ClientData {
        correlation_id: "Y".to_string(),
        chunk: Payload::from_bytes(b"yo"),
    })
    .await;

    let received = timeout(Duration::from_secs(5), responsive_server)
        .await
        .expect("dispatch stalled behind a slow stream")
        .unwrap();
    assert_eq!(received, b"yo");

    stalled_server.abort();
}

#[tokio::test]
async fn test_write_queue_overflow_fails_stream() {
    let (node, mut rx) = test_node();

    // An entry whose write queue is already at capacity.
    let (tx, _queue_rx) = mpsc::channel(1);
    tx.send(Bytes::from_static(b"queued")).await.unwrap();
    node.registry()
        .put(
            "G".to_string(),
            StreamEntry::new(tx, "198.51.100.7:443".to_string()),
        )
        .await;

    node.handle_message(ControlMessage::ClientData {
        correlation_id: "G".to_string(),
        chunk: Payload::from_bytes(b"overflow"),
    })
    .await;

    // Overflow fails the stream: one error, entry gone immediately.
    match expect_message(&mut rx).await {
        ControlMessage::ConnectionError { correlation_id, .. } => {
            assert_eq!(correlation_id, "G");
        }
        other => panic!("expected connection-error, got {:?}", other),
    }
    assert!(node.registry().get("G").await.is_none());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_midstream_reset_reports_error_and_tears_down() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        // Abortive close: the node observes a reset, not a clean EOF.
        socket.set_linger(Some(Duration::ZERO)).unwrap();
        drop(socket);
    });

    let (node, mut rx) = test_node();
    node.handle_message(ControlMessage::Request {
        correlation_id: "H".to_string(),
        host: "127.0.0.1".to_string(),
        port,
        local_address: None,
        initial_payload: None,
    })
    .await;
    server.await.unwrap();

    match expect_message(&mut rx).await {
        ControlMessage::ConnectionError { correlation_id, .. } => {
            assert_eq!(correlation_id, "H");
        }
        other => panic!("expected connection-error, got {:?}", other),
    }

    // Exactly one error, and the entry is gone once the grace elapses.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
    tokio::time::sleep(TEST_GRACE * 3).await;
    assert!(node.registry().get("H").await.is_none());
}

#[tokio::test]
async fn test_interleaved_ids_preserve_per_id_order() {
    async fn echo_six(listener: TcpListener) -> Vec<u8> {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = vec![0u8; 6];
        socket.read_exact(&mut received).await.unwrap();
        received
    }

    let first = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let first_port = first.local_addr().unwrap().port();
    let second = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let second_port = second.local_addr().unwrap().port();

    let first_server = tokio::spawn(echo_six(first));
    let second_server = tokio::spawn(echo_six(second));

    let (node, _rx) = test_node();
    for (id, port) in [("I1", first_port), ("I2", second_port)] {
        node.handle_message(ControlMessage::Request {
            correlation_id: id.to_string(),
            host: "127.0.0.1".to_string(),
            port,
            local_address: None,
            initial_payload: None,
        })
        .await;
    }

    // Alternate chunks across the two streams.
    for (id, part) in [
        ("I1", &b"ab"[..]),
        ("I2", &b"uv"[..]),
        ("I1", &b"cd"[..]),
        ("I2", &b"wx"[..]),
        ("I1", &b"ef"[..]),
        ("I2", &b"yz"[..]),
    ] {
        node.handle_message(ControlMessage::ClientData {
            correlation_id: id.to_string(),
            chunk: Payload::from_bytes(part),
        })
        .await;
    }

    let first_bytes = timeout(Duration::from_secs(5), first_server)
        .await
        .unwrap()
        .unwrap();
    let second_bytes = timeout(Duration::from_secs(5), second_server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first_bytes, b"abcdef");
    assert_eq!(second_bytes, b"uvwxyz");
}

#[tokio::test]
async fn test_registry_entry_outlives_close_by_grace_only() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        // Close immediately: the node sees EOF.
        drop(socket);
    });

    let (node, _rx) = test_node();
    node.handle_message(ControlMessage::Request {
        correlation_id: "F".to_string(),
        host: "127.0.0.1".to_string(),
        port,
        local_address: None,
        initial_payload: None,
    })
    .await;
    server.await.unwrap();

    // Inside the grace window the entry is still resolvable.
    tokio::time::sleep(TEST_GRACE / 4).await;
    assert!(node.registry().get("F").await.is_some());

    // Once the window elapses it is guaranteed gone.
    tokio::time::sleep(TEST_GRACE * 3).await;
    assert!(node.registry().get("F").await.is_none());
}
