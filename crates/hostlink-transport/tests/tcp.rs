//! Integration tests for the TCP transport.
//!
//! These spin up a real listener and client on loopback to verify that
//! frames survive the trip across an actual socket.

use hostlink_transport::{Connection, TcpConnection, TcpTransport, Transport, TransportError};
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn test_tcp_accept_and_send_receive() {
    let mut transport = TcpTransport::bind("127.0.0.1:0")
        .await
        .expect("should bind");
    let addr = transport.local_addr().expect("local addr").to_string();

    let server_handle = tokio::spawn(async move {
        transport.accept().await.expect("should accept")
    });

    let client = TcpConnection::connect(&addr).await.expect("should connect");
    let server_conn = server_handle.await.expect("task should complete");

    assert!(server_conn.id().into_inner() > 0);
    assert_ne!(server_conn.id(), client.id());

    // --- Server sends, client receives ---
    server_conn
        .send(b"hello from server")
        .await
        .expect("send should succeed");
    let received = client.recv().await.expect("recv").expect("data");
    assert_eq!(received, b"hello from server");

    // --- Client sends, server receives ---
    client.send(b"hello from client").await.expect("send");
    let received = server_conn.recv().await.expect("recv").expect("data");
    assert_eq!(received, b"hello from client");

    // --- Clean close ---
    client.close().await.expect("close should succeed");
    let result = server_conn.recv().await.expect("recv should not error");
    assert!(result.is_none(), "should return None on peer close");
}

#[tokio::test]
async fn test_large_frame_spans_many_reads() {
    let mut transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().unwrap().to_string();
    let server_handle = tokio::spawn(async move { transport.accept().await.unwrap() });

    let client = TcpConnection::connect(&addr).await.unwrap();
    let server_conn = server_handle.await.unwrap();

    // Far bigger than any single socket read.
    let payload: Vec<u8> = (0..3 * 1024 * 1024u32).map(|i| (i % 253) as u8).collect();
    let expected = payload.clone();
    let sender = tokio::spawn(async move {
        client.send(&payload).await.unwrap();
        client
    });

    let received = server_conn.recv().await.unwrap().unwrap();
    assert_eq!(received.len(), expected.len());
    assert_eq!(received, expected);
    drop(sender.await.unwrap());
}

#[tokio::test]
async fn test_concurrent_senders_do_not_interleave() {
    let mut transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().unwrap().to_string();
    let server_handle = tokio::spawn(async move { transport.accept().await.unwrap() });

    let client = std::sync::Arc::new(TcpConnection::connect(&addr).await.unwrap());
    let server_conn = server_handle.await.unwrap();

    let mut tasks = Vec::new();
    for byte in 1..=8u8 {
        let client = std::sync::Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            let frame = vec![byte; 64 * 1024];
            client.send(&frame).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    for _ in 0..8 {
        let frame = server_conn.recv().await.unwrap().unwrap();
        assert_eq!(frame.len(), 64 * 1024);
        assert!(frame.iter().all(|b| *b == frame[0]), "frame bytes were interleaved");
    }
}

#[tokio::test]
async fn test_peer_closing_mid_frame_is_incomplete() {
    let mut transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().unwrap().to_string();
    let server_handle = tokio::spawn(async move { transport.accept().await.unwrap() });

    let mut raw = tokio::net::TcpStream::connect(&addr).await.unwrap();
    let server_conn = server_handle.await.unwrap();

    // Announce 100 bytes, deliver 3, hang up.
    raw.write_all(&[0, 0, 0, 100, 1, 2, 3]).await.unwrap();
    raw.shutdown().await.unwrap();
    drop(raw);

    match server_conn.recv().await {
        Err(TransportError::IncompleteFrame { expected, received }) => {
            assert_eq!(expected, 100);
            assert_eq!(received, 3);
        }
        other => panic!("expected IncompleteFrame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_connect_refused_is_connect_failed() {
    // Bind then drop to get a port nobody listens on.
    let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().unwrap().to_string();
    drop(transport);

    let result = TcpConnection::connect(&addr).await;
    assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
}

#[tokio::test]
async fn test_bind_in_use_is_bind_failed() {
    let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().unwrap().to_string();

    let result = TcpTransport::bind(&addr).await;
    assert!(matches!(result, Err(TransportError::BindFailed(_))));
}
