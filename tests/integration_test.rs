//! Integration tests for the transport connection layer
//!
//! Tests drive the complete path (controller → adapter → connection →
//! writer/read loops) against real local endpoints: a WebSocket echo
//! server for the cloud adapter and a raw TCP echo server for the tcp
//! adapter.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use autolink_transport::{
    AppHandle, CloudConfigStore, CloudTransportProperties, CloudWebsocketAdapter, Device, DeviceId,
    EventRx, TcpAdapter, TransportController, TransportError, TransportEvent, TransportKind,
    TransportSecurity,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Install the log subscriber once; later calls are no-ops
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Local test servers
// =============================================================================

/// WebSocket server that echoes every binary frame and records it
async fn spawn_ws_echo_server(echo: bool) -> (SocketAddr, Arc<Mutex<Vec<Bytes>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let received: Arc<Mutex<Vec<Bytes>>> = Arc::new(Mutex::new(Vec::new()));

    let received_clone = received.clone();
    tokio::spawn(async move {
        while let Ok((stream, _peer)) = listener.accept().await {
            let received = received_clone.clone();
            tokio::spawn(async move {
                let ws = match accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(_) => return,
                };
                let (mut sink, mut source) = ws.split();
                while let Some(Ok(msg)) = source.next().await {
                    if let Message::Binary(data) = msg {
                        received.lock().await.push(data.clone());
                        if echo && sink.send(Message::Binary(data)).await.is_err() {
                            break;
                        }
                    }
                }
            });
        }
    });

    (addr, received)
}

/// Raw TCP server that echoes every chunk
async fn spawn_tcp_echo_server() -> SocketAddr {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _peer)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    addr
}

// =============================================================================
// Helpers
// =============================================================================

fn cloud_setup(addr: SocketAddr, device_id: &str) -> (TransportController, EventRx, DeviceId) {
    init_tracing();
    let store = Arc::new(CloudConfigStore::new());
    let id = DeviceId::new(device_id);
    store.set(
        id.clone(),
        CloudTransportProperties {
            host: addr.ip().to_string(),
            port: addr.port(),
            security: TransportSecurity::Plain,
            certificate: None,
            auth_token: None,
            hybrid_app_preference: None,
        },
    );
    let (controller, events) =
        TransportController::new(vec![Arc::new(CloudWebsocketAdapter::new(store))]);
    controller.register_device(Device::new(
        device_id,
        device_id,
        addr.to_string(),
        TransportKind::CloudWebsocket,
    ));
    (controller, events, id)
}

async fn recv_event(events: &mut EventRx) -> TransportEvent {
    tokio::time::timeout(RECV_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Assert that no event arrives within a settle window
async fn assert_no_event(events: &mut EventRx) {
    let outcome = tokio::time::timeout(Duration::from_millis(300), events.recv()).await;
    if let Ok(Some(event)) = outcome {
        panic!("unexpected event: {:?}", event);
    }
}

// =============================================================================
// Cloud WebSocket
// =============================================================================

#[tokio::test]
async fn test_plain_connect_send_and_echo() {
    let (addr, _received) = spawn_ws_echo_server(true).await;
    let (controller, mut events, device) = cloud_setup(addr, "cloud-echo");

    controller.connect(&device, AppHandle(1)).await.unwrap();

    let event = recv_event(&mut events).await;
    assert!(
        matches!(event, TransportEvent::ConnectDone { device: ref d, app_handle } if *d == device && app_handle == AppHandle(1))
    );

    controller
        .send_data(&device, AppHandle(1), Bytes::from_static(b"\x01\x02"))
        .unwrap();

    let event = recv_event(&mut events).await;
    match event {
        TransportEvent::DataReceiveDone {
            device: d,
            app_handle,
            frame,
        } => {
            assert_eq!(d, device);
            assert_eq!(app_handle, AppHandle(1));
            assert_eq!(frame.as_ref(), b"\x01\x02");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    controller.disconnect(&device, AppHandle(1)).await;
}

#[tokio::test]
async fn test_outbound_messages_keep_enqueue_order() {
    let (addr, received) = spawn_ws_echo_server(false).await;
    let (controller, mut events, device) = cloud_setup(addr, "cloud-fifo");

    controller.connect(&device, AppHandle(7)).await.unwrap();
    let _ = recv_event(&mut events).await; // ConnectDone

    let payloads: Vec<Bytes> = (0u8..20)
        .map(|i| Bytes::from(vec![i, i.wrapping_mul(3)]))
        .collect();
    for payload in &payloads {
        controller
            .send_data(&device, AppHandle(7), payload.clone())
            .unwrap();
    }

    // Wait for the full batch to land at the server
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    loop {
        if received.lock().await.len() >= payloads.len() {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "server did not receive all frames"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let got = received.lock().await;
    assert_eq!(got.len(), payloads.len());
    for (sent, observed) in payloads.iter().zip(got.iter()) {
        assert_eq!(sent, observed);
    }
    drop(got);

    controller.disconnect(&device, AppHandle(7)).await;
}

#[tokio::test]
async fn test_resolution_failure_reported_once() {
    init_tracing();
    let store = Arc::new(CloudConfigStore::new());
    let device = DeviceId::new("cloud-bad-host");
    store.set(
        device.clone(),
        CloudTransportProperties {
            host: "nonexistent.invalid".to_string(),
            port: 80,
            security: TransportSecurity::Plain,
            certificate: None,
            auth_token: None,
            hybrid_app_preference: None,
        },
    );
    let (controller, mut events) =
        TransportController::new(vec![Arc::new(CloudWebsocketAdapter::new(store))]);
    controller.register_device(Device::new(
        "cloud-bad-host",
        "cloud-bad-host",
        "nonexistent.invalid:80",
        TransportKind::CloudWebsocket,
    ));

    let err = controller.connect(&device, AppHandle(1)).await.unwrap_err();
    assert!(matches!(err, TransportError::Resolution { .. }));

    // The returned error is the single failure report, and the pair slot is
    // free again for a fresh attempt
    assert_no_event(&mut events).await;
    let err = controller.connect(&device, AppHandle(1)).await.unwrap_err();
    assert!(matches!(err, TransportError::Resolution { .. }));
}

#[tokio::test]
async fn test_second_connect_for_live_pair_is_rejected() {
    let (addr, _received) = spawn_ws_echo_server(true).await;
    let (controller, mut events, device) = cloud_setup(addr, "cloud-dup");

    controller.connect(&device, AppHandle(1)).await.unwrap();
    let _ = recv_event(&mut events).await; // ConnectDone

    let err = controller.connect(&device, AppHandle(1)).await.unwrap_err();
    assert!(matches!(err, TransportError::DuplicateConnection { .. }));

    // A different app handle on the same device is a separate pair
    controller.connect(&device, AppHandle(2)).await.unwrap();

    controller.disconnect(&device, AppHandle(1)).await;
    controller.disconnect(&device, AppHandle(2)).await;
}

#[tokio::test]
async fn test_disconnect_is_idempotent_and_silences_events() {
    let (addr, _received) = spawn_ws_echo_server(true).await;
    let (controller, mut events, device) = cloud_setup(addr, "cloud-dc");

    controller.connect(&device, AppHandle(1)).await.unwrap();
    let _ = recv_event(&mut events).await; // ConnectDone

    controller.disconnect(&device, AppHandle(1)).await;
    controller.disconnect(&device, AppHandle(1)).await;

    // After shutdown completes no further events arrive for the pair
    assert_no_event(&mut events).await;

    // And the pair can be connected again
    controller.connect(&device, AppHandle(1)).await.unwrap();
    assert!(matches!(
        recv_event(&mut events).await,
        TransportEvent::ConnectDone { .. }
    ));
    controller.disconnect(&device, AppHandle(1)).await;
}

#[tokio::test]
async fn test_enqueue_then_disconnect_delivers_prefix_without_duplicates() {
    let (addr, received) = spawn_ws_echo_server(false).await;
    let (controller, mut events, device) = cloud_setup(addr, "cloud-drain");

    controller.connect(&device, AppHandle(1)).await.unwrap();
    let _ = recv_event(&mut events).await; // ConnectDone

    let payloads: Vec<Bytes> = (0u8..50).map(|i| Bytes::from(vec![i])).collect();
    for payload in &payloads {
        controller
            .send_data(&device, AppHandle(1), payload.clone())
            .unwrap();
    }
    controller.disconnect(&device, AppHandle(1)).await;

    // Give the server a moment to flush what was written before the close
    tokio::time::sleep(Duration::from_millis(200)).await;

    let got = received.lock().await;
    assert!(got.len() <= payloads.len());
    // Whatever arrived is an in-order prefix, no duplicates, no reordering
    for (sent, observed) in payloads.iter().zip(got.iter()) {
        assert_eq!(sent, observed);
    }
}

#[tokio::test]
async fn test_server_close_yields_single_aborted_event() {
    // Server that accepts the upgrade and immediately closes the session
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _peer)) = listener.accept().await {
            tokio::spawn(async move {
                if let Ok(mut ws) = accept_async(stream).await {
                    let _ = ws.close(None).await;
                }
            });
        }
    });

    let (controller, mut events, device) = cloud_setup(addr, "cloud-server-close");
    controller.connect(&device, AppHandle(1)).await.unwrap();

    let mut saw_connect_done = false;
    let mut aborted = 0usize;
    // ConnectDone then exactly one ConnectionAborted
    for _ in 0..2 {
        match recv_event(&mut events).await {
            TransportEvent::ConnectDone { .. } => saw_connect_done = true,
            TransportEvent::ConnectionAborted { error, .. } => {
                aborted += 1;
                assert!(matches!(error, TransportError::Read { .. }));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
    assert!(saw_connect_done);
    assert_eq!(aborted, 1);
    assert_no_event(&mut events).await;

    // The router reaped the pair: sends now fail, disconnect is a no-op
    let err = controller
        .send_data(&device, AppHandle(1), Bytes::from_static(b"x"))
        .unwrap_err();
    assert!(matches!(err, TransportError::NoSuchConnection { .. }));
    controller.disconnect(&device, AppHandle(1)).await;
}

#[tokio::test]
async fn test_tls_handshake_against_plain_listener_fails() {
    init_tracing();
    // A listener that accepts and drops; the TLS client handshake cannot
    // complete against it
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _peer)) = listener.accept().await {
            drop(stream);
        }
    });

    const TEST_CA_PEM: &str = "-----BEGIN CERTIFICATE-----\n\
MIIBfTCCASOgAwIBAgIUEviWde5I4GMc0Q8W+ExI6lE76ykwCgYIKoZIzj0EAwIw\n\
FDESMBAGA1UEAwwJbG9jYWxob3N0MB4XDTI2MDgzMDAyMzE0NFoXDTM2MDgyNzAy\n\
MzE0NFowFDESMBAGA1UEAwwJbG9jYWxob3N0MFkwEwYHKoZIzj0CAQYIKoZIzj0D\n\
AQcDQgAEVYqtMihbWcCLhjs7iGIVvNQIHrP7F1jGW4Fzj0Fi6msTHh6xS1b3dYgJ\n\
eVEknF9HLILiHfM64Ldsdb9zrLUuKaNTMFEwHQYDVR0OBBYEFGrkfJVIV6NwbakT\n\
o5y7sFgKb46DMB8GA1UdIwQYMBaAFGrkfJVIV6NwbakTo5y7sFgKb46DMA8GA1Ud\n\
EwEB/wQFMAMBAf8wCgYIKoZIzj0EAwIDSAAwRQIhAKUOA0gHMAOQmCS+wMAaf9js\n\
3ykm/KcwEBTw71UAC5mrAiAMHw5M2Mrjt0DBo6mwqB/JBYuHgKuP8bCdt37wHlCC\n\
7w==\n\
-----END CERTIFICATE-----\n";

    let store = Arc::new(CloudConfigStore::new());
    let device = DeviceId::new("cloud-tls");
    store.set(
        device.clone(),
        CloudTransportProperties {
            host: addr.ip().to_string(),
            port: addr.port(),
            security: TransportSecurity::Secure,
            certificate: Some(TEST_CA_PEM.to_string()),
            auth_token: None,
            hybrid_app_preference: None,
        },
    );
    let (controller, _events) =
        TransportController::new(vec![Arc::new(CloudWebsocketAdapter::new(store))]);
    controller.register_device(Device::new(
        "cloud-tls",
        "cloud-tls",
        addr.to_string(),
        TransportKind::CloudWebsocket,
    ));

    let err = controller.connect(&device, AppHandle(1)).await.unwrap_err();
    assert!(matches!(
        err,
        TransportError::Handshake {
            stage: autolink_transport::HandshakeStage::Tls,
            ..
        }
    ));
}

#[tokio::test]
async fn test_secure_without_certificate_fails_before_dialing() {
    init_tracing();
    let store = Arc::new(CloudConfigStore::new());
    let device = DeviceId::new("cloud-nocert");
    store.set(
        device.clone(),
        CloudTransportProperties {
            host: "127.0.0.1".to_string(),
            port: 1, // never dialed
            security: TransportSecurity::Secure,
            certificate: None,
            auth_token: None,
            hybrid_app_preference: None,
        },
    );
    let (controller, _events) =
        TransportController::new(vec![Arc::new(CloudWebsocketAdapter::new(store))]);
    controller.register_device(Device::new(
        "cloud-nocert",
        "cloud-nocert",
        "127.0.0.1:1",
        TransportKind::CloudWebsocket,
    ));

    let err = controller.connect(&device, AppHandle(1)).await.unwrap_err();
    assert!(matches!(err, TransportError::Config { .. }));
}

// =============================================================================
// TCP adapter
// =============================================================================

#[tokio::test]
async fn test_tcp_connect_send_and_echo() {
    let addr = spawn_tcp_echo_server().await;

    let (controller, mut events) = TransportController::new(vec![Arc::new(TcpAdapter::new())]);
    let device = DeviceId::new("wifi-1");
    controller.register_device(Device::new(
        "wifi-1",
        "Living Room Tablet",
        addr.to_string(),
        TransportKind::Tcp,
    ));

    controller.connect(&device, AppHandle(3)).await.unwrap();
    assert!(matches!(
        recv_event(&mut events).await,
        TransportEvent::ConnectDone { .. }
    ));

    controller
        .send_data(&device, AppHandle(3), Bytes::from_static(b"ping"))
        .unwrap();
    match recv_event(&mut events).await {
        TransportEvent::DataReceiveDone { frame, .. } => assert_eq!(frame.as_ref(), b"ping"),
        other => panic!("unexpected event: {:?}", other),
    }

    controller.disconnect(&device, AppHandle(3)).await;
    assert_no_event(&mut events).await;
}

#[tokio::test]
async fn test_tcp_connect_refused_is_recoverable() {
    init_tracing();
    // Bind then drop to get a port with nothing listening
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (controller, _events) = TransportController::new(vec![Arc::new(TcpAdapter::new())]);
    let device = DeviceId::new("wifi-gone");
    controller.register_device(Device::new(
        "wifi-gone",
        "wifi-gone",
        addr.to_string(),
        TransportKind::Tcp,
    ));

    let err = controller.connect(&device, AppHandle(1)).await.unwrap_err();
    assert!(matches!(err, TransportError::Connect { .. }));

    // The failure is recoverable: the controller still works
    let err = controller.connect(&device, AppHandle(1)).await.unwrap_err();
    assert!(matches!(err, TransportError::Connect { .. }));
}
