//! Tests for UdpServer and UdpClient
//!
//! These tests verify:
//! - Datagram delivery in both directions
//! - Sender attribution and replies through the server handle
//! - Lifecycle errors (double start, send before init, stopped server)

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel;
use netpool::{Config, NetError, RunState, UdpClient, UdpServer};

// =============================================================================
// Helper Functions
// =============================================================================

fn test_config() -> Config {
    Config::builder()
        .worker_threads(2)
        .receive_timeout_ms(50)
        .build()
}

fn start_server() -> (UdpServer, u16) {
    let server = UdpServer::new("127.0.0.1", 0, test_config()).unwrap();
    server.start().unwrap();
    let port = server.local_addr().unwrap().port();
    (server, port)
}

fn init_client() -> (UdpClient, u16) {
    let client = UdpClient::new(test_config());
    client.init(0).unwrap();
    let port = client.local_addr().unwrap().port();
    (client, port)
}

// =============================================================================
// Server Tests
// =============================================================================

#[test]
fn test_server_receives_datagram_with_sender() {
    let (server, port) = start_server();
    let (tx, rx) = channel::unbounded();
    server.set_message_callback(move |sender, bytes| tx.send((sender, bytes.to_vec())).unwrap());

    let (client, client_port) = init_client();
    client.send_to("127.0.0.1", port, b"ping").unwrap();

    let (sender, payload) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(payload, b"ping");
    assert_eq!(sender.port(), client_port);
    assert_eq!(*sender.ip(), Ipv4Addr::LOCALHOST);
}

#[test]
fn test_server_reply_reaches_client() {
    let (server, port) = start_server();
    let handle = server.handle();
    server.set_message_callback(move |sender, bytes| {
        let mut reply = b"[Echo] ".to_vec();
        reply.extend_from_slice(bytes);
        handle.reply(sender, &reply).unwrap();
    });

    let (client, _) = init_client();
    let (tx, rx) = channel::unbounded();
    client.set_message_callback(move |sender, bytes| tx.send((sender, bytes.to_vec())).unwrap());
    client.start_receiving().unwrap();

    client.send_to("127.0.0.1", port, b"hello").unwrap();

    let (sender, payload) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(payload, b"[Echo] hello");
    assert_eq!(sender.port(), port);
}

#[test]
fn test_server_keeps_datagram_boundaries() {
    let (server, port) = start_server();
    let (tx, rx) = channel::unbounded();
    server.set_message_callback(move |_, bytes| tx.send(bytes.to_vec()).unwrap());

    let (client, _) = init_client();
    let mut expected: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i; i as usize + 1]).collect();
    for datagram in &expected {
        client.send_to("127.0.0.1", port, datagram).unwrap();
    }

    // Dispatch runs on the pool, so completion order is not fixed.
    let mut received: Vec<Vec<u8>> = (0..expected.len())
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    received.sort();
    expected.sort();
    assert_eq!(received, expected);
}

#[test]
fn test_server_start_twice_fails() {
    let (server, _) = start_server();
    assert!(matches!(server.start(), Err(NetError::AlreadyActive(_))));
    assert_eq!(server.state(), RunState::Running);
}

#[test]
fn test_server_rejects_invalid_address() {
    let server = UdpServer::new("999.0.0.1", 0, test_config()).unwrap();
    assert!(matches!(server.start(), Err(NetError::InvalidAddress(_))));
    assert!(!server.is_running());
}

#[test]
fn test_server_bind_conflict() {
    let taken = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let server = UdpServer::new("127.0.0.1", port, test_config()).unwrap();
    assert!(matches!(server.start(), Err(NetError::Bind { .. })));
    assert_eq!(server.state(), RunState::Stopped);
}

#[test]
fn test_server_stop_wakes_idle_receive_promptly() {
    // Default config: only the socket shutdown can end the wait.
    let server = UdpServer::new("127.0.0.1", 0, Config::default()).unwrap();
    server.start().unwrap();
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    server.stop();

    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(server.state(), RunState::Stopped);
}

#[test]
fn test_server_stop_delivers_no_phantom_datagram() {
    let (server, _) = start_server();
    let (tx, rx) = channel::unbounded();
    server.set_message_callback(move |_, bytes| tx.send(bytes.to_vec()).unwrap());

    server.stop();
    drop(server);
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_server_send_requires_running() {
    let server = UdpServer::new("127.0.0.1", 0, test_config()).unwrap();
    assert!(matches!(
        server.send_to("127.0.0.1", 9, b"x"),
        Err(NetError::NotRunning)
    ));

    server.start().unwrap();
    server.stop();
    assert!(matches!(
        server.send_to("127.0.0.1", 9, b"x"),
        Err(NetError::NotRunning)
    ));
}

#[test]
fn test_server_send_to_plain_socket() {
    let (server, _) = start_server();
    let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
    peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let peer_port = peer.local_addr().unwrap().port();

    server.send_to("127.0.0.1", peer_port, b"unsolicited").unwrap();

    let mut buffer = [0u8; 64];
    let (n, _) = peer.recv_from(&mut buffer).unwrap();
    assert_eq!(&buffer[..n], b"unsolicited");
}

#[test]
fn test_server_stop_idempotent_and_restart() {
    let (server, port) = start_server();
    server.stop();
    server.stop();
    assert!(server.local_addr().is_none());

    let server = UdpServer::new("127.0.0.1", port, test_config()).unwrap();
    server.start().unwrap();
    server.stop();
    server.start().unwrap();
    assert!(server.is_running());
}

#[test]
fn test_handle_fails_after_server_dropped() {
    let (server, _) = start_server();
    let handle = server.handle();
    drop(server);

    let target = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9);
    assert!(matches!(handle.reply(target, b"x"), Err(NetError::NotRunning)));
}

// =============================================================================
// Client Tests
// =============================================================================

#[test]
fn test_client_send_requires_init() {
    let client = UdpClient::new(test_config());
    assert!(!client.is_initialized());
    assert!(matches!(
        client.send_to("127.0.0.1", 9, b"x"),
        Err(NetError::NotInitialized)
    ));
    assert!(matches!(
        client.start_receiving(),
        Err(NetError::NotInitialized)
    ));
}

#[test]
fn test_client_rejects_invalid_address() {
    let (client, _) = init_client();
    assert!(matches!(
        client.send_to("not-an-ip", 9, b"x"),
        Err(NetError::InvalidAddress(_))
    ));
}

#[test]
fn test_client_init_twice_fails() {
    let (client, _) = init_client();
    assert!(matches!(client.init(0), Err(NetError::AlreadyActive(_))));
    assert!(client.is_initialized());
}

#[test]
fn test_client_start_receiving_twice_fails() {
    let (client, _) = init_client();
    client.start_receiving().unwrap();
    assert!(matches!(
        client.start_receiving(),
        Err(NetError::AlreadyActive(_))
    ));

    client.stop_receiving();
    client.stop_receiving();
    assert!(!client.is_receiving());

    client.start_receiving().unwrap();
    assert!(client.is_receiving());
}

#[test]
fn test_client_receives_from_plain_socket() {
    let (client, client_port) = init_client();
    let (tx, rx) = channel::unbounded();
    client.set_message_callback(move |sender, bytes| tx.send((sender, bytes.to_vec())).unwrap());
    client.start_receiving().unwrap();

    let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
    let peer_port = peer.local_addr().unwrap().port();
    peer.send_to(b"data", ("127.0.0.1", client_port)).unwrap();

    let (sender, payload) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(payload, b"data");
    assert_eq!(sender.port(), peer_port);
}

#[test]
fn test_client_failed_init_leaves_uninitialized() {
    let taken = UdpSocket::bind("0.0.0.0:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let client = UdpClient::new(test_config());
    assert!(matches!(client.init(port), Err(NetError::Bind { .. })));
    assert!(!client.is_initialized());
    assert!(client.local_addr().is_none());
}

#[test]
fn test_client_close_idempotent_and_reinit() {
    let (client, _) = init_client();
    client.start_receiving().unwrap();

    client.close();
    client.close();
    assert!(!client.is_initialized());
    assert!(!client.is_receiving());
    assert!(matches!(
        client.send_to("127.0.0.1", 9, b"x"),
        Err(NetError::NotInitialized)
    ));

    client.init(0).unwrap();
    assert!(client.is_initialized());
}
