//! Integration tests for the networked session runtime
//!
//! These tests run a real server on an ephemeral port and talk to it over TCP
//! using the same framing the server uses.

use server::network::{Server, ServerConfig, ServerMessage};
use server::session::SessionConfig;
use server::transport::{read_frame, write_frame};
use shared::{Packet, ProtocolState, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

const DEADLINE: Duration = Duration::from_secs(5);

/// Starts a server with a fast tick and returns its address and control channel
async fn start_server(timeout_ticks: u32) -> (SocketAddr, mpsc::UnboundedSender<ServerMessage>) {
    let mut server = Server::bind(ServerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        tick_duration: Duration::from_millis(5),
        session: SessionConfig { timeout_ticks },
        ..Default::default()
    })
    .await
    .expect("Failed to bind server");

    let addr = server.local_addr().expect("Server has no local address");
    let control = server.control();
    tokio::spawn(async move {
        let _ = server.run().await;
    });

    (addr, control)
}

async fn connect(addr: SocketAddr, next_state: ProtocolState, protocol_version: u32) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.expect("Failed to connect");
    write_frame(
        &mut stream,
        &Packet::Handshake {
            protocol_version,
            address: "localhost".to_string(),
            port: addr.port(),
            next_state,
        },
    )
    .await
    .expect("Failed to send handshake");
    stream
}

async fn next_packet(stream: &mut TcpStream) -> Option<Packet> {
    timeout(DEADLINE, read_frame(stream))
        .await
        .expect("Timed out waiting for the server")
        .expect("Malformed frame from server")
}

fn kick_text(packet: &Packet) -> String {
    match packet {
        Packet::Kick { json } => {
            let value: serde_json::Value = serde_json::from_str(json).expect("Kick is not JSON");
            value["text"].as_str().unwrap_or_default().to_string()
        }
        other => panic!("Expected a kick, got {:?}", other),
    }
}

async fn login(addr: SocketAddr, name: &str) -> TcpStream {
    let mut stream = connect(addr, ProtocolState::Login, PROTOCOL_VERSION).await;
    write_frame(
        &mut stream,
        &Packet::LoginStart {
            name: name.to_string(),
        },
    )
    .await
    .expect("Failed to send login start");

    match next_packet(&mut stream).await {
        Some(Packet::LoginSuccess { name: accepted }) => assert_eq!(accepted, name),
        other => panic!("Expected login success, got {:?}", other),
    }
    stream
}

/// STATUS QUERY TESTS
mod status_tests {
    use super::*;

    #[tokio::test]
    async fn status_request_and_ping() {
        let (addr, _control) = start_server(300).await;
        let mut stream = connect(addr, ProtocolState::Status, PROTOCOL_VERSION).await;

        write_frame(&mut stream, &Packet::StatusRequest).await.unwrap();
        let json = match next_packet(&mut stream).await {
            Some(Packet::StatusResponse { json }) => json,
            other => panic!("Expected status response, got {:?}", other),
        };
        let status: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(status["version"]["protocol"], PROTOCOL_VERSION);
        assert_eq!(status["players"]["online"], 0);

        write_frame(&mut stream, &Packet::Ping { time: 1234 }).await.unwrap();
        assert_eq!(next_packet(&mut stream).await, Some(Packet::Ping { time: 1234 }));

        // Status has no kick message; the server just hangs up.
        assert_eq!(next_packet(&mut stream).await, None);
    }

    #[tokio::test]
    async fn invalid_handshake_closes_connection() {
        let (addr, _control) = start_server(300).await;
        let mut stream = connect(addr, ProtocolState::Play, PROTOCOL_VERSION).await;

        assert_eq!(next_packet(&mut stream).await, None);
    }
}

/// LOGIN TESTS
mod login_tests {
    use super::*;

    #[tokio::test]
    async fn login_reaches_play() {
        let (addr, _control) = start_server(300).await;
        let _stream = login(addr, "Steve").await;
    }

    #[tokio::test]
    async fn outdated_client_is_kicked() {
        let (addr, _control) = start_server(300).await;
        let mut stream = connect(addr, ProtocolState::Login, PROTOCOL_VERSION - 1).await;

        let kick = next_packet(&mut stream).await.expect("Expected a kick");
        assert_eq!(kick_text(&kick), "Outdated client!");
        assert_eq!(next_packet(&mut stream).await, None);
    }

    #[tokio::test]
    async fn invalid_name_is_kicked() {
        let (addr, _control) = start_server(300).await;
        let mut stream = connect(addr, ProtocolState::Login, PROTOCOL_VERSION).await;
        write_frame(
            &mut stream,
            &Packet::LoginStart {
                name: "not a valid name".to_string(),
            },
        )
        .await
        .unwrap();

        let kick = next_packet(&mut stream).await.expect("Expected a kick");
        assert_eq!(kick_text(&kick), "Invalid username");
    }
}

/// KEEPALIVE TESTS
mod keepalive_tests {
    use super::*;

    #[tokio::test]
    async fn silent_client_times_out() {
        let (addr, _control) = start_server(3).await;
        let mut stream = login(addr, "Idle").await;

        match next_packet(&mut stream).await {
            Some(Packet::KeepAlive { id }) => assert!(id > 0),
            other => panic!("Expected keepalive, got {:?}", other),
        }

        let kick = next_packet(&mut stream).await.expect("Expected a kick");
        assert_eq!(kick_text(&kick), "Timed out");
        assert_eq!(next_packet(&mut stream).await, None);
    }

    #[tokio::test]
    async fn answered_keepalives_keep_connection_open() {
        let (addr, _control) = start_server(20).await;
        let mut stream = login(addr, "Awake").await;

        for _ in 0..3 {
            match next_packet(&mut stream).await {
                Some(Packet::KeepAlive { id }) => {
                    write_frame(&mut stream, &Packet::KeepAlive { id }).await.unwrap();
                }
                other => panic!("Expected keepalive, got {:?}", other),
            }
        }
    }
}

/// SHUTDOWN TESTS
mod shutdown_tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_kicks_players() {
        let (addr, control) = start_server(300).await;
        let mut stream = login(addr, "Alex").await;

        control.send(ServerMessage::Shutdown).unwrap();

        let kick = next_packet(&mut stream).await.expect("Expected a kick");
        assert_eq!(kick_text(&kick), "Server closed");
        assert_eq!(next_packet(&mut stream).await, None);
    }
}
