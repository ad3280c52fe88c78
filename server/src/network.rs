//! Server network layer: connection acceptance, per-connection readers and
//! the fixed-rate tick loop that owns every session

use crate::dispatch::DispatchTable;
use crate::handlers::{default_message_map, StatusInfo};
use crate::hooks::{ConsoleServer, ServerHooks};
use crate::session::{InboundSender, Route, Session, SessionConfig};
use crate::transport::{read_frame, TcpTransport};
use crate::world::World;
use log::{debug, error, info, warn};
use shared::{Packet, ProtocolState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};

pub type SessionKey = u64;

/// Messages sent from connection tasks to the tick loop
#[derive(Debug)]
pub enum ServerMessage {
    /// A packet that must be handled before its connection reads again. The
    /// loop answers with the session's resulting protocol state.
    Handshake {
        key: SessionKey,
        packet: Packet,
        reply: oneshot::Sender<ProtocolState>,
    },
    Closed {
        key: SessionKey,
    },
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub tick_duration: Duration,
    pub max_sessions: usize,
    pub world_name: String,
    pub motd: String,
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:25565".to_string(),
            tick_duration: Duration::from_millis(50),
            max_sessions: 32,
            world_name: "world".to_string(),
            motd: StatusInfo::default().motd,
            session: SessionConfig::default(),
        }
    }
}

/// Main server owning all sessions
///
/// Connection tasks never touch a session. They push packets into its
/// inbound queue, forward handshakes and closures as [`ServerMessage`]s, and
/// everything else happens inside [`Server::run`].
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    hooks: Arc<dyn ServerHooks>,
    dispatch: Arc<dyn DispatchTable>,
    world: Arc<World>,
    sessions: HashMap<SessionKey, Session>,
    next_key: SessionKey,
    tick: u64,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    /// Binds a server with the default handlers and console hooks.
    pub async fn bind(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let world = World::new(config.world_name.clone());
        let status = StatusInfo {
            motd: config.motd.clone(),
            max_players: config.max_sessions,
        };
        let dispatch = Arc::new(default_message_map(Arc::clone(&world), status));

        Self::with_parts(config, Arc::new(ConsoleServer::new()), dispatch, world).await
    }

    pub async fn with_parts(
        config: ServerConfig,
        hooks: Arc<dyn ServerHooks>,
        dispatch: Arc<dyn DispatchTable>,
        world: Arc<World>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&config.bind_address).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            config,
            hooks,
            dispatch,
            world,
            sessions: HashMap::new(),
            next_key: 1,
            tick: 0,
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    /// Sender for [`ServerMessage::Shutdown`].
    pub fn control(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        if self.sessions.len() >= self.config.max_sessions {
            // Nothing can be said to a client still in handshake; just drop it.
            warn!("Refusing connection from {}: server full", addr);
            return;
        }

        let key = self.next_key;
        self.next_key += 1;

        let (read_half, write_half) = stream.into_split();
        let (closed_tx, closed_rx) = oneshot::channel();
        let transport = TcpTransport::spawn(write_half, addr, closed_tx);
        let session = Session::new(
            Arc::clone(&self.hooks),
            Arc::clone(&self.dispatch),
            Box::new(transport),
            self.config.session.clone(),
        );

        let inbox = SessionInbox {
            key,
            addr,
            queue: session.inbound(),
            server_tx: self.server_tx.clone(),
        };
        tokio::spawn(read_loop(read_half, inbox, closed_rx));

        info!("Client {} connected from {}", key, addr);
        self.sessions.insert(key, session);
    }

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Handshake { key, packet, reply } => {
                if let Some(session) = self.sessions.get_mut(&key) {
                    session.message_received(packet);
                    let _ = reply.send(session.state());
                }
            }
            ServerMessage::Closed { key } => {
                if let Some(mut session) = self.sessions.remove(&key) {
                    session.dispose(true);
                    info!("Client {} disconnected", key);
                }
            }
            ServerMessage::Shutdown => {}
        }
    }

    fn pulse_sessions(&mut self) {
        for session in self.sessions.values_mut() {
            session.pulse();
        }
        self.tick += 1;

        if self.tick % 600 == 0 && !self.sessions.is_empty() {
            debug!(
                "Tick {}: {} sessions, {} players in {}",
                self.tick,
                self.sessions.len(),
                self.world.online_count(),
                self.world.name()
            );
        }
    }

    /// Main server loop: accepts connections, serves connection tasks and
    /// pulses every session once per tick until shut down.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let mut tick_interval = interval(self.config.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started successfully");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.accept(stream, addr),
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                },

                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                        Some(message) => self.handle_message(message),
                    }
                },

                _ = tick_interval.tick() => self.pulse_sessions(),
            }
        }

        for (_, mut session) in self.sessions.drain() {
            session.disconnect("Server closed");
            session.dispose(true);
        }

        Ok(())
    }
}

/// What a connection's reader needs to hand packets to its session
struct SessionInbox {
    key: SessionKey,
    addr: SocketAddr,
    queue: InboundSender,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl SessionInbox {
    /// Hands `packet` to the session. Returns false once the session or the
    /// server is gone.
    async fn deliver(&self, packet: Packet) -> bool {
        match Route::of(&packet) {
            Route::Queued => self.queue.queue(packet),
            Route::Immediate => {
                let (reply, state) = oneshot::channel();
                let message = ServerMessage::Handshake {
                    key: self.key,
                    packet,
                    reply,
                };
                if self.server_tx.send(message).is_err() {
                    return false;
                }

                match state.await {
                    Ok(state) => {
                        debug!("Client {} is now in state {}", self.key, state);
                        true
                    }
                    Err(_) => false,
                }
            }
        }
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    inbox: SessionInbox,
    mut closed: oneshot::Receiver<()>,
) {
    loop {
        let frame = tokio::select! {
            frame = read_frame(&mut reader) => frame,
            _ = &mut closed => break,
        };

        match frame {
            Ok(Some(packet)) => {
                if !inbox.deliver(packet).await {
                    break;
                }
            }
            Ok(None) => {
                debug!("{} closed the connection", inbox.addr);
                break;
            }
            Err(e) => {
                warn!("Dropping connection from {}: {}", inbox.addr, e);
                break;
            }
        }
    }

    let _ = inbox
        .server_tx
        .send(ServerMessage::Closed { key: inbox.key });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::write_frame;
    use shared::PROTOCOL_VERSION;
    use tokio_test::assert_ok;

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            tick_duration: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.tick_duration, Duration::from_millis(50));
        assert_eq!(config.max_sessions, 32);
        assert_eq!(config.session.timeout_ticks, crate::session::TIMEOUT_TICKS);
    }

    #[test]
    fn test_closed_message_creation() {
        let msg = ServerMessage::Closed { key: 42 };

        match msg {
            ServerMessage::Closed { key } => assert_eq!(key, 42),
            _ => panic!("Unexpected message type"),
        }
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = assert_ok!(Server::bind(test_config()).await);
        let addr = assert_ok!(server.local_addr());

        assert_ne!(addr.port(), 0);
        assert_eq!(server.session_count(), 0);
        assert_eq!(server.world().name(), "world");
    }

    #[tokio::test]
    async fn test_handshake_is_answered_with_new_state() {
        let mut server = assert_ok!(Server::bind(test_config()).await);
        let addr = assert_ok!(server.local_addr());

        let client = tokio::spawn(async move { TcpStream::connect(addr).await });
        let (stream, peer) = assert_ok!(server.listener.accept().await);
        server.accept(stream, peer);
        let _client = assert_ok!(assert_ok!(client.await));
        assert_eq!(server.session_count(), 1);

        let (reply, state) = oneshot::channel();
        server.handle_message(ServerMessage::Handshake {
            key: 1,
            packet: Packet::Handshake {
                protocol_version: PROTOCOL_VERSION,
                address: "localhost".to_string(),
                port: addr.port(),
                next_state: ProtocolState::Status,
            },
            reply,
        });
        assert_eq!(assert_ok!(state.await), ProtocolState::Status);

        server.handle_message(ServerMessage::Closed { key: 1 });
        assert_eq!(server.session_count(), 0);
    }

    #[tokio::test]
    async fn test_full_server_refuses_connection() {
        let mut server = assert_ok!(
            Server::bind(ServerConfig {
                max_sessions: 0,
                ..test_config()
            })
            .await
        );
        let addr = assert_ok!(server.local_addr());

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await?;
            // The server hangs up without answering.
            let _ = write_frame(&mut stream, &Packet::StatusRequest).await;
            read_frame(&mut stream)
                .await
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        });
        let (stream, peer) = assert_ok!(server.listener.accept().await);
        server.accept(stream, peer);

        assert_eq!(server.session_count(), 0);
        let answer = assert_ok!(client.await);
        assert!(!matches!(answer, Ok(Some(_))));
    }
}
