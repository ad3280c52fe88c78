//! A single client connection and its lifetime
//!
//! A [`Session`] owns everything that belongs to one connection: its protocol
//! state, the queue of packets that arrived but have not been processed yet,
//! keepalive bookkeeping and the player attached after login.
//!
//! ## Threading model
//!
//! Packets arrive on the connection's reader task at arbitrary times. They are
//! handed over through an [`InboundSender`], an unbounded FIFO channel that the
//! session drains once per tick in [`Session::pulse`]. The tick loop is the
//! only owner of the session, so every state change, handler invocation,
//! disconnect and disposal happens on that one thread.
//!
//! Handshake packets are the exception: the reader needs the resulting state
//! before it reads again, so they are routed for immediate dispatch instead of
//! the queue (see [`Route`]).
//!
//! ## Liveness
//!
//! A counter increments once per pulse and resets whenever a packet is
//! processed or the client answers a keepalive. When it reaches
//! [`SessionConfig::timeout_ticks`] a keepalive is issued; reaching it again
//! while that keepalive is still outstanding disconnects with "Timed out".

use crate::dispatch::DispatchTable;
use crate::error::SessionError;
use crate::hooks::{KickOutcome, LoginOutcome, ServerHooks};
use crate::transport::Transport;
use crate::world::PlayerRef;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{BlockPlacement, Packet, ProtocolState};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Ticks without traffic before a keepalive is issued, and again before an
/// unanswered keepalive times the session out.
pub const TIMEOUT_TICKS: u32 = 300;

pub const TIMEOUT_REASON: &str = "Timed out";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub timeout_ticks: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ticks: TIMEOUT_TICKS,
        }
    }
}

/// Where an incoming packet goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Dispatched at once, ahead of anything queued.
    Immediate,
    /// Appended to the inbound queue for the next pulse.
    Queued,
}

impl Route {
    pub fn of(packet: &Packet) -> Self {
        if packet.is_handshake() {
            Route::Immediate
        } else {
            Route::Queued
        }
    }
}

/// Producer half of a session's inbound queue
///
/// Cheap to clone and safe to use from any task.
#[derive(Debug, Clone)]
pub struct InboundSender {
    tx: mpsc::UnboundedSender<Packet>,
}

impl InboundSender {
    /// Appends `packet` to the queue. Returns false once the session is gone.
    pub fn queue(&self, packet: Packet) -> bool {
        self.tx.send(packet).is_ok()
    }
}

pub struct Session {
    server: Arc<dyn ServerHooks>,
    dispatch: Arc<dyn DispatchTable>,
    transport: Box<dyn Transport>,
    config: SessionConfig,
    rng: StdRng,
    session_id: String,
    state: ProtocolState,
    timeout_counter: u32,
    /// Keepalive id the client has to echo, 0 when none is outstanding.
    ping_message_id: i32,
    player: Option<PlayerRef>,
    /// Kept to let the placement handler drop duplicates some clients send.
    previous_placement: Option<BlockPlacement>,
    inbound_tx: mpsc::UnboundedSender<Packet>,
    inbound_rx: mpsc::UnboundedReceiver<Packet>,
}

impl Session {
    pub fn new(
        server: Arc<dyn ServerHooks>,
        dispatch: Arc<dyn DispatchTable>,
        transport: Box<dyn Transport>,
        config: SessionConfig,
    ) -> Self {
        let mut rng = StdRng::from_entropy();
        let session_id = format!("{:x}", rng.gen::<u64>());
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        Self {
            server,
            dispatch,
            transport,
            config,
            rng,
            session_id,
            state: ProtocolState::Handshake,
            timeout_counter: 0,
            ping_message_id: 0,
            player: None,
            previous_placement: None,
            inbound_tx,
            inbound_rx,
        }
    }

    pub fn server(&self) -> &Arc<dyn ServerHooks> {
        &self.server
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// Moves the session to `state`. Protocol states only move forward; a
    /// regression is rejected and leaves the current state in place.
    pub fn set_state(&mut self, state: ProtocolState) -> Result<(), SessionError> {
        if !self.state.can_advance_to(state) {
            return Err(SessionError::IllegalTransition {
                from: self.state,
                to: state,
            });
        }
        if self.state != state {
            debug!("{} moved from {} to {}", self, self.state, state);
        }
        self.state = state;
        Ok(())
    }

    /// Random token generated for the client/server handshake.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn ping_message_id(&self) -> i32 {
        self.ping_message_id
    }

    pub fn timeout_counter(&self) -> u32 {
        self.timeout_counter
    }

    /// Records that the client answered a keepalive.
    pub fn pong(&mut self) {
        self.timeout_counter = 0;
        self.ping_message_id = 0;
    }

    pub fn previous_placement(&self) -> Option<&BlockPlacement> {
        self.previous_placement.as_ref()
    }

    pub fn set_previous_placement(&mut self, placement: BlockPlacement) {
        self.previous_placement = Some(placement);
    }

    pub fn player(&self) -> Option<&PlayerRef> {
        self.player.as_ref()
    }

    /// Attaches `player` to this session and runs the login sequence.
    ///
    /// Attachment happens once per session; a second call fails and changes
    /// nothing. A login denied by the server hooks disconnects immediately
    /// with the hook's reason, bypassing the kick event.
    pub fn set_player(&mut self, player: PlayerRef) -> Result<(), SessionError> {
        if self.player.is_some() {
            return Err(SessionError::PlayerAlreadyAttached);
        }
        self.player = Some(Arc::clone(&player));

        if let LoginOutcome::Denied { reason } = self.server.on_player_login(player.as_ref()) {
            info!("Login of {} refused: {}", player.name(), reason);
            self.disconnect_with(&reason, true);
            return Ok(());
        }

        player.add_to_world();

        if let Some(message) = non_empty(self.server.on_player_join(player.as_ref())) {
            self.server.broadcast_message(&message);
        }
        Ok(())
    }

    pub fn address(&self) -> Option<SocketAddr> {
        self.transport.remote_address()
    }

    /// Producer handle for the inbound queue.
    pub fn inbound(&self) -> InboundSender {
        InboundSender {
            tx: self.inbound_tx.clone(),
        }
    }

    pub fn send(&mut self, packet: Packet) {
        let _ = self.transport.write(packet);
    }

    pub fn disconnect(&mut self, reason: &str) {
        self.disconnect_with(reason, false);
    }

    /// Disconnects the session.
    ///
    /// With a player attached and `override_kick` unset, the kick hook runs
    /// first and may veto the whole disconnect. Otherwise the (possibly
    /// rewritten) reason is sent as a kick packet and the connection closes
    /// once it is delivered. Handshake and Status have no kick packet, so the
    /// connection is closed directly.
    pub fn disconnect_with(&mut self, reason: &str, override_kick: bool) {
        let mut reason = reason.to_string();

        if !override_kick {
            if let Some(player) = self.player.clone() {
                match self.server.on_player_kick(player.as_ref(), &reason) {
                    KickOutcome::Cancelled => {
                        debug!("Kick of {} was cancelled", player.name());
                        return;
                    }
                    KickOutcome::Proceed {
                        reason: kick_reason,
                        leave_message,
                    } => {
                        reason = kick_reason;
                        if let Some(message) = non_empty(leave_message) {
                            self.server.broadcast_message(&message);
                        }
                        info!("Player {} kicked: {}", player.name(), reason);
                        // The leave message already told everyone.
                        self.dispose(false);
                    }
                }
            }
        }

        if self.state.has_kick_message() {
            self.transport.write(Packet::kick(&reason)).close_on_complete();
        } else {
            self.transport.close();
        }
    }

    /// Runs one tick: drains the inbound queue and applies the keepalive
    /// policy.
    pub(crate) fn pulse(&mut self) {
        self.timeout_counter = self.timeout_counter.saturating_add(1);

        while let Ok(packet) = self.inbound_rx.try_recv() {
            self.dispatch_packet(&packet);
            self.timeout_counter = 0;
        }

        if self.timeout_counter >= self.config.timeout_ticks {
            if self.ping_message_id == 0 {
                self.issue_keepalive();
            } else {
                self.disconnect(TIMEOUT_REASON);
            }
        }
    }

    /// Accepts a packet from the connection. Handshakes are dispatched on
    /// the spot, everything else waits for the next pulse.
    pub(crate) fn message_received(&mut self, packet: Packet) {
        match Route::of(&packet) {
            Route::Immediate => self.dispatch_packet(&packet),
            Route::Queued => {
                // The receiver lives as long as `self`, so this cannot fail.
                let _ = self.inbound_tx.send(packet);
            }
        }
    }

    /// Detaches and removes the player, if any. Safe to call more than once.
    pub(crate) fn dispose(&mut self, broadcast_quit: bool) {
        if let Some(player) = self.player.take() {
            player.remove();

            let quit_message = non_empty(self.server.on_player_quit(player.as_ref()));
            if let (true, Some(message)) = (broadcast_quit, quit_message) {
                self.server.broadcast_message(&message);
            }
        }
    }

    fn dispatch_packet(&mut self, packet: &Packet) {
        let dispatch = Arc::clone(&self.dispatch);
        let player = self.player.clone();

        if !dispatch
            .handlers_for(self.state)
            .handle(self, player.as_ref(), packet)
        {
            warn!(
                "Packet {:?} from {} was not handled in state {}",
                packet.kind(),
                self,
                self.state
            );
        }
    }

    fn issue_keepalive(&mut self) {
        let id = self.rng.gen_range(1..=i32::MAX);
        self.ping_message_id = id;
        self.timeout_counter = 0;
        debug!("Issued keepalive {} to {}", id, self);

        if self.state == ProtocolState::Play {
            self.send(Packet::KeepAlive { id });
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address() {
            Some(addr) => write!(f, "Session [address={}]", addr),
            None => write!(f, "Session [address=unknown]"),
        }
    }
}

fn non_empty(message: Option<String>) -> Option<String> {
    message.filter(|text| !text.is_empty())
}
