//! Default packet handlers
//!
//! These are the handlers the bundled server registers with its
//! [`MessageMap`]. They drive a connection from handshake through status or
//! login into play, answer keepalives and handle the few play packets the
//! server understands.

use crate::dispatch::MessageMap;
use crate::session::Session;
use crate::world::{PlayerRef, World};
use log::{debug, info, warn};
use serde_json::json;
use shared::{Packet, PacketKind, ProtocolState, PROTOCOL_VERSION};
use std::sync::Arc;

pub const MAX_NAME_LEN: usize = 16;
pub const MAX_CHAT_LEN: usize = 100;

/// What the status handler reports to server list pings
#[derive(Debug, Clone)]
pub struct StatusInfo {
    pub motd: String,
    pub max_players: usize,
}

impl Default for StatusInfo {
    fn default() -> Self {
        Self {
            motd: "A Rust game server".to_string(),
            max_players: 20,
        }
    }
}

pub fn default_message_map(world: Arc<World>, status: StatusInfo) -> MessageMap {
    let status_world = Arc::clone(&world);
    let login_world = world;

    MessageMap::new()
        .on(ProtocolState::Handshake, PacketKind::Handshake, |session, _, packet| {
            handle_handshake(session, packet)
        })
        .on(ProtocolState::Status, PacketKind::StatusRequest, move |session, _, _| {
            handle_status_request(session, &status_world, &status)
        })
        .on(ProtocolState::Status, PacketKind::Ping, |session, _, packet| {
            // Echo the ping and hang up; that concludes a server list query.
            session.send(packet.clone());
            session.disconnect("");
        })
        .on(ProtocolState::Login, PacketKind::LoginStart, move |session, _, packet| {
            handle_login_start(session, &login_world, packet)
        })
        .on(ProtocolState::Play, PacketKind::KeepAlive, |session, _, packet| {
            handle_keep_alive(session, packet)
        })
        .on(ProtocolState::Play, PacketKind::Chat, handle_chat)
        .on(ProtocolState::Play, PacketKind::BlockPlacement, |session, _, packet| {
            handle_block_placement(session, packet)
        })
}

fn handle_handshake(session: &mut Session, packet: &Packet) {
    let Packet::Handshake {
        protocol_version,
        next_state,
        ..
    } = packet
    else {
        return;
    };

    if !matches!(next_state, ProtocolState::Status | ProtocolState::Login) {
        warn!("{} requested invalid state {}", session, next_state);
        session.disconnect("Invalid handshake");
        return;
    }

    if let Err(e) = session.set_state(*next_state) {
        warn!("{}: {}", session, e);
        session.disconnect("Invalid handshake");
        return;
    }

    if *next_state == ProtocolState::Login && *protocol_version != PROTOCOL_VERSION {
        let reason = if *protocol_version < PROTOCOL_VERSION {
            "Outdated client!"
        } else {
            "Outdated server!"
        };
        info!(
            "{} uses protocol {} (server is on {})",
            session, protocol_version, PROTOCOL_VERSION
        );
        session.disconnect(reason);
    }
}

fn handle_status_request(session: &mut Session, world: &World, status: &StatusInfo) {
    let response = json!({
        "version": { "name": env!("CARGO_PKG_VERSION"), "protocol": PROTOCOL_VERSION },
        "players": { "max": status.max_players, "online": world.online_count() },
        "description": { "text": status.motd },
    });

    session.send(Packet::StatusResponse {
        json: response.to_string(),
    });
}

fn handle_login_start(session: &mut Session, world: &Arc<World>, packet: &Packet) {
    let Packet::LoginStart { name } = packet else {
        return;
    };

    if session.player().is_some() {
        warn!("{} sent a second login start", session);
        return;
    }

    if !is_valid_name(name) {
        session.disconnect("Invalid username");
        return;
    }

    if let Err(e) = session.set_state(ProtocolState::Play) {
        warn!("{}: {}", session, e);
        return;
    }
    session.send(Packet::LoginSuccess { name: name.clone() });

    let player: PlayerRef = Arc::new(world.spawn_player(name.clone()));
    if let Err(e) = session.set_player(player) {
        warn!("{}: {}", session, e);
    }
}

fn handle_keep_alive(session: &mut Session, packet: &Packet) {
    let Packet::KeepAlive { id } = packet else {
        return;
    };

    if *id == session.ping_message_id() {
        session.pong();
    } else {
        debug!(
            "{} answered keepalive {} but {} is outstanding",
            session,
            id,
            session.ping_message_id()
        );
    }
}

fn handle_chat(session: &mut Session, player: Option<&PlayerRef>, packet: &Packet) {
    let (Some(player), Packet::Chat { message }) = (player, packet) else {
        return;
    };

    let message = message.trim();
    if message.is_empty() {
        return;
    }
    if message.chars().count() > MAX_CHAT_LEN {
        session.disconnect("Chat message too long");
        return;
    }

    session
        .server()
        .broadcast_message(&format!("<{}> {}", player.name(), message));
}

fn handle_block_placement(session: &mut Session, packet: &Packet) {
    let Packet::BlockPlacement(placement) = packet else {
        return;
    };

    // Some clients send every placement twice.
    if session.previous_placement() == Some(placement) {
        debug!("{} sent a duplicate placement, dropping it", session);
        return;
    }
    session.set_previous_placement(placement.clone());

    debug!(
        "{} placed item {} at ({}, {}, {}) facing {}",
        session, placement.held_item, placement.x, placement.y, placement.z, placement.direction
    );
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
