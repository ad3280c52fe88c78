//! Message dispatch by protocol state
//!
//! A session never interprets packets itself. For every packet it asks the
//! [`DispatchTable`] for the handler set that applies to its current
//! [`ProtocolState`] and hands the packet over. A handler set answers `false`
//! when it has nothing registered for the packet; the session reports that
//! and moves on.

use crate::session::Session;
use crate::world::PlayerRef;
use shared::{Packet, PacketKind, ProtocolState};
use std::collections::HashMap;

pub trait HandlerSet: Send + Sync {
    /// Processes `packet` for `session`. Returns whether a handler ran.
    fn handle(&self, session: &mut Session, player: Option<&PlayerRef>, packet: &Packet) -> bool;
}

pub trait DispatchTable: Send + Sync {
    fn handlers_for(&self, state: ProtocolState) -> &dyn HandlerSet;
}

pub type Handler = Box<dyn Fn(&mut Session, Option<&PlayerRef>, &Packet) + Send + Sync>;

/// Handlers for one protocol state, keyed by packet kind
#[derive(Default)]
pub struct HandlerTable {
    handlers: HashMap<PacketKind, Handler>,
}

#[cfg(test)]
impl HandlerTable {
    fn contains(&self, kind: PacketKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    fn len(&self) -> usize {
        self.handlers.len()
    }

    fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl HandlerSet for HandlerTable {
    fn handle(&self, session: &mut Session, player: Option<&PlayerRef>, packet: &Packet) -> bool {
        match self.handlers.get(&packet.kind()) {
            Some(handler) => {
                handler(session, player, packet);
                true
            }
            None => false,
        }
    }
}

/// The standard [`DispatchTable`]: one [`HandlerTable`] per protocol state.
pub struct MessageMap {
    tables: HashMap<ProtocolState, HandlerTable>,
}

impl MessageMap {
    pub fn new() -> Self {
        let tables = [
            ProtocolState::Handshake,
            ProtocolState::Status,
            ProtocolState::Login,
            ProtocolState::Play,
        ]
        .into_iter()
        .map(|state| (state, HandlerTable::default()))
        .collect();

        Self { tables }
    }

    /// Registers `handler` for packets of `kind` while in `state`, replacing
    /// any earlier registration for the same pair.
    pub fn on<F>(mut self, state: ProtocolState, kind: PacketKind, handler: F) -> Self
    where
        F: Fn(&mut Session, Option<&PlayerRef>, &Packet) + Send + Sync + 'static,
    {
        self.tables
            .entry(state)
            .or_default()
            .handlers
            .insert(kind, Box::new(handler));
        self
    }

    #[cfg(test)]
    fn table(&self, state: ProtocolState) -> Option<&HandlerTable> {
        self.tables.get(&state)
    }
}

impl Default for MessageMap {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchTable for MessageMap {
    fn handlers_for(&self, state: ProtocolState) -> &dyn HandlerSet {
        // Every state is populated in `new`.
        &self.tables[&state]
    }
}
