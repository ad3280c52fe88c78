//! Server-side capabilities a session calls out to
//!
//! A session never talks to an event bus directly. It asks the server, through
//! [`ServerHooks`], whether a login is allowed, whether a kick goes ahead and
//! which messages accompany a join or quit. Every hook has a default so an
//! implementation only overrides what it cares about.

use crate::world::Player;
use log::info;

/// Verdict of the login hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Allowed,
    Denied { reason: String },
}

/// Verdict of the kick hook.
///
/// A listener may rewrite the reason or the leave message, or veto the kick
/// altogether.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KickOutcome {
    Proceed {
        reason: String,
        leave_message: Option<String>,
    },
    Cancelled,
}

pub trait ServerHooks: Send + Sync {
    fn broadcast_message(&self, text: &str);

    fn on_player_login(&self, _player: &dyn Player) -> LoginOutcome {
        LoginOutcome::Allowed
    }

    fn on_player_kick(&self, player: &dyn Player, reason: &str) -> KickOutcome {
        KickOutcome::Proceed {
            reason: reason.to_string(),
            leave_message: Some(format!("{} left the game", player.name())),
        }
    }

    /// Returns the join message to broadcast, if any.
    fn on_player_join(&self, player: &dyn Player) -> Option<String> {
        Some(format!("{} joined the game", player.name()))
    }

    /// Returns the quit message to broadcast, if any.
    fn on_player_quit(&self, player: &dyn Player) -> Option<String> {
        Some(format!("{} left the game", player.name()))
    }
}

/// Hooks used by the standalone server: every event takes its default and
/// broadcasts go to the log.
#[derive(Debug, Default)]
pub struct ConsoleServer;

impl ConsoleServer {
    pub fn new() -> Self {
        Self
    }
}

impl ServerHooks for ConsoleServer {
    fn broadcast_message(&self, text: &str) {
        info!("[broadcast] {}", text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::World;

    #[test]
    fn test_default_hooks() {
        let world = World::new("world");
        let player = world.spawn_player("alice");
        let server = ConsoleServer::new();

        assert_eq!(server.on_player_login(&player), LoginOutcome::Allowed);
        assert_eq!(
            server.on_player_join(&player).as_deref(),
            Some("alice joined the game")
        );
        assert_eq!(
            server.on_player_quit(&player).as_deref(),
            Some("alice left the game")
        );

        match server.on_player_kick(&player, "Timed out") {
            KickOutcome::Proceed {
                reason,
                leave_message,
            } => {
                assert_eq!(reason, "Timed out");
                assert_eq!(leave_message.as_deref(), Some("alice left the game"));
            }
            KickOutcome::Cancelled => panic!("Default kick should proceed"),
        }
    }
}
