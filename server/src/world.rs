//! Player and world model as seen by a session
//!
//! Sessions only need three things from a player: its name for logging and
//! default event messages, a way to enter its world's live-player set once
//! login succeeds, and a way to be removed again on disconnect. The
//! [`Player`] trait captures exactly that so the session core stays
//! independent of any particular entity system.
//!
//! [`World`] and [`WorldPlayer`] are the small concrete model the bundled
//! server uses.

use log::{error, info};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub trait Player: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Adds the player to its world's live-player set.
    fn add_to_world(&self);

    /// Removes the player from the world and entity model.
    fn remove(&self);
}

pub type PlayerRef = Arc<dyn Player>;

/// A world holding the set of players currently in it
///
/// The set is only mutated from the tick loop (through session login and
/// disposal); the mutex exists so the type can be shared with tasks that
/// read the online count.
#[derive(Debug)]
pub struct World {
    name: String,
    raw_players: Mutex<HashMap<u32, String>>,
    next_entity_id: AtomicU32,
}

impl World {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            raw_players: Mutex::new(HashMap::new()),
            next_entity_id: AtomicU32::new(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creates a player entity bound to this world. The player is not part
    /// of the live set until [`Player::add_to_world`] is called.
    pub fn spawn_player(self: &Arc<Self>, name: impl Into<String>) -> WorldPlayer {
        WorldPlayer {
            entity_id: self.next_entity_id.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            world: Arc::clone(self),
        }
    }

    pub fn online_count(&self) -> usize {
        self.players().len()
    }

    #[cfg(test)]
    pub(crate) fn player_names(&self) -> Vec<String> {
        self.players().values().cloned().collect()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, entity_id: u32) -> bool {
        self.players().contains_key(&entity_id)
    }

    fn insert(&self, entity_id: u32, name: &str) {
        self.players().insert(entity_id, name.to_string());
    }

    fn remove(&self, entity_id: u32) -> bool {
        self.players().remove(&entity_id).is_some()
    }

    /// Locks the live-player set, recovering it if a holder panicked.
    fn players(&self) -> MutexGuard<'_, HashMap<u32, String>> {
        self.raw_players.lock().unwrap_or_else(|poisoned| {
            error!("Player set of world {} was poisoned, recovering", self.name);
            poisoned.into_inner()
        })
    }
}

#[derive(Debug)]
pub struct WorldPlayer {
    entity_id: u32,
    name: String,
    world: Arc<World>,
}

impl WorldPlayer {
    pub fn entity_id(&self) -> u32 {
        self.entity_id
    }
}

impl Player for WorldPlayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_to_world(&self) {
        self.world.insert(self.entity_id, &self.name);
        info!(
            "Player {} (entity {}) entered world {}",
            self.name,
            self.entity_id,
            self.world.name()
        );
    }

    fn remove(&self) {
        if self.world.remove(self.entity_id) {
            info!("Removed player {} from world {}", self.name, self.world.name());
        }
    }
}
