//! Room registry
//!
//! Process-wide mapping from room code to [`Room`]. The map is the
//! only shared mutable process-wide state; entries are touched briefly
//! (create, lookup, sweep) and never across socket I/O.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use chuan_protocol::code;

use crate::room::Room;

/// Sweeper period.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Rejection-sampling bound for code generation. The code space is
/// 32^6, so hitting this means the registry is effectively wedged.
const MAX_CODE_ATTEMPTS: usize = 64;

/// Owns the code → room map and its lifecycle sweeping.
pub struct RoomRegistry {
    rooms: DashMap<String, Arc<Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        RoomRegistry {
            rooms: DashMap::new(),
        }
    }

    /// Allocate a fresh room under an unused code.
    pub fn create(&self) -> Result<String, RegistryError> {
        use dashmap::mapref::entry::Entry;

        for _ in 0..MAX_CODE_ATTEMPTS {
            let candidate = code::generate();
            match self.rooms.entry(candidate.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(entry) => {
                    entry.insert(Arc::new(Room::new(candidate.clone())));
                    debug!(code = %candidate, "room created");
                    return Ok(candidate);
                }
            }
        }
        Err(RegistryError::CodeSpaceExhausted)
    }

    /// Case-insensitive lookup. Closed rooms are invisible.
    pub fn lookup(&self, input: &str) -> Option<Arc<Room>> {
        let canonical = code::normalize(input).ok()?;
        let room = self.rooms.get(&canonical).map(|r| Arc::clone(&r))?;
        if room.is_closed() {
            return None;
        }
        Some(room)
    }

    /// Drop a room by canonical code. Missing codes are a no-op.
    #[allow(dead_code)]
    pub fn remove(&self, canonical: &str) {
        if let Some((_, room)) = self.rooms.remove(canonical) {
            for socket in room.close() {
                socket.queue().close();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// One sweep pass: close and remove rooms that are closed, past
    /// their 24 h lifetime, or empty and idle past 10 minutes.
    pub fn sweep(&self) -> usize {
        let mut removed = 0;
        self.rooms.retain(|_, room| {
            if room.sweepable() {
                for socket in room.close() {
                    socket.queue().close();
                }
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Background sweep task; runs until the token is cancelled.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("room sweeper stopped");
                        break;
                    }
                    _ = tick.tick() => {
                        let removed = registry.sweep();
                        if removed > 0 {
                            info!(removed, "swept expired rooms");
                        }
                    }
                }
            }
        })
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors from registry operations
#[derive(Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// Could not find an unused code within the attempt bound
    CodeSpaceExhausted,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CodeSpaceExhausted => write!(f, "room code space exhausted"),
        }
    }
}

impl std::error::Error for RegistryError {}
