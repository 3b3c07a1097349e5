//! Room registry.
//!
//! Owns the table of live rooms. Creation goes through the map's entry API so
//! that two joins racing for the same unseen room id end up in one room.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempo_core::RuleEngine;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::actor::{self, RoomHandle};
use crate::config::RoomConfig;
use crate::protocol::{RoomId, MAX_ROOM_ID_LEN};
use crate::room::GameRoom;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Server is at room capacity")]
    AtCapacity,

    #[error("Invalid room id")]
    InvalidRoomId,
}

struct RegistryInner<E: RuleEngine> {
    rooms: DashMap<RoomId, RoomHandle>,
    engine: Arc<E>,
    max_rooms: usize,
    count: AtomicUsize,
    next_instance: AtomicU64,
}

/// Shared table of live rooms.
pub struct RoomRegistry<E: RuleEngine> {
    inner: Arc<RegistryInner<E>>,
}

impl<E: RuleEngine> Clone for RoomRegistry<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: RuleEngine> RoomRegistry<E> {
    pub fn new(engine: Arc<E>, max_rooms: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                rooms: DashMap::new(),
                engine,
                max_rooms,
                count: AtomicUsize::new(0),
                next_instance: AtomicU64::new(1),
            }),
        }
    }

    /// Return the room for `room_id`, creating it with `config` if it does
    /// not exist. `config` is ignored for an existing room.
    pub fn get_or_create(
        &self,
        room_id: &str,
        config: RoomConfig,
    ) -> Result<RoomHandle, RegistryError> {
        let room_id = room_id.trim();
        if room_id.is_empty() || room_id.len() > MAX_ROOM_ID_LEN {
            return Err(RegistryError::InvalidRoomId);
        }

        match self.inner.rooms.entry(room_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_closed() {
                    return Ok(entry.get().clone());
                }
                // Its task is gone; the slot is reused without changing the count
                warn!("Replacing dead room {}", room_id);
                let handle = self.spawn_room(room_id, config);
                entry.insert(handle.clone());
                Ok(handle)
            }
            Entry::Vacant(entry) => {
                let max = self.inner.max_rooms;
                self.inner
                    .count
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                        (n < max).then_some(n + 1)
                    })
                    .map_err(|_| RegistryError::AtCapacity)?;

                let handle = self.spawn_room(room_id, config);
                entry.insert(handle.clone());
                info!("Created room {} ({} active)", room_id, self.len());
                Ok(handle)
            }
        }
    }

    fn spawn_room(&self, room_id: &str, config: RoomConfig) -> RoomHandle {
        let instance = self.inner.next_instance.fetch_add(1, Ordering::Relaxed);
        let room = GameRoom::new(
            room_id.to_string(),
            Arc::clone(&self.inner.engine),
            config,
            Instant::now().into_std(),
        );
        actor::spawn(room, instance, self.clone())
    }

    /// Look up a live room.
    pub fn get(&self, room_id: &str) -> Option<RoomHandle> {
        let handle = self.inner.rooms.get(room_id)?.clone();
        if handle.is_closed() {
            self.remove_instance(room_id, handle.instance());
            return None;
        }
        Some(handle)
    }

    /// Remove a room and stop its task. Returns false if it did not exist.
    pub fn remove(&self, room_id: &str) -> bool {
        match self.inner.rooms.remove(room_id) {
            Some((_, handle)) => {
                self.inner.count.fetch_sub(1, Ordering::SeqCst);
                handle.shutdown();
                info!("Removed room {}", room_id);
                true
            }
            None => false,
        }
    }

    /// Remove `room_id` only if it is still the given instance.
    pub fn remove_instance(&self, room_id: &str, instance: u64) -> bool {
        match self
            .inner
            .rooms
            .remove_if(room_id, |_, handle| handle.instance() == instance)
        {
            Some((_, handle)) => {
                self.inner.count.fetch_sub(1, Ordering::SeqCst);
                handle.shutdown();
                info!("Removed room {}", room_id);
                true
            }
            None => false,
        }
    }

    /// Remove rooms nobody is connected to that have been idle for at least
    /// `idle_grace`, plus rooms whose task has died. Returns how many went.
    pub fn sweep(&self, now: std::time::Instant, idle_grace: Duration) -> usize {
        let stale: Vec<(RoomId, u64)> = self
            .inner
            .rooms
            .iter()
            .filter(|entry| {
                let summary = entry.summary();
                entry.is_closed()
                    || (summary.connected_seats == 0
                        && now.saturating_duration_since(summary.last_activity) >= idle_grace)
            })
            .map(|entry| (entry.key().clone(), entry.instance()))
            .collect();

        stale
            .into_iter()
            .filter(|(room_id, instance)| self.remove_instance(room_id, *instance))
            .count()
    }

    /// Run [`RoomRegistry::sweep`] every `every` until the task is aborted.
    pub fn spawn_sweeper(&self, every: Duration, idle_grace: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                let now = interval.tick().await;
                let removed = registry.sweep(now.into_std(), idle_grace);
                if removed > 0 {
                    info!("Swept {} idle rooms", removed);
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.inner.count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.inner.rooms.contains_key(room_id)
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        self.inner.rooms.iter().map(|e| e.key().clone()).collect()
    }
}
