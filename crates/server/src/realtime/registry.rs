//! Registry of live order rooms.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cartpool_core::{Identity, Order, OrderEvent, OrderId};

use super::room::{OrderRoom, Subscription};

/// How long an empty room survives before reclamation. A client that
/// reconnects within this window lands in the same room instance.
const RECLAIM_GRACE: Duration = Duration::from_secs(60);

/// How often the background task sweeps for reclaimable rooms.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Shared handle to the per-order room map.
///
/// Rooms are created lazily on first subscription and dropped again once
/// they have sat empty past the grace period. Cheap to clone.
#[derive(Clone, Default)]
pub struct RoomRegistry {
    rooms: Arc<Mutex<HashMap<OrderId, Arc<OrderRoom>>>>,
}

impl RoomRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_rooms(&self) -> MutexGuard<'_, HashMap<OrderId, Arc<OrderRoom>>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to an order's room, creating the room if needed.
    ///
    /// Registration happens under the registry lock, so it cannot race the
    /// reclamation sweep: a room observed here cannot be dropped before the
    /// subscriber is inside it. A poisoned room is replaced with a fresh
    /// instance, giving reconnecting clients a clean sequence baseline.
    pub fn subscribe(&self, order_id: OrderId, identity: Identity) -> Subscription {
        let mut rooms = self.lock_rooms();
        let room = match rooms.get(&order_id) {
            Some(room) if !room.is_poisoned() => Arc::clone(room),
            _ => {
                let room = Arc::new(OrderRoom::new(order_id));
                rooms.insert(order_id, Arc::clone(&room));
                tracing::debug!(%order_id, "room created");
                room
            }
        };
        room.subscribe(identity)
    }

    /// Publish an event to an order's room, if one is live.
    ///
    /// No room means no subscribers; the event is simply not broadcast.
    /// Storage already holds the committed state it described.
    pub fn publish(&self, order: &Order, event: OrderEvent) {
        let room = self.lock_rooms().get(&order.id).map(Arc::clone);
        if let Some(room) = room {
            room.publish(order, event);
        }
    }

    /// Drop rooms that have been empty past the grace period.
    ///
    /// Normally driven by [`Self::spawn_reclaimer`]. Emptiness is re-checked
    /// under the registry lock here, so a subscriber that raced in since the
    /// room went idle keeps its room.
    pub fn reclaim_idle(&self) {
        self.sweep(RECLAIM_GRACE);
    }

    fn sweep(&self, grace: Duration) {
        let mut rooms = self.lock_rooms();
        rooms.retain(|order_id, room| {
            if room.reclaimable(grace) {
                tracing::debug!(%order_id, "room reclaimed");
                false
            } else {
                true
            }
        });
    }

    /// Start the background reclamation task.
    ///
    /// The task runs for the life of the process; the returned handle is
    /// only useful for tests that want to abort it.
    pub fn spawn_reclaimer(&self) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                registry.reclaim_idle();
            }
        })
    }

    /// Number of live rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.lock_rooms().len()
    }
}
