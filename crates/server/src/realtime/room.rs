//! A single order's broadcast room.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use cartpool_core::{ConnectionId, Identity, Order, OrderEvent, OrderId, SequencedEvent};

use super::filter::should_deliver;

/// Frames a subscriber may have in flight before it counts as slow.
///
/// Orders have at most a few dozen participants and events are small, so
/// this is generous; a full queue means the reader has effectively stopped.
const CONNECTION_QUEUE_DEPTH: usize = 64;

/// One registered subscriber.
struct ConnectionHandle {
    /// Who is watching, for per-event view filtering.
    identity: Identity,
    /// Bounded queue of serialized frames shared across subscribers.
    sender: mpsc::Sender<Arc<str>>,
}

struct RoomState {
    /// Sequence number the next accepted event will carry. Starts at 1.
    next_seq: u64,
    /// Last accepted order revision; anything at or below is stale.
    last_revision: i64,
    /// Set when the room can no longer guarantee its ordering contract.
    poisoned: bool,
    /// When the room last became empty, for grace-period reclamation.
    idle_since: Option<Instant>,
    connections: HashMap<ConnectionId, ConnectionHandle>,
}

/// What happened to a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Accepted: sequenced and fanned out.
    Published {
        /// Sequence number the event was stamped with.
        seq: u64,
        /// Subscribers the frame was queued for.
        delivered: usize,
        /// Subscribers evicted for a full queue.
        evicted: usize,
    },
    /// Revision at or below the last accepted one; dropped.
    Stale,
    /// The room is out of service and all subscribers were disconnected.
    Poisoned,
}

/// Live handle to one order's subscribers.
///
/// All operations take one short internal lock; none of them block on
/// subscriber IO.
pub struct OrderRoom {
    order_id: OrderId,
    state: Mutex<RoomState>,
}

impl OrderRoom {
    /// Create an empty room for an order.
    #[must_use]
    pub fn new(order_id: OrderId) -> Self {
        Self {
            order_id,
            state: Mutex::new(RoomState {
                next_seq: 1,
                last_revision: 0,
                poisoned: false,
                idle_since: Some(Instant::now()),
                connections: HashMap::new(),
            }),
        }
    }

    /// A poisoned lock only means a panic elsewhere while holding it; the
    /// state itself is a plain map and counters, still safe to use.
    fn lock_state(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber.
    ///
    /// The returned subscription's `joined_seq` is the last sequence number
    /// assigned before registration: every frame the subscriber receives is
    /// numbered strictly above it, and none are skipped. Registration is
    /// atomic with sequencing, so no event can fall between the two.
    pub fn subscribe(self: &Arc<Self>, identity: Identity) -> Subscription {
        let (sender, receiver) = mpsc::channel(CONNECTION_QUEUE_DEPTH);
        let connection_id = ConnectionId::new();

        let mut state = self.lock_state();
        let joined_seq = state.next_seq - 1;
        state.idle_since = None;
        state
            .connections
            .insert(connection_id, ConnectionHandle { identity, sender });
        tracing::debug!(
            order_id = %self.order_id,
            %connection_id,
            joined_seq,
            subscribers = state.connections.len(),
            "subscriber registered"
        );
        drop(state);

        Subscription {
            connection_id,
            joined_seq,
            receiver,
            room: Arc::clone(self),
        }
    }

    /// Sequence and fan out an event.
    ///
    /// Callers invoke this strictly after their database commit, with
    /// `order.revision` being the committed revision. Events arriving with a
    /// revision at or below the last accepted one lost that race and are
    /// dropped; whatever overtook them already described a newer state.
    pub fn publish(&self, order: &Order, event: OrderEvent) -> PublishOutcome {
        let mut state = self.lock_state();
        if state.poisoned {
            return PublishOutcome::Poisoned;
        }
        if order.revision <= state.last_revision {
            tracing::warn!(
                order_id = %self.order_id,
                revision = order.revision,
                last_revision = state.last_revision,
                kind = event.kind(),
                "dropping out-of-order publish"
            );
            return PublishOutcome::Stale;
        }

        let seq = state.next_seq;
        let Some(next) = seq.checked_add(1) else {
            tracing::error!(order_id = %self.order_id, "sequence space exhausted, poisoning room");
            Self::poison(&mut state);
            return PublishOutcome::Poisoned;
        };
        let envelope = SequencedEvent { seq, event };
        let frame: Arc<str> = match serde_json::to_string(&envelope) {
            Ok(json) => Arc::from(json),
            Err(error) => {
                tracing::error!(
                    order_id = %self.order_id,
                    %error,
                    "event serialization failed, poisoning room"
                );
                Self::poison(&mut state);
                return PublishOutcome::Poisoned;
            }
        };
        state.next_seq = next;
        state.last_revision = order.revision;

        // Fan out. try_send never blocks: a full queue evicts that
        // subscriber so one stalled reader cannot delay the rest.
        let mut delivered = 0_usize;
        let mut evict = Vec::new();
        for (connection_id, handle) in &state.connections {
            if !should_deliver(&envelope.event, &handle.identity, order) {
                continue;
            }
            match handle.sender.try_send(Arc::clone(&frame)) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        order_id = %self.order_id,
                        %connection_id,
                        "evicting slow subscriber"
                    );
                    evict.push(*connection_id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => evict.push(*connection_id),
            }
        }
        let evicted = evict.len();
        for connection_id in evict {
            state.connections.remove(&connection_id);
        }
        if state.connections.is_empty() {
            state.idle_since = Some(Instant::now());
        }

        tracing::debug!(
            order_id = %self.order_id,
            seq,
            revision = order.revision,
            kind = envelope.event.kind(),
            delivered,
            evicted,
            "event published"
        );
        PublishOutcome::Published {
            seq,
            delivered,
            evicted,
        }
    }

    /// Remove a subscriber. Idempotent; safe concurrent with publishing.
    pub fn unsubscribe(&self, connection_id: ConnectionId) {
        let mut state = self.lock_state();
        if state.connections.remove(&connection_id).is_some() {
            tracing::debug!(
                order_id = %self.order_id,
                %connection_id,
                subscribers = state.connections.len(),
                "subscriber removed"
            );
        }
        if state.connections.is_empty() {
            state.idle_since = Some(Instant::now());
        }
    }

    /// Disconnect everyone and refuse further traffic.
    fn poison(state: &mut RoomState) {
        state.poisoned = true;
        // Dropping the senders lets each connection drain its queue and
        // then observe the close.
        state.connections.clear();
        state.idle_since = Some(Instant::now());
    }

    /// Has this room been taken out of service?
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.lock_state().poisoned
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.lock_state().connections.len()
    }

    /// May the registry drop this room?
    ///
    /// True for poisoned rooms with no subscribers, and for rooms that have
    /// been empty for at least `grace`.
    pub(crate) fn reclaimable(&self, grace: Duration) -> bool {
        let state = self.lock_state();
        if !state.connections.is_empty() {
            return false;
        }
        if state.poisoned {
            return true;
        }
        state
            .idle_since
            .is_some_and(|since| since.elapsed() >= grace)
    }

    #[cfg(test)]
    pub(crate) fn set_next_seq(&self, next_seq: u64) {
        self.lock_state().next_seq = next_seq;
    }
}

/// A live subscription to an [`OrderRoom`].
///
/// Dropping it unsubscribes, so a panicked or cancelled connection task
/// still cleans up after itself.
pub struct Subscription {
    connection_id: ConnectionId,
    joined_seq: u64,
    receiver: mpsc::Receiver<Arc<str>>,
    room: Arc<OrderRoom>,
}

impl Subscription {
    /// Identifier of this connection within its room.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Last sequence number assigned before this subscriber registered.
    ///
    /// Every received frame is numbered strictly above this; the snapshot a
    /// connection sends first is stamped with it.
    #[must_use]
    pub const fn joined_seq(&self) -> u64 {
        self.joined_seq
    }

    /// Receive the next frame.
    ///
    /// Returns `None` once the room has dropped this subscriber (eviction or
    /// poisoning) and all queued frames have been drained.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.room.unsubscribe(self.connection_id);
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]
mod tests {
    use chrono::{TimeDelta, Utc};
    use uuid::Uuid;

    use cartpool_core::{Actor, Item, ItemId};

    use super::*;

    fn order(revision: i64) -> Order {
        Order {
            id: OrderId::new(),
            vendor_name: "Baker's Dozen".to_owned(),
            vendor_url: "https://bakersdozen.example".to_owned(),
            deadline: Utc::now() + TimeDelta::days(3),
            creator_name: "Dana".to_owned(),
            creator_subject: None,
            invite_only: false,
            allow_oidc: false,
            privacy_mode: false,
            revision,
            created_at: Utc::now(),
        }
    }

    fn anon_identity() -> Identity {
        Identity::new(
            Actor::Anonymous {
                session: Uuid::new_v4(),
            },
            "Someone",
        )
    }

    fn item_for(order_id: OrderId, owner: &Identity) -> Item {
        Item {
            id: ItemId::new(),
            order_id,
            owner: owner.key(),
            owner_name: owner.display_name.clone(),
            product_name: "Butter".to_owned(),
            product_sku: None,
            product_url: None,
            quantity: "1".to_owned(),
            note: None,
            added_at: Utc::now(),
        }
    }

    fn deadline_event() -> OrderEvent {
        OrderEvent::DeadlineChanged {
            deadline: Utc::now() + TimeDelta::days(7),
        }
    }

    fn seq_of(frame: &str) -> u64 {
        let value: serde_json::Value = serde_json::from_str(frame).unwrap();
        value["seq"].as_u64().unwrap()
    }

    #[tokio::test]
    async fn test_sequence_numbers_are_gap_free_from_one() {
        let room = Arc::new(OrderRoom::new(OrderId::new()));
        let mut sub = room.subscribe(anon_identity());
        assert_eq!(sub.joined_seq(), 0);

        for revision in 1..=3 {
            room.publish(&order(revision), deadline_event());
        }

        for expected in 1..=3 {
            let frame = sub.recv().await.unwrap();
            assert_eq!(seq_of(&frame), expected);
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_only_sees_later_events() {
        let room = Arc::new(OrderRoom::new(OrderId::new()));
        let _early = room.subscribe(anon_identity());

        room.publish(&order(1), deadline_event());

        let mut late = room.subscribe(anon_identity());
        assert_eq!(late.joined_seq(), 1);

        room.publish(&order(2), deadline_event());
        let frame = late.recv().await.unwrap();
        assert_eq!(seq_of(&frame), 2);
    }

    #[tokio::test]
    async fn test_stale_revision_is_rejected() {
        let room = Arc::new(OrderRoom::new(OrderId::new()));
        let mut sub = room.subscribe(anon_identity());

        assert!(matches!(
            room.publish(&order(2), deadline_event()),
            PublishOutcome::Published { seq: 1, .. }
        ));
        assert_eq!(room.publish(&order(2), deadline_event()), PublishOutcome::Stale);
        assert_eq!(room.publish(&order(1), deadline_event()), PublishOutcome::Stale);

        // Only the accepted event arrived; the next accepted one is seq 2.
        assert!(matches!(
            room.publish(&order(3), deadline_event()),
            PublishOutcome::Published { seq: 2, .. }
        ));
        assert_eq!(seq_of(&sub.recv().await.unwrap()), 1);
        assert_eq!(seq_of(&sub.recv().await.unwrap()), 2);
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_evicted_others_unaffected() {
        let room = Arc::new(OrderRoom::new(OrderId::new()));
        let mut slow = room.subscribe(anon_identity());
        let mut active = room.subscribe(anon_identity());

        let total = CONNECTION_QUEUE_DEPTH as i64 + 1;
        for revision in 1..=total {
            let outcome = room.publish(&order(revision), deadline_event());
            // The active subscriber keeps draining; the slow one never does.
            assert_eq!(seq_of(&active.recv().await.unwrap()), revision as u64);
            if revision < total {
                assert!(matches!(
                    outcome,
                    PublishOutcome::Published { evicted: 0, .. }
                ));
            } else {
                assert!(matches!(
                    outcome,
                    PublishOutcome::Published { evicted: 1, .. }
                ));
            }
        }
        assert_eq!(room.connection_count(), 1);

        // The evicted subscriber drains what was queued, then sees the close.
        for expected in 1..=CONNECTION_QUEUE_DEPTH as u64 {
            assert_eq!(seq_of(&slow.recv().await.unwrap()), expected);
        }
        assert!(slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_privacy_filters_item_events_per_subscriber() {
        let mut o = order(0);
        o.invite_only = true;
        o.privacy_mode = true;

        let owner = Identity::new(
            Actor::Guest {
                name: "Alice".to_owned(),
            },
            "Alice",
        );
        let admin = anon_identity().with_admin();

        let room = Arc::new(OrderRoom::new(o.id));
        let mut owner_sub = room.subscribe(owner.clone());
        let mut admin_sub = room.subscribe(admin);
        let mut stranger_sub = room.subscribe(anon_identity());

        o.revision = 1;
        room.publish(
            &o,
            OrderEvent::ItemAdded {
                item: item_for(o.id, &owner),
            },
        );
        // Order-scoped events reach everyone, so the stranger's next frame
        // tells us whether the item event was withheld from it.
        o.revision = 2;
        room.publish(&o, deadline_event());

        assert_eq!(seq_of(&owner_sub.recv().await.unwrap()), 1);
        assert_eq!(seq_of(&admin_sub.recv().await.unwrap()), 1);
        assert_eq!(seq_of(&stranger_sub.recv().await.unwrap()), 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_drop_cleans_up() {
        let room = Arc::new(OrderRoom::new(OrderId::new()));
        let sub = room.subscribe(anon_identity());
        let id = sub.connection_id();

        drop(sub);
        assert_eq!(room.connection_count(), 0);
        room.unsubscribe(id);
        room.unsubscribe(id);

        assert!(matches!(
            room.publish(&order(1), deadline_event()),
            PublishOutcome::Published { delivered: 0, .. }
        ));
    }

    #[tokio::test]
    async fn test_sequence_exhaustion_poisons_room() {
        let room = Arc::new(OrderRoom::new(OrderId::new()));
        let mut sub = room.subscribe(anon_identity());
        room.set_next_seq(u64::MAX);

        assert_eq!(
            room.publish(&order(1), deadline_event()),
            PublishOutcome::Poisoned
        );
        assert!(room.is_poisoned());
        assert!(sub.recv().await.is_none());
        assert_eq!(
            room.publish(&order(2), deadline_event()),
            PublishOutcome::Poisoned
        );
    }
}
