//! Socket-side connection state.
//!
//! The room tracks who receives events; this module tracks how a single
//! socket is doing. The websocket handler owns one [`ConnectionLifecycle`]
//! per socket and drives it from its select loop.

use std::time::{Duration, Instant};

use serde::Serialize;

use cartpool_core::{ActorKey, CapabilitySet, Identity, Item, Order};

/// Where a socket is in its life.
///
/// States only move forward: a closed connection never reopens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Socket accepted, snapshot not yet sent.
    Connecting,
    /// Subscribed to the room and receiving events.
    Registered,
    /// Unsubscribed; flushing already-queued frames before close.
    Draining,
    /// Fully torn down.
    Closed,
}

/// Liveness tracking for one websocket.
pub struct ConnectionLifecycle {
    state: ConnectionState,
    last_contact: Instant,
    timeout: Duration,
}

impl ConnectionLifecycle {
    /// Start tracking a freshly accepted socket.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: ConnectionState::Connecting,
            last_contact: Instant::now(),
            timeout,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// The snapshot went out and the room subscription is live.
    pub fn register(&mut self) {
        self.advance(ConnectionState::Registered);
    }

    /// Stop accepting new events; queued frames may still flush.
    pub fn drain(&mut self) {
        self.advance(ConnectionState::Draining);
    }

    /// The socket is gone.
    pub fn close(&mut self) {
        self.advance(ConnectionState::Closed);
    }

    /// Record proof of life (any inbound frame, including pong).
    pub fn touch(&mut self) {
        self.last_contact = Instant::now();
    }

    /// Whether the client has gone silent past the timeout.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.last_contact.elapsed() >= self.timeout
    }

    fn advance(&mut self, to: ConnectionState) {
        self.state = self.state.max(to);
    }
}

/// Who a snapshot was rendered for.
#[derive(Debug, Clone, Serialize)]
pub struct ViewerInfo {
    pub key: ActorKey,
    pub display_name: String,
    pub is_admin: bool,
}

impl From<&Identity> for ViewerInfo {
    fn from(identity: &Identity) -> Self {
        Self {
            key: identity.key(),
            display_name: identity.display_name.clone(),
            is_admin: identity.is_admin(),
        }
    }
}

/// First frame on every websocket: the full current state of the order.
///
/// `seq` is the sequence number already consumed when the snapshot was
/// taken; every subsequent event frame carries a number strictly above it.
/// Clients reconcile against this instead of replaying history.
#[derive(Serialize)]
pub struct SnapshotFrame {
    kind: &'static str,
    pub seq: u64,
    pub order: Order,
    pub viewer: ViewerInfo,
    pub items: Vec<Item>,
    pub capabilities: CapabilitySet,
}

impl SnapshotFrame {
    /// Assemble a snapshot. `items` must already be filtered for the viewer.
    #[must_use]
    pub fn new(
        seq: u64,
        order: Order,
        viewer: &Identity,
        items: Vec<Item>,
        capabilities: CapabilitySet,
    ) -> Self {
        Self {
            kind: "snapshot",
            seq,
            order,
            viewer: ViewerInfo::from(viewer),
            items,
            capabilities,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use chrono::{TimeDelta, Utc};
    use uuid::Uuid;

    use cartpool_core::{Actor, Capabilities, OrderId};

    use super::*;

    #[test]
    fn test_lifecycle_starts_connecting() {
        let lifecycle = ConnectionLifecycle::new(Duration::from_secs(75));
        assert_eq!(lifecycle.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_lifecycle_moves_forward() {
        let mut lifecycle = ConnectionLifecycle::new(Duration::from_secs(75));
        lifecycle.register();
        assert_eq!(lifecycle.state(), ConnectionState::Registered);
        lifecycle.drain();
        assert_eq!(lifecycle.state(), ConnectionState::Draining);
        lifecycle.close();
        assert_eq!(lifecycle.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut lifecycle = ConnectionLifecycle::new(Duration::from_secs(75));
        lifecycle.close();
        lifecycle.register();
        assert_eq!(lifecycle.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_expiry_tracks_last_contact() {
        let mut lifecycle = ConnectionLifecycle::new(Duration::ZERO);
        assert!(lifecycle.expired());

        let mut patient = ConnectionLifecycle::new(Duration::from_secs(60));
        assert!(!patient.expired());
        patient.touch();
        assert!(!patient.expired());
    }

    #[test]
    fn test_snapshot_frame_shape() {
        let identity = Identity::new(
            Actor::Anonymous {
                session: Uuid::new_v4(),
            },
            "Anonymous",
        );
        let order = Order {
            id: OrderId::new(),
            vendor_name: "Spice Route".to_owned(),
            vendor_url: "https://spiceroute.example".to_owned(),
            deadline: Utc::now() + TimeDelta::days(1),
            creator_name: "Priya".to_owned(),
            creator_subject: Some("oidc-sub".to_owned()),
            invite_only: false,
            allow_oidc: false,
            privacy_mode: false,
            revision: 4,
            created_at: Utc::now(),
        };
        let capabilities = Capabilities::new(&identity, &order, Utc::now())
            .with_open_editing(true)
            .summary();
        let frame = SnapshotFrame::new(9, order, &identity, Vec::new(), capabilities);

        let json: serde_json::Value = serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
        assert_eq!(json["kind"], "snapshot");
        assert_eq!(json["seq"], 9);
        assert_eq!(json["viewer"]["is_admin"], false);
        assert!(json["order"].get("creator_subject").is_none());
        assert!(json["capabilities"]["can_add_item"].as_bool().is_some());
    }
}
