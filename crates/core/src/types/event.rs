//! Broadcast events: committed changes pushed to live subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::order::Item;

/// A committed change to an order.
///
/// Published to the order's room strictly after the durable write. Item
/// events carry full snapshots so clients can treat them as idempotent
/// upserts (or deletes) keyed by item id - applying an event a snapshot
/// already reflects is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderEvent {
    /// An item was added.
    ItemAdded {
        /// The new item.
        item: Item,
    },
    /// An item was edited.
    ItemUpdated {
        /// The item after the edit.
        item: Item,
    },
    /// An item was removed. Carries the last snapshot so viewers (and the
    /// delivery filter) still know whose item it was.
    ItemDeleted {
        /// The item as it was when deleted.
        item: Item,
    },
    /// The ordering deadline was moved.
    DeadlineChanged {
        /// The new deadline.
        deadline: DateTime<Utc>,
    },
    /// An admin minted an invite link.
    InviteIssued {
        /// Name the invite is bound to.
        guest_name: String,
    },
}

impl OrderEvent {
    /// The item this event concerns, when item-scoped.
    #[must_use]
    pub const fn item(&self) -> Option<&Item> {
        match self {
            Self::ItemAdded { item } | Self::ItemUpdated { item } | Self::ItemDeleted { item } => {
                Some(item)
            }
            Self::DeadlineChanged { .. } | Self::InviteIssued { .. } => None,
        }
    }

    /// Order-scoped events reach every subscriber; item-scoped ones pass
    /// through the view filter first.
    #[must_use]
    pub const fn is_order_scoped(&self) -> bool {
        self.item().is_none()
    }

    /// Wire tag of this event, for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ItemAdded { .. } => "item_added",
            Self::ItemUpdated { .. } => "item_updated",
            Self::ItemDeleted { .. } => "item_deleted",
            Self::DeadlineChanged { .. } => "deadline_changed",
            Self::InviteIssued { .. } => "invite_issued",
        }
    }
}

/// Envelope pairing an event with its room sequence number.
///
/// Sequence numbers are per room instance, strictly increasing and gap-free
/// over accepted events; a client that sees a gap resynchronizes from a
/// fresh snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedEvent {
    /// Position in the room's stream.
    pub seq: u64,
    /// The change itself.
    #[serde(flatten)]
    pub event: OrderEvent,
}
