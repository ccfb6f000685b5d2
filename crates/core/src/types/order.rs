//! Orders and their items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::id::{ItemId, OrderId};
use crate::types::identity::ActorKey;

/// A group purchase being coordinated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Unguessable order identifier; the order URL doubles as the share link.
    pub id: OrderId,
    /// Vendor the group is ordering from.
    pub vendor_name: String,
    /// Vendor's site, shown so participants can browse products.
    pub vendor_url: String,
    /// Cut-off for non-admin writes. Admins may keep editing afterwards.
    pub deadline: DateTime<Utc>,
    /// Name of whoever opened the order.
    pub creator_name: String,
    /// Subject identifier of an authenticated creator. Grants standing admin.
    #[serde(skip_serializing, default)]
    pub creator_subject: Option<String>,
    /// Only invited guests (and, if allowed, authenticated users) may add items.
    pub invite_only: bool,
    /// Let authenticated users join an invite-only order without a link.
    /// Meaningless for open orders.
    pub allow_oidc: bool,
    /// Participants see only their own items. Inert unless `invite_only`.
    pub privacy_mode: bool,
    /// Write counter, bumped by every committed mutation. Carried into the
    /// broadcast hub to reject out-of-order pushes.
    pub revision: i64,
    /// When the order was opened.
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Is item visibility restricted to owner and admins?
    ///
    /// `privacy_mode` has no effect on open orders, where anyone with the
    /// link could join under a fresh session anyway.
    #[must_use]
    pub const fn privacy_active(&self) -> bool {
        self.invite_only && self.privacy_mode
    }

    /// Has the ordering window closed?
    ///
    /// The deadline instant itself still counts as open.
    #[must_use]
    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }
}

/// One line in an order: a product someone wants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Item identifier.
    pub id: ItemId,
    /// Order this item belongs to.
    pub order_id: OrderId,
    /// Ownership key of whoever added the item.
    pub owner: ActorKey,
    /// Display name of the owner at the time the item was added.
    pub owner_name: String,
    /// Product name as the participant typed it.
    pub product_name: String,
    /// Optional vendor SKU or article number.
    pub product_sku: Option<String>,
    /// Optional link to the product page.
    pub product_url: Option<String>,
    /// Free-form amount ("2", "1.5 kg"). Kept textual on purpose; numeric
    /// aggregation is best-effort at export time.
    pub quantity: String,
    /// Optional note to the person placing the vendor order.
    pub note: Option<String>,
    /// When the item was added.
    pub added_at: DateTime<Utc>,
}
