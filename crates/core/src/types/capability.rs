//! Capability evaluation: what one identity may do to one order.
//!
//! Pure functions of (identity, order, item, now). Handlers evaluate these
//! before every write and the broadcast filter reuses [`Capabilities::can_view_item`]
//! so that live delivery and snapshot rendering can never disagree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::identity::{Actor, Identity};
use crate::types::order::{Item, Order};

/// Capability evaluation for one identity against one order.
///
/// Admins bypass the deadline; everyone else loses write access once it
/// passes. Build with [`Capabilities::new`] and, for deployments without an
/// identity provider, enable open editing via
/// [`Capabilities::with_open_editing`].
#[derive(Debug, Clone, Copy)]
pub struct Capabilities<'a> {
    identity: &'a Identity,
    order: &'a Order,
    now: DateTime<Utc>,
    open_editing: bool,
}

impl<'a> Capabilities<'a> {
    /// Evaluate `identity` against `order` at time `now`.
    #[must_use]
    pub const fn new(identity: &'a Identity, order: &'a Order, now: DateTime<Utc>) -> Self {
        Self {
            identity,
            order,
            now,
            open_editing: false,
        }
    }

    /// Enable shared editing of anonymous items on open orders.
    ///
    /// Applies when the deployment has no identity provider: every browser is
    /// an interchangeable anonymous session, so restricting edits to the
    /// creating session would lock people out of their own items after a
    /// cookie wipe. Only ever meaningful for open (non-invite-only) orders.
    #[must_use]
    pub const fn with_open_editing(mut self, enabled: bool) -> Self {
        self.open_editing = enabled;
        self
    }

    fn is_admin(&self) -> bool {
        self.identity.is_admin()
    }

    fn write_window_open(&self) -> bool {
        !self.order.deadline_passed(self.now)
    }

    /// May this identity add an item?
    #[must_use]
    pub fn can_add_item(&self) -> bool {
        if self.is_admin() {
            return true;
        }
        if !self.write_window_open() {
            return false;
        }
        if !self.order.invite_only {
            return true;
        }
        match &self.identity.actor {
            Actor::Guest { .. } => true,
            Actor::Authenticated { .. } => self.order.allow_oidc,
            Actor::Anonymous { .. } => false,
        }
    }

    /// May this identity edit `item`?
    #[must_use]
    pub fn can_edit_item(&self, item: &Item) -> bool {
        if self.is_admin() {
            return true;
        }
        if !self.write_window_open() {
            return false;
        }
        if self.open_editing && !self.order.invite_only && self.identity.actor.is_anonymous() {
            return true;
        }
        item.owner == self.identity.key()
    }

    /// May this identity delete `item`? Same rule as editing.
    #[must_use]
    pub fn can_delete_item(&self, item: &Item) -> bool {
        self.can_edit_item(item)
    }

    /// May this identity see `item`?
    ///
    /// Everything is visible unless privacy is active; then only the owner
    /// and admins see an item.
    #[must_use]
    pub fn can_view_item(&self, item: &Item) -> bool {
        if !self.order.privacy_active() {
            return true;
        }
        self.is_admin() || item.owner == self.identity.key()
    }

    /// May this identity move the deadline?
    #[must_use]
    pub fn can_extend_deadline(&self) -> bool {
        self.is_admin()
    }

    /// May this identity mint invite links?
    #[must_use]
    pub fn can_issue_invites(&self) -> bool {
        self.is_admin()
    }

    /// May this identity change order settings?
    #[must_use]
    pub fn can_change_settings(&self) -> bool {
        self.is_admin()
    }

    /// Order-scoped capabilities in serializable form, for API responses.
    #[must_use]
    pub fn summary(&self) -> CapabilitySet {
        CapabilitySet {
            can_add_item: self.can_add_item(),
            can_extend_deadline: self.can_extend_deadline(),
            can_issue_invites: self.can_issue_invites(),
            can_change_settings: self.can_change_settings(),
        }
    }
}

/// The order-scoped capability flags handed to clients.
///
/// Item-scoped checks (edit, delete, view) stay server-side because they
/// depend on the item; clients compare item owners against the viewer key
/// from their snapshot instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    /// May add an item right now.
    pub can_add_item: bool,
    /// May move the deadline.
    pub can_extend_deadline: bool,
    /// May mint invite links.
    pub can_issue_invites: bool,
    /// May change order settings.
    pub can_change_settings: bool,
}
