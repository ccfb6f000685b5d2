//! Session-backed identity resolution.
//!
//! Who a caller is depends on the order being looked at: the same session can
//! be guest "Alice" in one order, plain anonymous in another, and admin of a
//! third. Resolution is deterministic and idempotent - it never creates
//! identities as a side effect beyond minting the session's anonymous id on
//! first contact.
//!
//! Precedence, per order: invite-bound guest, then authenticated subject,
//! then anonymous. Admin standing comes from having presented the order's
//! admin token, or from being the order's authenticated creator.

use std::collections::{HashMap, HashSet};

use tower_sessions::Session;
use uuid::Uuid;

use cartpool_core::{Actor, Identity, Order, OrderId};

use crate::error::Result;
use crate::models::session::{AuthenticatedUser, keys};

/// Identity-relevant session state, loaded in one pass.
#[derive(Debug, Clone, Default)]
pub struct IdentityState {
    /// Per-session anonymous id, if minted.
    pub anon_id: Option<Uuid>,
    /// Name an anonymous user last added an item under.
    pub display_name: Option<String>,
    /// Proxy-authenticated principal.
    pub authenticated: Option<AuthenticatedUser>,
    /// Per-order guest bindings from presented invite links.
    pub guest_bindings: HashMap<OrderId, String>,
    /// Orders this session has presented a valid admin token for.
    pub admin_orders: HashSet<OrderId>,
}

impl IdentityState {
    /// Resolve the caller's identity for `order`.
    ///
    /// Pure: two calls with the same state and order yield the same identity.
    /// `anon_id` is passed in because minting it is the caller's concern.
    #[must_use]
    pub fn resolve(&self, anon_id: Uuid, order: &Order) -> Identity {
        let identity = if let Some(name) = self.guest_bindings.get(&order.id) {
            Identity::new(Actor::Guest { name: name.clone() }, name.clone())
        } else if let Some(user) = &self.authenticated {
            let display = user
                .display_name
                .clone()
                .unwrap_or_else(|| user.subject.clone());
            Identity::new(
                Actor::Authenticated {
                    subject: user.subject.clone(),
                },
                display,
            )
        } else {
            let display = self
                .display_name
                .clone()
                .unwrap_or_else(|| "Anonymous".to_owned());
            Identity::new(Actor::Anonymous { session: anon_id }, display)
        };

        if self.is_admin_of(order) {
            identity.with_admin()
        } else {
            identity
        }
    }

    fn is_admin_of(&self, order: &Order) -> bool {
        if self.admin_orders.contains(&order.id) {
            return true;
        }
        match (&self.authenticated, &order.creator_subject) {
            (Some(user), Some(creator)) => user.subject == *creator,
            _ => false,
        }
    }
}

/// Identity operations over the request's session.
pub struct IdentityService<'a> {
    session: &'a Session,
}

impl<'a> IdentityService<'a> {
    /// Wrap the request session.
    #[must_use]
    pub const fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// Load the identity-relevant session state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the session store fails.
    pub async fn state(&self) -> Result<IdentityState> {
        Ok(IdentityState {
            anon_id: self.session.get(keys::ANON_ID).await?,
            display_name: self.session.get(keys::DISPLAY_NAME).await?,
            authenticated: self.session.get(keys::AUTHENTICATED_USER).await?,
            guest_bindings: self
                .session
                .get(keys::GUEST_BINDINGS)
                .await?
                .unwrap_or_default(),
            admin_orders: self
                .session
                .get(keys::ADMIN_ORDERS)
                .await?
                .unwrap_or_default(),
        })
    }

    /// Get the session's anonymous id, minting and persisting it if absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the session store fails.
    pub async fn anon_id(&self) -> Result<Uuid> {
        if let Some(id) = self.session.get::<Uuid>(keys::ANON_ID).await? {
            return Ok(id);
        }
        let id = Uuid::new_v4();
        self.session.insert(keys::ANON_ID, id).await?;
        Ok(id)
    }

    /// Resolve the caller's identity for `order`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the session store fails.
    pub async fn resolve(&self, order: &Order) -> Result<Identity> {
        let state = self.state().await?;
        let anon_id = match state.anon_id {
            Some(id) => id,
            None => self.anon_id().await?,
        };
        Ok(state.resolve(anon_id, order))
    }

    /// Bind this session to a guest name for one order.
    ///
    /// Re-presenting the same invite re-binds identically, so this is safe
    /// to call on every link click.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the session store fails.
    pub async fn bind_guest(&self, order_id: OrderId, guest_name: &str) -> Result<()> {
        let mut bindings: HashMap<OrderId, String> = self
            .session
            .get(keys::GUEST_BINDINGS)
            .await?
            .unwrap_or_default();
        bindings.insert(order_id, guest_name.to_owned());
        self.session.insert(keys::GUEST_BINDINGS, bindings).await?;
        Ok(())
    }

    /// Mark this session as admin of one order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the session store fails.
    pub async fn grant_admin(&self, order_id: OrderId) -> Result<()> {
        let mut orders: HashSet<OrderId> = self
            .session
            .get(keys::ADMIN_ORDERS)
            .await?
            .unwrap_or_default();
        if orders.insert(order_id) {
            self.session.insert(keys::ADMIN_ORDERS, orders).await?;
        }
        Ok(())
    }

    /// Remember the display name an anonymous user chose when adding an item.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the session store fails.
    pub async fn remember_display_name(&self, name: &str) -> Result<()> {
        self.session.insert(keys::DISPLAY_NAME, name).await?;
        Ok(())
    }

    /// Store the proxy-authenticated principal in the session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the session store fails.
    pub async fn login(&self, user: &AuthenticatedUser) -> Result<()> {
        self.session.insert(keys::AUTHENTICATED_USER, user).await?;
        Ok(())
    }

    /// Drop the whole session: subject, guest bindings and admin grants.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the session store fails.
    pub async fn logout(&self) -> Result<()> {
        self.session.flush().await?;
        Ok(())
    }
}
