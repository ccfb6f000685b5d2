//! Session-related types.
//!
//! Everything identity-shaped lives in the session: the per-browser anonymous
//! id, the proxy-authenticated subject, and the per-order guest and admin
//! grants collected by presenting tokens.

use serde::{Deserialize, Serialize};

/// Session-stored authenticated principal.
///
/// Written by the auth boundary from trusted reverse-proxy headers; never
/// derived from client-controlled input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    /// Stable subject identifier from the identity provider.
    pub subject: String,
    /// Human-readable name, when the proxy forwards one.
    pub display_name: Option<String>,
}

/// Session keys for identity data.
pub mod keys {
    /// Key for the per-session anonymous id (a UUID, minted on first use).
    pub const ANON_ID: &str = "anon_id";

    /// Key for the display name an anonymous user last added an item under.
    pub const DISPLAY_NAME: &str = "display_name";

    /// Key for the proxy-authenticated principal.
    pub const AUTHENTICATED_USER: &str = "authenticated_user";

    /// Key for per-order guest bindings (`OrderId` -> bound guest name).
    pub const GUEST_BINDINGS: &str = "guest_bindings";

    /// Key for the set of orders this session holds admin rights on.
    pub const ADMIN_ORDERS: &str = "admin_orders";
}
