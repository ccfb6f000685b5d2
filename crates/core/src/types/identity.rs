//! Caller identity: who is acting on an order.
//!
//! Three ways a caller can be known, tracked per order:
//! - anonymously, keyed by a per-session UUID
//! - as a named guest, bound by presenting an invite link
//! - as an authenticated principal with a stable subject identifier
//!
//! Admin standing is orthogonal: any of the three can hold it once the
//! order's admin link has been presented.

use core::fmt;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the caller is known to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actor {
    /// Known only by a per-session UUID.
    Anonymous {
        /// Session-scoped identifier, minted on first contact.
        session: Uuid,
    },
    /// Bound to a specific guest name via an invite link.
    ///
    /// Two presentations of the same link (or of two links naming the same
    /// guest) resolve to the same actor - the name is the identity.
    Guest {
        /// The invited guest's name, as signed into the link.
        name: String,
    },
    /// An authenticated principal from the deployment's identity provider.
    Authenticated {
        /// Stable subject identifier.
        subject: String,
    },
}

impl Actor {
    /// Stable ownership key for this actor.
    ///
    /// Stored on items and compared for ownership checks. The prefixes keep
    /// the three namespaces disjoint.
    #[must_use]
    pub fn key(&self) -> ActorKey {
        match self {
            Self::Anonymous { session } => ActorKey(format!("anon:{session}")),
            Self::Guest { name } => ActorKey(format!("guest:{name}")),
            Self::Authenticated { subject } => ActorKey(format!("oidc:{subject}")),
        }
    }

    /// Is this an anonymous actor?
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous { .. })
    }

    /// Is this an invite-bound guest?
    #[must_use]
    pub const fn is_guest(&self) -> bool {
        matches!(self, Self::Guest { .. })
    }

    /// Is this an authenticated principal?
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

/// Stable ownership key derived from an [`Actor`].
///
/// This is what item rows store as their owner column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorKey(String);

impl ActorKey {
    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the key and returns its inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

/// For values read back from storage.
impl From<String> for ActorKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ActorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A role held by an identity for a particular order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// May take part in the order, subject to its capability rules.
    Participant,
    /// Holds the order's admin standing.
    Admin,
}

/// A resolved identity: the actor plus order-scoped roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Who is acting.
    pub actor: Actor,
    /// Name shown next to this caller's items.
    pub display_name: String,
    /// Roles held for the order this identity was resolved against.
    pub roles: BTreeSet<Role>,
}

impl Identity {
    /// Create an identity with the [`Role::Participant`] role.
    #[must_use]
    pub fn new(actor: Actor, display_name: impl Into<String>) -> Self {
        Self {
            actor,
            display_name: display_name.into(),
            roles: BTreeSet::from([Role::Participant]),
        }
    }

    /// Grant the admin role, returning the modified identity.
    #[must_use]
    pub fn with_admin(mut self) -> Self {
        self.roles.insert(Role::Admin);
        self
    }

    /// Does this identity hold the admin role?
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }

    /// Ownership key for the underlying actor.
    #[must_use]
    pub fn key(&self) -> ActorKey {
        self.actor.key()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn anon() -> Actor {
        Actor::Anonymous {
            session: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_actor_keys_use_disjoint_prefixes() {
        let a = anon().key();
        let g = Actor::Guest {
            name: "Alice".to_owned(),
        }
        .key();
        let s = Actor::Authenticated {
            subject: "alice@example.com".to_owned(),
        }
        .key();

        assert!(a.as_str().starts_with("anon:"));
        assert!(g.as_str().starts_with("guest:"));
        assert!(s.as_str().starts_with("oidc:"));
    }

    #[test]
    fn test_same_guest_name_same_key() {
        let first = Actor::Guest {
            name: "Alice".to_owned(),
        };
        let second = Actor::Guest {
            name: "Alice".to_owned(),
        };
        assert_eq!(first.key(), second.key());
    }

    #[test]
    fn test_different_sessions_different_keys() {
        assert_ne!(anon().key(), anon().key());
    }

    #[test]
    fn test_new_identity_is_participant_not_admin() {
        let identity = Identity::new(anon(), "Someone");
        assert!(identity.roles.contains(&Role::Participant));
        assert!(!identity.is_admin());
    }

    #[test]
    fn test_with_admin_grants_admin() {
        let identity = Identity::new(anon(), "Someone").with_admin();
        assert!(identity.is_admin());
        assert!(identity.roles.contains(&Role::Participant));
    }

    #[test]
    fn test_actor_serde_kind_tags() {
        let json = serde_json::to_value(Actor::Guest {
            name: "Bob".to_owned(),
        })
        .unwrap();
        assert_eq!(json["kind"], "guest");
        assert_eq!(json["name"], "Bob");
    }
}
