//! Stateless signed tokens for invite and admin links.
//!
//! Links are the only credential this service hands out: an invite link
//! admits one named guest to one order, an admin link grants admin standing
//! for one order. Both are HMAC-SHA256 signed payloads carried entirely in
//! the URL - nothing is stored server-side, so links survive database
//! restores and can be minted offline.
//!
//! Wire form: `base64url(payload_json) "." base64url(tag)`, both unpadded,
//! safe to embed in a URL path segment. The tag covers a purpose label plus
//! the payload segment exactly as transmitted, so invite tokens can never
//! verify as admin tokens and vice versa.
//!
//! Verification is deliberately opaque: bad encoding, a wrong signature, a
//! mismatched schema, or a foreign label all collapse into [`InvalidToken`],
//! and token contents are never logged. Rotating the signing secret
//! invalidates every outstanding link of both kinds - that is the revocation
//! story, and it is intentional.

use core::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::types::OrderId;

type HmacSha256 = Hmac<Sha256>;

const LABEL_INVITE: &str = "invite";
const LABEL_ADMIN: &str = "admin";

/// Opaque verification failure.
///
/// Every reason a token can fail to verify collapses into this one value so
/// that responses (and logs) never reveal which check rejected it.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid token")]
pub struct InvalidToken;

/// Failure to mint a token.
#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    /// The payload could not be serialized.
    #[error("token payload could not be serialized")]
    Serialize(#[from] serde_json::Error),
    /// The signing key was rejected by the MAC.
    #[error("signing key rejected")]
    Key,
}

/// Payload of an invite link.
///
/// Binds one guest name to one order. The same link always resolves to the
/// same guest identity; two links minted for the same name are equivalent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InvitePayload {
    /// Order the invite admits the guest to.
    pub order_id: OrderId,
    /// Name the guest will act under.
    pub guest_name: String,
    /// Unix seconds when the link was minted. Informational only; links do
    /// not expire.
    pub issued_at: i64,
}

impl InvitePayload {
    /// Build a payload stamped with the current time.
    #[must_use]
    pub fn new(order_id: OrderId, guest_name: impl Into<String>) -> Self {
        Self {
            order_id,
            guest_name: guest_name.into(),
            issued_at: Utc::now().timestamp(),
        }
    }
}

/// Payload of an admin link.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AdminPayload {
    /// Order the link grants admin standing for.
    pub order_id: OrderId,
    /// Unix seconds when the link was minted. Informational only.
    pub issued_at: i64,
}

impl AdminPayload {
    /// Build a payload stamped with the current time.
    #[must_use]
    pub fn new(order_id: OrderId) -> Self {
        Self {
            order_id,
            issued_at: Utc::now().timestamp(),
        }
    }
}

/// Signs and verifies link tokens with the service-wide secret.
pub struct TokenCodec {
    secret: SecretString,
}

// Manual Debug to prevent secret leakage
impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl TokenCodec {
    /// Create a codec from the signing secret.
    #[must_use]
    pub const fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    /// Mint an invite token.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized or the key is
    /// rejected.
    pub fn issue_invite(&self, payload: &InvitePayload) -> Result<String, EncodeError> {
        self.seal(LABEL_INVITE, payload)
    }

    /// Verify an invite token.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidToken`] for any failure, without detail.
    pub fn verify_invite(&self, token: &str) -> Result<InvitePayload, InvalidToken> {
        self.open(LABEL_INVITE, token)
    }

    /// Mint an admin token.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized or the key is
    /// rejected.
    pub fn issue_admin(&self, payload: &AdminPayload) -> Result<String, EncodeError> {
        self.seal(LABEL_ADMIN, payload)
    }

    /// Verify an admin token.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidToken`] for any failure, without detail.
    pub fn verify_admin(&self, token: &str) -> Result<AdminPayload, InvalidToken> {
        self.open(LABEL_ADMIN, token)
    }

    fn mac(&self, label: &str, body: &str) -> Result<HmacSha256, hmac::digest::InvalidLength> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())?;
        mac.update(label.as_bytes());
        mac.update(b".");
        mac.update(body.as_bytes());
        Ok(mac)
    }

    fn seal<T: Serialize>(&self, label: &str, payload: &T) -> Result<String, EncodeError> {
        let json = serde_json::to_vec(payload)?;
        let body = URL_SAFE_NO_PAD.encode(json);
        let mac = self.mac(label, &body).map_err(|_| EncodeError::Key)?;
        let tag = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{body}.{tag}"))
    }

    /// Verify-then-parse: the signature is checked (in constant time, via
    /// the MAC itself) before the payload bytes are touched.
    fn open<T: DeserializeOwned>(&self, label: &str, token: &str) -> Result<T, InvalidToken> {
        let (body, tag) = token.split_once('.').ok_or(InvalidToken)?;
        let tag = URL_SAFE_NO_PAD.decode(tag).map_err(|_| InvalidToken)?;
        let mac = self.mac(label, body).map_err(|_| InvalidToken)?;
        mac.verify_slice(&tag).map_err(|_| InvalidToken)?;

        let json = URL_SAFE_NO_PAD.decode(body).map_err(|_| InvalidToken)?;
        serde_json::from_slice(&json).map_err(|_| InvalidToken)
    }
}
