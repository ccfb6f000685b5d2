//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `CARTPOOL_SECRET_KEY` - Token signing secret (min 32 chars, high entropy)
//!
//! ## Optional
//! - `CARTPOOL_DATABASE_URL` - `SQLite` connection string (default: sqlite://data/cartpool.db)
//! - `CARTPOOL_HOST` - Bind address (default: 127.0.0.1)
//! - `CARTPOOL_PORT` - Listen port (default: 8080)
//! - `CARTPOOL_BASE_URL` - Public URL used in invite and admin links (default: `http://<host>:<port>`)
//! - `CARTPOOL_AUTH_SUBJECT_HEADER` - Request header carrying the authenticated
//!   subject, set by a trusted reverse proxy. Unset means no identity provider.
//! - `CARTPOOL_AUTH_NAME_HEADER` - Request header carrying the authenticated
//!   display name (default: x-auth-request-preferred-username)
//! - `CARTPOOL_WS_HEARTBEAT_SECS` - WebSocket ping interval (default: 30)
//! - `CARTPOOL_WS_TIMEOUT_SECS` - Seconds without any client frame before a
//!   connection is dropped (default: 75)
//! - `CARTPOOL_SENTRY_DSN` - Sentry error tracking DSN
//! - `CARTPOOL_SENTRY_ENVIRONMENT` - Sentry environment tag (default: development)
//! - `CARTPOOL_SENTRY_SAMPLE_RATE` - Sentry error sample rate (default: 1.0)
//! - `CARTPOOL_SENTRY_TRACES_SAMPLE_RATE` - Sentry tracing sample rate (default: 0.0)

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

use cartpool_core::OrderId;

const MIN_SECRET_KEY_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Cartpool server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `SQLite` database connection URL
    pub database_url: String,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL, without a trailing slash
    pub base_url: String,
    /// HMAC key for invite and admin tokens
    pub secret_key: SecretString,
    /// Reverse-proxy authentication headers, if an identity provider fronts us
    pub auth_proxy: Option<AuthProxyConfig>,
    /// WebSocket keepalive tuning
    pub ws: WsConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment tag
    pub sentry_environment: String,
    /// Sentry error sample rate
    pub sentry_sample_rate: f32,
    /// Sentry performance tracing sample rate
    pub sentry_traces_sample_rate: f32,
}

/// Headers a trusted reverse proxy uses to forward the authenticated user.
///
/// Cartpool never performs an OIDC handshake itself; when a proxy such as
/// oauth2-proxy sits in front, it strips these headers from client requests
/// and injects the verified values.
#[derive(Debug, Clone)]
pub struct AuthProxyConfig {
    /// Header carrying the stable subject identifier (lowercase)
    pub subject_header: String,
    /// Header carrying the human-readable name (lowercase)
    pub name_header: String,
}

/// WebSocket keepalive configuration.
#[derive(Debug, Clone, Copy)]
pub struct WsConfig {
    /// How often the server pings each connection
    pub heartbeat_interval: Duration,
    /// How long a connection may stay silent before eviction
    pub client_timeout: Duration,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if the secret key fails validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("CARTPOOL_DATABASE_URL", "sqlite://data/cartpool.db");
        let host = get_env_or_default("CARTPOOL_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("CARTPOOL_HOST".to_string(), e.to_string()))?;
        let port = get_env_or_default("CARTPOOL_PORT", "8080")
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidEnvVar("CARTPOOL_PORT".to_string(), e.to_string()))?;
        let base_url = match get_optional_env("CARTPOOL_BASE_URL") {
            Some(raw) => normalize_base_url(&raw, "CARTPOOL_BASE_URL")?,
            None => format!("http://{host}:{port}"),
        };
        let secret_key = get_validated_secret("CARTPOOL_SECRET_KEY")?;
        validate_secret_length(&secret_key, "CARTPOOL_SECRET_KEY")?;

        let auth_proxy = AuthProxyConfig::from_env();
        let ws = WsConfig::from_env()?;

        let sentry_dsn = get_optional_env("CARTPOOL_SENTRY_DSN");
        let sentry_environment = get_env_or_default("CARTPOOL_SENTRY_ENVIRONMENT", "development");
        let sentry_sample_rate = get_parsed_or_default("CARTPOOL_SENTRY_SAMPLE_RATE", 1.0_f32)?;
        let sentry_traces_sample_rate =
            get_parsed_or_default("CARTPOOL_SENTRY_TRACES_SAMPLE_RATE", 0.0_f32)?;

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            secret_key,
            auth_proxy,
            ws,
            sentry_dsn,
            sentry_environment,
            sentry_sample_rate,
            sentry_traces_sample_rate,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Whether session cookies should carry the `Secure` attribute.
    #[must_use]
    pub fn cookies_secure(&self) -> bool {
        self.base_url.starts_with("https://")
    }

    /// Absolute URL a guest follows to claim an invite.
    #[must_use]
    pub fn join_url(&self, order_id: OrderId, token: &str) -> String {
        format!("{}/orders/{order_id}/join/{token}", self.base_url)
    }

    /// Absolute URL that grants admin standing on the order it names.
    #[must_use]
    pub fn admin_url(&self, order_id: OrderId, token: &str) -> String {
        format!("{}/orders/{order_id}/admin/{token}", self.base_url)
    }
}

impl AuthProxyConfig {
    fn from_env() -> Option<Self> {
        let subject_header = get_optional_env("CARTPOOL_AUTH_SUBJECT_HEADER")?;
        let name_header = get_env_or_default(
            "CARTPOOL_AUTH_NAME_HEADER",
            "x-auth-request-preferred-username",
        );
        Some(Self {
            subject_header: subject_header.to_ascii_lowercase(),
            name_header: name_header.to_ascii_lowercase(),
        })
    }
}

impl WsConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let heartbeat_secs = get_parsed_or_default("CARTPOOL_WS_HEARTBEAT_SECS", 30_u64)?;
        let timeout_secs = get_parsed_or_default("CARTPOOL_WS_TIMEOUT_SECS", 75_u64)?;
        Self::validate(heartbeat_secs, timeout_secs)
    }

    fn validate(heartbeat_secs: u64, timeout_secs: u64) -> Result<Self, ConfigError> {
        if heartbeat_secs == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "CARTPOOL_WS_HEARTBEAT_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if timeout_secs <= heartbeat_secs {
            return Err(ConfigError::InvalidEnvVar(
                "CARTPOOL_WS_TIMEOUT_SECS".to_string(),
                format!("must exceed the heartbeat interval ({heartbeat_secs}s)"),
            ));
        }
        Ok(Self {
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            client_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str, default: &str) -> String {
    // Try primary key first (e.g., CARTPOOL_DATABASE_URL)
    if let Ok(value) = std::env::var(primary_key) {
        return value;
    }
    // Fallback to generic DATABASE_URL
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return value;
    }
    default.to_string()
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get an environment variable parsed into `T`, or the default when unset.
fn get_parsed_or_default<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

/// Validate and canonicalize a public base URL (scheme check, no trailing slash).
fn normalize_base_url(raw: &str, var_name: &str) -> Result<String, ConfigError> {
    let parsed = Url::parse(raw)
        .map_err(|e| ConfigError::InvalidEnvVar(var_name.to_string(), e.to_string()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ConfigError::InvalidEnvVar(
            var_name.to_string(),
            format!("unsupported scheme '{}'", parsed.scheme()),
        ));
    }
    Ok(raw.trim_end_matches('/').to_string())
}

/// Validate that the secret key meets minimum length requirements.
fn validate_secret_length(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_SECRET_KEY_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_SECRET_KEY_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    // Check blocklist
    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    // Check entropy (real secrets like API keys have high entropy)
    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
