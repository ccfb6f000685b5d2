#![cfg_attr(not(test), forbid(unsafe_code))]
// Harness helpers fail tests by panicking, and are only consumed in-crate.
#![allow(clippy::missing_panics_doc, clippy::must_use_candidate)]

//! Integration tests for Cartpool.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p cartpool-integration-tests
//! ```
//!
//! Each test spawns the complete server stack (router, session layer, rate
//! limiting, broadcast rooms) on an ephemeral port backed by an in-memory
//! database, so the suite needs no external services.
//!
//! # Test Categories
//!
//! - `orders_flow` - Order lifecycle, items, and capability enforcement
//! - `token_links` - Invite and admin link minting and claiming
//! - `live_updates` - WebSocket streams, sequencing, and delivery filtering
//! - `export_csv` - CSV downloads
//! - `auth_sessions` - Session boundary behind a simulated identity proxy

use std::net::SocketAddr;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use futures::StreamExt;
use reqwest::Client;
use secrecy::SecretString;
use serde_json::{Value, json};
use sqlx::SqlitePool;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use cartpool_server::config::{AuthProxyConfig, ServerConfig, WsConfig};
use cartpool_server::middleware::session::SESSION_COOKIE_NAME;
use cartpool_server::{AppState, db};

/// Signing secret for test servers. Never reuse outside tests.
const TEST_SECRET: &str = "integration-test-secret-0a1b2c3d4e5f60718293a4b5c6d7e8f9";

/// Subject header the simulated identity proxy forwards.
pub const SUBJECT_HEADER: &str = "x-auth-request-user";
/// Display-name header the simulated identity proxy forwards.
pub const NAME_HEADER: &str = "x-auth-request-preferred-username";

/// How long to wait for an expected WebSocket frame before failing.
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Client half of a test WebSocket connection.
pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A full Cartpool server running on an ephemeral port.
///
/// Dropping the handle aborts the server task; the in-memory database goes
/// away with its pool.
pub struct TestServer {
    /// Base URL of the running server, e.g. `http://127.0.0.1:49152`.
    pub base_url: String,
    /// Address the server is bound to.
    pub addr: SocketAddr,
    /// Direct handle to the backing database.
    pub pool: SqlitePool,
    server: JoinHandle<()>,
}

impl TestServer {
    /// Spawn a server with default test configuration: no identity proxy,
    /// production WebSocket timings.
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn a server with a simulated identity proxy in front.
    pub async fn spawn_with_auth_proxy() -> Self {
        Self::spawn_with(|config| {
            config.auth_proxy = Some(AuthProxyConfig {
                subject_header: SUBJECT_HEADER.to_owned(),
                name_header: NAME_HEADER.to_owned(),
            });
        })
        .await
    }

    /// Spawn a server, letting the caller adjust the configuration before
    /// the stack comes up.
    pub async fn spawn_with(configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener
            .local_addr()
            .expect("Failed to read listener address");

        let mut config = ServerConfig {
            database_url: "sqlite::memory:".to_owned(),
            host: addr.ip(),
            port: addr.port(),
            base_url: format!("http://{addr}"),
            secret_key: SecretString::from(TEST_SECRET),
            auth_proxy: None,
            ws: WsConfig {
                heartbeat_interval: Duration::from_secs(30),
                client_timeout: Duration::from_secs(75),
            },
            sentry_dsn: None,
            sentry_environment: "test".to_owned(),
            sentry_sample_rate: 0.0,
            sentry_traces_sample_rate: 0.0,
        };
        configure(&mut config);

        let pool = db::create_pool(&config.database_url)
            .await
            .expect("Failed to create test database pool");
        db::MIGRATOR
            .run(&pool)
            .await
            .expect("Failed to run migrations");

        let state = AppState::new(config, pool.clone());
        let app = cartpool_server::app(state)
            .await
            .expect("Failed to build application");

        let server = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .expect("Test server crashed");
        });

        Self {
            base_url: format!("http://{addr}"),
            addr,
            pool,
            server,
        }
    }

    /// Fresh client with its own cookie jar; one per simulated browser.
    pub fn client(&self) -> Client {
        Client::builder()
            .cookie_store(true)
            .build()
            .expect("Failed to create HTTP client")
    }

    /// Absolute URL for `path`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// WebSocket URL for `path`.
    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{path}", self.addr)
    }

    /// Open a WebSocket to `path`, optionally presenting a session cookie.
    ///
    /// Without a cookie the stream runs as a fresh anonymous session.
    pub async fn connect_ws(&self, path: &str, cookie: Option<&str>) -> WsClient {
        let mut request = self
            .ws_url(path)
            .into_client_request()
            .expect("Failed to build WebSocket request");
        if let Some(cookie) = cookie {
            request.headers_mut().insert(
                COOKIE,
                cookie.parse().expect("Failed to encode cookie header"),
            );
        }
        let (socket, _) = connect_async(request)
            .await
            .expect("WebSocket handshake failed");
        socket
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Extract the session cookie pair (`cartpool_session=...`) from a response.
///
/// Reqwest's cookie jar covers plain HTTP for us; this is for carrying the
/// same session into a WebSocket handshake.
pub fn session_cookie(response: &reqwest::Response) -> String {
    response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .find(|pair| pair.starts_with(SESSION_COOKIE_NAME))
        .map(ToOwned::to_owned)
        .expect("response should set a session cookie")
}

/// Read the next JSON text frame, skipping control frames.
///
/// Fails the test if nothing arrives within five seconds - a missing frame
/// should fail loudly, not hang the suite.
pub async fn next_json_frame(socket: &mut WsClient) -> Value {
    loop {
        let message = timeout(FRAME_TIMEOUT, socket.next())
            .await
            .expect("Timed out waiting for a WebSocket frame")
            .expect("WebSocket closed while waiting for a frame")
            .expect("WebSocket read failed");
        match message {
            Message::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("Frame was not valid JSON");
            }
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("Unexpected WebSocket frame: {other:?}"),
        }
    }
}

/// Wait for the connection to terminate (close frame or stream end),
/// draining any remaining frames.
pub async fn expect_closed(socket: &mut WsClient) {
    loop {
        match timeout(FRAME_TIMEOUT, socket.next())
            .await
            .expect("Timed out waiting for the WebSocket to close")
        {
            None | Some(Ok(Message::Close(_))) | Some(Err(_)) => return,
            Some(Ok(_)) => {}
        }
    }
}

/// A plausible order-creation payload. Override fields per test.
pub fn order_payload() -> Value {
    json!({
        "vendor_name": "Rye & Sons Bakery",
        "vendor_url": "https://rye.example",
        "deadline": Utc::now() + TimeDelta::days(3),
        "creator_name": "Dana",
    })
}

/// Create an order, asserting success. Returns the creation response body
/// (`order` plus `admin_url`); the client's session becomes order admin.
pub async fn create_order(server: &TestServer, client: &Client, payload: &Value) -> Value {
    let response = client
        .post(server.url("/orders"))
        .json(payload)
        .send()
        .await
        .expect("Failed to send order creation request");
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    response
        .json()
        .await
        .expect("Order creation response was not JSON")
}

/// Claim an invite link for `guest_name`: the admin client mints it, the
/// guest client presents it. Returns the guest's session cookie for
/// WebSocket use.
pub async fn join_as_guest(
    server: &TestServer,
    admin: &Client,
    guest: &Client,
    order_id: &str,
    guest_name: &str,
) -> String {
    let invite: Value = admin
        .post(server.url(&format!("/orders/{order_id}/invites")))
        .json(&json!({ "guest_name": guest_name }))
        .send()
        .await
        .expect("Failed to send invite request")
        .json()
        .await
        .expect("Invite response was not JSON");
    let join_url = invite
        .get("join_url")
        .and_then(Value::as_str)
        .expect("Invite response carried no join_url");

    let claim = guest
        .get(join_url)
        .send()
        .await
        .expect("Failed to claim invite");
    assert_eq!(claim.status(), reqwest::StatusCode::OK);
    session_cookie(&claim)
}
