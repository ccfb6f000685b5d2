//! Integration tests for the live order streams.
//!
//! Covers the snapshot-then-events contract, gap-free sequencing across
//! subscribers and late joiners, privacy filtering, and eviction of silent
//! connections.

#![allow(clippy::indexing_slicing)]

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::{Value, json};

use cartpool_server::config::WsConfig;

use cartpool_integration_tests::{
    TestServer, expect_closed, join_as_guest, next_json_frame, order_payload, session_cookie,
};

/// Create an order and capture the creating session's cookie for
/// WebSocket handshakes.
async fn create_order_with_cookie(
    server: &TestServer,
    client: &Client,
    payload: &Value,
) -> (Value, String) {
    let response = client
        .post(server.url("/orders"))
        .json(payload)
        .send()
        .await
        .expect("Failed to send order creation request");
    assert_eq!(response.status(), StatusCode::CREATED);
    let cookie = session_cookie(&response);
    let body = response
        .json()
        .await
        .expect("Order creation response was not JSON");
    (body, cookie)
}

/// Add an item, asserting success.
async fn add_item(server: &TestServer, client: &Client, order_id: &str, product: &str) -> Value {
    let response = client
        .post(server.url(&format!("/orders/{order_id}/items")))
        .json(&json!({ "product_name": product }))
        .send()
        .await
        .expect("Failed to add item");
    assert_eq!(response.status(), StatusCode::CREATED);
    response.json().await.expect("Item was not JSON")
}

// ============================================================================
// Snapshot and ordering
// ============================================================================

#[tokio::test]
async fn test_snapshot_then_strictly_ordered_events() {
    let server = TestServer::spawn().await;
    let creator = server.client();

    let (created, cookie) = create_order_with_cookie(&server, &creator, &order_payload()).await;
    let order_id = created["order"]["id"].as_str().expect("Order id missing");

    let mut socket = server
        .connect_ws(&format!("/orders/{order_id}/ws"), Some(&cookie))
        .await;

    let snapshot = next_json_frame(&mut socket).await;
    assert_eq!(snapshot["kind"], "snapshot");
    assert_eq!(snapshot["seq"], 0);
    assert_eq!(snapshot["order"]["id"], *order_id);
    assert_eq!(snapshot["viewer"]["is_admin"], true);
    assert_eq!(snapshot["items"], json!([]));
    assert_eq!(snapshot["capabilities"]["can_issue_invites"], true);

    let item = add_item(&server, &creator, order_id, "Sourdough").await;
    let frame = next_json_frame(&mut socket).await;
    assert_eq!(frame["kind"], "item_added");
    assert_eq!(frame["seq"], 1);
    assert_eq!(frame["item"]["product_name"], "Sourdough");

    let item_id = item["id"].as_str().expect("Item id missing");
    let response = creator
        .put(server.url(&format!("/orders/{order_id}/items/{item_id}")))
        .json(&json!({ "product_name": "Sourdough Loaf" }))
        .send()
        .await
        .expect("Failed to edit item");
    assert_eq!(response.status(), StatusCode::OK);
    let frame = next_json_frame(&mut socket).await;
    assert_eq!(frame["kind"], "item_updated");
    assert_eq!(frame["seq"], 2);

    let response = creator
        .delete(server.url(&format!("/orders/{order_id}/items/{item_id}")))
        .send()
        .await
        .expect("Failed to remove item");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let frame = next_json_frame(&mut socket).await;
    assert_eq!(frame["kind"], "item_deleted");
    assert_eq!(frame["seq"], 3);
    assert_eq!(frame["item"]["id"], item["id"]);
}

#[tokio::test]
async fn test_all_subscribers_share_one_sequence() {
    let server = TestServer::spawn().await;
    let creator = server.client();

    let (created, cookie) = create_order_with_cookie(&server, &creator, &order_payload()).await;
    let order_id = created["order"]["id"].as_str().expect("Order id missing");
    let path = format!("/orders/{order_id}/ws");

    let mut admin_socket = server.connect_ws(&path, Some(&cookie)).await;
    let mut viewer_socket = server.connect_ws(&path, None).await;
    assert_eq!(next_json_frame(&mut admin_socket).await["kind"], "snapshot");
    let viewer_snapshot = next_json_frame(&mut viewer_socket).await;
    assert_eq!(viewer_snapshot["kind"], "snapshot");
    assert_eq!(viewer_snapshot["viewer"]["is_admin"], false);

    add_item(&server, &creator, order_id, "Butter").await;
    for socket in [&mut admin_socket, &mut viewer_socket] {
        let frame = next_json_frame(socket).await;
        assert_eq!(frame["kind"], "item_added");
        assert_eq!(frame["seq"], 1);
    }

    let response = creator
        .post(server.url(&format!("/orders/{order_id}/deadline")))
        .json(&json!({ "deadline": chrono::Utc::now() + chrono::TimeDelta::days(10) }))
        .send()
        .await
        .expect("Failed to send deadline request");
    assert_eq!(response.status(), StatusCode::OK);
    let changed: Value = response.json().await.expect("Order was not JSON");

    for socket in [&mut admin_socket, &mut viewer_socket] {
        let frame = next_json_frame(socket).await;
        assert_eq!(frame["kind"], "deadline_changed");
        assert_eq!(frame["seq"], 2);
        assert_eq!(frame["deadline"], changed["deadline"]);
    }
}

#[tokio::test]
async fn test_late_joiner_snapshot_carries_stream_position() {
    let server = TestServer::spawn().await;
    let creator = server.client();

    let (created, cookie) = create_order_with_cookie(&server, &creator, &order_payload()).await;
    let order_id = created["order"]["id"].as_str().expect("Order id missing");
    let path = format!("/orders/{order_id}/ws");

    let mut early = server.connect_ws(&path, Some(&cookie)).await;
    assert_eq!(next_json_frame(&mut early).await["seq"], 0);

    add_item(&server, &creator, order_id, "Bread").await;
    add_item(&server, &creator, order_id, "Butter").await;
    assert_eq!(next_json_frame(&mut early).await["seq"], 1);
    assert_eq!(next_json_frame(&mut early).await["seq"], 2);

    // The late joiner's snapshot already contains both items, and its seq
    // says exactly where the live stream picks up.
    let mut late = server.connect_ws(&path, None).await;
    let snapshot = next_json_frame(&mut late).await;
    assert_eq!(snapshot["kind"], "snapshot");
    assert_eq!(snapshot["seq"], 2);
    assert_eq!(snapshot["items"].as_array().map(Vec::len), Some(2));

    add_item(&server, &creator, order_id, "Jam").await;
    assert_eq!(next_json_frame(&mut early).await["seq"], 3);
    assert_eq!(next_json_frame(&mut late).await["seq"], 3);
}

// ============================================================================
// Privacy filtering
// ============================================================================

#[tokio::test]
async fn test_privacy_withholds_foreign_item_events() {
    let server = TestServer::spawn().await;
    let admin = server.client();
    let alice = server.client();
    let bob = server.client();

    let mut payload = order_payload();
    payload["invite_only"] = json!(true);
    payload["privacy_mode"] = json!(true);
    let (created, admin_cookie) = create_order_with_cookie(&server, &admin, &payload).await;
    let order_id = created["order"]["id"].as_str().expect("Order id missing");

    let alice_cookie = join_as_guest(&server, &admin, &alice, order_id, "Alice").await;
    let bob_cookie = join_as_guest(&server, &admin, &bob, order_id, "Bob").await;

    let path = format!("/orders/{order_id}/ws");
    let mut admin_socket = server.connect_ws(&path, Some(&admin_cookie)).await;
    let mut alice_socket = server.connect_ws(&path, Some(&alice_cookie)).await;
    let mut bob_socket = server.connect_ws(&path, Some(&bob_cookie)).await;
    for socket in [&mut admin_socket, &mut alice_socket, &mut bob_socket] {
        assert_eq!(next_json_frame(socket).await["kind"], "snapshot");
    }

    add_item(&server, &alice, order_id, "Oat Milk").await;
    let frame = next_json_frame(&mut alice_socket).await;
    assert_eq!(frame["kind"], "item_added");
    assert_eq!(frame["seq"], 1);
    let frame = next_json_frame(&mut admin_socket).await;
    assert_eq!(frame["kind"], "item_added");
    assert_eq!(frame["seq"], 1);

    // Bob's snapshot agrees with his stream: Alice's item is not his to see.
    let bob_view: Value = bob
        .get(server.url(&format!("/orders/{order_id}")))
        .send()
        .await
        .expect("Failed to fetch snapshot")
        .json()
        .await
        .expect("Snapshot was not JSON");
    assert_eq!(bob_view["items"], json!([]));

    // An order-scoped change reaches Bob - and the sequence gap is his
    // signal that something was withheld.
    let response = admin
        .post(server.url(&format!("/orders/{order_id}/deadline")))
        .json(&json!({ "deadline": chrono::Utc::now() + chrono::TimeDelta::days(10) }))
        .send()
        .await
        .expect("Failed to send deadline request");
    assert_eq!(response.status(), StatusCode::OK);

    let frame = next_json_frame(&mut bob_socket).await;
    assert_eq!(frame["kind"], "deadline_changed");
    assert_eq!(frame["seq"], 2, "Bob sees seq jump from 0 to 2");
    let frame = next_json_frame(&mut alice_socket).await;
    assert_eq!(frame["kind"], "deadline_changed");
    assert_eq!(frame["seq"], 2);
}

#[tokio::test]
async fn test_order_scoped_events_reach_every_guest() {
    let server = TestServer::spawn().await;
    let admin = server.client();
    let alice = server.client();

    let mut payload = order_payload();
    payload["invite_only"] = json!(true);
    payload["privacy_mode"] = json!(true);
    let (created, _) = create_order_with_cookie(&server, &admin, &payload).await;
    let order_id = created["order"]["id"].as_str().expect("Order id missing");

    let alice_cookie = join_as_guest(&server, &admin, &alice, order_id, "Alice").await;
    let mut alice_socket = server
        .connect_ws(&format!("/orders/{order_id}/ws"), Some(&alice_cookie))
        .await;
    assert_eq!(next_json_frame(&mut alice_socket).await["kind"], "snapshot");

    // Minting an invite is order-scoped: guests learn someone was invited
    // without seeing the link itself.
    let response = admin
        .post(server.url(&format!("/orders/{order_id}/invites")))
        .json(&json!({ "guest_name": "Cara" }))
        .send()
        .await
        .expect("Failed to send invite request");
    assert_eq!(response.status(), StatusCode::OK);

    let frame = next_json_frame(&mut alice_socket).await;
    assert_eq!(frame["kind"], "invite_issued");
    assert_eq!(frame["guest_name"], "Cara");
    assert_eq!(frame["seq"], 1);
    assert!(
        frame.get("token").is_none() && frame.get("join_url").is_none(),
        "the link itself is never broadcast"
    );
}

// ============================================================================
// Connection lifecycle
// ============================================================================

#[tokio::test]
async fn test_silent_connections_are_evicted() {
    let server = TestServer::spawn_with(|config| {
        config.ws = WsConfig {
            heartbeat_interval: Duration::from_millis(100),
            client_timeout: Duration::from_millis(400),
        };
    })
    .await;
    let creator = server.client();

    let (created, _) = create_order_with_cookie(&server, &creator, &order_payload()).await;
    let order_id = created["order"]["id"].as_str().expect("Order id missing");

    let mut socket = server
        .connect_ws(&format!("/orders/{order_id}/ws"), None)
        .await;
    assert_eq!(next_json_frame(&mut socket).await["kind"], "snapshot");

    // Stop reading: no reads means no pong replies, so the server sees a
    // silent peer and closes the stream.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    expect_closed(&mut socket).await;
}

#[tokio::test]
async fn test_ws_handshake_rejected_for_unknown_order() {
    let server = TestServer::spawn().await;

    let result = tokio_tungstenite::connect_async(
        server.ws_url("/orders/00000000-0000-0000-0000-000000000000/ws"),
    )
    .await;
    match result {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 404);
        }
        other => panic!("Expected an HTTP rejection, got {other:?}"),
    }
}
