//! Integration tests for the order lifecycle.
//!
//! Covers creation and validation, per-viewer snapshots, item editing
//! rules, and the admin-only mutations.

#![allow(clippy::indexing_slicing)]

use chrono::{TimeDelta, Utc};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};

use cartpool_integration_tests::{TestServer, create_order, order_payload};

/// Send an order-creation request without asserting on the outcome.
async fn post_order(server: &TestServer, client: &Client, payload: &Value) -> reqwest::Response {
    client
        .post(server.url("/orders"))
        .json(payload)
        .send()
        .await
        .expect("Failed to send order creation request")
}

/// Fetch an order snapshot, asserting success.
async fn fetch_snapshot(server: &TestServer, client: &Client, order_id: &str) -> Value {
    let response = client
        .get(server.url(&format!("/orders/{order_id}")))
        .send()
        .await
        .expect("Failed to fetch order snapshot");
    assert_eq!(response.status(), StatusCode::OK);
    response.json().await.expect("Snapshot was not JSON")
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_endpoints() {
    let server = TestServer::spawn().await;
    let client = server.client();

    let response = client
        .get(server.url("/healthz"))
        .send()
        .await
        .expect("Liveness request failed");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.expect("Liveness body"), "ok");

    let response = client
        .get(server.url("/readyz"))
        .send()
        .await
        .expect("Readiness request failed");
    assert_eq!(response.status(), StatusCode::OK);
}

// ============================================================================
// Creation
// ============================================================================

#[tokio::test]
async fn test_create_order_returns_admin_link() {
    let server = TestServer::spawn().await;
    let client = server.client();

    let created = create_order(&server, &client, &order_payload()).await;
    let order = &created["order"];

    assert_eq!(order["vendor_name"], "Rye & Sons Bakery");
    assert_eq!(order["creator_name"], "Dana");
    assert_eq!(order["invite_only"], false);
    assert_eq!(order["revision"], 0);
    assert!(
        order.get("creator_subject").is_none(),
        "creator_subject must never reach clients"
    );

    let order_id = order["id"].as_str().expect("Order id missing");
    let admin_url = created["admin_url"].as_str().expect("admin_url missing");
    assert!(admin_url.starts_with(&server.base_url));
    assert!(admin_url.contains(&format!("/orders/{order_id}/admin/")));
}

#[tokio::test]
async fn test_create_order_validation() {
    let server = TestServer::spawn().await;
    let client = server.client();

    let mut blank_vendor = order_payload();
    blank_vendor["vendor_name"] = json!("   ");
    let response = post_order(&server, &client, &blank_vendor).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let mut bad_url = order_payload();
    bad_url["vendor_url"] = json!("not a url");
    let response = post_order(&server, &client, &bad_url).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let mut past_deadline = order_payload();
    past_deadline["deadline"] = json!(Utc::now() - TimeDelta::hours(1));
    let response = post_order(&server, &client, &past_deadline).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("Error body was not JSON");
    assert_eq!(body["error"], "deadline must be in the future");

    let mut privacy_without_invites = order_payload();
    privacy_without_invites["privacy_mode"] = json!(true);
    let response = post_order(&server, &client, &privacy_without_invites).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("Error body was not JSON");
    assert_eq!(body["error"], "privacy_mode requires invite_only");
}

#[tokio::test]
async fn test_create_order_requires_a_name_from_somewhere() {
    let server = TestServer::spawn().await;
    let client = server.client();

    let payload = json!({
        "vendor_name": "Rye & Sons Bakery",
        "vendor_url": "https://rye.example",
        "deadline": Utc::now() + TimeDelta::days(3),
    });
    let response = post_order(&server, &client, &payload).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("Error body was not JSON");
    assert_eq!(body["error"], "creator_name is required");
}

#[tokio::test]
async fn test_unknown_and_malformed_order_ids() {
    let server = TestServer::spawn().await;
    let client = server.client();

    let response = client
        .get(server.url("/orders/00000000-0000-0000-0000-000000000000"))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.expect("Error body was not JSON");
    assert_eq!(body["error"], "order not found");

    let response = client
        .get(server.url("/orders/not-a-uuid"))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// Snapshots
// ============================================================================

#[tokio::test]
async fn test_snapshot_is_rendered_per_viewer() {
    let server = TestServer::spawn().await;
    let creator = server.client();
    let stranger = server.client();

    let created = create_order(&server, &creator, &order_payload()).await;
    let order_id = created["order"]["id"].as_str().expect("Order id missing");

    let snapshot = fetch_snapshot(&server, &creator, order_id).await;
    assert_eq!(snapshot["viewer"]["display_name"], "Dana");
    assert_eq!(snapshot["viewer"]["is_admin"], true);
    assert_eq!(snapshot["capabilities"]["can_issue_invites"], true);
    assert!(
        snapshot["admin_url"].is_string(),
        "admins get a shareable admin link"
    );

    let snapshot = fetch_snapshot(&server, &stranger, order_id).await;
    assert_eq!(snapshot["viewer"]["is_admin"], false);
    assert_eq!(snapshot["capabilities"]["can_issue_invites"], false);
    // Open order: anyone with the link may add items.
    assert_eq!(snapshot["capabilities"]["can_add_item"], true);
    assert!(
        snapshot.get("admin_url").is_none(),
        "non-admins must not see an admin link"
    );
}

#[tokio::test]
async fn test_orders_index_is_empty_for_anonymous_sessions() {
    let server = TestServer::spawn().await;
    let client = server.client();

    create_order(&server, &client, &order_payload()).await;

    let orders: Value = client
        .get(server.url("/orders"))
        .send()
        .await
        .expect("Failed to list orders")
        .json()
        .await
        .expect("Order list was not JSON");
    assert_eq!(orders, json!([]));
}

// ============================================================================
// Items
// ============================================================================

#[tokio::test]
async fn test_item_add_edit_delete_roundtrip() {
    let server = TestServer::spawn().await;
    let client = server.client();

    let created = create_order(&server, &client, &order_payload()).await;
    let order_id = created["order"]["id"].as_str().expect("Order id missing");

    let response = client
        .post(server.url(&format!("/orders/{order_id}/items")))
        .json(&json!({
            "product_name": "Sourdough",
            "quantity": "2",
            "note": "sliced",
        }))
        .send()
        .await
        .expect("Failed to add item");
    assert_eq!(response.status(), StatusCode::CREATED);
    let item: Value = response.json().await.expect("Item was not JSON");
    assert_eq!(item["owner_name"], "Dana");
    assert_eq!(item["quantity"], "2");
    assert_eq!(item["note"], "sliced");
    assert!(item["product_sku"].is_null());
    let item_id = item["id"].as_str().expect("Item id missing");

    // Edits replace the product fields; omitted optionals are cleared.
    let response = client
        .put(server.url(&format!("/orders/{order_id}/items/{item_id}")))
        .json(&json!({ "product_name": "Sourdough Loaf", "quantity": "1" }))
        .send()
        .await
        .expect("Failed to edit item");
    assert_eq!(response.status(), StatusCode::OK);
    let updated: Value = response.json().await.expect("Item was not JSON");
    assert_eq!(updated["id"], item["id"]);
    assert_eq!(updated["product_name"], "Sourdough Loaf");
    assert_eq!(updated["owner_name"], "Dana");
    assert!(updated["note"].is_null());

    let snapshot = fetch_snapshot(&server, &client, order_id).await;
    assert_eq!(snapshot["items"][0]["product_name"], "Sourdough Loaf");

    let response = client
        .delete(server.url(&format!("/orders/{order_id}/items/{item_id}")))
        .send()
        .await
        .expect("Failed to remove item");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let snapshot = fetch_snapshot(&server, &client, order_id).await;
    assert_eq!(snapshot["items"], json!([]));

    // Removing it again is a 404, not a silent success.
    let response = client
        .delete(server.url(&format!("/orders/{order_id}/items/{item_id}")))
        .send()
        .await
        .expect("Failed to send remove request");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_items_missing_product_name_rejected() {
    let server = TestServer::spawn().await;
    let client = server.client();

    let created = create_order(&server, &client, &order_payload()).await;
    let order_id = created["order"]["id"].as_str().expect("Order id missing");

    let response = client
        .post(server.url(&format!("/orders/{order_id}/items")))
        .json(&json!({ "product_name": "  " }))
        .send()
        .await
        .expect("Failed to send add request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("Error body was not JSON");
    assert_eq!(body["error"], "product_name is required");
}

#[tokio::test]
async fn test_strangers_cannot_edit_items_behind_identity_provider() {
    // With an identity proxy configured, anonymous sessions are
    // distinguishable, so ownership is enforced between them.
    let server = TestServer::spawn_with_auth_proxy().await;
    let owner = server.client();
    let stranger = server.client();

    let created = create_order(&server, &owner, &order_payload()).await;
    let order_id = created["order"]["id"].as_str().expect("Order id missing");

    let item: Value = owner
        .post(server.url(&format!("/orders/{order_id}/items")))
        .json(&json!({ "product_name": "Butter" }))
        .send()
        .await
        .expect("Failed to add item")
        .json()
        .await
        .expect("Item was not JSON");
    let item_id = item["id"].as_str().expect("Item id missing");

    let response = stranger
        .put(server.url(&format!("/orders/{order_id}/items/{item_id}")))
        .json(&json!({ "product_name": "Margarine" }))
        .send()
        .await
        .expect("Failed to send edit request");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = stranger
        .delete(server.url(&format!("/orders/{order_id}/items/{item_id}")))
        .send()
        .await
        .expect("Failed to send remove request");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_anonymous_sessions_share_editing_without_identity_provider() {
    // No identity provider means a cookie wipe makes a new stranger of
    // everyone, so open orders allow cross-session edits of anonymous items.
    let server = TestServer::spawn().await;
    let owner = server.client();
    let other = server.client();

    let created = create_order(&server, &owner, &order_payload()).await;
    let order_id = created["order"]["id"].as_str().expect("Order id missing");

    let item: Value = owner
        .post(server.url(&format!("/orders/{order_id}/items")))
        .json(&json!({ "product_name": "Butter" }))
        .send()
        .await
        .expect("Failed to add item")
        .json()
        .await
        .expect("Item was not JSON");
    let item_id = item["id"].as_str().expect("Item id missing");

    let response = other
        .put(server.url(&format!("/orders/{order_id}/items/{item_id}")))
        .json(&json!({ "product_name": "Cultured Butter" }))
        .send()
        .await
        .expect("Failed to send edit request");
    assert_eq!(response.status(), StatusCode::OK);
}

// ============================================================================
// Admin mutations
// ============================================================================

#[tokio::test]
async fn test_admin_mutations_forbidden_for_strangers() {
    let server = TestServer::spawn().await;
    let creator = server.client();
    let stranger = server.client();

    let created = create_order(&server, &creator, &order_payload()).await;
    let order_id = created["order"]["id"].as_str().expect("Order id missing");

    let response = stranger
        .post(server.url(&format!("/orders/{order_id}/deadline")))
        .json(&json!({ "deadline": Utc::now() + TimeDelta::days(7) }))
        .send()
        .await
        .expect("Failed to send deadline request");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = response.json().await.expect("Error body was not JSON");
    assert_eq!(body["error"], "only admins can change the deadline");

    let response = stranger
        .post(server.url(&format!("/orders/{order_id}/settings")))
        .json(&json!({ "allow_oidc": true }))
        .send()
        .await
        .expect("Failed to send settings request");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = stranger
        .post(server.url(&format!("/orders/{order_id}/invites")))
        .json(&json!({ "guest_name": "Mallory" }))
        .send()
        .await
        .expect("Failed to send invite request");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_moving_deadline_into_past_closes_the_order() {
    let server = TestServer::spawn().await;
    let creator = server.client();
    let participant = server.client();

    let created = create_order(&server, &creator, &order_payload()).await;
    let order_id = created["order"]["id"].as_str().expect("Order id missing");

    // Closing early is just moving the deadline backwards.
    let response = creator
        .post(server.url(&format!("/orders/{order_id}/deadline")))
        .json(&json!({ "deadline": Utc::now() - TimeDelta::minutes(5) }))
        .send()
        .await
        .expect("Failed to send deadline request");
    assert_eq!(response.status(), StatusCode::OK);

    let response = participant
        .post(server.url(&format!("/orders/{order_id}/items")))
        .json(&json!({ "product_name": "Latecomer loaf" }))
        .send()
        .await
        .expect("Failed to send add request");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Admins may keep editing after the window closes.
    let response = creator
        .post(server.url(&format!("/orders/{order_id}/items")))
        .json(&json!({ "product_name": "Forgotten rye" }))
        .send()
        .await
        .expect("Failed to send add request");
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_revision_counts_committed_mutations() {
    let server = TestServer::spawn().await;
    let client = server.client();

    let created = create_order(&server, &client, &order_payload()).await;
    let order_id = created["order"]["id"].as_str().expect("Order id missing");
    assert_eq!(created["order"]["revision"], 0);

    for product in ["Bread", "Butter", "Jam"] {
        let response = client
            .post(server.url(&format!("/orders/{order_id}/items")))
            .json(&json!({ "product_name": product }))
            .send()
            .await
            .expect("Failed to add item");
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let snapshot = fetch_snapshot(&server, &client, order_id).await;
    assert_eq!(snapshot["order"]["revision"], 3);
}
