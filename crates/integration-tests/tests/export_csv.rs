//! Integration tests for CSV export.
//!
//! Exact-row assertions for both groupings, plus the admin gate while
//! privacy is active.

#![allow(clippy::indexing_slicing)]

use reqwest::{Client, StatusCode};
use serde_json::{Value, json};

use cartpool_integration_tests::{TestServer, create_order, join_as_guest, order_payload};

/// Add an item from an explicit payload, asserting success.
async fn add_item(server: &TestServer, client: &Client, order_id: &str, payload: Value) {
    let response = client
        .post(server.url(&format!("/orders/{order_id}/items")))
        .json(&payload)
        .send()
        .await
        .expect("Failed to add item");
    assert_eq!(response.status(), StatusCode::CREATED);
}

/// Download the export, asserting success. Returns the body text.
async fn download(server: &TestServer, client: &Client, path: &str) -> String {
    let response = client
        .get(server.url(path))
        .send()
        .await
        .expect("Failed to download export");
    assert_eq!(response.status(), StatusCode::OK);
    response.text().await.expect("Export body was not text")
}

// ============================================================================
// Groupings
// ============================================================================

#[tokio::test]
async fn test_person_grouping_rows_and_headers() {
    let server = TestServer::spawn().await;
    let dana = server.client();
    let bob = server.client();

    let created = create_order(&server, &dana, &order_payload()).await;
    let order_id = created["order"]["id"].as_str().expect("Order id missing");

    add_item(
        &server,
        &dana,
        order_id,
        json!({ "product_name": "Rye Bread", "quantity": "1", "product_sku": "RB-01" }),
    )
    .await;
    add_item(
        &server,
        &dana,
        order_id,
        json!({ "product_name": "Jam", "quantity": "2" }),
    )
    .await;
    add_item(
        &server,
        &bob,
        order_id,
        json!({ "product_name": "Butter", "owner_name": "Bob", "quantity": "1", "note": "salted" }),
    )
    .await;

    let response = dana
        .get(server.url(&format!("/orders/{order_id}/export")))
        .send()
        .await
        .expect("Failed to download export");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok()),
        Some("text/csv; charset=utf-8")
    );
    let short = order_id.get(..8).expect("Order id too short");
    assert_eq!(
        response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok()),
        Some(format!("attachment; filename=\"order-{short}-person.csv\"").as_str())
    );

    let body = response.text().await.expect("Export body was not text");
    let rows: Vec<&str> = body.lines().collect();
    assert_eq!(rows[0], "person,product,sku,quantity,note,url");
    // Sorted by person; each person's items keep their add order.
    assert_eq!(rows[1], "Bob,Butter,,1,salted,");
    assert_eq!(rows[2], "Dana,Rye Bread,RB-01,1,,");
    assert_eq!(rows[3], "Dana,Jam,,2,,");
    assert_eq!(rows.len(), 4);
}

#[tokio::test]
async fn test_product_grouping_merges_and_totals() {
    let server = TestServer::spawn().await;
    let dana = server.client();
    let bob = server.client();

    let created = create_order(&server, &dana, &order_payload()).await;
    let order_id = created["order"]["id"].as_str().expect("Order id missing");

    add_item(
        &server,
        &dana,
        order_id,
        json!({ "product_name": "Butter", "quantity": "2" }),
    )
    .await;
    add_item(
        &server,
        &bob,
        order_id,
        json!({ "product_name": "Butter", "owner_name": "Bob", "quantity": "1" }),
    )
    .await;
    add_item(
        &server,
        &bob,
        order_id,
        json!({ "product_name": "Flour", "owner_name": "Bob", "quantity": "1 sack" }),
    )
    .await;
    add_item(
        &server,
        &dana,
        order_id,
        json!({ "product_name": "Flour", "quantity": "2" }),
    )
    .await;

    let body = download(
        &server,
        &dana,
        &format!("/orders/{order_id}/export?group_by=product"),
    )
    .await;
    let rows: Vec<&str> = body.lines().collect();
    assert_eq!(rows[0], "product,sku,total_quantity,contributors,url,note");
    assert_eq!(rows[1], "Butter,,3,Dana\u{d7}2; Bob\u{d7}1,,");
    // Textual quantities cannot be summed; they ride along verbatim.
    assert_eq!(rows[2], "Flour,,2+1 sack,Bob\u{d7}1 sack; Dana\u{d7}2,,");
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn test_unknown_grouping_rejected() {
    let server = TestServer::spawn().await;
    let client = server.client();

    let created = create_order(&server, &client, &order_payload()).await;
    let order_id = created["order"]["id"].as_str().expect("Order id missing");

    let response = client
        .get(server.url(&format!("/orders/{order_id}/export?group_by=banana")))
        .send()
        .await
        .expect("Failed to send export request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// Privacy gate
// ============================================================================

#[tokio::test]
async fn test_privacy_makes_export_admin_only() {
    let server = TestServer::spawn().await;
    let admin = server.client();
    let alice = server.client();

    let mut payload = order_payload();
    payload["invite_only"] = json!(true);
    payload["privacy_mode"] = json!(true);
    let created = create_order(&server, &admin, &payload).await;
    let order_id = created["order"]["id"].as_str().expect("Order id missing");

    join_as_guest(&server, &admin, &alice, order_id, "Alice").await;
    add_item(
        &server,
        &alice,
        order_id,
        json!({ "product_name": "Oat Milk" }),
    )
    .await;

    // The file contains everyone's items, so participants cannot pull it.
    let response = alice
        .get(server.url(&format!("/orders/{order_id}/export")))
        .send()
        .await
        .expect("Failed to send export request");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = response.json().await.expect("Error body was not JSON");
    assert_eq!(body["error"], "only admins can export this order");

    let body = download(&server, &admin, &format!("/orders/{order_id}/export")).await;
    assert!(
        body.lines().any(|row| row == "Alice,Oat Milk,,1,,"),
        "the admin export is unfiltered: {body}"
    );
}
