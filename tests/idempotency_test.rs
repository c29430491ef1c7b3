mod common;

use axum::http::{Method, StatusCode};
use branchpoint_api::entities::idempotency_key;
use chrono::{Duration, Utc};
use common::{body_json, TestApp};
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};
use serde_json::json;

fn order_body(app: &TestApp) -> serde_json::Value {
    json!({
        "branch_id": app.branch_id,
        "order_type": "take_away",
        "client_ref": "terminal-7-000042",
        "items": [{ "product_name": "Flat White", "quantity": 1, "unit_price": "4.00" }]
    })
}

#[tokio::test]
async fn same_key_returns_same_order_without_duplicating() {
    let app = TestApp::new().await;
    let headers = [("idempotency-key", "submit-abc-123")];

    let first = app
        .request_authenticated_with_headers(
            Method::POST,
            "/api/v1/orders",
            Some(order_body(&app)),
            &headers,
        )
        .await;
    assert_eq!(first.status(), StatusCode::CREATED);
    let first = body_json(first).await;
    assert_eq!(first["data"]["replayed"], false);
    let first_id = first["data"]["id"].as_str().unwrap().to_string();

    let second = app
        .request_authenticated_with_headers(
            Method::POST,
            "/api/v1/orders",
            Some(order_body(&app)),
            &headers,
        )
        .await;
    assert_eq!(second.status(), StatusCode::OK);
    let second = body_json(second).await;
    assert_eq!(second["data"]["replayed"], true);
    assert_eq!(second["data"]["id"].as_str().unwrap(), first_id);

    // Exactly one order exists.
    let count = branchpoint_api::entities::order::Entity::find()
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn different_keys_create_distinct_orders() {
    let app = TestApp::new().await;

    let first = body_json(
        app.request_authenticated_with_headers(
            Method::POST,
            "/api/v1/orders",
            Some(order_body(&app)),
            &[("idempotency-key", "key-one")],
        )
        .await,
    )
    .await;
    let second = body_json(
        app.request_authenticated_with_headers(
            Method::POST,
            "/api/v1/orders",
            Some(order_body(&app)),
            &[("idempotency-key", "key-two")],
        )
        .await,
    )
    .await;

    assert_ne!(first["data"]["id"], second["data"]["id"]);

    let count = branchpoint_api::entities::order::Entity::find()
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn replay_returns_current_order_state() {
    let app = TestApp::new().await;
    let headers = [("idempotency-key", "replay-after-payment")];

    let created = body_json(
        app.request_authenticated_with_headers(
            Method::POST,
            "/api/v1/orders",
            Some(order_body(&app)),
            &headers,
        )
        .await,
    )
    .await;
    let order_id = created["data"]["id"].as_str().unwrap().to_string();

    // Pay in full after the first submission.
    app.request_authenticated(
        Method::POST,
        &format!("/api/v1/orders/{}/payments", order_id),
        Some(json!({ "amount": "4.00", "method": "cash" })),
    )
    .await;

    // The replay reflects the payment, not the state at creation.
    let replayed = body_json(
        app.request_authenticated_with_headers(
            Method::POST,
            "/api/v1/orders",
            Some(order_body(&app)),
            &headers,
        )
        .await,
    )
    .await;
    assert_eq!(replayed["data"]["replayed"], true);
    assert_eq!(replayed["data"]["payment_status"], "paid");
}

#[tokio::test]
async fn expired_key_allows_a_fresh_submission() {
    let app = TestApp::new().await;
    let headers = [("idempotency-key", "stale-key")];

    let first = body_json(
        app.request_authenticated_with_headers(
            Method::POST,
            "/api/v1/orders",
            Some(order_body(&app)),
            &headers,
        )
        .await,
    )
    .await;
    let first_id = first["data"]["id"].as_str().unwrap().to_string();

    // Age the key past its TTL.
    let key_row = idempotency_key::Entity::find()
        .one(&*app.state.db)
        .await
        .unwrap()
        .expect("key row should exist");
    let mut active: idempotency_key::ActiveModel = key_row.into();
    active.expires_at = Set(Utc::now() - Duration::hours(1));
    active.update(&*app.state.db).await.unwrap();

    let second = body_json(
        app.request_authenticated_with_headers(
            Method::POST,
            "/api/v1/orders",
            Some(order_body(&app)),
            &headers,
        )
        .await,
    )
    .await;
    assert_eq!(second["data"]["replayed"], false);
    assert_ne!(second["data"]["id"].as_str().unwrap(), first_id);

    let count = branchpoint_api::entities::order::Entity::find()
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn keyed_submission_honors_branch_entitlement() {
    let app = TestApp::new().await;

    // A cashier with no home branch and no grants holds orders:create
    // but is entitled to no branch at all.
    let token = app.token_for(&["cashier"], &["orders:create"], None);
    let response = app
        .request_with_headers(
            Method::POST,
            "/api/v1/orders",
            Some(order_body(&app)),
            &token,
            &[("idempotency-key", "foreign-branch-key")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let count = branchpoint_api::entities::order::Entity::find()
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn key_owned_by_another_user_is_not_replayed() {
    let app = TestApp::new().await;
    let headers = [("idempotency-key", "shared-terminal-key")];

    let first = app
        .request_authenticated_with_headers(
            Method::POST,
            "/api/v1/orders",
            Some(order_body(&app)),
            &headers,
        )
        .await;
    assert_eq!(first.status(), StatusCode::CREATED);

    // A different user in the same branch reusing the key must not
    // receive the first user's order.
    let other = app.token_for(
        &["cashier"],
        &["orders:create"],
        Some(app.branch_id),
    );
    let response = app
        .request_with_headers(
            Method::POST,
            "/api/v1/orders",
            Some(order_body(&app)),
            &other,
            &headers,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let count = branchpoint_api::entities::order::Entity::find()
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn blank_key_header_is_ignored() {
    let app = TestApp::new().await;

    // A whitespace-only key behaves as if no key was sent.
    let response = app
        .request_authenticated_with_headers(
            Method::POST,
            "/api/v1/orders",
            Some(order_body(&app)),
            &[("idempotency-key", "  ")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["data"]["replayed"], false);

    let keys = idempotency_key::Entity::find()
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(keys, 0);
}
