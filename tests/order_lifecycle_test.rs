mod common;

use axum::http::{Method, StatusCode};
use common::{body_json, TestApp};
use rust_decimal::Decimal;
use serde_json::json;
use std::str::FromStr;

fn take_away_body(app: &TestApp) -> serde_json::Value {
    json!({
        "branch_id": app.branch_id,
        "order_type": "take_away",
        "items": [
            { "product_name": "Espresso", "quantity": 2, "unit_price": "3.50" },
            { "product_name": "Croissant", "quantity": 1, "unit_price": "2.25" }
        ]
    })
}

#[tokio::test]
async fn creates_order_and_computes_total() {
    let app = TestApp::new().await;

    let response = app
        .request_authenticated(Method::POST, "/api/v1/orders", Some(take_away_body(&app)))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_json(response).await;
    let data = &body["data"];
    assert_eq!(data["status"], "open");
    assert_eq!(data["payment_status"], "unpaid");
    assert_eq!(data["total_amount"], "9.25");
    assert_eq!(data["items"].as_array().unwrap().len(), 2);
    assert_eq!(data["replayed"], false);
}

#[tokio::test]
async fn rejects_order_without_items() {
    let app = TestApp::new().await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "branch_id": app.branch_id,
                "order_type": "take_away",
                "items": []
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn payments_move_payment_status_through_partial_to_paid() {
    let app = TestApp::new().await;

    let created = body_json(
        app.request_authenticated(Method::POST, "/api/v1/orders", Some(take_away_body(&app)))
            .await,
    )
    .await;
    let order_id = created["data"]["id"].as_str().unwrap().to_string();

    // Partial payment
    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{}/payments", order_id),
            Some(json!({ "amount": "5.00", "method": "cash" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["payment_status"], "partial");

    // Remainder
    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{}/payments", order_id),
            Some(json!({ "amount": "4.25", "method": "card" })),
        )
        .await;
    let body = body_json(response).await;
    assert_eq!(body["data"]["payment_status"], "paid");
    assert_eq!(body["data"]["status"], "paid");
    assert_eq!(body["data"]["payments"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn order_submitted_with_payments_starts_paid() {
    let app = TestApp::new().await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "branch_id": app.branch_id,
                "order_type": "take_away",
                "items": [{ "product_name": "Espresso", "quantity": 2, "unit_price": "3.50" }],
                "payments": [{ "amount": "7.00", "method": "cash" }]
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["data"]["status"], "paid");
    assert_eq!(body["data"]["payment_status"], "paid");
    assert_eq!(body["data"]["payments"].as_array().unwrap().len(), 1);

    // Already fully paid, so closing works immediately.
    let order_id = body["data"]["id"].as_str().unwrap().to_string();
    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{}/close", order_id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn close_requires_full_payment() {
    let app = TestApp::new().await;

    let created = body_json(
        app.request_authenticated(Method::POST, "/api/v1/orders", Some(take_away_body(&app)))
            .await,
    )
    .await;
    let order_id = created["data"]["id"].as_str().unwrap().to_string();

    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{}/close", order_id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Pay in full, then close succeeds.
    app.request_authenticated(
        Method::POST,
        &format!("/api/v1/orders/{}/payments", order_id),
        Some(json!({ "amount": "9.25", "method": "cash" })),
    )
    .await;

    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{}/close", order_id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["status"], "closed");

    // A closed order cannot take further payments.
    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{}/payments", order_id),
            Some(json!({ "amount": "1.00", "method": "cash" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn paying_an_already_paid_order_conflicts() {
    let app = TestApp::new().await;

    let created = body_json(
        app.request_authenticated(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "branch_id": app.branch_id,
                "order_type": "take_away",
                "items": [{ "product_name": "Soup", "quantity": 1, "unit_price": "4.00" }]
            })),
        )
        .await,
    )
    .await;
    let order_id = created["data"]["id"].as_str().unwrap().to_string();

    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{}/payments", order_id),
            Some(json!({ "amount": "4.00", "method": "cash" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["payment_status"], "paid");

    // Any further payment would overpay the order.
    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{}/payments", order_id),
            Some(json!({ "amount": "1.00", "method": "cash" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn cancel_requires_reason_and_rejects_paid_orders() {
    let app = TestApp::new().await;

    let created = body_json(
        app.request_authenticated(Method::POST, "/api/v1/orders", Some(take_away_body(&app)))
            .await,
    )
    .await;
    let order_id = created["data"]["id"].as_str().unwrap().to_string();

    // Empty reason is rejected.
    let response = app
        .request_authenticated(
            Method::DELETE,
            &format!("/api/v1/orders/{}", order_id),
            Some(json!({ "reason": "" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Fully pay, then cancellation is refused.
    app.request_authenticated(
        Method::POST,
        &format!("/api/v1/orders/{}/payments", order_id),
        Some(json!({ "amount": "9.25", "method": "cash" })),
    )
    .await;

    let response = app
        .request_authenticated(
            Method::DELETE,
            &format!("/api/v1/orders/{}", order_id),
            Some(json!({ "reason": "customer changed mind" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancel_records_reason() {
    let app = TestApp::new().await;

    let created = body_json(
        app.request_authenticated(Method::POST, "/api/v1/orders", Some(take_away_body(&app)))
            .await,
    )
    .await;
    let order_id = created["data"]["id"].as_str().unwrap().to_string();

    let response = app
        .request_authenticated(
            Method::DELETE,
            &format!("/api/v1/orders/{}", order_id),
            Some(json!({ "reason": "kitchen out of stock" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["status"], "cancelled");
    assert_eq!(body["data"]["cancel_reason"], "kitchen out of stock");

    // A cancelled order is terminal.
    let response = app
        .request_authenticated(
            Method::DELETE,
            &format!("/api/v1/orders/{}", order_id),
            Some(json!({ "reason": "again" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn dine_in_claims_table_and_rejects_double_seating() {
    let app = TestApp::new().await;
    let table = app.seed_table("T1").await;

    let dine_in = |app: &TestApp| {
        json!({
            "branch_id": app.branch_id,
            "order_type": "dine_in",
            "table_id": table.id,
            "items": [{ "product_name": "Pasta", "quantity": 1, "unit_price": "11.00" }]
        })
    };

    let response = app
        .request_authenticated(Method::POST, "/api/v1/orders", Some(dine_in(&app)))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let order_id = body_json(response).await["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    // Table is now occupied.
    let tables = body_json(
        app.request_authenticated(
            Method::GET,
            &format!("/api/v1/tables?branch_id={}", app.branch_id),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(tables["data"][0]["status"], "occupied");

    // Second dine-in on the same table conflicts.
    let response = app
        .request_authenticated(Method::POST, "/api/v1/orders", Some(dine_in(&app)))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Cancelling the order frees the table.
    app.request_authenticated(
        Method::DELETE,
        &format!("/api/v1/orders/{}", order_id),
        Some(json!({ "reason": "guests left" })),
    )
    .await;

    let tables = body_json(
        app.request_authenticated(
            Method::GET,
            &format!("/api/v1/tables?branch_id={}", app.branch_id),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(tables["data"][0]["status"], "available");
}

#[tokio::test]
async fn dine_in_requires_a_table() {
    let app = TestApp::new().await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "branch_id": app.branch_id,
                "order_type": "dine_in",
                "items": [{ "product_name": "Soup", "quantity": 1, "unit_price": "4.00" }]
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn adding_items_recomputes_total() {
    let app = TestApp::new().await;

    let created = body_json(
        app.request_authenticated(Method::POST, "/api/v1/orders", Some(take_away_body(&app)))
            .await,
    )
    .await;
    let order_id = created["data"]["id"].as_str().unwrap().to_string();

    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{}/items", order_id),
            Some(json!({
                "items": [{ "product_name": "Water", "quantity": 2, "unit_price": "1.00" }]
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["total_amount"], "11.25");
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn updating_an_item_recomputes_total() {
    let app = TestApp::new().await;

    let created = body_json(
        app.request_authenticated(Method::POST, "/api/v1/orders", Some(take_away_body(&app)))
            .await,
    )
    .await;
    let order_id = created["data"]["id"].as_str().unwrap().to_string();
    let item_id = created["data"]["items"][0]["id"].as_str().unwrap().to_string();

    // Espresso 2 x 3.50 -> 4 x 3.50; total moves from 9.25 to 16.25.
    let response = app
        .request_authenticated(
            Method::PATCH,
            &format!("/api/v1/orders/{}/items/{}", order_id, item_id),
            Some(json!({ "quantity": 4 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["total_amount"], "16.25");

    let response = app
        .request_authenticated(
            Method::PATCH,
            &format!("/api/v1/orders/{}/items/{}", order_id, item_id),
            Some(json!({ "quantity": 0 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn removing_an_item_recomputes_total() {
    let app = TestApp::new().await;

    let created = body_json(
        app.request_authenticated(Method::POST, "/api/v1/orders", Some(take_away_body(&app)))
            .await,
    )
    .await;
    let order_id = created["data"]["id"].as_str().unwrap().to_string();
    let item_id = created["data"]["items"][1]["id"].as_str().unwrap().to_string();

    // Dropping the croissant leaves only the espressos.
    let response = app
        .request_authenticated(
            Method::DELETE,
            &format!("/api/v1/orders/{}/items/{}", order_id, item_id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    // Storage may normalize the decimal scale, so compare values.
    let total = Decimal::from_str(body["data"]["total_amount"].as_str().unwrap()).unwrap();
    assert_eq!(total, Decimal::new(700, 2));
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 1);

    // Removing it again is a 404.
    let response = app
        .request_authenticated(
            Method::DELETE,
            &format!("/api/v1/orders/{}/items/{}", order_id, item_id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn branch_scoping_denies_foreign_branch_access() {
    let app = TestApp::new().await;

    let created = body_json(
        app.request_authenticated(Method::POST, "/api/v1/orders", Some(take_away_body(&app)))
            .await,
    )
    .await;
    let order_id = created["data"]["id"].as_str().unwrap().to_string();

    // A cashier homed in a different branch cannot read the order.
    let foreign_token = app.token_for(
        &["cashier"],
        &["orders:read", "orders:create"],
        Some(uuid::Uuid::new_v4()),
    );
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            None,
            Some(&foreign_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // A grant for the order's branch restores access.
    let user_id = uuid::Uuid::new_v4();
    let granted_token =
        app.token_for_user(user_id, &["cashier"], &["orders:read"], None);
    app.seed_branch_grant(user_id, app.branch_id).await;
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            None,
            Some(&granted_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_permission_is_forbidden() {
    let app = TestApp::new().await;

    let token = app.token_for(&["cashier"], &["orders:read"], Some(app.branch_id));
    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(take_away_body(&app)),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() {
    let app = TestApp::new().await;

    let response = app
        .request(Method::GET, "/api/v1/orders?branch_id=123", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
