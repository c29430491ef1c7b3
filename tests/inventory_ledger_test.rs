mod common;

use axum::http::{Method, StatusCode};
use common::{body_json, TestApp};
use sea_orm::{EntityTrait, PaginatorTrait};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn on_hand_is_derived_from_the_ledger() {
    let app = TestApp::new().await;
    let flour = Uuid::new_v4();

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/inventory/inputs",
            Some(json!({
                "branch_id": app.branch_id,
                "entries": [{ "ingredient_id": flour, "quantity": "50", "unit_cost": "0.80" }]
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    app.request_authenticated(
        Method::POST,
        "/api/v1/inventory/issues",
        Some(json!({
            "branch_id": app.branch_id,
            "entries": [{ "ingredient_id": flour, "quantity": "12.5" }]
        })),
    )
    .await;
    app.request_authenticated(
        Method::POST,
        "/api/v1/inventory/adjustments",
        Some(json!({
            "branch_id": app.branch_id,
            "entries": [{ "ingredient_id": flour, "quantity": "-2", "reason": "spillage" }]
        })),
    )
    .await;

    let on_hand = body_json(
        app.request_authenticated(
            Method::GET,
            &format!(
                "/api/v1/inventory/on-hand/{}?branch_id={}",
                flour, app.branch_id
            ),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(on_hand["data"]["on_hand"], "35.5");
}

#[tokio::test]
async fn balances_may_go_negative() {
    let app = TestApp::new().await;
    let milk = Uuid::new_v4();

    app.request_authenticated(
        Method::POST,
        "/api/v1/inventory/issues",
        Some(json!({
            "branch_id": app.branch_id,
            "entries": [{ "ingredient_id": milk, "quantity": "4" }]
        })),
    )
    .await;

    let on_hand = body_json(
        app.request_authenticated(
            Method::GET,
            &format!(
                "/api/v1/inventory/on-hand/{}?branch_id={}",
                milk, app.branch_id
            ),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(on_hand["data"]["on_hand"], "-4");
}

#[tokio::test]
async fn batch_with_an_invalid_entry_records_nothing() {
    let app = TestApp::new().await;
    let sugar = Uuid::new_v4();

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/inventory/issues",
            Some(json!({
                "branch_id": app.branch_id,
                "entries": [
                    { "ingredient_id": sugar, "quantity": "10" },
                    { "ingredient_id": sugar, "quantity": "0" }
                ]
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let count = branchpoint_api::entities::inventory_transaction::Entity::find()
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn rejects_negative_inputs_and_zero_adjustments() {
    let app = TestApp::new().await;
    let beans = Uuid::new_v4();

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/inventory/inputs",
            Some(json!({
                "branch_id": app.branch_id,
                "entries": [{ "ingredient_id": beans, "quantity": "-5" }]
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/inventory/adjustments",
            Some(json!({
                "branch_id": app.branch_id,
                "entries": [{ "ingredient_id": beans, "quantity": "0" }]
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ledger_is_scoped_per_branch() {
    let app = TestApp::new().await;
    let rice = Uuid::new_v4();

    app.request_authenticated(
        Method::POST,
        "/api/v1/inventory/inputs",
        Some(json!({
            "branch_id": app.branch_id,
            "entries": [{ "ingredient_id": rice, "quantity": "20" }]
        })),
    )
    .await;

    // The same ingredient in another branch has its own balance; the
    // admin token may read any branch.
    let other_branch = Uuid::new_v4();
    let on_hand = body_json(
        app.request_authenticated(
            Method::GET,
            &format!(
                "/api/v1/inventory/on-hand/{}?branch_id={}",
                rice, other_branch
            ),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(on_hand["data"]["on_hand"], "0");
}

#[tokio::test]
async fn listing_filters_by_ingredient() {
    let app = TestApp::new().await;
    let salt = Uuid::new_v4();
    let pepper = Uuid::new_v4();

    app.request_authenticated(
        Method::POST,
        "/api/v1/inventory/inputs",
        Some(json!({
            "branch_id": app.branch_id,
            "entries": [
                { "ingredient_id": salt, "quantity": "3" },
                { "ingredient_id": pepper, "quantity": "7" }
            ]
        })),
    )
    .await;

    let listed = body_json(
        app.request_authenticated(
            Method::GET,
            &format!(
                "/api/v1/inventory/transactions?branch_id={}&ingredient_id={}",
                app.branch_id, salt
            ),
            None,
        )
        .await,
    )
    .await;
    let transactions = listed["data"]["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0]["quantity"], "3");
}

#[tokio::test]
async fn movement_report_aggregates_per_ingredient() {
    let app = TestApp::new().await;
    let flour = Uuid::new_v4();

    app.request_authenticated(
        Method::POST,
        "/api/v1/inventory/inputs",
        Some(json!({
            "branch_id": app.branch_id,
            "entries": [{ "ingredient_id": flour, "quantity": "30" }]
        })),
    )
    .await;
    app.request_authenticated(
        Method::POST,
        "/api/v1/inventory/issues",
        Some(json!({
            "branch_id": app.branch_id,
            "entries": [{ "ingredient_id": flour, "quantity": "10" }]
        })),
    )
    .await;
    app.request_authenticated(
        Method::POST,
        "/api/v1/inventory/adjustments",
        Some(json!({
            "branch_id": app.branch_id,
            "entries": [{ "ingredient_id": flour, "quantity": "-1.5" }]
        })),
    )
    .await;

    let report = body_json(
        app.request_authenticated(
            Method::GET,
            &format!("/api/v1/reports/inventory?branch_id={}", app.branch_id),
            None,
        )
        .await,
    )
    .await;
    let rows = report["data"]["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["ingredient_id"], flour.to_string());
    assert_eq!(rows[0]["total_in"], "30");
    assert_eq!(rows[0]["total_out"], "10");
    assert_eq!(rows[0]["total_adjust"], "-1.5");
    assert_eq!(rows[0]["on_hand"], "18.5");
}

#[tokio::test]
async fn recording_requires_the_record_permission() {
    let app = TestApp::new().await;

    let token = app.token_for(&["cashier"], &["inventory:read"], Some(app.branch_id));
    let response = app
        .request(
            Method::POST,
            "/api/v1/inventory/inputs",
            Some(json!({
                "branch_id": app.branch_id,
                "entries": [{ "ingredient_id": Uuid::new_v4(), "quantity": "1" }]
            })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
