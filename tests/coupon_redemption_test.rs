mod common;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use chrono::Utc;
use common::{decimal_field, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set, SqlErr};
use serde_json::json;
use uuid::Uuid;
use walletshop_api::{
    entities::{coupon_redemption, CouponRedemption, Order},
    errors::ServiceError,
};

async fn seed_order_for(app: &TestApp, wallet: &str) {
    app.seed_item(1, "Espresso beans", dec!(10), true).await;
    let (status, _) = app
        .request_json(
            Method::POST,
            "/api/v1/orders/current",
            Some(json!({
                "walletCode": wallet,
                "lines": [{"itemId": 1, "quantity": 2}]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn redeeming_a_valid_coupon_records_the_percent() {
    let app = TestApp::new().await;
    seed_order_for(&app, "demo").await;
    let coupon_id = app.seed_coupon("SAVE10", dec!(10), true).await;

    let (status, body) = app
        .request_json(
            Method::POST,
            "/api/v1/coupons/redeem",
            Some(json!({"walletCode": "demo", "code": "SAVE10"})),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    let data = &body["data"];
    assert_eq!(data["couponCode"], "SAVE10");
    assert_eq!(data["couponId"], coupon_id);
    assert_eq!(decimal_field(&data["percent"]), dec!(10));

    // The redemption shows up on the order view.
    let (_, order_body) = app
        .request_json(Method::GET, "/api/v1/orders/current/demo", None)
        .await;
    let coupons = order_body["data"]["coupons"].as_array().unwrap();
    assert_eq!(coupons.len(), 1);
    assert_eq!(coupons[0]["couponCode"], "SAVE10");
}

#[tokio::test]
async fn second_redemption_of_the_same_coupon_is_rejected() {
    let app = TestApp::new().await;
    seed_order_for(&app, "demo").await;
    app.seed_coupon("SAVE10", dec!(10), true).await;

    let request = json!({"walletCode": "demo", "code": "SAVE10"});
    let (first, _) = app
        .request_json(Method::POST, "/api/v1/coupons/redeem", Some(request.clone()))
        .await;
    assert_eq!(first, StatusCode::CREATED);

    let (second, body) = app
        .request_json(Method::POST, "/api/v1/coupons/redeem", Some(request))
        .await;
    assert_eq!(second, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Already used");

    let redemptions = CouponRedemption::find().count(&*app.state.db).await.unwrap();
    assert_eq!(redemptions, 1);
}

#[tokio::test]
async fn unknown_and_inactive_codes_are_both_invalid() {
    let app = TestApp::new().await;
    seed_order_for(&app, "demo").await;
    app.seed_coupon("EXPIRED", dec!(25), false).await;

    for code in ["MISSING", "EXPIRED"] {
        let (status, body) = app
            .request_json(
                Method::POST,
                "/api/v1/coupons/redeem",
                Some(json!({"walletCode": "demo", "code": code})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Coupon invalid");
    }
}

#[tokio::test]
async fn redemption_without_an_order_is_rejected() {
    let app = TestApp::new().await;
    app.seed_coupon("SAVE10", dec!(10), true).await;

    let (status, body) = app
        .request_json(
            Method::POST,
            "/api/v1/coupons/redeem",
            Some(json!({"walletCode": "nobody", "code": "SAVE10"})),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "No current order");
}

#[tokio::test]
async fn storage_constraint_rejects_a_duplicate_that_slips_past_the_check() {
    let app = TestApp::new().await;
    seed_order_for(&app, "demo").await;
    let coupon_id = app.seed_coupon("SAVE10", dec!(10), true).await;

    app.request_json(
        Method::POST,
        "/api/v1/coupons/redeem",
        Some(json!({"walletCode": "demo", "code": "SAVE10"})),
    )
    .await;

    // Simulate the racing writer that passed the existence check before the
    // first insert committed: inserting the pair again must fail on the
    // unique index, not succeed.
    let order = Order::find().one(&*app.state.db).await.unwrap().unwrap();
    let duplicate = coupon_redemption::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order.id),
        coupon_id: Set(coupon_id),
        coupon_code: Set("SAVE10".to_string()),
        percent: Set(dec!(10)),
        wallet_code: Set("demo".to_string()),
        created_at: Set(Utc::now()),
    };

    let err = duplicate
        .insert(&*app.state.db)
        .await
        .expect_err("duplicate redemption must violate the unique index");
    assert_matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)));
}

#[tokio::test]
async fn concurrent_redemptions_let_exactly_one_win() {
    let app = TestApp::new().await;
    seed_order_for(&app, "demo").await;
    app.seed_coupon("SAVE10", dec!(10), true).await;

    let svc = app.state.services.coupon.clone();
    let (a, b) = tokio::join!(svc.redeem("demo", "SAVE10"), svc.redeem("demo", "SAVE10"));

    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one redemption may succeed");

    let loser = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
    assert_matches!(loser, ServiceError::BusinessError(msg) if msg == "Already used");

    let redemptions = CouponRedemption::find().count(&*app.state.db).await.unwrap();
    assert_eq!(redemptions, 1);
}

#[tokio::test]
async fn removal_is_idempotent() {
    let app = TestApp::new().await;
    seed_order_for(&app, "demo").await;
    let coupon_id = app.seed_coupon("SAVE10", dec!(10), true).await;

    app.request_json(
        Method::POST,
        "/api/v1/coupons/redeem",
        Some(json!({"walletCode": "demo", "code": "SAVE10"})),
    )
    .await;

    let remove = json!({"walletCode": "demo", "couponId": coupon_id});
    let (status, _) = app
        .request_json(Method::POST, "/api/v1/coupons/remove", Some(remove.clone()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        CouponRedemption::find().count(&*app.state.db).await.unwrap(),
        0
    );

    // Removing again, or removing a never-redeemed coupon, still succeeds.
    let (status, _) = app
        .request_json(Method::POST, "/api/v1/coupons/remove", Some(remove))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn removal_without_an_order_is_rejected() {
    let app = TestApp::new().await;

    let (status, body) = app
        .request_json(
            Method::POST,
            "/api/v1/coupons/remove",
            Some(json!({"walletCode": "nobody", "couponId": 1})),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "No current order");
}

#[tokio::test]
async fn order_resubmission_keeps_redeemed_coupons() {
    let app = TestApp::new().await;
    seed_order_for(&app, "demo").await;
    app.seed_coupon("SAVE10", dec!(10), true).await;

    app.request_json(
        Method::POST,
        "/api/v1/coupons/redeem",
        Some(json!({"walletCode": "demo", "code": "SAVE10"})),
    )
    .await;

    let (_, body) = app
        .request_json(
            Method::POST,
            "/api/v1/orders/current",
            Some(json!({
                "walletCode": "demo",
                "lines": [{"itemId": 1, "quantity": 5}]
            })),
        )
        .await;

    let coupons = body["data"]["coupons"].as_array().unwrap();
    assert_eq!(coupons.len(), 1);
    assert_eq!(coupons[0]["couponCode"], "SAVE10");
}
