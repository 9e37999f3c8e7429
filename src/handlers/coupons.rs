use axum::{extract::State, http::StatusCode, response::Json};
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::services::coupons::RedemptionResponse;
use crate::{errors::ServiceError, ApiResponse, AppState};

/// Request body for redeeming a coupon code against a wallet's order.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedeemCouponRequest {
    #[validate(length(min = 1, max = 64, message = "Wallet code is required"))]
    pub wallet_code: String,
    #[validate(length(min = 1, max = 64, message = "Coupon code is required"))]
    pub code: String,
}

/// Request body for removing a redeemed coupon from a wallet's order.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoveCouponRequest {
    #[validate(length(min = 1, max = 64, message = "Wallet code is required"))]
    pub wallet_code: String,
    pub coupon_id: i32,
}

/// Redeem a coupon
#[utoipa::path(
    post,
    path = "/api/v1/coupons/redeem",
    summary = "Redeem coupon",
    description = "Records a single-use redemption of the coupon against the wallet's current order",
    request_body = RedeemCouponRequest,
    responses(
        (status = 201, description = "Coupon redeemed", body = RedemptionResponse),
        (status = 400, description = "Coupon invalid, no current order, or already used", body = crate::errors::ErrorResponse)
    ),
    tag = "coupons"
)]
pub async fn redeem_coupon(
    State(state): State<AppState>,
    Json(request): Json<RedeemCouponRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RedemptionResponse>>), ServiceError> {
    request.validate().map_err(ServiceError::from)?;

    let redemption = state
        .services
        .coupon
        .redeem(&request.wallet_code, &request.code)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(redemption)),
    ))
}

/// Remove a redeemed coupon
#[utoipa::path(
    post,
    path = "/api/v1/coupons/remove",
    summary = "Remove coupon",
    description = "Deletes the redemption of the coupon from the wallet's current order; removing a never-redeemed coupon succeeds",
    request_body = RemoveCouponRequest,
    responses(
        (status = 200, description = "Removal settled"),
        (status = 400, description = "No current order", body = crate::errors::ErrorResponse)
    ),
    tag = "coupons"
)]
pub async fn remove_coupon(
    State(state): State<AppState>,
    Json(request): Json<RemoveCouponRequest>,
) -> Result<Json<ApiResponse<()>>, ServiceError> {
    request.validate().map_err(ServiceError::from)?;

    state
        .services
        .coupon
        .remove(&request.wallet_code, request.coupon_id)
        .await?;

    Ok(Json(ApiResponse::success(())))
}
