use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::services::orders::{
    BulkOrderOutcome, BulkOrderRecord, OrderLineInput, OrderWithDetails, UpsertOrderInput,
};
use crate::{errors::ServiceError, ApiResponse, AppState};

/// Request body for creating or replacing a wallet's order.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetOrderRequest {
    #[validate(length(min = 1, max = 64, message = "Wallet code is required"))]
    pub wallet_code: String,
    #[validate(length(min = 1, message = "At least one line is required"))]
    pub lines: Vec<OrderLineInput>,
}

/// Request body for bulk order processing: flat line records tagged with
/// their wallet code, as produced by the upstream tabular-import step.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkOrderRequest {
    #[validate(length(min = 1, max = 500, message = "Between 1 and 500 records are required"))]
    pub records: Vec<BulkOrderRecord>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineView {
    pub item_id: i32,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderCouponView {
    pub id: Uuid,
    pub order_id: Uuid,
    pub coupon_id: i32,
    pub coupon_code: String,
    pub percent: Decimal,
}

/// Public view of an order: lines in submission order plus any redeemed
/// coupons.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub id: Uuid,
    #[schema(value_type = String, example = "PENDING")]
    pub status: crate::entities::OrderStatus,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<OrderLineView>,
    pub coupons: Vec<OrderCouponView>,
}

impl From<OrderWithDetails> for OrderView {
    fn from(details: OrderWithDetails) -> Self {
        OrderView {
            id: details.order.id,
            status: details.order.status,
            created_at: details.order.created_at,
            lines: details
                .lines
                .into_iter()
                .map(|line| OrderLineView {
                    item_id: line.item_id,
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    total_price: line.total_price,
                })
                .collect(),
            coupons: details
                .coupons
                .into_iter()
                .map(|c| OrderCouponView {
                    id: c.id,
                    order_id: c.order_id,
                    coupon_id: c.coupon_id,
                    coupon_code: c.coupon_code,
                    percent: c.percent,
                })
                .collect(),
        }
    }
}

/// Best-effort client address: first `x-forwarded-for` hop, with the
/// IPv4-mapped `::ffff:` prefix stripped.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("x-forwarded-for")?.to_str().ok()?;
    let first = raw.split(',').next()?.trim();
    if first.is_empty() {
        return None;
    }
    Some(first.strip_prefix("::ffff:").unwrap_or(first).to_string())
}

/// Get the wallet's current order
#[utoipa::path(
    get,
    path = "/api/v1/orders/current/{wallet_code}",
    summary = "Get current order",
    description = "Returns the wallet's current order with lines and redeemed coupons, or null data when the wallet has no order",
    params(("wallet_code" = String, Path, description = "Wallet code")),
    responses(
        (status = 200, description = "Current order, or null when absent")
    ),
    tag = "orders"
)]
pub async fn get_current_order(
    State(state): State<AppState>,
    Path(wallet_code): Path<String>,
) -> Result<Json<ApiResponse<Option<OrderView>>>, ServiceError> {
    let order = state
        .services
        .order
        .get_current_order(&wallet_code)
        .await?;

    Ok(Json(ApiResponse::success(order.map(OrderView::from))))
}

/// Create or replace the wallet's order
#[utoipa::path(
    post,
    path = "/api/v1/orders/current",
    summary = "Set current order",
    description = "Re-prices every line from the catalog and atomically replaces the wallet's pending order",
    request_body = SetOrderRequest,
    responses(
        (status = 201, description = "Order persisted"),
        (status = 400, description = "Validation failure", body = crate::errors::ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn set_current_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SetOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderView>>), ServiceError> {
    if let Err(validation_errors) = request.validate() {
        let errors: Vec<String> = validation_errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                let field = field.clone();
                errors.iter().map(move |error| {
                    format!(
                        "{}: {}",
                        field,
                        error.message.as_ref().unwrap_or(&"Invalid value".into())
                    )
                })
            })
            .collect();
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::validation_errors(errors)),
        ));
    }

    let order = state
        .services
        .order
        .upsert_current_order(UpsertOrderInput {
            wallet_code: request.wallet_code,
            buyer_ip: client_ip(&headers),
            lines: request.lines,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(OrderView::from(order))),
    ))
}

/// Process a batch of independent wallet orders
#[utoipa::path(
    post,
    path = "/api/v1/orders/bulk",
    summary = "Bulk order processing",
    description = "Partitions flat records by wallet code and upserts each wallet's order independently; failures are reported per wallet without affecting siblings",
    request_body = BulkOrderRequest,
    responses(
        (status = 207, description = "Per-group outcomes", body = BulkOrderOutcome)
    ),
    tag = "orders"
)]
pub async fn bulk_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BulkOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<BulkOrderOutcome>>), ServiceError> {
    request.validate().map_err(ServiceError::from)?;

    let outcome = state
        .services
        .order
        .process_bulk_records(request.records, client_ip(&headers))
        .await?;

    Ok((
        StatusCode::MULTI_STATUS,
        Json(ApiResponse::success(outcome)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_forwarded(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn client_ip_strips_ipv4_mapped_prefix() {
        let headers = headers_with_forwarded("::ffff:203.0.113.7");
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn client_ip_takes_first_hop() {
        let headers = headers_with_forwarded("198.51.100.9, 10.0.0.1");
        assert_eq!(client_ip(&headers).as_deref(), Some("198.51.100.9"));
    }

    #[test]
    fn client_ip_absent_header_is_none() {
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn set_order_request_wire_format_is_camel_case() {
        let json = r#"{"walletCode": "demo", "lines": [{"itemId": 1, "quantity": 2}]}"#;
        let request: SetOrderRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.wallet_code, "demo");
        assert_eq!(request.lines.len(), 1);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn empty_lines_fail_validation() {
        let request = SetOrderRequest {
            wallet_code: "demo".to_string(),
            lines: vec![],
        };
        assert!(request.validate().is_err());
    }
}
