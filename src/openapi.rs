use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::errors::ErrorResponse;
use crate::handlers::coupons::{RedeemCouponRequest, RemoveCouponRequest};
use crate::handlers::orders::{
    BulkOrderRequest, OrderCouponView, OrderLineView, OrderView, SetOrderRequest,
};
use crate::services::coupons::RedemptionResponse;
use crate::services::orders::{BulkOrderError, BulkOrderOutcome, BulkOrderRecord, OrderLineInput};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Walletshop API",
        description = "Per-wallet shopping order engine with server-side pricing and single-use coupon redemption",
    ),
    paths(
        crate::handlers::orders::get_current_order,
        crate::handlers::orders::set_current_order,
        crate::handlers::orders::bulk_orders,
        crate::handlers::coupons::redeem_coupon,
        crate::handlers::coupons::remove_coupon,
    ),
    components(schemas(
        SetOrderRequest,
        OrderLineInput,
        BulkOrderRequest,
        BulkOrderRecord,
        BulkOrderOutcome,
        BulkOrderError,
        OrderView,
        OrderLineView,
        OrderCouponView,
        RedeemCouponRequest,
        RemoveCouponRequest,
        RedemptionResponse,
        ErrorResponse,
    )),
    tags(
        (name = "orders", description = "Order submission and bulk processing"),
        (name = "coupons", description = "Coupon redemption and removal"),
    )
)]
pub struct ApiDoc;

/// Swagger UI mounted at `/docs`, serving the generated document from
/// `/api-docs/openapi.json`.
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
