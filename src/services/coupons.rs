use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set, SqlErr,
    TransactionTrait,
};
use serde::Serialize;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::{coupon, coupon_redemption, order, Coupon, CouponRedemption, Order},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// View of a freshly created redemption returned to the caller.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionResponse {
    pub id: Uuid,
    pub coupon_code: String,
    pub coupon_id: i32,
    pub percent: Decimal,
}

/// Service managing coupon redemption and removal against a wallet's
/// current order.
///
/// Single use is guaranteed by the unique `(order_id, coupon_id)` index, not
/// by the in-transaction existence check. The check exists so the common
/// "already used" case answers without a constraint round-trip; the index is
/// what rejects the loser when two redemptions race past the check.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Redeems a coupon code against the wallet's current order, recording
    /// the coupon's percent at this moment.
    #[instrument(skip(self), fields(wallet_code = %wallet_code, code = %code))]
    pub async fn redeem(
        &self,
        wallet_code: &str,
        code: &str,
    ) -> Result<RedemptionResponse, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for coupon redemption");
            ServiceError::DatabaseError(e)
        })?;

        let coupon = Coupon::find()
            .filter(coupon::Column::Code.eq(code))
            .filter(coupon::Column::Active.eq(true))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::business("Coupon invalid"))?;

        let order = Order::find()
            .filter(order::Column::WalletCode.eq(wallet_code))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::business("No current order"))?;

        // Fast path only; the unique index is the actual guarantee.
        let used = CouponRedemption::find()
            .filter(coupon_redemption::Column::OrderId.eq(order.id))
            .filter(coupon_redemption::Column::CouponId.eq(coupon.id))
            .one(&txn)
            .await?;
        if used.is_some() {
            return Err(ServiceError::business("Already used"));
        }

        let active = coupon_redemption::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            coupon_id: Set(coupon.id),
            coupon_code: Set(coupon.code.clone()),
            percent: Set(coupon.percent),
            wallet_code: Set(wallet_code.to_string()),
            created_at: Set(Utc::now()),
        };
        let redemption = active.insert(&txn).await.map_err(|e| {
            if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                ServiceError::business("Already used")
            } else {
                ServiceError::DatabaseError(e)
            }
        })?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order.id, "Failed to commit coupon redemption");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order.id, coupon_id = coupon.id, "Coupon redeemed");

        self.event_sender
            .send_or_log(Event::CouponRedeemed {
                order_id: order.id,
                coupon_id: coupon.id,
            })
            .await;

        Ok(RedemptionResponse {
            id: redemption.id,
            coupon_code: redemption.coupon_code,
            coupon_id: redemption.coupon_id,
            percent: redemption.percent,
        })
    }

    /// Removes any redemption of the given coupon from the wallet's current
    /// order. Idempotent: removing a redemption that was never created
    /// succeeds and changes nothing.
    #[instrument(skip(self), fields(wallet_code = %wallet_code, coupon_id = coupon_id))]
    pub async fn remove(&self, wallet_code: &str, coupon_id: i32) -> Result<(), ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for coupon removal");
            ServiceError::DatabaseError(e)
        })?;

        let order = Order::find()
            .filter(order::Column::WalletCode.eq(wallet_code))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::business("No current order"))?;

        let deleted = CouponRedemption::delete_many()
            .filter(coupon_redemption::Column::OrderId.eq(order.id))
            .filter(coupon_redemption::Column::CouponId.eq(coupon_id))
            .exec(&txn)
            .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order.id, "Failed to commit coupon removal");
            ServiceError::DatabaseError(e)
        })?;

        if deleted.rows_affected > 0 {
            info!(order_id = %order.id, coupon_id, "Coupon removed");
            self.event_sender
                .send_or_log(Event::CouponRemoved {
                    order_id: order.id,
                    coupon_id,
                })
                .await;
        }

        Ok(())
    }
}
