use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        coupon_redemption, order, order_line, CouponRedemption, CouponRedemptionModel, Order,
        OrderLine, OrderLineModel, OrderModel, OrderStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::catalog,
};

/// One raw line as submitted by a caller. Only `item_id` and `quantity` are
/// authoritative; the price-shaped fields are accepted so that clients which
/// echo back a previously returned order keep working, but they are never
/// read when pricing.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineInput {
    pub item_id: i32,
    pub quantity: i32,
    #[serde(default)]
    pub unit_price: Option<Decimal>,
    #[serde(default)]
    pub total_price: Option<Decimal>,
}

/// A line after server-side pricing, ready for persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub item_id: i32,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

/// Input for creating or replacing a wallet's order.
#[derive(Debug, Validate)]
pub struct UpsertOrderInput {
    #[validate(length(min = 1, max = 64, message = "Wallet code is required"))]
    pub wallet_code: String,
    pub buyer_ip: Option<String>,
    #[validate(length(min = 1, message = "At least one line is required"))]
    pub lines: Vec<OrderLineInput>,
}

/// The persisted order together with its owned collections.
#[derive(Debug, Serialize)]
pub struct OrderWithDetails {
    pub order: OrderModel,
    pub lines: Vec<OrderLineModel>,
    pub coupons: Vec<CouponRedemptionModel>,
}

/// One flat batch record: a line tagged with the wallet it belongs to. The
/// schema is fixed on purpose — arbitrary extra columns are rejected at
/// deserialization, and price-shaped columns are rejected when present, so
/// tabular input can never smuggle values into computed fields.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BulkOrderRecord {
    pub wallet_code: String,
    pub item_id: i32,
    pub quantity: i32,
    #[serde(default)]
    pub unit_price: Option<Decimal>,
    #[serde(default)]
    pub total_price: Option<Decimal>,
}

/// Records for a single wallet, processed as one upsert.
#[derive(Debug, Clone)]
pub struct RecordGroup {
    pub wallet_code: String,
    pub records: Vec<BulkOrderRecord>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkOrderError {
    pub wallet_code: String,
    pub error: String,
}

/// Settle-all outcome of a batch: how many groups committed, and why each
/// failing group failed. Failures never surface as an error of the batch
/// call itself.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkOrderOutcome {
    pub created: usize,
    pub errors: Vec<BulkOrderError>,
}

/// Computes authoritative per-line prices from a catalog snapshot.
///
/// Deterministic: output is fully determined by `prices` and the input
/// quantities, preserves input order, and never reads caller-supplied price
/// fields.
pub fn price_lines(
    prices: &HashMap<i32, Decimal>,
    lines: &[OrderLineInput],
) -> Result<Vec<PricedLine>, ServiceError> {
    lines
        .iter()
        .map(|line| {
            if line.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "Invalid quantity for item {}",
                    line.item_id
                )));
            }

            let unit_price = prices.get(&line.item_id).copied().ok_or_else(|| {
                ServiceError::ValidationError(
                    "One or more items not found or inactive".to_string(),
                )
            })?;
            let total_price = unit_price * Decimal::from(line.quantity);
            if total_price <= Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "Invalid total price for item {}",
                    line.item_id
                )));
            }

            Ok(PricedLine {
                item_id: line.item_id,
                quantity: line.quantity,
                unit_price,
                total_price,
            })
        })
        .collect()
}

/// Partitions flat records by wallet code, preserving first-seen wallet
/// order and per-wallet record order.
pub fn group_records(records: Vec<BulkOrderRecord>) -> Vec<RecordGroup> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<RecordGroup> = Vec::new();

    for record in records {
        match index.get(&record.wallet_code) {
            Some(&i) => groups[i].records.push(record),
            None => {
                index.insert(record.wallet_code.clone(), groups.len());
                groups.push(RecordGroup {
                    wallet_code: record.wallet_code.clone(),
                    records: vec![record],
                });
            }
        }
    }

    groups
}

/// Converts one wallet's records into raw lines, rejecting any record that
/// carries a price-shaped column. The rejection fails only this group.
fn lines_from_records(records: &[BulkOrderRecord]) -> Result<Vec<OrderLineInput>, ServiceError> {
    records
        .iter()
        .map(|record| {
            if record.unit_price.is_some() || record.total_price.is_some() {
                return Err(ServiceError::ValidationError(format!(
                    "Client-supplied prices are not accepted for item {}",
                    record.item_id
                )));
            }
            Ok(OrderLineInput {
                item_id: record.item_id,
                quantity: record.quantity,
                unit_price: None,
                total_price: None,
            })
        })
        .collect()
}

fn dedup_item_ids(lines: &[OrderLineInput]) -> Vec<i32> {
    let mut ids: Vec<i32> = Vec::with_capacity(lines.len());
    for line in lines {
        if !ids.contains(&line.item_id) {
            ids.push(line.item_id);
        }
    }
    ids
}

/// Service managing the per-wallet order lifecycle: server-side pricing,
/// transactional create-or-replace keyed by wallet code, and settle-all
/// batch processing.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Retrieves the wallet's current order with its lines and redemptions,
    /// or `None` if the wallet has no order.
    #[instrument(skip(self))]
    pub async fn get_current_order(
        &self,
        wallet_code: &str,
    ) -> Result<Option<OrderWithDetails>, ServiceError> {
        let order = Order::find()
            .filter(order::Column::WalletCode.eq(wallet_code))
            .one(&*self.db)
            .await?;

        let Some(order) = order else {
            return Ok(None);
        };

        let lines = OrderLine::find()
            .filter(order_line::Column::OrderId.eq(order.id))
            .order_by_asc(order_line::Column::Position)
            .all(&*self.db)
            .await?;
        let coupons = CouponRedemption::find()
            .filter(coupon_redemption::Column::OrderId.eq(order.id))
            .all(&*self.db)
            .await?;

        Ok(Some(OrderWithDetails {
            order,
            lines,
            coupons,
        }))
    }

    /// Creates or replaces the wallet's order in a single transaction.
    ///
    /// Pricing runs against the same transaction the write commits in, so
    /// the persisted totals reflect one catalog snapshot. If an order
    /// already exists for the wallet its whole line set is deleted and
    /// recreated, status resets to pending, and `buyer_ip` is updated only
    /// when the caller supplied one. Existing coupon redemptions are left
    /// untouched.
    #[instrument(skip(self, input), fields(wallet_code = %input.wallet_code, line_count = input.lines.len()))]
    pub async fn upsert_current_order(
        &self,
        input: UpsertOrderInput,
    ) -> Result<OrderWithDetails, ServiceError> {
        input.validate().map_err(ServiceError::from)?;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order upsert");
            ServiceError::DatabaseError(e)
        })?;

        let item_ids = dedup_item_ids(&input.lines);
        let prices = catalog::active_prices(&txn, &item_ids).await?;
        let priced = price_lines(&prices, &input.lines)?;

        let now = Utc::now();
        let existing = Order::find()
            .filter(order::Column::WalletCode.eq(input.wallet_code.as_str()))
            .one(&txn)
            .await?;

        let order = match existing {
            Some(existing) => {
                // Replace the whole line set; readers never observe a
                // partial set because everything below shares this txn.
                OrderLine::delete_many()
                    .filter(order_line::Column::OrderId.eq(existing.id))
                    .exec(&txn)
                    .await?;

                let prior_buyer_ip = existing.buyer_ip.clone();
                let mut active: order::ActiveModel = existing.into();
                active.status = Set(OrderStatus::Pending);
                active.buyer_ip = Set(input.buyer_ip.clone().or(prior_buyer_ip));
                active.updated_at = Set(Some(now));
                active.update(&txn).await?
            }
            None => {
                let active = order::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    wallet_code: Set(input.wallet_code.clone()),
                    status: Set(OrderStatus::Pending),
                    buyer_ip: Set(input.buyer_ip.clone()),
                    created_at: Set(now),
                    updated_at: Set(None),
                };
                active.insert(&txn).await.map_err(|e| {
                    // A racing first submission for the same wallet lost to
                    // the unique index on wallet_code.
                    if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                        ServiceError::Conflict(format!(
                            "Order for wallet {} was created concurrently",
                            input.wallet_code
                        ))
                    } else {
                        ServiceError::DatabaseError(e)
                    }
                })?
            }
        };

        let mut lines = Vec::with_capacity(priced.len());
        for (position, line) in priced.iter().enumerate() {
            let active = order_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                position: Set(position as i32),
                item_id: Set(line.item_id),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                total_price: Set(line.total_price),
                created_at: Set(now),
            };
            lines.push(active.insert(&txn).await?);
        }
        let coupons = CouponRedemption::find()
            .filter(coupon_redemption::Column::OrderId.eq(order.id))
            .all(&txn)
            .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, wallet_code = %input.wallet_code, "Failed to commit order upsert");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order.id, wallet_code = %input.wallet_code, "Order upserted");

        self.event_sender
            .send_or_log(Event::OrderUpserted {
                order_id: order.id,
                wallet_code: input.wallet_code,
            })
            .await;

        Ok(OrderWithDetails {
            order,
            lines,
            coupons,
        })
    }

    /// Processes flat batch records: partitions them by wallet code and runs
    /// one upsert per wallet, each in its own transaction. Outcomes settle
    /// independently — a failing group reports its wallet code and a
    /// user-safe reason without disturbing sibling groups.
    #[instrument(skip(self, records), fields(record_count = records.len()))]
    pub async fn process_bulk_records(
        &self,
        records: Vec<BulkOrderRecord>,
        buyer_ip: Option<String>,
    ) -> Result<BulkOrderOutcome, ServiceError> {
        let groups = group_records(records);

        let results = join_all(groups.into_iter().map(|group| {
            let svc = self.clone();
            let buyer_ip = buyer_ip.clone();
            async move {
                let wallet_code = group.wallet_code.clone();
                let outcome = async {
                    let lines = lines_from_records(&group.records)?;
                    svc.upsert_current_order(UpsertOrderInput {
                        wallet_code: group.wallet_code,
                        buyer_ip,
                        lines,
                    })
                    .await
                }
                .await;
                (wallet_code, outcome)
            }
        }))
        .await;

        let mut created = 0;
        let mut errors = Vec::new();
        for (wallet_code, result) in results {
            match result {
                Ok(_) => created += 1,
                Err(err) => {
                    info!(%wallet_code, error = %err, "Bulk order group failed");
                    errors.push(BulkOrderError {
                        wallet_code,
                        error: err.response_message(),
                    });
                }
            }
        }

        self.event_sender
            .send_or_log(Event::BulkOrdersProcessed {
                created,
                failed: errors.len(),
            })
            .await;

        Ok(BulkOrderOutcome { created, errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(item_id: i32, quantity: i32) -> OrderLineInput {
        OrderLineInput {
            item_id,
            quantity,
            unit_price: None,
            total_price: None,
        }
    }

    fn catalog() -> HashMap<i32, Decimal> {
        HashMap::from([(1, dec!(10)), (2, dec!(5)), (3, dec!(20))])
    }

    #[test]
    fn prices_lines_from_catalog_preserving_order() {
        let priced = price_lines(&catalog(), &[line(1, 2), line(3, 1)]).unwrap();

        assert_eq!(priced.len(), 2);
        assert_eq!(priced[0].item_id, 1);
        assert_eq!(priced[0].unit_price, dec!(10));
        assert_eq!(priced[0].total_price, dec!(20));
        assert_eq!(priced[1].item_id, 3);
        assert_eq!(priced[1].unit_price, dec!(20));
        assert_eq!(priced[1].total_price, dec!(20));
    }

    #[test]
    fn client_supplied_prices_never_influence_totals() {
        let mut tampered = line(1, 2);
        tampered.unit_price = Some(dec!(0.01));
        tampered.total_price = Some(dec!(0.02));

        let priced = price_lines(&catalog(), &[tampered]).unwrap();
        assert_eq!(priced[0].unit_price, dec!(10));
        assert_eq!(priced[0].total_price, dec!(20));
    }

    #[test]
    fn rejects_zero_and_negative_quantities() {
        for quantity in [0, -3] {
            let err = price_lines(&catalog(), &[line(2, quantity)]).unwrap_err();
            assert_eq!(
                err.response_message(),
                "Validation error: Invalid quantity for item 2"
            );
        }
    }

    #[test]
    fn rejects_non_positive_computed_totals() {
        let prices = HashMap::from([(9, Decimal::ZERO)]);
        let err = price_lines(&prices, &[line(9, 4)]).unwrap_err();
        assert_eq!(
            err.response_message(),
            "Validation error: Invalid total price for item 9"
        );
    }

    #[test]
    fn missing_catalog_price_is_a_catalog_mismatch() {
        let err = price_lines(&catalog(), &[line(99, 1)]).unwrap_err();
        assert!(err
            .response_message()
            .contains("not found or inactive"));
    }

    #[test]
    fn pricing_is_deterministic() {
        let lines = [line(1, 2), line(2, 3), line(3, 1)];
        let first = price_lines(&catalog(), &lines).unwrap();
        let second = price_lines(&catalog(), &lines).unwrap();
        assert_eq!(first, second);
    }

    fn record(wallet: &str, item_id: i32, quantity: i32) -> BulkOrderRecord {
        BulkOrderRecord {
            wallet_code: wallet.to_string(),
            item_id,
            quantity,
            unit_price: None,
            total_price: None,
        }
    }

    #[test]
    fn groups_records_by_wallet_preserving_first_seen_order() {
        let groups = group_records(vec![
            record("w2", 1, 1),
            record("w1", 2, 2),
            record("w2", 3, 1),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].wallet_code, "w2");
        assert_eq!(groups[0].records.len(), 2);
        assert_eq!(groups[0].records[1].item_id, 3);
        assert_eq!(groups[1].wallet_code, "w1");
        assert_eq!(groups[1].records.len(), 1);
    }

    #[test]
    fn batch_records_with_price_columns_are_rejected() {
        let mut tampered = record("w1", 1, 1);
        tampered.unit_price = Some(dec!(0.01));

        let err = lines_from_records(&[tampered]).unwrap_err();
        assert!(err.response_message().contains("item 1"));
    }

    #[test]
    fn batch_record_schema_rejects_unknown_columns() {
        let json = r#"{"walletCode": "w1", "itemId": 1, "quantity": 2, "isAdmin": true}"#;
        assert!(serde_json::from_str::<BulkOrderRecord>(json).is_err());
    }

    #[test]
    fn line_input_accepts_price_fields_structurally() {
        let json = r#"{"itemId": 1, "quantity": 2, "unitPrice": "0.01"}"#;
        let parsed: OrderLineInput = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.item_id, 1);
        assert_eq!(parsed.unit_price, Some(dec!(0.01)));
    }

    #[test]
    fn dedup_preserves_first_occurrence_order() {
        let ids = dedup_item_ids(&[line(3, 1), line(1, 1), line(3, 2), line(2, 1)]);
        assert_eq!(ids, vec![3, 1, 2]);
    }
}
