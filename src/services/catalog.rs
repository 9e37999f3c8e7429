use std::collections::HashMap;

use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};

use crate::{
    entities::{item, Item},
    errors::ServiceError,
};

/// Resolves a deduplicated set of item ids to the unit prices of the active
/// catalog entries, in one query against the caller's connection (usually an
/// open transaction, so pricing sees the same snapshot the upsert commits
/// against).
///
/// Fails when any requested id is unknown OR inactive; callers cannot tell
/// which.
pub async fn active_prices<C: ConnectionTrait>(
    conn: &C,
    item_ids: &[i32],
) -> Result<HashMap<i32, Decimal>, ServiceError> {
    if item_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let items = Item::find()
        .filter(item::Column::Id.is_in(item_ids.iter().copied()))
        .filter(item::Column::Active.eq(true))
        .all(conn)
        .await?;

    if items.len() != item_ids.len() {
        return Err(ServiceError::ValidationError(
            "One or more items not found or inactive".to_string(),
        ));
    }

    Ok(items.into_iter().map(|i| (i.id, i.price)).collect())
}
