pub mod coupons;
pub mod orders;

use std::sync::Arc;

use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{coupons::CouponService, orders::OrderService};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub order: Arc<OrderService>,
    pub coupon: Arc<CouponService>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        let order = Arc::new(OrderService::new(db_pool.clone(), event_sender.clone()));
        let coupon = Arc::new(CouponService::new(db_pool, event_sender));

        Self { order, coupon }
    }
}
