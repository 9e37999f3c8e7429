use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted by the order and coupon engines after their transactions
/// commit. Consumers (webhooks, analytics) hang off the processing loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderUpserted {
        order_id: Uuid,
        wallet_code: String,
    },
    BulkOrdersProcessed {
        created: usize,
        failed: usize,
    },
    CouponRedeemed {
        order_id: Uuid,
        coupon_id: i32,
    },
    CouponRemoved {
        order_id: Uuid,
        coupon_id: i32,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is gone.
    /// Events are advisory; a full or closed channel must never fail the
    /// transaction that produced them.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping event: {}", e);
        }
    }
}

/// Builds a connected sender/receiver pair with the default capacity.
pub fn channel() -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(1024);
    (EventSender::new(tx), rx)
}

/// Event processing loop. Runs until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderUpserted {
                order_id,
                wallet_code,
            } => {
                info!(%order_id, %wallet_code, "order upserted");
            }
            Event::BulkOrdersProcessed { created, failed } => {
                info!(created, failed, "bulk order batch settled");
            }
            Event::CouponRedeemed {
                order_id,
                coupon_id,
            } => {
                info!(%order_id, coupon_id, "coupon redeemed");
            }
            Event::CouponRemoved {
                order_id,
                coupon_id,
            } => {
                info!(%order_id, coupon_id, "coupon removed");
            }
        }
    }

    info!("Event processing loop stopped");
}
