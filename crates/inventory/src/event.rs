use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::TenantId;
use stockledger_events::Event;

use crate::alert::Alert;
use crate::movement::Movement;
use crate::product::ProductId;

/// Event: AlertCleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertCleared {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub current_quantity: i64,
    pub reorder_threshold: i64,
    pub cleared_at: DateTime<Utc>,
}

/// Notifications published after a ledger commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    MovementRecorded(Movement),
    AlertRaised(Alert),
    AlertCleared(AlertCleared),
}

impl StockEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            StockEvent::MovementRecorded(m) => m.tenant_id,
            StockEvent::AlertRaised(a) => a.tenant_id,
            StockEvent::AlertCleared(c) => c.tenant_id,
        }
    }

    pub fn product_id(&self) -> ProductId {
        match self {
            StockEvent::MovementRecorded(m) => m.product_id,
            StockEvent::AlertRaised(a) => a.product_id,
            StockEvent::AlertCleared(c) => c.product_id,
        }
    }
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::MovementRecorded(_) => "inventory.movement.recorded",
            StockEvent::AlertRaised(_) => "inventory.alert.raised",
            StockEvent::AlertCleared(_) => "inventory.alert.cleared",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::MovementRecorded(m) => m.recorded_at,
            StockEvent::AlertRaised(a) => a.triggered_at,
            StockEvent::AlertCleared(c) => c.cleared_at,
        }
    }
}
