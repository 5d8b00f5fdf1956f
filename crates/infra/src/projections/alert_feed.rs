use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use stockledger_core::{AggregateId, TenantId};
use stockledger_events::EventEnvelope;
use stockledger_inventory::{Alert, ProductId, StockEvent};

use crate::read_model::TenantStore;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum AlertFeedError {
    #[error("failed to deserialize stock event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("alert feed cursor lock poisoned")]
    Poisoned,
}

/// Subscriber-side view of active alerts, built from pushed notifications.
///
/// Consumes published envelopes and keeps a tenant-isolated set of active
/// alerts. Envelopes carry the product version as their sequence number:
/// anything older than the last applied version of that product is stale and
/// ignored, so at-least-once and out-of-order delivery are both safe. Several
/// envelopes may share one version (one commit).
#[derive(Debug)]
pub struct AlertFeed<S>
where
    S: TenantStore<ProductId, Alert>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> AlertFeed<S>
where
    S: TenantStore<ProductId, Alert>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<Alert> {
        self.store.list(tenant_id)
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), AlertFeedError> {
        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let event: StockEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| AlertFeedError::Deserialize(e.to_string()))?;

        if event.tenant_id() != tenant_id {
            return Err(AlertFeedError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if event.product_id().0 != aggregate_id {
            return Err(AlertFeedError::TenantIsolation(
                "event product_id does not match envelope aggregate_id".to_string(),
            ));
        }

        let mut cursors = self.cursors.write().map_err(|_| AlertFeedError::Poisoned)?;
        let key = CursorKey {
            tenant_id,
            aggregate_id,
        };
        let last = cursors.get(&key).copied().unwrap_or(0);
        if seq < last {
            return Ok(());
        }

        match event {
            StockEvent::AlertRaised(alert) => {
                self.store.upsert(tenant_id, alert.product_id, alert);
            }
            StockEvent::AlertCleared(cleared) => {
                self.store.remove(tenant_id, &cleared.product_id);
            }
            StockEvent::MovementRecorded(movement) => {
                // Keep the quantity of a still-active alert current.
                if let Some(mut alert) = self.store.get(tenant_id, &movement.product_id) {
                    alert.current_quantity = movement.quantity_after;
                    self.store.upsert(tenant_id, movement.product_id, alert);
                }
            }
        }

        cursors.insert(key, seq);
        Ok(())
    }
}
