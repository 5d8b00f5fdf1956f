//! Alert derivation after each committed change.
//!
//! Two strategies, picked by configuration:
//!
//! - **Lazy**: nothing is stored; `list_active` scans the tenant's products and
//!   evaluates each one.
//! - **Eager**: a tenant-isolated cache of active alerts is recomputed for a
//!   product while its lock is still held after the commit, so a reader never
//!   sees an alert that disagrees with committed quantity.
//!
//! The cache is process-local. With several processes sharing one database,
//! lazy mode is the consistent choice.

use serde::{Deserialize, Serialize};

use stockledger_core::TenantId;
use stockledger_inventory::{
    Alert, AlertCleared, AlertTransition, Product, ProductId, StockEvent, active_alert,
};

use crate::ledger_store::{LedgerStore, StoreError};
use crate::read_model::{InMemoryTenantStore, TenantStore};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertMode {
    #[default]
    Lazy,
    Eager,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertDelivery {
    /// Callers poll `list_active`.
    #[default]
    Poll,
    /// Alert transitions are also published on the event bus.
    Push,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub mode: AlertMode,
    pub delivery: AlertDelivery,
}

/// Derives and (optionally) materializes low-stock alerts.
#[derive(Debug)]
pub struct AlertDeriver<C = InMemoryTenantStore<ProductId, Alert>>
where
    C: TenantStore<ProductId, Alert>,
{
    settings: AlertSettings,
    cache: C,
}

impl AlertDeriver {
    pub fn new(settings: AlertSettings) -> Self {
        Self::with_cache(settings, InMemoryTenantStore::new())
    }
}

impl<C> AlertDeriver<C>
where
    C: TenantStore<ProductId, Alert>,
{
    pub fn with_cache(settings: AlertSettings, cache: C) -> Self {
        Self { settings, cache }
    }

    pub fn settings(&self) -> AlertSettings {
        self.settings
    }

    /// Classify the alert change between two committed states of one product
    /// and, in eager mode, bring the cache in line with `after`.
    ///
    /// Must be called while the product's lock is held.
    pub fn record(&self, before: Option<&Product>, after: &Product) -> AlertTransition {
        let transition =
            AlertTransition::between(before.and_then(active_alert), active_alert(after));

        if self.settings.mode == AlertMode::Eager {
            match transition.current() {
                Some(alert) => self.cache.upsert(after.tenant_id, after.id, alert.clone()),
                None => {
                    self.cache.remove(after.tenant_id, &after.id);
                }
            }
        }

        transition
    }

    /// Active alerts of one tenant, ordered by product id.
    pub async fn list_active<S>(&self, store: &S, tenant_id: TenantId) -> Result<Vec<Alert>, StoreError>
    where
        S: LedgerStore + ?Sized,
    {
        match self.settings.mode {
            AlertMode::Eager => Ok(self.cache.list(tenant_id)),
            AlertMode::Lazy => Ok(store
                .list_products(tenant_id)
                .await?
                .iter()
                .filter_map(active_alert)
                .collect()),
        }
    }

    /// Recompute the eager cache of one tenant from stored products. Returns
    /// the number of active alerts.
    pub async fn rebuild<S>(&self, store: &S, tenant_id: TenantId) -> Result<usize, StoreError>
    where
        S: LedgerStore + ?Sized,
    {
        let entries: Vec<(ProductId, Alert)> = store
            .list_products(tenant_id)
            .await?
            .iter()
            .filter_map(|p| active_alert(p).map(|a| (p.id, a)))
            .collect();
        let count = entries.len();
        if self.settings.mode == AlertMode::Eager {
            self.cache.replace_tenant(tenant_id, entries);
        }
        Ok(count)
    }

    /// Events to publish for a transition. Empty unless delivery is `Push`.
    pub fn notifications(&self, transition: &AlertTransition, after: &Product) -> Vec<StockEvent> {
        if self.settings.delivery != AlertDelivery::Push {
            return Vec::new();
        }
        match transition {
            AlertTransition::Raised(alert) => vec![StockEvent::AlertRaised(alert.clone())],
            AlertTransition::Changed { current, .. } => vec![StockEvent::AlertRaised(current.clone())],
            AlertTransition::Cleared(_) => vec![StockEvent::AlertCleared(AlertCleared {
                tenant_id: after.tenant_id,
                product_id: after.id,
                current_quantity: after.quantity,
                reorder_threshold: after.reorder_threshold,
                cleared_at: after.updated_at,
            })],
            AlertTransition::Unchanged(_) => Vec::new(),
        }
    }
}
