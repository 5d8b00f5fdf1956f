//! Per-product serialization.
//!
//! Every quantity change on a product runs while holding that product's
//! lock. Locks are async mutexes held in a registry keyed by
//! `(tenant, product)`; multi-product operations acquire them in key order so
//! two transfers over the same pair can never deadlock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;

use stockledger_core::TenantId;
use stockledger_inventory::ProductId;

type LockKey = (TenantId, ProductId);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("timed out after {0:?} waiting for product lock")]
    Timeout(Duration),

    #[error("lock registry poisoned")]
    Poisoned,
}

/// Registry of per-product locks.
#[derive(Debug, Default)]
pub struct ProductLocks {
    slots: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

/// Held locks; released on drop.
#[derive(Debug)]
pub struct ProductGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl ProductLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the locks of every listed product, waiting at most `wait` in
    /// total. Duplicates are ignored.
    pub async fn acquire(
        &self,
        tenant_id: TenantId,
        product_ids: &[ProductId],
        wait: Duration,
    ) -> Result<ProductGuard, LockError> {
        let mut keys: Vec<LockKey> = product_ids.iter().map(|p| (tenant_id, *p)).collect();
        keys.sort();
        keys.dedup();

        let deadline = Instant::now() + wait;
        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            let slot = self.slot(*key)?;
            let guard = tokio::time::timeout_at(deadline, slot.lock_owned())
                .await
                .map_err(|_| LockError::Timeout(wait))?;
            guards.push(guard);
        }

        Ok(ProductGuard { _guards: guards })
    }

    fn slot(&self, key: LockKey) -> Result<Arc<AsyncMutex<()>>, LockError> {
        let mut slots = self.slots.lock().map_err(|_| LockError::Poisoned)?;
        // Drop slots nobody holds or waits on, so the registry tracks only
        // products with in-flight work.
        if slots.len() > 1024 {
            slots.retain(|k, m| *k == key || Arc::strong_count(m) > 1);
        }
        Ok(slots.entry(key).or_default().clone())
    }
}
