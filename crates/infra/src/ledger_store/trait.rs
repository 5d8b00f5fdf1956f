use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use thiserror::Error;

use stockledger_core::TenantId;
use stockledger_inventory::{Movement, MovementDraft, Product, ProductId, StockChange};

use super::query::{MovementCursor, MovementFilter, MovementPage};

/// Ledger store operation error.
///
/// These are **infrastructure errors** (storage, concurrency, isolation) as
/// opposed to domain errors (validation, insufficient stock).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Compare-and-swap of one product's quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductUpdate {
    pub product_id: ProductId,
    pub expected_version: u64,
    pub quantity_before: i64,
    pub quantity_after: i64,
}

impl From<&StockChange> for ProductUpdate {
    fn from(change: &StockChange) -> Self {
        Self {
            product_id: change.product_id,
            expected_version: change.expected_version,
            quantity_before: change.quantity_before,
            quantity_after: change.quantity_after,
        }
    }
}

/// One all-or-nothing unit: movement appends plus the matching quantity updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerCommit {
    pub tenant_id: TenantId,
    pub updates: Vec<ProductUpdate>,
    pub movements: Vec<MovementDraft>,
}

impl LedgerCommit {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            updates: Vec::new(),
            movements: Vec::new(),
        }
    }

    /// Append a movement together with the quantity change it causes.
    pub fn append(mut self, change: &StockChange, draft: MovementDraft) -> Self {
        self.updates.push(ProductUpdate::from(change));
        self.movements.push(draft);
        self
    }

    /// Structural checks every backend runs before touching storage.
    ///
    /// - every update and movement belongs to the commit's tenant
    /// - each product is updated at most once
    /// - every movement targets an updated product and obeys its sign rule
    /// - per product, `quantity_after - quantity_before` equals the sum of deltas
    pub fn validate(&self) -> Result<(), StoreError> {
        let mut sums: HashMap<ProductId, i64> = HashMap::new();
        for (idx, update) in self.updates.iter().enumerate() {
            if update.quantity_after < 0 {
                return Err(StoreError::InvalidRecord(format!(
                    "negative quantity for product {} (index {idx})",
                    update.product_id
                )));
            }
            if sums.insert(update.product_id, 0).is_some() {
                return Err(StoreError::InvalidRecord(format!(
                    "product {} updated twice in one commit",
                    update.product_id
                )));
            }
        }

        for (idx, m) in self.movements.iter().enumerate() {
            if m.tenant_id != self.tenant_id {
                return Err(StoreError::TenantIsolation(format!(
                    "commit contains a movement for another tenant (index {idx})"
                )));
            }
            m.validate()
                .map_err(|e| StoreError::InvalidRecord(format!("movement {idx}: {e}")))?;
            let sum = sums.get_mut(&m.product_id).ok_or_else(|| {
                StoreError::InvalidRecord(format!(
                    "movement {idx} targets product {} without a quantity update",
                    m.product_id
                ))
            })?;
            *sum += m.quantity_delta;
        }

        for update in &self.updates {
            let delta = sums.get(&update.product_id).copied().unwrap_or(0);
            if update.quantity_before + delta != update.quantity_after {
                return Err(StoreError::InvalidRecord(format!(
                    "product {}: {} + {delta} != {}",
                    update.product_id, update.quantity_before, update.quantity_after
                )));
            }
        }
        Ok(())
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedChanges {
    /// Product state after the commit, in `updates` order.
    pub products: Vec<Product>,
    /// Recorded movements, in `movements` order.
    pub movements: Vec<Movement>,
}

impl CommittedChanges {
    pub fn product(&self, product_id: ProductId) -> Option<&Product> {
        self.products.iter().find(|p| p.id == product_id)
    }

    pub fn movement_for(&self, product_id: ProductId) -> Option<&Movement> {
        self.movements.iter().find(|m| m.product_id == product_id)
    }
}

/// Catalog metadata edit. Quantity is never part of it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogPatch {
    pub reorder_threshold: Option<i64>,
    pub archived: Option<bool>,
}

/// Durable, tenant-scoped storage for products and the movement ledger.
///
/// ## Invariants implementations must hold
///
/// - **Tenant isolation**: every read and write is keyed by `tenant_id`; a
///   product of another tenant is reported as absent
/// - **Atomic commits**: the movements and quantity updates of one
///   `LedgerCommit` become visible together or not at all
/// - **Optimistic locking**: an update applies only if the product is still at
///   `expected_version`; otherwise `StoreError::Concurrency`
/// - **Append-only ledger**: movements are never updated or deleted
/// - **Ordering**: movements list ascending by `(recorded_at, movement_id)`
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Register a catalog product (quantity must be zero).
    async fn insert_product(&self, product: Product) -> Result<Product, StoreError>;

    /// Apply a catalog metadata edit; bumps the product version.
    async fn update_catalog(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        patch: CatalogPatch,
    ) -> Result<Product, StoreError>;

    async fn load_product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Option<Product>, StoreError>;

    async fn list_products(&self, tenant_id: TenantId) -> Result<Vec<Product>, StoreError>;

    /// Atomically append movements and update quantities.
    async fn commit(&self, commit: LedgerCommit) -> Result<CommittedChanges, StoreError>;

    /// One page of movements after `after`, ascending by `(recorded_at, movement_id)`.
    async fn list_movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        after: Option<MovementCursor>,
        limit: usize,
    ) -> Result<MovementPage, StoreError>;

    /// Sum of all movement deltas recorded for a product.
    async fn ledger_sum(&self, tenant_id: TenantId, product_id: ProductId) -> Result<i64, StoreError>;
}

#[async_trait::async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn insert_product(&self, product: Product) -> Result<Product, StoreError> {
        (**self).insert_product(product).await
    }

    async fn update_catalog(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        patch: CatalogPatch,
    ) -> Result<Product, StoreError> {
        (**self).update_catalog(tenant_id, product_id, patch).await
    }

    async fn load_product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Option<Product>, StoreError> {
        (**self).load_product(tenant_id, product_id).await
    }

    async fn list_products(&self, tenant_id: TenantId) -> Result<Vec<Product>, StoreError> {
        (**self).list_products(tenant_id).await
    }

    async fn commit(&self, commit: LedgerCommit) -> Result<CommittedChanges, StoreError> {
        (**self).commit(commit).await
    }

    async fn list_movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        after: Option<MovementCursor>,
        limit: usize,
    ) -> Result<MovementPage, StoreError> {
        (**self).list_movements(tenant_id, filter, after, limit).await
    }

    async fn ledger_sum(&self, tenant_id: TenantId, product_id: ProductId) -> Result<i64, StoreError> {
        (**self).ledger_sum(tenant_id, product_id).await
    }
}

/// Ledger timestamps carry microsecond precision (what Postgres stores), so
/// cursors built from them compare identically in every backend.
pub fn ledger_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Validate a catalog patch.
pub(crate) fn check_patch(patch: &CatalogPatch) -> Result<(), StoreError> {
    if let Some(t) = patch.reorder_threshold {
        if t < 0 {
            return Err(StoreError::InvalidRecord(
                "reorder_threshold cannot be negative".to_string(),
            ));
        }
    }
    Ok(())
}
