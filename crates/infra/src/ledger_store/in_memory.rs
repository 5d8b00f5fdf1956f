use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};

use stockledger_core::{AggregateRoot, Entity, TenantId};
use stockledger_inventory::{Movement, Product, ProductId};

use super::query::{MovementCursor, MovementFilter, MovementPage};
use super::r#trait::{
    CatalogPatch, CommittedChanges, LedgerCommit, LedgerStore, StoreError, check_patch, ledger_now,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct ProductKey {
    tenant_id: TenantId,
    product_id: ProductId,
}

impl ProductKey {
    fn new(tenant_id: TenantId, product_id: ProductId) -> Self {
        Self {
            tenant_id,
            product_id,
        }
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    products: HashMap<ProductKey, Product>,
    skus: HashSet<(TenantId, String)>,
    /// Append-only, sorted by `(recorded_at, movement_id)`.
    movements: Vec<Movement>,
    last_recorded_at: Option<DateTime<Utc>>,
}

impl LedgerState {
    /// Ledger clock: never goes backwards, and every commit gets a distinct
    /// timestamp so the append order is also the listing order.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = ledger_now();
        let at = match self.last_recorded_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_recorded_at = Some(at);
        at
    }
}

/// In-memory product catalog and movement ledger.
///
/// Intended for tests/dev and single-process deployments. A single lock
/// guards the whole state, so every commit is trivially atomic.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<LedgerState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> StoreError {
        StoreError::Backend("lock poisoned".to_string())
    }
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert_product(&self, product: Product) -> Result<Product, StoreError> {
        if product.quantity != 0 {
            return Err(StoreError::InvalidRecord(
                "products are registered with zero quantity".to_string(),
            ));
        }

        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        let key = ProductKey::new(product.tenant_id, product.id);
        if state.products.contains_key(&key) {
            return Err(StoreError::Duplicate(format!("product {}", product.id)));
        }
        let sku_key = (product.tenant_id, product.sku.clone());
        if state.skus.contains(&sku_key) {
            return Err(StoreError::Duplicate(format!("sku {}", product.sku)));
        }

        state.skus.insert(sku_key);
        state.products.insert(key, product.clone());
        Ok(product)
    }

    async fn update_catalog(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        patch: CatalogPatch,
    ) -> Result<Product, StoreError> {
        check_patch(&patch)?;

        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        let now = ledger_now();
        let product = state
            .products
            .get_mut(&ProductKey::new(tenant_id, product_id))
            .ok_or_else(|| StoreError::NotFound(format!("product {product_id}")))?;

        if let Some(threshold) = patch.reorder_threshold {
            product.reorder_threshold = threshold;
        }
        if let Some(archived) = patch.archived {
            product.archived = archived;
        }
        product.version += 1;
        product.updated_at = now;
        Ok(product.clone())
    }

    async fn load_product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Option<Product>, StoreError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(state
            .products
            .get(&ProductKey::new(tenant_id, product_id))
            .cloned())
    }

    async fn list_products(&self, tenant_id: TenantId) -> Result<Vec<Product>, StoreError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        let mut out: Vec<Product> = state
            .products
            .values()
            .filter(|p| p.belongs_to(tenant_id))
            .cloned()
            .collect();
        out.sort_by_key(|p| p.id);
        Ok(out)
    }

    async fn commit(&self, commit: LedgerCommit) -> Result<CommittedChanges, StoreError> {
        commit.validate()?;
        if commit.updates.is_empty() {
            return Ok(CommittedChanges {
                products: Vec::new(),
                movements: Vec::new(),
            });
        }

        let mut state = self.state.write().map_err(|_| Self::poisoned())?;

        // Check every compare-and-swap before mutating anything.
        for update in &commit.updates {
            let key = ProductKey::new(commit.tenant_id, update.product_id);
            let current = state
                .products
                .get(&key)
                .ok_or_else(|| StoreError::NotFound(format!("product {}", update.product_id)))?;
            if current.version() != update.expected_version
                || current.quantity != update.quantity_before
            {
                return Err(StoreError::Concurrency(format!(
                    "product {}: expected version {}, found {}",
                    update.product_id, update.expected_version, current.version
                )));
            }
            if current.archived {
                return Err(StoreError::InvalidRecord(format!(
                    "product {} is archived",
                    update.product_id
                )));
            }
        }

        let recorded_at = state.next_timestamp();

        let mut products = Vec::with_capacity(commit.updates.len());
        for update in &commit.updates {
            let key = ProductKey::new(commit.tenant_id, update.product_id);
            if let Some(product) = state.products.get_mut(&key) {
                product.quantity = update.quantity_after;
                product.version += 1;
                product.updated_at = recorded_at;
                products.push(product.clone());
            }
        }

        let mut movements: Vec<Movement> = commit
            .movements
            .into_iter()
            .map(|draft| draft.recorded(recorded_at))
            .collect();
        movements.sort_by_key(|m| m.id);
        state.movements.extend(movements.iter().cloned());

        Ok(CommittedChanges {
            products,
            movements,
        })
    }

    async fn list_movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        after: Option<MovementCursor>,
        limit: usize,
    ) -> Result<MovementPage, StoreError> {
        if limit == 0 {
            return Ok(MovementPage::empty());
        }

        let state = self.state.read().map_err(|_| Self::poisoned())?;
        let start = match after {
            Some(cursor) => state
                .movements
                .partition_point(|m| !cursor.precedes(m)),
            None => 0,
        };

        let rows: Vec<Movement> = state.movements[start..]
            .iter()
            .filter(|m| m.belongs_to(tenant_id) && filter.matches(m))
            .take(limit + 1)
            .cloned()
            .collect();

        Ok(MovementPage::from_overfetch(rows, limit))
    }

    async fn ledger_sum(&self, tenant_id: TenantId, product_id: ProductId) -> Result<i64, StoreError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(state
            .movements
            .iter()
            .filter(|m| m.belongs_to(tenant_id) && m.product_id == product_id)
            .map(|m| m.quantity_delta)
            .sum())
    }
}
