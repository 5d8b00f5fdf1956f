//! Ledger service facade: the interface exposed to the request layer.
//!
//! Every operation takes the caller's verified `TenantContext`; nothing below
//! this point ever reads data of another tenant.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, instrument, warn};

use stockledger_core::{Entity, TenantContext};
use stockledger_events::{EventBus, EventEnvelope, InMemoryEventBus};
use stockledger_inventory::{Alert, MovementKind, NewProduct, Product, ProductId};

use crate::config::LedgerConfig;
use crate::engine::{MovementRequest, MovementResult, StockEngine, TransferRequest, TransferResult};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::MovementLedger;
use crate::ledger_store::{
    CatalogPatch, InMemoryLedgerStore, LedgerStore, MovementFilter, MovementPage, PageRequest,
    PostgresLedgerStore, schema,
};
use crate::projections::AlertDeriver;

/// Result of comparing a product's cached quantity with its ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerAudit {
    pub product_id: ProductId,
    pub cached_quantity: i64,
    pub ledger_sum: i64,
    pub consistent: bool,
}

/// Shared store handle used by the service.
pub type DynLedgerStore = Arc<dyn LedgerStore>;

/// Bus type used when the service builds its own.
pub type JsonEventBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

/// Stock ledger core.
pub struct LedgerService<S: ?Sized, B> {
    store: Arc<S>,
    engine: StockEngine<Arc<S>, B>,
    ledger: MovementLedger<Arc<S>>,
}

impl<S, B> LedgerService<S, B>
where
    S: LedgerStore + ?Sized,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(store: Arc<S>, bus: B, config: &LedgerConfig) -> Self {
        let engine = StockEngine::new(
            Arc::clone(&store),
            bus,
            AlertDeriver::new(config.alerts),
            config.engine.settings(),
        );
        let ledger = MovementLedger::new(Arc::clone(&store), config.pagination);
        Self {
            store,
            engine,
            ledger,
        }
    }

    pub fn engine(&self) -> &StockEngine<Arc<S>, B> {
        &self.engine
    }

    pub fn bus(&self) -> &B {
        self.engine.bus()
    }

    /// Apply an ADD, REMOVE or ADJUST (signed delta) movement.
    pub async fn apply_movement(
        &self,
        ctx: &TenantContext,
        product_id: ProductId,
        kind: MovementKind,
        amount: i64,
    ) -> LedgerResult<MovementResult> {
        self.engine
            .apply(ctx, MovementRequest::new(product_id, kind, amount))
            .await
    }

    /// Apply a movement described by a full request (with note).
    pub async fn record(&self, ctx: &TenantContext, request: MovementRequest) -> LedgerResult<MovementResult> {
        self.engine.apply(ctx, request).await
    }

    pub async fn transfer_stock(
        &self,
        ctx: &TenantContext,
        source_id: ProductId,
        destination_id: ProductId,
        amount: i64,
    ) -> LedgerResult<TransferResult> {
        self.engine
            .transfer(ctx, TransferRequest::new(source_id, destination_id, amount))
            .await
    }

    pub async fn adjust_stock(
        &self,
        ctx: &TenantContext,
        product_id: ProductId,
        new_quantity: i64,
        note: Option<String>,
    ) -> LedgerResult<MovementResult> {
        self.engine.adjust(ctx, product_id, new_quantity, note).await
    }

    pub async fn list_movements(
        &self,
        ctx: &TenantContext,
        filter: &MovementFilter,
        page: PageRequest,
    ) -> LedgerResult<MovementPage> {
        self.ledger.list(ctx.tenant_id(), filter, page).await
    }

    /// Active alerts of the caller's tenant, ordered by product id.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()), err)]
    pub async fn list_alerts(&self, ctx: &TenantContext) -> LedgerResult<Vec<Alert>> {
        Ok(self
            .engine
            .alerts()
            .list_active(self.store.as_ref(), ctx.tenant_id())
            .await?)
    }

    pub async fn register_product(&self, ctx: &TenantContext, new: NewProduct) -> LedgerResult<Product> {
        self.engine.register(ctx, new).await
    }

    pub async fn update_reorder_threshold(
        &self,
        ctx: &TenantContext,
        product_id: ProductId,
        reorder_threshold: i64,
    ) -> LedgerResult<Product> {
        if reorder_threshold < 0 {
            return Err(LedgerError::Validation(
                "reorder_threshold cannot be negative".to_string(),
            ));
        }
        self.engine
            .update_catalog(
                ctx,
                product_id,
                CatalogPatch {
                    reorder_threshold: Some(reorder_threshold),
                    archived: None,
                },
            )
            .await
    }

    /// Soft-delete: history stays listable, new movements are rejected.
    pub async fn archive_product(&self, ctx: &TenantContext, product_id: ProductId) -> LedgerResult<Product> {
        self.engine
            .update_catalog(
                ctx,
                product_id,
                CatalogPatch {
                    reorder_threshold: None,
                    archived: Some(true),
                },
            )
            .await
    }

    pub async fn get_product(&self, ctx: &TenantContext, product_id: ProductId) -> LedgerResult<Product> {
        self.store
            .load_product(ctx.tenant_id(), product_id)
            .await?
            .filter(|p| p.belongs_to(ctx.tenant_id()))
            .ok_or(LedgerError::NotFound)
    }

    /// Recompute the ledger sum of a product and compare it with the cached
    /// quantity.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id(), product_id = %product_id), err)]
    pub async fn verify_product(&self, ctx: &TenantContext, product_id: ProductId) -> LedgerResult<LedgerAudit> {
        let product = self.get_product(ctx, product_id).await?;
        let ledger_sum = self.ledger.sum(ctx.tenant_id(), product_id).await?;
        let audit = LedgerAudit {
            product_id,
            cached_quantity: product.quantity,
            ledger_sum,
            consistent: product.quantity == ledger_sum,
        };
        if !audit.consistent {
            warn!(
                cached_quantity = audit.cached_quantity,
                ledger_sum = audit.ledger_sum,
                "cached quantity diverges from ledger"
            );
        }
        Ok(audit)
    }

    /// Recompute the eager alert cache of the caller's tenant.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()), err)]
    pub async fn rebuild_alert_cache(&self, ctx: &TenantContext) -> LedgerResult<usize> {
        let count = self
            .engine
            .alerts()
            .rebuild(self.store.as_ref(), ctx.tenant_id())
            .await?;
        info!(active_alerts = count, "alert cache rebuilt");
        Ok(count)
    }
}

impl LedgerService<dyn LedgerStore, JsonEventBus> {
    /// Build a service from configuration: Postgres when `database.url` is
    /// set (schema migrated on connect), in-memory otherwise.
    pub async fn from_config(config: &LedgerConfig) -> LedgerResult<Self> {
        let store: DynLedgerStore = match &config.database.url {
            Some(url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(config.database.max_connections)
                    .connect(url)
                    .await
                    .map_err(|e| LedgerError::Persistence(format!("connect: {e}")))?;
                schema::migrate(&pool).await?;
                info!("using postgres ledger store");
                Arc::new(PostgresLedgerStore::new(pool))
            }
            None => {
                info!("using in-memory ledger store");
                Arc::new(InMemoryLedgerStore::new())
            }
        };
        Ok(Self::new(store, Arc::new(InMemoryEventBus::new()), config))
    }
}
