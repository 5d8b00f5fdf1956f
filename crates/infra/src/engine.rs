//! Stock engine: the only path by which product quantity changes.
//!
//! ## Execution flow
//!
//! ```text
//! request
//!   ↓
//! 1. Acquire the product lock(s), waiting at most `lock_wait`
//!   ↓
//! 2. Load product(s) under tenant scope (absent or foreign → NotFound)
//!   ↓
//! 3. Plan the change (pure; sign rules, no negative stock)
//!   ↓
//! 4. Commit movements + quantity updates as one unit (version compare-and-swap)
//!   ↓
//! 5. Derive alerts (eager cache updated here, still under the lock)
//!   ↓
//! 6. Publish committed notifications (best-effort)
//! ```
//!
//! A lock timeout or a stale version is a `ConcurrencyConflict`: the whole
//! attempt is retried with exponential backoff, then surfaced. All other
//! errors surface immediately. Nothing is committed by a failed attempt.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use stockledger_core::{ReferenceId, TenantContext, TenantId};
use stockledger_events::{Event, EventBus, EventEnvelope};
use stockledger_inventory::{
    Alert, AlertTransition, Movement, MovementKind, NewProduct, Product, ProductId, StockChange,
    StockEvent, ZeroAdjustPolicy, active_alert, plan_adjust, plan_movement, plan_transfer,
};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger;
use crate::ledger_store::{CatalogPatch, CommittedChanges, LedgerCommit, LedgerStore, ledger_now};
use crate::locks::ProductLocks;
use crate::projections::AlertDeriver;
use crate::retry::RetryPolicy;

/// Aggregate type stamped on published envelopes.
pub const PRODUCT_AGGREGATE_TYPE: &str = "inventory.product";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Bound on waiting for product locks, per attempt.
    pub lock_wait: Duration,
    pub retry: RetryPolicy,
    pub zero_adjust: ZeroAdjustPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_millis(250),
            retry: RetryPolicy::default(),
            zero_adjust: ZeroAdjustPolicy::Record,
        }
    }
}

/// ADD / REMOVE / ADJUST on one product. `amount` is a magnitude for ADD and
/// REMOVE and a signed delta for ADJUST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub product_id: ProductId,
    pub kind: MovementKind,
    pub amount: i64,
    pub note: Option<String>,
}

impl MovementRequest {
    pub fn new(product_id: ProductId, kind: MovementKind, amount: i64) -> Self {
        Self {
            product_id,
            kind,
            amount,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub source_id: ProductId,
    pub destination_id: ProductId,
    pub amount: i64,
    pub note: Option<String>,
}

impl TransferRequest {
    pub fn new(source_id: ProductId, destination_id: ProductId, amount: i64) -> Self {
        Self {
            source_id,
            destination_id,
            amount,
            note: None,
        }
    }
}

/// Outcome of a single-product movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementResult {
    pub product: Product,
    /// `None` only for a zero ADJUST under `ZeroAdjustPolicy::Skip`.
    pub movement: Option<Movement>,
    pub alert: Option<Alert>,
}

/// Outcome of a transfer; both legs share `reference_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub reference_id: ReferenceId,
    pub source: Product,
    pub destination: Product,
    pub source_movement: Movement,
    pub destination_movement: Movement,
}

/// Serializes and commits quantity changes.
///
/// - `S`: ledger store (durability + version compare-and-swap)
/// - `B`: event bus for committed notifications
#[derive(Debug)]
pub struct StockEngine<S, B> {
    store: S,
    bus: B,
    locks: ProductLocks,
    alerts: AlertDeriver,
    settings: EngineSettings,
}

impl<S, B> StockEngine<S, B> {
    pub fn new(store: S, bus: B, alerts: AlertDeriver, settings: EngineSettings) -> Self {
        Self {
            store,
            bus,
            locks: ProductLocks::new(),
            alerts,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn alerts(&self) -> &AlertDeriver {
        &self.alerts
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    #[cfg(test)]
    pub(crate) fn locks(&self) -> &ProductLocks {
        &self.locks
    }
}

impl<S, B> StockEngine<S, B>
where
    S: LedgerStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Apply an ADD, REMOVE or ADJUST movement.
    #[instrument(
        skip(self, ctx, request),
        fields(
            tenant_id = %ctx.tenant_id(),
            product_id = %request.product_id,
            kind = %request.kind,
            amount = request.amount
        ),
        err
    )]
    pub async fn apply(&self, ctx: &TenantContext, request: MovementRequest) -> LedgerResult<MovementResult> {
        let request = &request;
        self.serialized(ctx.tenant_id(), &[request.product_id], || {
            self.try_apply(ctx, request)
        })
        .await
    }

    /// Move `amount` units from source to destination as one atomic unit.
    #[instrument(
        skip(self, ctx, request),
        fields(
            tenant_id = %ctx.tenant_id(),
            source_id = %request.source_id,
            destination_id = %request.destination_id,
            amount = request.amount
        ),
        err
    )]
    pub async fn transfer(&self, ctx: &TenantContext, request: TransferRequest) -> LedgerResult<TransferResult> {
        if request.source_id == request.destination_id {
            return Err(LedgerError::Validation(
                "source and destination must be different products".to_string(),
            ));
        }
        let reference_id = ReferenceId::new();
        let request = &request;
        self.serialized(
            ctx.tenant_id(),
            &[request.source_id, request.destination_id],
            || self.try_transfer(ctx, request, reference_id),
        )
        .await
    }

    /// Set a product's quantity to `new_quantity` with an ADJUST movement.
    #[instrument(
        skip(self, ctx, note),
        fields(tenant_id = %ctx.tenant_id(), product_id = %product_id),
        err
    )]
    pub async fn adjust(
        &self,
        ctx: &TenantContext,
        product_id: ProductId,
        new_quantity: i64,
        note: Option<String>,
    ) -> LedgerResult<MovementResult> {
        let note = &note;
        self.serialized(ctx.tenant_id(), &[product_id], || {
            self.try_adjust(ctx, product_id, new_quantity, note.clone())
        })
        .await
    }

    /// Register a product with zero stock.
    #[instrument(skip(self, ctx, new), fields(tenant_id = %ctx.tenant_id(), sku = %new.sku), err)]
    pub async fn register(&self, ctx: &TenantContext, new: NewProduct) -> LedgerResult<Product> {
        let product = new.into_product(ctx.tenant_id(), ledger_now())?;
        let product_id = product.id;
        let product = &product;
        self.serialized(ctx.tenant_id(), &[product_id], || async move {
            let stored = self.store.insert_product(product.clone()).await?;
            let transition = self.alerts.record(None, &stored);
            info!(product_id = %stored.id, "product registered");
            self.publish_committed(&stored, &[], &transition);
            Ok(stored)
        })
        .await
    }

    /// Edit catalog metadata (threshold, archive flag) and re-derive alerts.
    /// Quantity is never touched.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id(), product_id = %product_id), err)]
    pub async fn update_catalog(
        &self,
        ctx: &TenantContext,
        product_id: ProductId,
        patch: CatalogPatch,
    ) -> LedgerResult<Product> {
        self.serialized(ctx.tenant_id(), &[product_id], || async move {
            let before = self.load_scoped(ctx.tenant_id(), product_id).await?;
            let after = self
                .store
                .update_catalog(ctx.tenant_id(), product_id, patch)
                .await?;
            let transition = self.alerts.record(Some(&before), &after);
            log_transition(&transition);
            self.publish_committed(&after, &[], &transition);
            Ok(after)
        })
        .await
    }

    async fn try_apply(&self, ctx: &TenantContext, request: &MovementRequest) -> LedgerResult<MovementResult> {
        let tenant_id = ctx.tenant_id();
        let before = self.load_scoped(tenant_id, request.product_id).await?;
        let change = plan_movement(
            &before,
            tenant_id,
            request.kind,
            request.amount,
            self.settings.zero_adjust,
        )
        .map_err(|e| LedgerError::from(e).for_product(before.id))?;
        self.commit_single(ctx, before, change, request.note.clone())
            .await
    }

    async fn try_adjust(
        &self,
        ctx: &TenantContext,
        product_id: ProductId,
        new_quantity: i64,
        note: Option<String>,
    ) -> LedgerResult<MovementResult> {
        let tenant_id = ctx.tenant_id();
        let before = self.load_scoped(tenant_id, product_id).await?;
        let change = plan_adjust(&before, tenant_id, new_quantity, self.settings.zero_adjust)
            .map_err(|e| LedgerError::from(e).for_product(before.id))?;
        self.commit_single(ctx, before, change, note).await
    }

    async fn commit_single(
        &self,
        ctx: &TenantContext,
        before: Product,
        change: Option<StockChange>,
        note: Option<String>,
    ) -> LedgerResult<MovementResult> {
        let Some(change) = change else {
            debug!(product_id = %before.id, "zero adjustment skipped");
            let alert = active_alert(&before);
            return Ok(MovementResult {
                product: before,
                movement: None,
                alert,
            });
        };

        let commit = ledger::append(LedgerCommit::new(ctx.tenant_id()), ctx, &change, None, note)?;
        let committed = self.store.commit(commit).await?;
        let (product, movement) = outcome(&committed, change.product_id)?;

        info!(
            movement_id = %movement.id,
            kind = %movement.kind,
            delta = movement.quantity_delta,
            quantity_after = movement.quantity_after,
            "movement committed"
        );

        let transition = self.alerts.record(Some(&before), &product);
        log_transition(&transition);
        self.publish_committed(&product, std::slice::from_ref(&movement), &transition);

        Ok(MovementResult {
            alert: transition.current().cloned(),
            product,
            movement: Some(movement),
        })
    }

    async fn try_transfer(
        &self,
        ctx: &TenantContext,
        request: &TransferRequest,
        reference_id: ReferenceId,
    ) -> LedgerResult<TransferResult> {
        let tenant_id = ctx.tenant_id();
        let source = self.load_scoped(tenant_id, request.source_id).await?;
        let destination = self.load_scoped(tenant_id, request.destination_id).await?;

        let (out, inbound) = plan_transfer(&source, &destination, tenant_id, request.amount)
            .map_err(|e| LedgerError::from(e).for_product(source.id))?;

        let commit = LedgerCommit::new(tenant_id);
        let commit = ledger::append(commit, ctx, &out, Some(reference_id), request.note.clone())?;
        let commit = ledger::append(commit, ctx, &inbound, Some(reference_id), request.note.clone())?;
        let committed = self.store.commit(commit).await?;

        let (source_after, source_movement) = outcome(&committed, source.id)?;
        let (destination_after, destination_movement) = outcome(&committed, destination.id)?;

        info!(
            reference_id = %reference_id,
            amount = request.amount,
            source_quantity = source_after.quantity,
            destination_quantity = destination_after.quantity,
            "transfer committed"
        );

        let source_transition = self.alerts.record(Some(&source), &source_after);
        let destination_transition = self.alerts.record(Some(&destination), &destination_after);
        log_transition(&source_transition);
        log_transition(&destination_transition);
        self.publish_committed(
            &source_after,
            std::slice::from_ref(&source_movement),
            &source_transition,
        );
        self.publish_committed(
            &destination_after,
            std::slice::from_ref(&destination_movement),
            &destination_transition,
        );

        Ok(TransferResult {
            reference_id,
            source: source_after,
            destination: destination_after,
            source_movement,
            destination_movement,
        })
    }

    async fn load_scoped(&self, tenant_id: TenantId, product_id: ProductId) -> LedgerResult<Product> {
        let product = self
            .store
            .load_product(tenant_id, product_id)
            .await?
            .ok_or(LedgerError::NotFound)?;
        product.ensure_tenant(tenant_id)?;
        Ok(product)
    }

    /// Run `attempt` while holding the locks of `product_ids`, retrying
    /// conflicts with backoff.
    async fn serialized<T, F, Fut>(
        &self,
        tenant_id: TenantId,
        product_ids: &[ProductId],
        mut attempt: F,
    ) -> LedgerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LedgerResult<T>>,
    {
        let policy = self.settings.retry;
        let mut retries = 0u32;
        loop {
            let result = match self
                .locks
                .acquire(tenant_id, product_ids, self.settings.lock_wait)
                .await
            {
                Ok(guard) => {
                    let result = attempt().await;
                    drop(guard);
                    result
                }
                Err(err) => Err(LedgerError::from(err)),
            };

            match result {
                Err(err) if err.is_retryable() && policy.should_retry(retries) => {
                    retries += 1;
                    let delay = policy.delay_for_retry(retries);
                    debug!(retry = retries, delay_ms = delay.as_millis() as u64, error = %err, "conflict, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if err.is_retryable() {
                        warn!(retries, error = %err, "conflict retry budget exhausted");
                    }
                    return Err(err);
                }
                Ok(value) => return Ok(value),
            }
        }
    }

    /// Publish movement notifications plus any alert transition. Failures are
    /// logged; the commit already happened.
    fn publish_committed(&self, product: &Product, movements: &[Movement], transition: &AlertTransition) {
        let mut events: Vec<StockEvent> = movements
            .iter()
            .cloned()
            .map(StockEvent::MovementRecorded)
            .collect();
        events.extend(self.alerts.notifications(transition, product));

        for event in events {
            let event_type = event.event_type();
            let envelope = EventEnvelope::new(
                Uuid::now_v7(),
                event.tenant_id(),
                event.product_id().0,
                PRODUCT_AGGREGATE_TYPE,
                product.version,
                event,
            );
            let envelope = match envelope.to_json() {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(event_type, error = %err, "failed to serialize stock event");
                    continue;
                }
            };
            if let Err(err) = self.bus.publish(envelope) {
                warn!(event_type, error = ?err, "failed to publish committed stock event");
            }
        }
    }
}

fn outcome(committed: &CommittedChanges, product_id: ProductId) -> LedgerResult<(Product, Movement)> {
    let product = committed.product(product_id).cloned();
    let movement = committed.movement_for(product_id).cloned();
    match (product, movement) {
        (Some(product), Some(movement)) => Ok((product, movement)),
        _ => Err(LedgerError::Persistence(format!(
            "commit reported no state for product {product_id}"
        ))),
    }
}

fn log_transition(transition: &AlertTransition) {
    match transition {
        AlertTransition::Raised(alert) => {
            warn!(
                product_id = %alert.product_id,
                alert_kind = alert.kind.as_str(),
                quantity = alert.current_quantity,
                threshold = alert.reorder_threshold,
                "stock alert raised"
            );
        }
        AlertTransition::Changed { previous, current } if previous.kind != current.kind => {
            warn!(
                product_id = %current.product_id,
                alert_kind = current.kind.as_str(),
                previous_kind = previous.kind.as_str(),
                quantity = current.current_quantity,
                "stock alert escalated"
            );
        }
        AlertTransition::Changed { current, .. } => {
            debug!(
                product_id = %current.product_id,
                quantity = current.current_quantity,
                threshold = current.reorder_threshold,
                "stock alert updated"
            );
        }
        AlertTransition::Cleared(alert) => {
            info!(product_id = %alert.product_id, "stock alert cleared");
        }
        AlertTransition::Unchanged(_) => {}
    }
}
