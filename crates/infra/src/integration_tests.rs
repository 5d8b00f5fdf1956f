//! Integration tests for the full ledger pipeline.
//!
//! Tests: LedgerService → StockEngine → LedgerStore → EventBus → AlertFeed
//!
//! Verifies:
//! - Quantity always equals the ledger sum, and never goes negative
//! - Transfers are atomic and linked
//! - Tenant isolation is preserved
//! - Concurrent movements on one product serialize without lost updates
//! - Conflicts are retried, then surfaced
//! - Timed-out or cancelled operations leave no trace

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use proptest::prelude::*;

    use stockledger_core::{Role, TenantContext, TenantId, UserId};
    use stockledger_events::{EventBus, InMemoryEventBus};
    use stockledger_inventory::{
        AlertKind, MovementKind, NewProduct, Product, ProductId, ZeroAdjustPolicy,
    };

    use crate::config::LedgerConfig;
    use crate::engine::MovementRequest;
    use crate::error::LedgerError;
    use crate::ledger_store::{
        CatalogPatch, CommittedChanges, InMemoryLedgerStore, LedgerCommit, LedgerStore,
        MovementCursor, MovementFilter, MovementPage, PageRequest, PostgresLedgerStore, StoreError,
        schema,
    };
    use crate::projections::{AlertDelivery, AlertFeed, AlertMode};
    use crate::read_model::InMemoryTenantStore;
    use crate::service::{JsonEventBus, LedgerService};

    type Service<S = InMemoryLedgerStore> = LedgerService<S, JsonEventBus>;

    fn ctx(tenant_id: TenantId) -> TenantContext {
        TenantContext::new(tenant_id, UserId::new(), Role::Operator)
    }

    fn test_config() -> LedgerConfig {
        let mut config = LedgerConfig::default();
        config.engine.lock_wait_ms = 2_000;
        config.engine.base_backoff_ms = 1;
        config.engine.max_backoff_ms = 5;
        config
    }

    fn setup_with(config: LedgerConfig) -> Service {
        LedgerService::new(
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(InMemoryEventBus::new()),
            &config,
        )
    }

    fn setup() -> Service {
        setup_with(test_config())
    }

    async fn stocked<S: LedgerStore + ?Sized>(
        service: &Service<S>,
        ctx: &TenantContext,
        sku: &str,
        quantity: i64,
        threshold: i64,
    ) -> Product {
        let product = service
            .register_product(ctx, NewProduct::new(sku, format!("Product {sku}"), threshold))
            .await
            .unwrap();
        if quantity == 0 {
            return product;
        }
        service
            .apply_movement(ctx, product.id, MovementKind::Add, quantity)
            .await
            .unwrap()
            .product
    }

    async fn all_movements(service: &Service, ctx: &TenantContext, filter: &MovementFilter) -> MovementPage {
        service
            .list_movements(ctx, filter, PageRequest::first(500))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn remove_then_add_scenario() {
        let service = setup();
        let ctx = ctx(TenantId::new());
        let p = stocked(&service, &ctx, "P", 20, 5).await;
        let filter = MovementFilter::for_product(p.id);
        let seed = all_movements(&service, &ctx, &filter).await.movements[0].clone();

        let removed = service
            .apply_movement(&ctx, p.id, MovementKind::Remove, 18)
            .await
            .unwrap();
        assert_eq!(removed.product.quantity, 2);
        assert_eq!(removed.alert.as_ref().map(|a| a.kind), Some(AlertKind::LowStock));

        let added = service
            .apply_movement(&ctx, p.id, MovementKind::Add, 10)
            .await
            .unwrap();
        assert_eq!(added.product.quantity, 12);
        assert!(added.alert.is_none());

        let page = service
            .list_movements(&ctx, &filter, PageRequest::after(10, MovementCursor::of(&seed)))
            .await
            .unwrap();
        let deltas: Vec<i64> = page.movements.iter().map(|m| m.quantity_delta).collect();
        assert_eq!(deltas, vec![-18, 10]);
        assert_eq!(page.movements[0].id, removed.movement.unwrap().id);
        assert_eq!(page.movements[1].quantity_after, 12);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn remove_beyond_stock_is_rejected_without_trace() {
        let service = setup();
        let ctx = ctx(TenantId::new());
        let p = stocked(&service, &ctx, "P", 3, 0).await;

        let err = service
            .apply_movement(&ctx, p.id, MovementKind::Remove, 5)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientStock {
                product_id: Some(p.id),
                requested: 5,
                available: 3
            }
        );

        assert_eq!(service.get_product(&ctx, p.id).await.unwrap().quantity, 3);
        let page = all_movements(&service, &ctx, &MovementFilter::for_product(p.id)).await;
        assert_eq!(page.movements.len(), 1);
    }

    #[tokio::test]
    async fn invalid_amounts_are_validation_errors() {
        let service = setup();
        let ctx = ctx(TenantId::new());
        let p = stocked(&service, &ctx, "P", 3, 0).await;

        for (kind, amount) in [(MovementKind::Add, 0), (MovementKind::Remove, -2)] {
            let err = service.apply_movement(&ctx, p.id, kind, amount).await.unwrap_err();
            assert!(matches!(err, LedgerError::Validation(_)), "{kind}: {err:?}");
        }
        let err = service
            .apply_movement(&ctx, p.id, MovementKind::TransferOut, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn insufficient_transfer_changes_nothing() {
        let service = setup();
        let ctx = ctx(TenantId::new());
        let source = stocked(&service, &ctx, "SRC", 3, 0).await;
        let destination = stocked(&service, &ctx, "DST", 0, 0).await;

        let err = service
            .transfer_stock(&ctx, source.id, destination.id, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientStock { requested: 5, available: 3, .. }));

        assert_eq!(service.get_product(&ctx, source.id).await.unwrap().quantity, 3);
        assert_eq!(service.get_product(&ctx, destination.id).await.unwrap().quantity, 0);
        let transfers = all_movements(
            &service,
            &ctx,
            &MovementFilter::default().with_kind(MovementKind::TransferIn),
        )
        .await;
        assert!(transfers.movements.is_empty());
    }

    #[tokio::test]
    async fn transfer_round_trip_restores_quantities() {
        let service = setup();
        let ctx = ctx(TenantId::new());
        let a = stocked(&service, &ctx, "A", 10, 0).await;
        let b = stocked(&service, &ctx, "B", 4, 0).await;

        let there = service.transfer_stock(&ctx, a.id, b.id, 6).await.unwrap();
        assert_eq!(there.source.quantity, 4);
        assert_eq!(there.destination.quantity, 10);
        assert_eq!(there.source_movement.kind, MovementKind::TransferOut);
        assert_eq!(there.destination_movement.kind, MovementKind::TransferIn);
        assert_eq!(there.source_movement.reference_id, Some(there.reference_id));
        assert_eq!(there.destination_movement.reference_id, Some(there.reference_id));

        let back = service.transfer_stock(&ctx, b.id, a.id, 6).await.unwrap();
        assert_ne!(back.reference_id, there.reference_id);
        assert_eq!(service.get_product(&ctx, a.id).await.unwrap().quantity, 10);
        assert_eq!(service.get_product(&ctx, b.id).await.unwrap().quantity, 4);
        assert!(service.verify_product(&ctx, a.id).await.unwrap().consistent);
        assert!(service.verify_product(&ctx, b.id).await.unwrap().consistent);
    }

    #[tokio::test]
    async fn transfer_to_self_is_rejected() {
        let service = setup();
        let ctx = ctx(TenantId::new());
        let a = stocked(&service, &ctx, "A", 10, 0).await;

        let err = service.transfer_stock(&ctx, a.id, a.id, 1).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn transfer_to_unknown_product_is_not_found() {
        let service = setup();
        let ctx = ctx(TenantId::new());
        let a = stocked(&service, &ctx, "A", 10, 0).await;

        let err = service
            .transfer_stock(&ctx, a.id, ProductId::generate(), 1)
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::NotFound);
        assert_eq!(service.get_product(&ctx, a.id).await.unwrap().quantity, 10);
    }

    #[tokio::test]
    async fn tenants_cannot_see_or_touch_each_other() {
        let service = setup();
        let owner = ctx(TenantId::new());
        let intruder = ctx(TenantId::new());
        let p = stocked(&service, &owner, "P", 5, 10).await;
        let theirs = stocked(&service, &intruder, "P", 5, 0).await;

        assert_eq!(
            service
                .apply_movement(&intruder, p.id, MovementKind::Remove, 1)
                .await
                .unwrap_err(),
            LedgerError::NotFound
        );
        assert_eq!(service.get_product(&intruder, p.id).await.unwrap_err(), LedgerError::NotFound);
        assert_eq!(
            service.transfer_stock(&intruder, p.id, theirs.id, 1).await.unwrap_err(),
            LedgerError::NotFound
        );
        assert!(
            all_movements(&service, &intruder, &MovementFilter::for_product(p.id))
                .await
                .movements
                .is_empty()
        );
        assert!(
            service
                .list_alerts(&intruder)
                .await
                .unwrap()
                .iter()
                .all(|a| a.tenant_id == intruder.tenant_id())
        );
        assert_eq!(service.get_product(&owner, p.id).await.unwrap().quantity, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_movements_do_not_lose_updates() {
        let service = Arc::new(setup());
        let ctx = ctx(TenantId::new());
        let p = stocked(&service, &ctx, "HOT", 100, 0).await;

        let mut handles = Vec::new();
        for i in 0..60 {
            let service = Arc::clone(&service);
            let kind = if i % 3 == 0 { MovementKind::Remove } else { MovementKind::Add };
            handles.push(tokio::spawn(async move {
                service.apply_movement(&ctx, p.id, kind, 2).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // 40 adds of 2, 20 removes of 2.
        let product = service.get_product(&ctx, p.id).await.unwrap();
        assert_eq!(product.quantity, 100 + 80 - 40);
        assert_eq!(product.version, 1 + 60);

        let audit = service.verify_product(&ctx, p.id).await.unwrap();
        assert!(audit.consistent);

        let page = all_movements(&service, &ctx, &MovementFilter::for_product(p.id)).await;
        assert_eq!(page.movements.len(), 61);
        // Each movement's balance continues from the previous one.
        for pair in page.movements.windows(2) {
            assert_eq!(pair[1].quantity_before(), pair[0].quantity_after);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn competing_removes_linearize() {
        let service = Arc::new(setup());
        let ctx = ctx(TenantId::new());
        let p = stocked(&service, &ctx, "LAST", 10, 0).await;

        let a = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.apply_movement(&ctx, p.id, MovementKind::Remove, 7).await })
        };
        let b = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.apply_movement(&ctx, p.id, MovementKind::Remove, 7).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(LedgerError::InsufficientStock { available: 3, .. })))
        );
        assert_eq!(service.get_product(&ctx, p.id).await.unwrap().quantity, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn opposite_transfers_do_not_deadlock() {
        let service = Arc::new(setup());
        let ctx = ctx(TenantId::new());
        let a = stocked(&service, &ctx, "A", 50, 0).await;
        let b = stocked(&service, &ctx, "B", 50, 0).await;

        let mut handles = Vec::new();
        for i in 0..40 {
            let service = Arc::clone(&service);
            let (from, to) = if i % 2 == 0 { (a.id, b.id) } else { (b.id, a.id) };
            handles.push(tokio::spawn(async move {
                service.transfer_stock(&ctx, from, to, 1).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let qa = service.get_product(&ctx, a.id).await.unwrap().quantity;
        let qb = service.get_product(&ctx, b.id).await.unwrap().quantity;
        assert_eq!((qa, qb), (50, 50));
    }

    /// Store that reports a version conflict on the first `failures` commits.
    struct FlakyStore {
        inner: InMemoryLedgerStore,
        failures: AtomicU32,
        commits: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self {
                inner: InMemoryLedgerStore::new(),
                failures: AtomicU32::new(failures),
                commits: AtomicU32::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl LedgerStore for FlakyStore {
        async fn insert_product(&self, product: Product) -> Result<Product, StoreError> {
            self.inner.insert_product(product).await
        }

        async fn update_catalog(
            &self,
            tenant_id: TenantId,
            product_id: ProductId,
            patch: CatalogPatch,
        ) -> Result<Product, StoreError> {
            self.inner.update_catalog(tenant_id, product_id, patch).await
        }

        async fn load_product(
            &self,
            tenant_id: TenantId,
            product_id: ProductId,
        ) -> Result<Option<Product>, StoreError> {
            self.inner.load_product(tenant_id, product_id).await
        }

        async fn list_products(&self, tenant_id: TenantId) -> Result<Vec<Product>, StoreError> {
            self.inner.list_products(tenant_id).await
        }

        async fn commit(&self, commit: LedgerCommit) -> Result<CommittedChanges, StoreError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(StoreError::Concurrency("simulated stale version".to_string()));
            }
            self.inner.commit(commit).await
        }

        async fn list_movements(
            &self,
            tenant_id: TenantId,
            filter: &MovementFilter,
            after: Option<MovementCursor>,
            limit: usize,
        ) -> Result<MovementPage, StoreError> {
            self.inner.list_movements(tenant_id, filter, after, limit).await
        }

        async fn ledger_sum(&self, tenant_id: TenantId, product_id: ProductId) -> Result<i64, StoreError> {
            self.inner.ledger_sum(tenant_id, product_id).await
        }
    }

    fn flaky_service(failures: u32) -> (Arc<FlakyStore>, Service<FlakyStore>) {
        let store = Arc::new(FlakyStore::new(failures));
        let service = LedgerService::new(
            Arc::clone(&store),
            Arc::new(InMemoryEventBus::new()),
            &test_config(),
        );
        (store, service)
    }

    #[tokio::test]
    async fn transient_conflicts_are_retried() {
        let (store, service) = flaky_service(2);
        let ctx = ctx(TenantId::new());
        let p = stocked(&service, &ctx, "P", 5, 0).await;

        assert_eq!(p.quantity, 5);
        assert_eq!(store.commits.load(Ordering::SeqCst), 3);
        let page = store
            .list_movements(ctx.tenant_id(), &MovementFilter::for_product(p.id), None, 10)
            .await
            .unwrap();
        assert_eq!(page.movements.len(), 1);
    }

    #[tokio::test]
    async fn persistent_conflict_surfaces_after_retry_budget() {
        let (store, service) = flaky_service(u32::MAX);
        let ctx = ctx(TenantId::new());
        let p = stocked(&service, &ctx, "P", 0, 0).await;

        let err = service
            .apply_movement(&ctx, p.id, MovementKind::Add, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::ConcurrencyConflict(_)));
        // First attempt plus three retries.
        assert_eq!(store.commits.load(Ordering::SeqCst), 4);
        assert_eq!(service.get_product(&ctx, p.id).await.unwrap().quantity, 0);
    }

    #[tokio::test]
    async fn lock_wait_timeout_is_retried_then_surfaced() {
        let mut config = test_config();
        config.engine.lock_wait_ms = 30;
        config.engine.max_retries = 1;
        let service = setup_with(config);
        let ctx = ctx(TenantId::new());
        let p = stocked(&service, &ctx, "BUSY", 5, 0).await;

        let held = service
            .engine()
            .locks()
            .acquire(ctx.tenant_id(), &[p.id], Duration::from_millis(100))
            .await
            .unwrap();
        let started = tokio::time::Instant::now();
        let err = service
            .apply_movement(&ctx, p.id, MovementKind::Remove, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::ConcurrencyConflict(_)), "{err:?}");
        // First attempt plus one retry, each waiting out the lock.
        assert!(started.elapsed() >= Duration::from_millis(60));
        drop(held);

        let after = service.get_product(&ctx, p.id).await.unwrap();
        assert_eq!((after.quantity, after.version), (5, p.version));
        let page = all_movements(&service, &ctx, &MovementFilter::for_product(p.id)).await;
        assert_eq!(page.movements.len(), 1);

        let removed = service
            .apply_movement(&ctx, p.id, MovementKind::Remove, 1)
            .await
            .unwrap();
        assert_eq!(removed.product.quantity, 4);
    }

    #[tokio::test]
    async fn cancelled_transfer_leaves_no_trace() {
        let service = setup();
        let ctx = ctx(TenantId::new());
        let a = stocked(&service, &ctx, "A", 10, 0).await;
        let b = stocked(&service, &ctx, "B", 4, 0).await;

        let held = service
            .engine()
            .locks()
            .acquire(ctx.tenant_id(), &[b.id], Duration::from_millis(100))
            .await
            .unwrap();
        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            service.transfer_stock(&ctx, a.id, b.id, 6),
        )
        .await;
        assert!(abandoned.is_err(), "transfer should still be waiting for the lock");
        drop(held);

        assert_eq!(service.get_product(&ctx, a.id).await.unwrap().quantity, 10);
        assert_eq!(service.get_product(&ctx, b.id).await.unwrap().quantity, 4);
        let transfers = all_movements(
            &service,
            &ctx,
            &MovementFilter::default().with_kind(MovementKind::TransferOut),
        )
        .await;
        assert!(transfers.movements.is_empty());
        assert!(service.verify_product(&ctx, a.id).await.unwrap().consistent);

        // The dropped attempt released whatever it had locked.
        let done = tokio::time::timeout(
            Duration::from_millis(500),
            service.transfer_stock(&ctx, a.id, b.id, 6),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!((done.source.quantity, done.destination.quantity), (4, 10));
    }

    #[tokio::test]
    async fn zero_adjust_follows_policy() {
        let ctx = ctx(TenantId::new());

        let recording = setup();
        let p = stocked(&recording, &ctx, "P", 7, 0).await;
        let result = recording.adjust_stock(&ctx, p.id, 7, Some("count".into())).await.unwrap();
        let movement = result.movement.unwrap();
        assert_eq!(movement.kind, MovementKind::Adjust);
        assert_eq!(movement.quantity_delta, 0);
        assert_eq!(movement.note.as_deref(), Some("count"));

        let mut config = test_config();
        config.engine.zero_adjust = ZeroAdjustPolicy::Skip;
        let skipping = setup_with(config);
        let p = stocked(&skipping, &ctx, "P", 7, 0).await;
        let result = skipping.adjust_stock(&ctx, p.id, 7, None).await.unwrap();
        assert!(result.movement.is_none());
        assert_eq!(result.product.version, p.version);
        let page = all_movements(&skipping, &ctx, &MovementFilter::for_product(p.id)).await;
        assert_eq!(page.movements.len(), 1);
    }

    #[tokio::test]
    async fn adjust_sets_quantity_in_either_direction() {
        let service = setup();
        let ctx = ctx(TenantId::new());
        let p = stocked(&service, &ctx, "P", 7, 0).await;

        let down = service.adjust_stock(&ctx, p.id, 2, None).await.unwrap();
        assert_eq!(down.movement.unwrap().quantity_delta, -5);
        let up = service.adjust_stock(&ctx, p.id, 30, None).await.unwrap();
        assert_eq!(up.product.quantity, 30);
        assert!(matches!(
            service.adjust_stock(&ctx, p.id, -1, None).await.unwrap_err(),
            LedgerError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn archived_products_keep_history_but_reject_movements() {
        let service = setup();
        let ctx = ctx(TenantId::new());
        let p = stocked(&service, &ctx, "OLD", 1, 5).await;
        assert_eq!(service.list_alerts(&ctx).await.unwrap().len(), 1);

        let archived = service.archive_product(&ctx, p.id).await.unwrap();
        assert!(archived.archived);
        assert_eq!(archived.quantity, 1);
        assert!(service.list_alerts(&ctx).await.unwrap().is_empty());

        let err = service
            .apply_movement(&ctx, p.id, MovementKind::Add, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        let page = all_movements(&service, &ctx, &MovementFilter::for_product(p.id)).await;
        assert_eq!(page.movements.len(), 1);
    }

    #[tokio::test]
    async fn threshold_change_rederives_alerts_without_movement() {
        let service = setup();
        let ctx = ctx(TenantId::new());
        let p = stocked(&service, &ctx, "P", 8, 5).await;
        assert!(service.list_alerts(&ctx).await.unwrap().is_empty());

        let updated = service.update_reorder_threshold(&ctx, p.id, 8).await.unwrap();
        assert_eq!(updated.quantity, 8);
        let alerts = service.list_alerts(&ctx).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].reorder_threshold, 8);

        assert!(matches!(
            service.update_reorder_threshold(&ctx, p.id, -1).await.unwrap_err(),
            LedgerError::Validation(_)
        ));
        let page = all_movements(&service, &ctx, &MovementFilter::for_product(p.id)).await;
        assert_eq!(page.movements.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_sku_is_a_validation_error() {
        let service = setup();
        let ctx = ctx(TenantId::new());
        stocked(&service, &ctx, "SKU-1", 0, 0).await;

        let err = service
            .register_product(&ctx, NewProduct::new("SKU-1", "Again", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn eager_and_lazy_alerts_agree() {
        let mut eager_config = test_config();
        eager_config.alerts.mode = AlertMode::Eager;
        let eager = setup_with(eager_config);
        let lazy = setup();
        let ctx = ctx(TenantId::new());

        for service in [&eager, &lazy] {
            let a = stocked(service, &ctx, "A", 20, 5).await;
            let b = stocked(service, &ctx, "B", 3, 5).await;
            stocked(service, &ctx, "C", 0, 0).await;
            service.apply_movement(&ctx, a.id, MovementKind::Remove, 16).await.unwrap();
            service.apply_movement(&ctx, b.id, MovementKind::Add, 10).await.unwrap();
        }

        let summarize = |alerts: Vec<stockledger_inventory::Alert>| {
            alerts
                .into_iter()
                .map(|a| (a.kind, a.current_quantity, a.reorder_threshold))
                .collect::<Vec<_>>()
        };
        let mut from_eager = summarize(eager.list_alerts(&ctx).await.unwrap());
        let mut from_lazy = summarize(lazy.list_alerts(&ctx).await.unwrap());
        from_eager.sort_by_key(|(_, q, t)| (*q, *t));
        from_lazy.sort_by_key(|(_, q, t)| (*q, *t));
        assert_eq!(from_eager, from_lazy);
        assert_eq!(
            from_eager,
            vec![(AlertKind::OutOfStock, 0, 0), (AlertKind::LowStock, 4, 5)]
        );

        assert_eq!(eager.rebuild_alert_cache(&ctx).await.unwrap(), 2);
        assert_eq!(eager.list_alerts(&ctx).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn push_delivery_feeds_subscribers() {
        let mut config = test_config();
        config.alerts.delivery = AlertDelivery::Push;
        let service = setup_with(config);
        let subscription = service.bus().subscribe();
        let feed = AlertFeed::new(InMemoryTenantStore::new());
        let ctx = ctx(TenantId::new());

        let p = stocked(&service, &ctx, "P", 20, 5).await;
        service.apply_movement(&ctx, p.id, MovementKind::Remove, 18).await.unwrap();

        let envelopes = subscription.drain();
        let types: Vec<&str> = envelopes.iter().map(|e| e.event_type()).collect();
        assert_eq!(
            types,
            vec![
                "inventory.alert.raised",      // registered with zero stock
                "inventory.movement.recorded", // ADD 20
                "inventory.alert.cleared",
                "inventory.movement.recorded", // REMOVE 18
                "inventory.alert.raised",
            ]
        );
        for envelope in &envelopes {
            assert_eq!(envelope.tenant_id(), ctx.tenant_id());
            feed.apply_envelope(envelope).unwrap();
        }
        let active = feed.list(ctx.tenant_id());
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].current_quantity, 2);

        // Redelivery is harmless.
        for envelope in &envelopes {
            feed.apply_envelope(envelope).unwrap();
        }
        assert_eq!(feed.list(ctx.tenant_id()).len(), 1);
    }

    #[tokio::test]
    async fn threshold_change_updates_pushed_alerts() {
        let mut config = test_config();
        config.alerts.delivery = AlertDelivery::Push;
        let service = setup_with(config);
        let subscription = service.bus().subscribe();
        let feed = AlertFeed::new(InMemoryTenantStore::new());
        let ctx = ctx(TenantId::new());
        let feed_state = || {
            for envelope in subscription.drain() {
                feed.apply_envelope(&envelope).unwrap();
            }
            feed.list(ctx.tenant_id())
                .into_iter()
                .map(|a| (a.kind, a.current_quantity, a.reorder_threshold))
                .collect::<Vec<_>>()
        };

        let p = stocked(&service, &ctx, "P", 3, 5).await;
        assert_eq!(feed_state(), vec![(AlertKind::LowStock, 3, 5)]);

        service.update_reorder_threshold(&ctx, p.id, 8).await.unwrap();
        assert_eq!(feed_state(), vec![(AlertKind::LowStock, 3, 8)]);

        service.apply_movement(&ctx, p.id, MovementKind::Remove, 1).await.unwrap();
        assert_eq!(feed_state(), vec![(AlertKind::LowStock, 2, 8)]);

        service.update_reorder_threshold(&ctx, p.id, 1).await.unwrap();
        assert!(feed_state().is_empty());
    }

    #[tokio::test]
    async fn poll_delivery_publishes_movements_only() {
        let service = setup();
        let subscription = service.bus().subscribe();
        let ctx = ctx(TenantId::new());

        let p = stocked(&service, &ctx, "P", 20, 5).await;
        service.apply_movement(&ctx, p.id, MovementKind::Remove, 18).await.unwrap();

        let envelopes = subscription.drain();
        assert_eq!(envelopes.len(), 2);
        assert!(
            envelopes
                .iter()
                .all(|e| e.event_type() == "inventory.movement.recorded"
                    && e.aggregate_type() == "inventory.product")
        );
        assert!(envelopes[0].sequence_number() < envelopes[1].sequence_number());
    }

    #[tokio::test]
    async fn pagination_walks_every_movement_once() {
        let service = setup();
        let ctx = ctx(TenantId::new());
        let p = stocked(&service, &ctx, "P", 0, 0).await;
        for _ in 0..25 {
            service.apply_movement(&ctx, p.id, MovementKind::Add, 1).await.unwrap();
        }

        let filter = MovementFilter::for_product(p.id);
        let mut seen = Vec::new();
        let mut page = PageRequest::first(10);
        let mut pages = 0;
        loop {
            let result = service.list_movements(&ctx, &filter, page).await.unwrap();
            pages += 1;
            seen.extend(result.movements.iter().map(|m| (m.recorded_at, m.id)));
            match result.next_cursor {
                Some(token) => page = PageRequest::from_token(Some(10), &token).unwrap(),
                None => break,
            }
        }

        assert_eq!(pages, 3);
        assert_eq!(seen.len(), 25);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));

        let default_page = service
            .list_movements(&ctx, &filter, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(default_page.movements.len(), 10);
    }

    #[tokio::test]
    async fn movements_filter_by_kind_and_record_the_actor() {
        let service = setup();
        let ctx = ctx(TenantId::new());
        let p = stocked(&service, &ctx, "P", 10, 0).await;
        service
            .record(&ctx, MovementRequest::new(p.id, MovementKind::Remove, 4).with_note("damaged"))
            .await
            .unwrap();

        let removes = all_movements(
            &service,
            &ctx,
            &MovementFilter::for_product(p.id).with_kind(MovementKind::Remove),
        )
        .await;
        assert_eq!(removes.movements.len(), 1);
        let m = &removes.movements[0];
        assert_eq!(m.actor_id, ctx.actor_id());
        assert_eq!(m.tenant_id, ctx.tenant_id());
        assert_eq!(m.note.as_deref(), Some("damaged"));
        assert_eq!((m.quantity_before(), m.quantity_after), (10, 6));
    }

    /// Needs `STOCKLEDGER_TEST_DATABASE_URL` pointing at a scratch database;
    /// passes trivially without it.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn postgres_tenant_cursor_sees_concurrent_commits() {
        let Ok(url) = std::env::var("STOCKLEDGER_TEST_DATABASE_URL") else {
            return;
        };
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(8)
            .connect(&url)
            .await
            .unwrap();
        schema::migrate(&pool).await.unwrap();
        let service = Arc::new(LedgerService::new(
            Arc::new(PostgresLedgerStore::new(pool)),
            Arc::new(InMemoryEventBus::new()),
            &test_config(),
        ));
        let ctx = ctx(TenantId::new());

        let mut products = Vec::new();
        for sku in ["PG-A", "PG-B", "PG-C", "PG-D"] {
            products.push(stocked(&*service, &ctx, sku, 0, 0).await.id);
        }

        // Different products never share a lock, so these commits overlap.
        let writers: Vec<_> = products
            .iter()
            .map(|&product_id| {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    for _ in 0..25 {
                        service
                            .apply_movement(&ctx, product_id, MovementKind::Add, 1)
                            .await
                            .unwrap();
                    }
                })
            })
            .collect();

        let filter = MovementFilter::default();
        let mut seen = Vec::new();
        let mut cursor: Option<MovementCursor> = None;
        let mut writers_done = false;
        loop {
            let page = match cursor {
                Some(c) => PageRequest::after(3, c),
                None => PageRequest::first(3),
            };
            let result = service.list_movements(&ctx, &filter, page).await.unwrap();
            if let Some(last) = result.movements.last() {
                cursor = Some(MovementCursor::of(last));
            }
            seen.extend(result.movements.iter().map(|m| m.id));
            if result.movements.is_empty() {
                if writers_done {
                    break;
                }
                writers_done = writers.iter().all(|w| w.is_finished());
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }
        for writer in writers {
            writer.await.unwrap();
        }

        assert_eq!(seen.len(), 100);
        assert_eq!(seen.iter().collect::<HashSet<_>>().len(), 100);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(i64),
        Remove(i64),
        Adjust(i64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..50).prop_map(Op::Add),
            (1i64..50).prop_map(Op::Remove),
            (0i64..80).prop_map(Op::Adjust),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 32, ..ProptestConfig::default() })]

        #[test]
        fn quantity_tracks_ledger_sum_through_any_sequence(ops in prop::collection::vec(op_strategy(), 1..25)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let service = setup();
                let ctx = ctx(TenantId::new());
                let p = stocked(&service, &ctx, "P", 0, 0).await;
                let mut expected = 0i64;

                for op in ops {
                    let result = match op {
                        Op::Add(n) => service.apply_movement(&ctx, p.id, MovementKind::Add, n).await,
                        Op::Remove(n) => service.apply_movement(&ctx, p.id, MovementKind::Remove, n).await,
                        Op::Adjust(n) => service.adjust_stock(&ctx, p.id, n, None).await,
                    };
                    match (&op, result) {
                        (Op::Add(n), Ok(_)) => expected += n,
                        (Op::Remove(n), Ok(_)) => expected -= n,
                        (Op::Adjust(n), Ok(_)) => expected = *n,
                        (Op::Remove(n), Err(LedgerError::InsufficientStock { .. })) => {
                            assert!(*n > expected);
                        }
                        (op, Err(err)) => panic!("{op:?} failed: {err}"),
                    }

                    let audit = service.verify_product(&ctx, p.id).await.unwrap();
                    assert!(audit.consistent);
                    assert_eq!(audit.cached_quantity, expected);
                    assert!(audit.cached_quantity >= 0);
                }
            });
        }
    }
}
