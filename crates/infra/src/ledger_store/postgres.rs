//! Postgres-backed ledger store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Duplicate` | SKU or id already registered, movement id reused |
//! | Database (check violation) | `23514` | `InvalidRecord` | Negative quantity or threshold |
//! | Database (serialization / deadlock) | `40001`, `40P01` | `Concurrency` | Conflicting concurrent transaction |
//! | Database (other) | Any other | `Backend` | Trigger rejections, permissions, etc. |
//! | PoolClosed / network / other | N/A | `Backend` | Infrastructure failure |
//!
//! ## Concurrency
//!
//! Each commit runs in one transaction. Product rows are updated with
//! `WHERE version = $expected`, in product-id order; if any update affects
//! zero rows the transaction is rolled back and the cause is diagnosed
//! (missing product, archived product, or stale version). This keeps the
//! version check correct across processes sharing one database.
//!
//! Commits of one tenant are serialized by a transaction-scoped advisory lock
//! taken before `recorded_at` is read from the database clock. The stamp is
//! strictly after every movement already in the tenant's ledger, so stamp
//! order matches commit order and a `(recorded_at, movement_id)` cursor never
//! passes a row that becomes visible later.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use stockledger_core::{AggregateId, CategoryId, MovementId, ReferenceId, SupplierId, TenantId, UserId};
use stockledger_inventory::{Movement, MovementKind, Product, ProductId};

use super::query::{MovementCursor, MovementFilter, MovementPage};
use super::r#trait::{
    CatalogPatch, CommittedChanges, LedgerCommit, LedgerStore, ProductUpdate, StoreError,
    check_patch, ledger_now,
};

const PRODUCT_COLUMNS: &str = "tenant_id, product_id, sku, name, category_id, supplier_id, \
    quantity, reorder_threshold, archived, version, created_at, updated_at";

const MOVEMENT_COLUMNS: &str = "movement_id, tenant_id, product_id, kind, quantity_delta, \
    quantity_after, recorded_at, actor_id, reference_id, note";

/// Released at commit or rollback.
const TENANT_COMMIT_LOCK: &str = "SELECT pg_advisory_xact_lock(hashtext($1::text))";

/// `GREATEST` skips the NULL of an empty ledger.
const COMMIT_STAMP: &str = r#"
    SELECT GREATEST(
        clock_timestamp(),
        (SELECT MAX(recorded_at) FROM movements WHERE tenant_id = $1) + INTERVAL '1 microsecond'
    ) AS recorded_at
"#;

/// Postgres-backed product catalog and append-only movement ledger.
///
/// Every query carries `tenant_id` in its WHERE clause or key, so rows of
/// another tenant can never be read or modified.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(
        skip(self, product),
        fields(tenant_id = %product.tenant_id, product_id = %product.id, sku = %product.sku),
        err
    )]
    async fn insert_product(&self, product: Product) -> Result<Product, StoreError> {
        if product.quantity != 0 {
            return Err(StoreError::InvalidRecord(
                "products are registered with zero quantity".to_string(),
            ));
        }

        sqlx::query(
            r#"
            INSERT INTO products (
                tenant_id, product_id, sku, name, category_id, supplier_id,
                quantity, reorder_threshold, archived, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(product.tenant_id.as_uuid())
        .bind(product.id.0.as_uuid())
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.category_id.map(|c| *c.as_uuid()))
        .bind(product.supplier_id.map(|s| *s.as_uuid()))
        .bind(product.quantity)
        .bind(product.reorder_threshold)
        .bind(product.archived)
        .bind(to_db_version(product.version)?)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;

        Ok(product)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, product_id = %product_id), err)]
    async fn update_catalog(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        patch: CatalogPatch,
    ) -> Result<Product, StoreError> {
        check_patch(&patch)?;

        let sql = format!(
            r#"
            UPDATE products
            SET reorder_threshold = COALESCE($3, reorder_threshold),
                archived = COALESCE($4, archived),
                version = version + 1,
                updated_at = $5
            WHERE tenant_id = $1 AND product_id = $2
            RETURNING {PRODUCT_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(product_id.0.as_uuid())
            .bind(patch.reorder_threshold)
            .bind(patch.archived)
            .bind(ledger_now())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_catalog", e))?
            .ok_or_else(|| StoreError::NotFound(format!("product {product_id}")))?;

        product_from_row(&row)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, product_id = %product_id), err)]
    async fn load_product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Option<Product>, StoreError> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE tenant_id = $1 AND product_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(product_id.0.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_product", e))?;

        row.as_ref().map(product_from_row).transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn list_products(&self, tenant_id: TenantId) -> Result<Vec<Product>, StoreError> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE tenant_id = $1 ORDER BY product_id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_products", e))?;

        rows.iter().map(product_from_row).collect()
    }

    #[instrument(
        skip(self, commit),
        fields(
            tenant_id = %commit.tenant_id,
            updates = commit.updates.len(),
            movements = commit.movements.len(),
            committed_movements = tracing::field::Empty
        ),
        err
    )]
    async fn commit(&self, commit: LedgerCommit) -> Result<CommittedChanges, StoreError> {
        commit.validate()?;
        if commit.updates.is_empty() {
            return Ok(CommittedChanges {
                products: Vec::new(),
                movements: Vec::new(),
            });
        }

        let tenant_id = commit.tenant_id;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        let recorded_at = stamp_commit(&mut tx, tenant_id).await?;

        let mut updates = commit.updates.clone();
        updates.sort_by_key(|u| u.product_id);

        let mut products = Vec::with_capacity(updates.len());
        for update in &updates {
            match compare_and_swap(&mut tx, tenant_id, update, recorded_at).await? {
                Some(product) => products.push(product),
                None => {
                    let err = diagnose_rejected_update(&mut tx, tenant_id, update).await?;
                    tx.rollback()
                        .await
                        .map_err(|e| map_sqlx_error("rollback", e))?;
                    return Err(err);
                }
            }
        }

        let mut movements: Vec<Movement> = commit
            .movements
            .into_iter()
            .map(|draft| draft.recorded(recorded_at))
            .collect();
        movements.sort_by_key(|m| m.id);

        for movement in &movements {
            insert_movement(&mut tx, movement).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        // Report products in the caller's order.
        products.sort_by_key(|p| {
            commit
                .updates
                .iter()
                .position(|u| u.product_id == p.id)
                .unwrap_or(usize::MAX)
        });

        Span::current().record("committed_movements", movements.len());
        Ok(CommittedChanges {
            products,
            movements,
        })
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id), err)]
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

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {MOVEMENT_COLUMNS} FROM movements WHERE tenant_id = "
        ));
        qb.push_bind(*tenant_id.as_uuid());

        if let Some(product_id) = filter.product_id {
            qb.push(" AND product_id = ").push_bind(*product_id.0.as_uuid());
        }
        if let Some(kind) = filter.kind {
            qb.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(from) = filter.recorded_after {
            qb.push(" AND recorded_at >= ").push_bind(from);
        }
        if let Some(until) = filter.recorded_before {
            qb.push(" AND recorded_at < ").push_bind(until);
        }
        if let Some(cursor) = after {
            qb.push(" AND (recorded_at, movement_id) > (")
                .push_bind(cursor.recorded_at)
                .push(", ")
                .push_bind(*cursor.movement_id.as_uuid())
                .push(")");
        }

        let fetch = i64::try_from(limit.saturating_add(1))
            .map_err(|_| StoreError::InvalidRecord(format!("page size {limit} too large")))?;
        qb.push(" ORDER BY recorded_at ASC, movement_id ASC LIMIT ")
            .push_bind(fetch);

        let rows = qb
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_movements", e))?;

        let movements = rows
            .iter()
            .map(movement_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(MovementPage::from_overfetch(movements, limit))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, product_id = %product_id), err)]
    async fn ledger_sum(&self, tenant_id: TenantId, product_id: ProductId) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(quantity_delta), 0)::BIGINT AS total
            FROM movements
            WHERE tenant_id = $1 AND product_id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(product_id.0.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ledger_sum", e))?;

        row.try_get("total")
            .map_err(|e| StoreError::Backend(format!("failed to read ledger sum: {e}")))
    }
}

/// Take the tenant's commit lock, then read the commit timestamp under it.
async fn stamp_commit(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
) -> Result<DateTime<Utc>, StoreError> {
    sqlx::query(TENANT_COMMIT_LOCK)
        .bind(tenant_id.as_uuid())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("tenant_commit_lock", e))?;

    let row = sqlx::query(COMMIT_STAMP)
        .bind(tenant_id.as_uuid())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("commit_stamp", e))?;
    row.try_get("recorded_at")
        .map_err(|e| StoreError::Backend(format!("failed to read commit timestamp: {e}")))
}

/// Apply one quantity update if the product is still at the expected version.
/// Returns `None` when no row matched.
async fn compare_and_swap(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    update: &ProductUpdate,
    recorded_at: DateTime<Utc>,
) -> Result<Option<Product>, StoreError> {
    let sql = format!(
        r#"
        UPDATE products
        SET quantity = $4, version = version + 1, updated_at = $5
        WHERE tenant_id = $1
          AND product_id = $2
          AND version = $3
          AND quantity = $6
          AND archived = FALSE
        RETURNING {PRODUCT_COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(tenant_id.as_uuid())
        .bind(update.product_id.0.as_uuid())
        .bind(to_db_version(update.expected_version)?)
        .bind(update.quantity_after)
        .bind(recorded_at)
        .bind(update.quantity_before)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_quantity", e))?;

    row.as_ref().map(product_from_row).transpose()
}

/// Explain why a compare-and-swap matched no row.
async fn diagnose_rejected_update(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    update: &ProductUpdate,
) -> Result<StoreError, StoreError> {
    let row = sqlx::query(
        "SELECT archived, version FROM products WHERE tenant_id = $1 AND product_id = $2",
    )
    .bind(tenant_id.as_uuid())
    .bind(update.product_id.0.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("diagnose_update", e))?;

    let Some(row) = row else {
        return Ok(StoreError::NotFound(format!("product {}", update.product_id)));
    };
    let archived: bool = row
        .try_get("archived")
        .map_err(|e| StoreError::Backend(format!("failed to read archived: {e}")))?;
    let version: i64 = row
        .try_get("version")
        .map_err(|e| StoreError::Backend(format!("failed to read version: {e}")))?;

    if archived {
        Ok(StoreError::InvalidRecord(format!(
            "product {} is archived",
            update.product_id
        )))
    } else {
        Ok(StoreError::Concurrency(format!(
            "product {}: expected version {}, found {version}",
            update.product_id, update.expected_version
        )))
    }
}

async fn insert_movement(
    tx: &mut Transaction<'_, Postgres>,
    movement: &Movement,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO movements (
            movement_id, tenant_id, product_id, kind, quantity_delta,
            quantity_after, recorded_at, actor_id, reference_id, note
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(movement.id.as_uuid())
    .bind(movement.tenant_id.as_uuid())
    .bind(movement.product_id.0.as_uuid())
    .bind(movement.kind.as_str())
    .bind(movement.quantity_delta)
    .bind(movement.quantity_after)
    .bind(movement.recorded_at)
    .bind(movement.actor_id.as_uuid())
    .bind(movement.reference_id.map(|r| *r.as_uuid()))
    .bind(movement.note.as_deref())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_movement", e))?;
    Ok(())
}

fn to_db_version(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version)
        .map_err(|_| StoreError::InvalidRecord(format!("version {version} out of range")))
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(msg),
                Some("23514") => StoreError::InvalidRecord(msg),
                Some("40001") | Some("40P01") => StoreError::Concurrency(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

// SQLx row types

#[derive(Debug)]
struct ProductRow {
    tenant_id: Uuid,
    product_id: Uuid,
    sku: String,
    name: String,
    category_id: Option<Uuid>,
    supplier_id: Option<Uuid>,
    quantity: i64,
    reorder_threshold: i64,
    archived: bool,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for ProductRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ProductRow {
            tenant_id: row.try_get("tenant_id")?,
            product_id: row.try_get("product_id")?,
            sku: row.try_get("sku")?,
            name: row.try_get("name")?,
            category_id: row.try_get("category_id")?,
            supplier_id: row.try_get("supplier_id")?,
            quantity: row.try_get("quantity")?,
            reorder_threshold: row.try_get("reorder_threshold")?,
            archived: row.try_get("archived")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        Ok(Product {
            id: ProductId::new(AggregateId::from_uuid(row.product_id)),
            tenant_id: TenantId::from_uuid(row.tenant_id),
            sku: row.sku,
            name: row.name,
            category_id: row.category_id.map(CategoryId::from_uuid),
            supplier_id: row.supplier_id.map(SupplierId::from_uuid),
            quantity: row.quantity,
            reorder_threshold: row.reorder_threshold,
            archived: row.archived,
            version: u64::try_from(row.version)
                .map_err(|_| StoreError::InvalidRecord(format!("negative version {}", row.version)))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    let row = ProductRow::from_row(row)
        .map_err(|e| StoreError::Backend(format!("failed to deserialize product row: {e}")))?;
    Product::try_from(row)
}

#[derive(Debug)]
struct MovementRow {
    movement_id: Uuid,
    tenant_id: Uuid,
    product_id: Uuid,
    kind: String,
    quantity_delta: i64,
    quantity_after: i64,
    recorded_at: DateTime<Utc>,
    actor_id: Uuid,
    reference_id: Option<Uuid>,
    note: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for MovementRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            movement_id: row.try_get("movement_id")?,
            tenant_id: row.try_get("tenant_id")?,
            product_id: row.try_get("product_id")?,
            kind: row.try_get("kind")?,
            quantity_delta: row.try_get("quantity_delta")?,
            quantity_after: row.try_get("quantity_after")?,
            recorded_at: row.try_get("recorded_at")?,
            actor_id: row.try_get("actor_id")?,
            reference_id: row.try_get("reference_id")?,
            note: row.try_get("note")?,
        })
    }
}

impl TryFrom<MovementRow> for Movement {
    type Error = StoreError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        let kind: MovementKind = row
            .kind
            .parse()
            .map_err(|e| StoreError::InvalidRecord(format!("stored movement kind: {e}")))?;
        Ok(Movement {
            id: MovementId::from_uuid(row.movement_id),
            tenant_id: TenantId::from_uuid(row.tenant_id),
            product_id: ProductId::new(AggregateId::from_uuid(row.product_id)),
            kind,
            quantity_delta: row.quantity_delta,
            quantity_after: row.quantity_after,
            recorded_at: row.recorded_at,
            actor_id: UserId::from_uuid(row.actor_id),
            reference_id: row.reference_id.map(ReferenceId::from_uuid),
            note: row.note,
        })
    }
}

fn movement_from_row(row: &PgRow) -> Result<Movement, StoreError> {
    let row = MovementRow::from_row(row)
        .map_err(|e| StoreError::Backend(format!("failed to deserialize movement row: {e}")))?;
    Movement::try_from(row)
}
