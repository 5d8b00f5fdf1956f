//! Postgres schema for the product catalog and the movement ledger.
//!
//! Statements are idempotent (`IF NOT EXISTS` / `OR REPLACE`), so `migrate`
//! can run on every start.

use sqlx::PgPool;
use tracing::{info, instrument};

use super::r#trait::StoreError;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS products (
        tenant_id         UUID        NOT NULL,
        product_id        UUID        NOT NULL,
        sku               TEXT        NOT NULL,
        name              TEXT        NOT NULL,
        category_id       UUID        NULL,
        supplier_id       UUID        NULL,
        quantity          BIGINT      NOT NULL CHECK (quantity >= 0),
        reorder_threshold BIGINT      NOT NULL CHECK (reorder_threshold >= 0),
        archived          BOOLEAN     NOT NULL DEFAULT FALSE,
        version           BIGINT      NOT NULL DEFAULT 0,
        created_at        TIMESTAMPTZ NOT NULL,
        updated_at        TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (tenant_id, product_id),
        UNIQUE (tenant_id, sku)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS movements (
        movement_id    UUID        PRIMARY KEY,
        tenant_id      UUID        NOT NULL,
        product_id     UUID        NOT NULL,
        kind           TEXT        NOT NULL CHECK (kind IN ('ADD', 'REMOVE', 'ADJUST', 'TRANSFER_OUT', 'TRANSFER_IN')),
        quantity_delta BIGINT      NOT NULL,
        quantity_after BIGINT      NOT NULL CHECK (quantity_after >= 0),
        recorded_at    TIMESTAMPTZ NOT NULL,
        actor_id       UUID        NOT NULL,
        reference_id   UUID        NULL,
        note           TEXT        NULL,
        FOREIGN KEY (tenant_id, product_id) REFERENCES products (tenant_id, product_id)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS movements_product_order
        ON movements (tenant_id, product_id, recorded_at, movement_id)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS movements_tenant_order
        ON movements (tenant_id, recorded_at, movement_id)
    "#,
    r#"
    CREATE OR REPLACE FUNCTION movements_append_only() RETURNS trigger AS $$
    BEGIN
        RAISE EXCEPTION 'movements is append-only' USING ERRCODE = 'P0001';
    END;
    $$ LANGUAGE plpgsql
    "#,
    r#"
    DROP TRIGGER IF EXISTS movements_no_mutation ON movements
    "#,
    r#"
    CREATE TRIGGER movements_no_mutation
        BEFORE UPDATE OR DELETE ON movements
        FOR EACH ROW EXECUTE FUNCTION movements_append_only()
    "#,
];

/// Create (or bring up to date) the ledger tables.
#[instrument(skip(pool), err)]
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| StoreError::Backend(format!("begin migration: {e}")))?;

    for (idx, statement) in STATEMENTS.iter().enumerate() {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(format!("migration statement {idx}: {e}")))?;
    }

    tx.commit()
        .await
        .map_err(|e| StoreError::Backend(format!("commit migration: {e}")))?;

    info!(statements = STATEMENTS.len(), "ledger schema migrated");
    Ok(())
}
