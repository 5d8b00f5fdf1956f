//! Tenant-scoped storage for the product catalog and the append-only
//! movement ledger.
//!
//! The store is the single durability boundary of the ledger: a
//! `LedgerCommit` (movements plus the quantity updates they cause) is applied
//! atomically or not at all.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod schema;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use query::{
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MovementCursor, MovementFilter, MovementPage, PageRequest,
    PageSettings,
};
pub use r#trait::{
    CatalogPatch, CommittedChanges, LedgerCommit, LedgerStore, ProductUpdate, StoreError, ledger_now,
};
