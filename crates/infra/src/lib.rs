//! Infrastructure layer of the stock ledger: storage, serialization of
//! quantity changes, alert derivation, configuration and the service facade.

pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod ledger_store;
pub mod locks;
pub mod projections;
pub mod read_model;
pub mod retry;
pub mod service;

#[cfg(test)]
mod integration_tests;

pub use config::LedgerConfig;
pub use engine::{
    EngineSettings, MovementRequest, MovementResult, StockEngine, TransferRequest, TransferResult,
};
pub use error::{LedgerError, LedgerResult};
pub use ledger::MovementLedger;
pub use ledger_store::{
    InMemoryLedgerStore, LedgerStore, MovementCursor, MovementFilter, MovementPage, PageRequest,
    PostgresLedgerStore, StoreError,
};
pub use projections::{AlertDelivery, AlertDeriver, AlertFeed, AlertMode, AlertSettings};
pub use service::{LedgerAudit, LedgerService};
