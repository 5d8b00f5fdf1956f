//! Error taxonomy surfaced by ledger operations.

use thiserror::Error;

use stockledger_core::DomainError;
use stockledger_inventory::ProductId;

use crate::ledger_store::StoreError;
use crate::locks::LockError;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Every failure a ledger operation can return. When an operation fails,
/// nothing it attempted was committed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Malformed request (kind, amount, sign, archived product, duplicate SKU).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown product, or a product owned by another tenant.
    #[error("product not found")]
    NotFound,

    /// The movement would drive on-hand quantity below zero.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Option<ProductId>,
        requested: i64,
        available: i64,
    },

    /// Lock or version contention outlasted the retry budget.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// The durable store failed during the operation.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl LedgerError {
    /// Attach the product an insufficient-stock failure refers to.
    pub fn for_product(self, product_id: ProductId) -> Self {
        match self {
            LedgerError::InsufficientStock {
                product_id: None,
                requested,
                available,
            } => LedgerError::InsufficientStock {
                product_id: Some(product_id),
                requested,
                available,
            },
            other => other,
        }
    }

    /// Transient failures the engine retries with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrencyConflict(_))
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => LedgerError::Validation(msg),
            DomainError::InvariantViolation(msg) => LedgerError::Validation(msg),
            DomainError::InvalidId(msg) => LedgerError::Validation(msg),
            DomainError::NotFound => LedgerError::NotFound,
            DomainError::InsufficientStock {
                requested,
                available,
            } => LedgerError::InsufficientStock {
                product_id: None,
                requested,
                available,
            },
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) => LedgerError::ConcurrencyConflict(msg),
            StoreError::TenantIsolation(_) | StoreError::NotFound(_) => LedgerError::NotFound,
            StoreError::Duplicate(msg) | StoreError::InvalidRecord(msg) => {
                LedgerError::Validation(msg)
            }
            StoreError::Backend(msg) => LedgerError::Persistence(msg),
        }
    }
}

impl From<LockError> for LedgerError {
    fn from(value: LockError) -> Self {
        match value {
            LockError::Timeout(_) => LedgerError::ConcurrencyConflict(value.to_string()),
            LockError::Poisoned => LedgerError::Persistence(value.to_string()),
        }
    }
}
