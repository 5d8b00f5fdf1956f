//! `stockledger-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error model, versioning and the tenant context that
//! every ledger operation is parameterized by.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod tenant;
pub mod value_object;

pub use aggregate::AggregateRoot;
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, CategoryId, MovementId, ReferenceId, SupplierId, TenantId, UserId};
pub use tenant::{Role, TenantContext};
pub use value_object::ValueObject;
