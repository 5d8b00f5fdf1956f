//! Tenant-isolated storage for derived state.

pub mod tenant_store;

pub use tenant_store::{InMemoryTenantStore, TenantStore};
