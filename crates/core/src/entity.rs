//! Tenant-owned records.

use crate::id::TenantId;

/// A record with a stable identity that lives inside exactly one tenant.
pub trait Entity {
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> Self::Id;

    fn tenant_id(&self) -> TenantId;

    /// Records of another tenant are treated as if they did not exist.
    fn belongs_to(&self, tenant_id: TenantId) -> bool {
        self.tenant_id() == tenant_id
    }
}
