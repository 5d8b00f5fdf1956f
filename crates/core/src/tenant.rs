//! Tenant context threaded through every ledger operation.
//!
//! The request layer authenticates and authorizes before reaching the core;
//! the core trusts this triple and only records `actor_id` for audit.

use serde::{Deserialize, Serialize};

use crate::id::{TenantId, UserId};

/// Role of the acting user within the tenant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Operator,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Operator => "operator",
            Role::Viewer => "viewer",
        }
    }
}

/// Verified `(tenant_id, actor_id, role)` triple for one request.
///
/// Immutable; every data access below the service boundary is scoped by
/// `tenant_id()`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    tenant_id: TenantId,
    actor_id: UserId,
    role: Role,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId, actor_id: UserId, role: Role) -> Self {
        Self {
            tenant_id,
            actor_id,
            role,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn actor_id(&self) -> UserId {
        self.actor_id
    }

    pub fn role(&self) -> Role {
        self.role
    }
}
