use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    AggregateId, AggregateRoot, CategoryId, DomainError, DomainResult, Entity, SupplierId,
    TenantId,
};

/// Product identifier (unique per tenant).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// A stock-bearing catalog product.
///
/// `quantity` is a cached projection of the movement ledger: it always equals
/// the sum of the product's movement deltas and only the stock engine changes
/// it. Catalog metadata (name, category, supplier, threshold) is owned by
/// catalog management.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub tenant_id: TenantId,
    pub sku: String,
    pub name: String,
    pub category_id: Option<CategoryId>,
    pub supplier_id: Option<SupplierId>,
    pub quantity: i64,
    pub reorder_threshold: i64,
    /// Soft-delete flag; archived products keep their history.
    pub archived: bool,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Fails with `NotFound` when the product is owned by another tenant, so a
    /// cross-tenant reference is indistinguishable from an absent one.
    pub fn ensure_tenant(&self, tenant_id: TenantId) -> DomainResult<()> {
        if self.belongs_to(tenant_id) {
            Ok(())
        } else {
            Err(DomainError::not_found())
        }
    }

    pub fn ensure_active(&self) -> DomainResult<()> {
        if self.archived {
            return Err(DomainError::validation(format!(
                "product {} is archived",
                self.id
            )));
        }
        Ok(())
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> ProductId {
        self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

impl AggregateRoot for Product {
    fn version(&self) -> u64 {
        self.version
    }
}

/// Catalog input for registering a product with the ledger.
///
/// There is no opening quantity: stock only enters through movements, which
/// keeps the quantity equal to the ledger sum from the first commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub id: Option<ProductId>,
    pub sku: String,
    pub name: String,
    pub category_id: Option<CategoryId>,
    pub supplier_id: Option<SupplierId>,
    pub reorder_threshold: i64,
}

impl NewProduct {
    pub fn new(sku: impl Into<String>, name: impl Into<String>, reorder_threshold: i64) -> Self {
        Self {
            id: None,
            sku: sku.into(),
            name: name.into(),
            category_id: None,
            supplier_id: None,
            reorder_threshold,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if self.reorder_threshold < 0 {
            return Err(DomainError::validation("reorder_threshold cannot be negative"));
        }
        Ok(())
    }

    pub fn into_product(self, tenant_id: TenantId, now: DateTime<Utc>) -> DomainResult<Product> {
        self.validate()?;
        Ok(Product {
            id: self.id.unwrap_or_else(ProductId::generate),
            tenant_id,
            sku: self.sku.trim().to_string(),
            name: self.name.trim().to_string(),
            category_id: self.category_id,
            supplier_id: self.supplier_id,
            quantity: 0,
            reorder_threshold: self.reorder_threshold,
            archived: false,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }
}
