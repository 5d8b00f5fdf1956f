//! Pure planning of quantity changes.
//!
//! Each planner takes the current product state and a movement intent and
//! returns the exact change to commit, or the reason it must be rejected.
//! Nothing here mutates a product; the engine commits a `StockChange` together
//! with its movement as one unit.

use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, TenantId};

use crate::movement::MovementKind;
use crate::product::{Product, ProductId};

/// What to do with an ADJUST whose delta is zero.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZeroAdjustPolicy {
    /// Append an explicit no-op audit movement.
    #[default]
    Record,
    /// Record nothing.
    Skip,
}

/// A planned quantity change for one product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockChange {
    pub product_id: ProductId,
    pub kind: MovementKind,
    pub delta: i64,
    pub quantity_before: i64,
    pub quantity_after: i64,
    /// Product version the change was planned against (compare-and-swap token).
    pub expected_version: u64,
}

fn apply_delta(product: &Product, kind: MovementKind, delta: i64) -> DomainResult<StockChange> {
    kind.check_delta(delta)?;

    let candidate = product
        .quantity
        .checked_add(delta)
        .ok_or_else(|| DomainError::validation("quantity overflow"))?;
    if candidate < 0 {
        let requested = delta
            .checked_neg()
            .ok_or_else(|| DomainError::validation("quantity delta out of range"))?;
        return Err(DomainError::insufficient_stock(requested, product.quantity));
    }

    Ok(StockChange {
        product_id: product.id,
        kind,
        delta,
        quantity_before: product.quantity,
        quantity_after: candidate,
        expected_version: product.version,
    })
}

/// Plan a single ADD / REMOVE / ADJUST movement.
///
/// `amount` is a magnitude for ADD and REMOVE and a signed delta for ADJUST.
/// Transfer kinds are rejected: a transfer leg never exists on its own.
/// Returns `None` only for a zero ADJUST under `ZeroAdjustPolicy::Skip`.
pub fn plan_movement(
    product: &Product,
    tenant_id: TenantId,
    kind: MovementKind,
    amount: i64,
    zero_adjust: ZeroAdjustPolicy,
) -> DomainResult<Option<StockChange>> {
    product.ensure_tenant(tenant_id)?;
    if kind.is_transfer() {
        return Err(DomainError::validation(
            "transfer legs must be recorded through a transfer",
        ));
    }
    product.ensure_active()?;

    let delta = kind.signed_delta(amount)?;
    if delta == 0 && zero_adjust == ZeroAdjustPolicy::Skip {
        return Ok(None);
    }
    apply_delta(product, kind, delta).map(Some)
}

/// Plan both legs of a transfer. Either both legs are valid or neither is.
pub fn plan_transfer(
    source: &Product,
    destination: &Product,
    tenant_id: TenantId,
    amount: i64,
) -> DomainResult<(StockChange, StockChange)> {
    if source.id == destination.id {
        return Err(DomainError::validation(
            "source and destination must be different products",
        ));
    }
    source.ensure_tenant(tenant_id)?;
    destination.ensure_tenant(tenant_id)?;
    source.ensure_active()?;
    destination.ensure_active()?;

    let out_delta = MovementKind::TransferOut.signed_delta(amount)?;
    let in_delta = MovementKind::TransferIn.signed_delta(amount)?;

    let out = apply_delta(source, MovementKind::TransferOut, out_delta)?;
    let inbound = apply_delta(destination, MovementKind::TransferIn, in_delta)?;
    Ok((out, inbound))
}

/// Plan an ADJUST that sets the quantity to `new_quantity`.
pub fn plan_adjust(
    product: &Product,
    tenant_id: TenantId,
    new_quantity: i64,
    zero_adjust: ZeroAdjustPolicy,
) -> DomainResult<Option<StockChange>> {
    if new_quantity < 0 {
        return Err(DomainError::validation("new quantity cannot be negative"));
    }
    let delta = new_quantity
        .checked_sub(product.quantity)
        .ok_or_else(|| DomainError::validation("quantity overflow"))?;
    plan_movement(product, tenant_id, MovementKind::Adjust, delta, zero_adjust)
}
