use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, Entity, MovementId, ReferenceId, TenantId, UserId};

use crate::product::ProductId;

/// Kind of stock-affecting event.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementKind {
    Add,
    Remove,
    Adjust,
    TransferOut,
    TransferIn,
}

impl MovementKind {
    pub const ALL: [MovementKind; 5] = [
        MovementKind::Add,
        MovementKind::Remove,
        MovementKind::Adjust,
        MovementKind::TransferOut,
        MovementKind::TransferIn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Add => "ADD",
            MovementKind::Remove => "REMOVE",
            MovementKind::Adjust => "ADJUST",
            MovementKind::TransferOut => "TRANSFER_OUT",
            MovementKind::TransferIn => "TRANSFER_IN",
        }
    }

    pub fn is_transfer(&self) -> bool {
        matches!(self, MovementKind::TransferOut | MovementKind::TransferIn)
    }

    /// Signed delta for a request magnitude.
    ///
    /// ADD/REMOVE/TRANSFER_* take a strictly positive magnitude; REMOVE and
    /// TRANSFER_OUT negate it. ADJUST takes the signed delta as-is.
    pub fn signed_delta(&self, amount: i64) -> DomainResult<i64> {
        match self {
            MovementKind::Adjust => Ok(amount),
            _ if amount <= 0 => Err(DomainError::validation(format!(
                "{} amount must be positive (got {amount})",
                self.as_str()
            ))),
            MovementKind::Add | MovementKind::TransferIn => Ok(amount),
            MovementKind::Remove | MovementKind::TransferOut => Ok(-amount),
        }
    }

    /// Sign rule for a recorded delta.
    pub fn check_delta(&self, delta: i64) -> DomainResult<()> {
        let ok = match self {
            MovementKind::Add | MovementKind::TransferIn => delta > 0,
            MovementKind::Remove | MovementKind::TransferOut => delta < 0,
            MovementKind::Adjust => true,
        };
        if ok {
            Ok(())
        } else {
            Err(DomainError::validation(format!(
                "delta {delta} does not match movement kind {}",
                self.as_str()
            )))
        }
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DomainError::validation(format!("unknown movement kind: {s}")))
    }
}

/// A movement about to be committed (no ledger timestamp yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementDraft {
    pub id: MovementId,
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub kind: MovementKind,
    pub quantity_delta: i64,
    pub quantity_after: i64,
    pub actor_id: UserId,
    pub reference_id: Option<ReferenceId>,
    pub note: Option<String>,
}

impl MovementDraft {
    /// Validates the sign rule and the recorded balance.
    pub fn validate(&self) -> DomainResult<()> {
        self.kind.check_delta(self.quantity_delta)?;
        if self.quantity_after < 0 {
            return Err(DomainError::invariant("quantity_after cannot be negative"));
        }
        if self.kind.is_transfer() && self.reference_id.is_none() {
            return Err(DomainError::validation(
                "transfer movements must carry a reference_id",
            ));
        }
        Ok(())
    }

    pub fn recorded(self, recorded_at: DateTime<Utc>) -> Movement {
        Movement {
            id: self.id,
            tenant_id: self.tenant_id,
            product_id: self.product_id,
            kind: self.kind,
            quantity_delta: self.quantity_delta,
            quantity_after: self.quantity_after,
            recorded_at,
            actor_id: self.actor_id,
            reference_id: self.reference_id,
            note: self.note,
        }
    }
}

/// Immutable, timestamped record of a quantity change on one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub kind: MovementKind,
    pub quantity_delta: i64,
    /// Product quantity right after this movement was applied.
    pub quantity_after: i64,
    pub recorded_at: DateTime<Utc>,
    pub actor_id: UserId,
    pub reference_id: Option<ReferenceId>,
    pub note: Option<String>,
}

impl Movement {
    pub fn quantity_before(&self) -> i64 {
        self.quantity_after - self.quantity_delta
    }
}

impl Entity for Movement {
    type Id = MovementId;

    fn id(&self) -> MovementId {
        self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
