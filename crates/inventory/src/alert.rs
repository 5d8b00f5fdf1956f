//! Low-stock alert derivation.
//!
//! Alerts are derived values, never independent truth: an alert exists iff
//! `quantity <= reorder_threshold`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{TenantId, ValueObject};

use crate::product::{Product, ProductId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    /// `0 < quantity <= reorder_threshold`.
    LowStock,
    /// `quantity == 0`.
    OutOfStock,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::LowStock => "LOW_STOCK",
            AlertKind::OutOfStock => "OUT_OF_STOCK",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub kind: AlertKind,
    pub current_quantity: i64,
    pub reorder_threshold: i64,
    /// Time of the product state the alert was derived from.
    pub triggered_at: DateTime<Utc>,
}

impl ValueObject for Alert {}

impl Alert {
    /// Same kind, quantity and threshold. `triggered_at` is ignored.
    pub fn same_state(&self, other: &Alert) -> bool {
        self.kind == other.kind
            && self.current_quantity == other.current_quantity
            && self.reorder_threshold == other.reorder_threshold
    }
}

/// Pure function of `(quantity, reorder_threshold)`.
pub fn evaluate(product: &Product) -> Option<Alert> {
    if product.quantity > product.reorder_threshold {
        return None;
    }
    let kind = if product.quantity <= 0 {
        AlertKind::OutOfStock
    } else {
        AlertKind::LowStock
    };
    Some(Alert {
        tenant_id: product.tenant_id,
        product_id: product.id,
        kind,
        current_quantity: product.quantity,
        reorder_threshold: product.reorder_threshold,
        triggered_at: product.updated_at,
    })
}

/// Alert as it should be listed: archived products never alert.
pub fn active_alert(product: &Product) -> Option<Alert> {
    if product.archived {
        None
    } else {
        evaluate(product)
    }
}

/// How the alert state of one product moved across a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertTransition {
    Raised(Alert),
    /// Still alerting, but the kind, quantity or threshold moved.
    Changed { previous: Alert, current: Alert },
    Cleared(Alert),
    Unchanged(Option<Alert>),
}

impl AlertTransition {
    pub fn between(before: Option<Alert>, after: Option<Alert>) -> Self {
        match (before, after) {
            (None, Some(current)) => AlertTransition::Raised(current),
            (Some(previous), None) => AlertTransition::Cleared(previous),
            (Some(previous), Some(current)) if !previous.same_state(&current) => {
                AlertTransition::Changed { previous, current }
            }
            (_, current) => AlertTransition::Unchanged(current),
        }
    }

    /// The alert that holds after the transition, if any.
    pub fn current(&self) -> Option<&Alert> {
        match self {
            AlertTransition::Raised(a) => Some(a),
            AlertTransition::Changed { current, .. } => Some(current),
            AlertTransition::Cleared(_) => None,
            AlertTransition::Unchanged(a) => a.as_ref(),
        }
    }

    pub fn is_notable(&self) -> bool {
        !matches!(self, AlertTransition::Unchanged(_))
    }
}
