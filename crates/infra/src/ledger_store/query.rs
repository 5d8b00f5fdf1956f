//! Movement listing: filters, keyset cursors and pages.
//!
//! Listing is ordered ascending by `(recorded_at, movement_id)`; the cursor is
//! the last key of the previous page, so pages stay stable while new movements
//! are appended.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::MovementId;
use stockledger_inventory::{Movement, MovementKind, ProductId};

/// Page size used when a request does not name one.
pub const DEFAULT_PAGE_SIZE: usize = 10;
/// Upper bound for a single page.
pub const MAX_PAGE_SIZE: usize = 500;

/// Filter criteria for movement listing. All fields are optional and combine
/// with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub product_id: Option<ProductId>,
    pub kind: Option<MovementKind>,
    /// Inclusive lower bound on `recorded_at`.
    pub recorded_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `recorded_at`.
    pub recorded_before: Option<DateTime<Utc>>,
}

impl MovementFilter {
    pub fn for_product(product_id: ProductId) -> Self {
        Self {
            product_id: Some(product_id),
            ..Self::default()
        }
    }

    pub fn with_kind(mut self, kind: MovementKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn matches(&self, movement: &Movement) -> bool {
        self.product_id.is_none_or(|p| movement.product_id == p)
            && self.kind.is_none_or(|k| movement.kind == k)
            && self.recorded_after.is_none_or(|t| movement.recorded_at >= t)
            && self.recorded_before.is_none_or(|t| movement.recorded_at < t)
    }
}

/// Keyset position in the movement order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MovementCursor {
    pub recorded_at: DateTime<Utc>,
    pub movement_id: MovementId,
}

impl MovementCursor {
    pub fn of(movement: &Movement) -> Self {
        Self {
            recorded_at: movement.recorded_at,
            movement_id: movement.id,
        }
    }

    /// Opaque token form: `<unix micros>_<movement uuid>`.
    pub fn to_token(&self) -> String {
        format!(
            "{}_{}",
            self.recorded_at.timestamp_micros(),
            self.movement_id.as_uuid()
        )
    }

    /// Parse a token produced by [`MovementCursor::to_token`]. Returns `None`
    /// for anything malformed.
    pub fn from_token(token: &str) -> Option<Self> {
        let (micros, id) = token.split_once('_')?;
        let micros: i64 = micros.parse().ok()?;
        let recorded_at = Utc.timestamp_micros(micros).single()?;
        let uuid = Uuid::parse_str(id).ok()?;
        Some(Self {
            recorded_at,
            movement_id: MovementId::from_uuid(uuid),
        })
    }

    /// Whether `movement` sorts strictly after this cursor.
    pub fn precedes(&self, movement: &Movement) -> bool {
        (movement.recorded_at, movement.id) > (self.recorded_at, self.movement_id)
    }
}

/// Caller-facing page request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: Option<usize>,
    /// Last key of the previous page.
    pub after: Option<MovementCursor>,
}

impl PageRequest {
    pub fn first(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            after: None,
        }
    }

    pub fn after(limit: usize, cursor: MovementCursor) -> Self {
        Self {
            limit: Some(limit),
            after: Some(cursor),
        }
    }

    /// Continue from a `next_cursor` token. A malformed token yields `None`.
    pub fn from_token(limit: Option<usize>, token: &str) -> Option<Self> {
        MovementCursor::from_token(token).map(|cursor| Self {
            limit,
            after: Some(cursor),
        })
    }
}

/// Pagination bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageSettings {
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for PageSettings {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }
}

impl PageSettings {
    /// Effective page size: zero or missing means the default, and anything
    /// above the maximum is capped.
    pub fn limit_for(&self, requested: Option<usize>) -> usize {
        let max = self.max_page_size.max(1);
        match requested {
            None | Some(0) => self.default_page_size.clamp(1, max),
            Some(n) => n.min(max),
        }
    }
}

/// One page of movements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementPage {
    pub movements: Vec<Movement>,
    /// Present iff more movements match after this page.
    pub next_cursor: Option<String>,
}

impl MovementPage {
    pub fn empty() -> Self {
        Self {
            movements: Vec::new(),
            next_cursor: None,
        }
    }

    /// Build a page from up to `limit + 1` ordered rows.
    pub fn from_overfetch(mut rows: Vec<Movement>, limit: usize) -> Self {
        let has_more = rows.len() > limit;
        rows.truncate(limit);
        let next_cursor = if has_more {
            rows.last().map(|m| MovementCursor::of(m).to_token())
        } else {
            None
        };
        Self {
            movements: rows,
            next_cursor,
        }
    }
}
