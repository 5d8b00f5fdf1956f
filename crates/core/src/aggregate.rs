//! Aggregate root trait.

use crate::entity::Entity;

/// The unit of consistency: every state change to an aggregate is serialized
/// and bumps `version()`.
pub trait AggregateRoot: Entity {
    /// Bumped by every committed change (quantity or catalog metadata); stores
    /// use it as the compare-and-swap token.
    fn version(&self) -> u64;
}
