//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. In the
/// stock ledger, derived signals such as low-stock alerts and pagination
/// cursors are value objects: two alerts with the same product, quantity and
/// threshold are the same alert.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
