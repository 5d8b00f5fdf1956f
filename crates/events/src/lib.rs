//! Ledger events and their distribution.
//!
//! Events here are notifications derived from committed ledger state
//! (movement recorded, alert raised/cleared). The movement ledger itself is the
//! source of truth; the bus only fans out what has already been committed.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
