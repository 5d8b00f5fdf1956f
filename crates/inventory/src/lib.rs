//! Inventory stock domain.
//!
//! Business rules for the stock ledger, implemented purely as deterministic
//! domain logic (no IO, no storage, no clocks): product state, movement kinds
//! and their sign rules, planning of quantity changes, and low-stock alert
//! derivation.

pub mod alert;
pub mod event;
pub mod movement;
pub mod product;
pub mod stock;

pub use alert::{Alert, AlertKind, AlertTransition, active_alert, evaluate};
pub use event::{AlertCleared, StockEvent};
pub use movement::{Movement, MovementDraft, MovementKind};
pub use product::{NewProduct, Product, ProductId};
pub use stock::{StockChange, ZeroAdjustPolicy, plan_adjust, plan_movement, plan_transfer};
