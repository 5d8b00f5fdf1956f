//! Alert derivation and alert read models.

pub mod alert_feed;
pub mod alerts;

pub use alert_feed::{AlertFeed, AlertFeedError};
pub use alerts::{AlertDelivery, AlertDeriver, AlertMode, AlertSettings};
