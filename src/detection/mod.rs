//! Detection record, the state machine that drives it and the store that guards it.

pub mod machine;
pub mod model;
pub mod store;

pub use machine::Applied;
pub use model::{ConnectionStatus, DetectionSnapshot, FireState, TemperatureMatrix};
pub use store::StateStore;
