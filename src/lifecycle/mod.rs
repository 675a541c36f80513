//! Position lifecycle management: the rolling candle window that drives
//! entries, the durable per-symbol state, and the controller that opens
//! positions and reconciles them against the venue.

pub mod controller;
pub mod state;
pub mod store;
pub mod tracker;

pub use controller::{
    LifecycleConfig, OpenError, ReconcileError, ReconcileOutcome, TradeLifecycleController,
};
pub use state::{LifecycleState, PositionState};
pub use store::StateStore;
pub use tracker::CandleTracker;
