//! Execution venue integration.
//!
//! The lifecycle core talks to the venue only through the
//! [`ExecutionGateway`] trait; `bybit` is the live binding and `mock` the
//! in-process test double. `rules` caches per-symbol quantization rules.

pub mod bybit;
pub mod error;
pub mod mock;
pub mod rules;
pub mod traits;
pub mod types;

pub use bybit::BybitClient;
pub use error::GatewayError;
pub use mock::{GatewayCalls, MockGateway};
pub use rules::InstrumentRulesCache;
pub use traits::ExecutionGateway;
pub use types::{Candle, InstrumentRules, OrderState, Side, VenuePosition};
