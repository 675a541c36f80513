//! # perp-pilot
//!
//! Automated position lifecycle management on Bybit linear perpetuals:
//! a hybrid trend/range signal engine drives entries, a staged exit plan
//! takes partial profit at the first target, and a periodic reconciliation
//! sweep migrates survivors to break-even while verifying every remote
//! mutation against the venue.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Gateway trait, Bybit v5 REST client, rules cache, mock venue
//! - `strategy`: Indicators, signal engine, and position sizing
//! - `lifecycle`: Candle tracker, durable state store, lifecycle controller
//! - `notify`: Bounded-channel operator notifications
//! - `utils`: Decimal quantization helpers

pub mod config;
pub mod exchange;
pub mod lifecycle;
pub mod notify;
pub mod strategy;
pub mod utils;

pub use config::Config;
