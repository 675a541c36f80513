//! Bybit v5 REST binding for the execution gateway.

mod client;
mod types;

pub use client::BybitClient;
