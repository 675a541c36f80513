//! SQLite-backed state store.
//!
//! One row per symbol carrying exactly the [`PositionState`] fields, decimals
//! as TEXT. Every mutation is a synchronous write-through behind a single
//! lock — mutation frequency is one per trade event, so durability and
//! simplicity win over throughput.

use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::exchange::Side;

use super::state::{LifecycleState, PositionState};

pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    /// Open (or create) the store at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open state database at {:?}", db_path.as_ref()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("State store initialized at {:?}", db_path.as_ref());
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("state store lock poisoned");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS position_states (
                symbol TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                initial_qty TEXT NOT NULL,
                stop_loss_price TEXT NOT NULL,
                staged_exit_order_id TEXT,
                secondary_take_profit TEXT NOT NULL,
                last_transition TEXT NOT NULL
            );
            "#,
        )?;
        debug!("State store schema initialized");
        Ok(())
    }

    fn row_to_state(row: &Row<'_>) -> rusqlite::Result<Option<PositionState>> {
        let symbol: String = row.get(0)?;
        let kind: String = row.get(1)?;
        let side: String = row.get(2)?;
        let entry_price: String = row.get(3)?;
        let initial_qty: String = row.get(4)?;
        let stop_loss_price: String = row.get(5)?;
        let staged_exit_order_id: Option<String> = row.get(6)?;
        let secondary_take_profit: String = row.get(7)?;
        let last_transition: String = row.get(8)?;

        let Some(state) = LifecycleState::from_parts(&kind, staged_exit_order_id) else {
            return Ok(None);
        };
        let Ok(side) = side.parse::<Side>() else {
            return Ok(None);
        };

        Ok(Some(PositionState {
            symbol,
            state,
            side,
            entry_price: Decimal::from_str(&entry_price).unwrap_or_default(),
            initial_qty: Decimal::from_str(&initial_qty).unwrap_or_default(),
            stop_loss_price: Decimal::from_str(&stop_loss_price).unwrap_or_default(),
            secondary_take_profit: Decimal::from_str(&secondary_take_profit).unwrap_or_default(),
            last_transition: DateTime::parse_from_rfc3339(&last_transition)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }))
    }

    /// The record for `symbol`, if one exists.
    pub fn get(&self, symbol: &str) -> Result<Option<PositionState>> {
        let conn = self.conn.lock().expect("state store lock poisoned");
        let state = conn
            .query_row(
                r#"
                SELECT symbol, state, side, entry_price, initial_qty, stop_loss_price,
                       staged_exit_order_id, secondary_take_profit, last_transition
                FROM position_states WHERE symbol = ?1
                "#,
                params![symbol],
                Self::row_to_state,
            )
            .optional()?
            .flatten();
        Ok(state)
    }

    /// Insert or replace the record, written through to disk before return.
    pub fn upsert(&self, state: &PositionState) -> Result<()> {
        let conn = self.conn.lock().expect("state store lock poisoned");
        conn.execute(
            r#"
            INSERT INTO position_states (symbol, state, side, entry_price, initial_qty,
                                         stop_loss_price, staged_exit_order_id,
                                         secondary_take_profit, last_transition)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(symbol) DO UPDATE SET
                state = ?2,
                side = ?3,
                entry_price = ?4,
                initial_qty = ?5,
                stop_loss_price = ?6,
                staged_exit_order_id = ?7,
                secondary_take_profit = ?8,
                last_transition = ?9
            "#,
            params![
                state.symbol,
                state.state.kind(),
                state.side.to_string(),
                state.entry_price.to_string(),
                state.initial_qty.to_string(),
                state.stop_loss_price.to_string(),
                state.state.staged_exit_order_id(),
                state.secondary_take_profit.to_string(),
                state.last_transition.to_rfc3339(),
            ],
        )?;
        debug!(symbol = %state.symbol, state = state.state.kind(), "State persisted");
        Ok(())
    }

    /// Delete the record for `symbol`. Deleting a missing record is a no-op.
    pub fn remove(&self, symbol: &str) -> Result<()> {
        let conn = self.conn.lock().expect("state store lock poisoned");
        let deleted = conn.execute(
            "DELETE FROM position_states WHERE symbol = ?1",
            params![symbol],
        )?;
        if deleted > 0 {
            debug!(%symbol, "State removed");
        }
        Ok(())
    }

    /// Every stored record. Rows that fail to parse are skipped with a
    /// warning rather than poisoning the whole reload.
    pub fn all(&self) -> Result<Vec<PositionState>> {
        let conn = self.conn.lock().expect("state store lock poisoned");
        let mut stmt = conn.prepare(
            r#"
            SELECT symbol, state, side, entry_price, initial_qty, stop_loss_price,
                   staged_exit_order_id, secondary_take_profit, last_transition
            FROM position_states ORDER BY symbol
            "#,
        )?;

        let states = stmt
            .query_map([], Self::row_to_state)?
            .filter_map(|r| match r {
                Ok(Some(state)) => Some(state),
                Ok(None) => {
                    warn!("Skipping unparseable position state row");
                    None
                }
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable position state row");
                    None
                }
            })
            .collect();
        Ok(states)
    }
}
