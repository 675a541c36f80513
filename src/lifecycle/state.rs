//! Durable per-symbol lifecycle record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::exchange::Side;

/// Where a tracked position sits in its exit plan.
///
/// "Idle" is the absence of a record, and the pending window between order
/// submission and confirmation is resolved synchronously inside `open()` —
/// neither is ever persisted. The staged-exit order id lives inside the
/// variant that has one, so a staged state without an order id cannot be
/// represented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Protective stop armed; the whole position exits via stop or manual
    /// close (staged quantity fell below the venue minimum).
    OpenFullExit,
    /// Protective stop armed plus a reduce-only partial target order working.
    OpenStagedExit { staged_exit_order_id: String },
    /// Partial target filled; stop moved to entry and the far target armed.
    BreakevenPending,
}

impl LifecycleState {
    /// Storage tag.
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleState::OpenFullExit => "open_full_exit",
            LifecycleState::OpenStagedExit { .. } => "open_staged_exit",
            LifecycleState::BreakevenPending => "breakeven_pending",
        }
    }

    /// Rebuild from the storage tag plus the nullable order-id column.
    pub fn from_parts(kind: &str, staged_exit_order_id: Option<String>) -> Option<Self> {
        match (kind, staged_exit_order_id) {
            ("open_full_exit", _) => Some(LifecycleState::OpenFullExit),
            ("open_staged_exit", Some(id)) => {
                Some(LifecycleState::OpenStagedExit { staged_exit_order_id: id })
            }
            ("breakeven_pending", _) => Some(LifecycleState::BreakevenPending),
            _ => None,
        }
    }

    pub fn staged_exit_order_id(&self) -> Option<&str> {
        match self {
            LifecycleState::OpenStagedExit { staged_exit_order_id } => {
                Some(staged_exit_order_id)
            }
            _ => None,
        }
    }

    /// Position in the forward-only ordering. Deletion aside, a symbol's rank
    /// never decreases.
    pub fn rank(&self) -> u8 {
        match self {
            LifecycleState::OpenFullExit | LifecycleState::OpenStagedExit { .. } => 1,
            LifecycleState::BreakevenPending => 2,
        }
    }
}

/// The durable record, one per symbol, owned exclusively by the lifecycle
/// controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    pub symbol: String,
    pub state: LifecycleState,
    pub side: Side,
    /// Actual average entry reported by the venue, tick-quantized.
    pub entry_price: Decimal,
    pub initial_qty: Decimal,
    pub stop_loss_price: Decimal,
    /// The signal's second target, armed during break-even migration.
    pub secondary_take_profit: Decimal,
    pub last_transition: DateTime<Utc>,
}
