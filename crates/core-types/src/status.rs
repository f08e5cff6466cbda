//! Status mapping from venue flags and the transition rules for every
//! stateful entity.
//!
//! Both the scheduled-execution path and the reconciliation path derive a
//! local `TradeStatus` through [`RemoteTradeState`], so the two can never
//! disagree about what a given set of venue flags means.

use crate::enums::{ScheduledSwapStatus, ScheduledTradeStatus, TradeStatus};
use crate::error::CoreError;
use serde::{Deserialize, Serialize};

/// The venue's view of a position, collapsed from its boolean flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteTradeState {
    Closed,
    Running,
    Open,
    Canceled,
    /// No flag set. Treated as accepted-but-not-running.
    Unflagged,
}

/// Raw flags as reported by the venue. Several may be set at once on stale
/// records; priority is closed > running > open > canceled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFlags {
    pub open: bool,
    pub running: bool,
    pub closed: bool,
    pub canceled: bool,
}

impl RemoteTradeState {
    pub fn from_flags(flags: RemoteFlags) -> Self {
        match flags {
            RemoteFlags { closed: true, .. } => RemoteTradeState::Closed,
            RemoteFlags { running: true, .. } => RemoteTradeState::Running,
            RemoteFlags { open: true, .. } => RemoteTradeState::Open,
            RemoteFlags { canceled: true, .. } => RemoteTradeState::Canceled,
            _ => RemoteTradeState::Unflagged,
        }
    }

    pub fn to_trade_status(self) -> TradeStatus {
        match self {
            RemoteTradeState::Closed => TradeStatus::Closed,
            RemoteTradeState::Running => TradeStatus::Running,
            RemoteTradeState::Open | RemoteTradeState::Unflagged => TradeStatus::Open,
            RemoteTradeState::Canceled => TradeStatus::Cancelled,
        }
    }
}

impl From<RemoteFlags> for TradeStatus {
    fn from(flags: RemoteFlags) -> Self {
        RemoteTradeState::from_flags(flags).to_trade_status()
    }
}

impl TradeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TradeStatus::Closed | TradeStatus::Cancelled)
    }

    /// Re-applying the current status is always allowed so that repeated
    /// syncs with unchanged venue flags are no-ops. Cancellation is only
    /// possible before a position is running; a running position ends as
    /// `closed`.
    pub fn can_transition_to(&self, next: TradeStatus) -> bool {
        use TradeStatus::*;
        if *self == next {
            return true;
        }
        match self {
            Pending => true,
            Open => matches!(next, Running | Closed | Cancelled),
            Running => matches!(next, Closed),
            Closed | Cancelled => false,
        }
    }

    pub fn transition_to(&self, next: TradeStatus) -> Result<TradeStatus, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                entity: "trade",
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl ScheduledTradeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ScheduledTradeStatus::Pending)
    }

    pub fn transition_to(&self, next: ScheduledTradeStatus) -> Result<ScheduledTradeStatus, CoreError> {
        if *self == ScheduledTradeStatus::Pending && next != ScheduledTradeStatus::Pending {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                entity: "scheduled trade",
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl ScheduledSwapStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScheduledSwapStatus::Completed | ScheduledSwapStatus::Cancelled)
    }

    pub fn transition_to(&self, next: ScheduledSwapStatus) -> Result<ScheduledSwapStatus, CoreError> {
        use ScheduledSwapStatus::*;
        let allowed = match self {
            Active => matches!(next, Paused | Completed | Cancelled),
            Paused => matches!(next, Active | Cancelled),
            Completed | Cancelled => false,
        };
        if allowed {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                entity: "scheduled swap",
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}
