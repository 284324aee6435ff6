//! Position limits.
//!
//! Pure predicates over the current position. An exceeded limit only stops new
//! entries in the same direction. Nothing here ever forces an exit.

use crate::types::{Side, SignedSize};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Exposure bounds, in contracts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskParams {
    /// When false both limit predicates always report false.
    pub check_position_limits: bool,
    pub min_position: Decimal,
    pub max_position: Decimal,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            check_position_limits: false,
            min_position: dec!(-10000),
            max_position: dec!(10000),
        }
    }
}

/// Result of a risk check before sizing an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskCheckResult {
    Allowed,
    Blocked(RiskViolation),
}

impl RiskCheckResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RiskCheckResult::Allowed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskViolation {
    LongLimitExceeded { position: Decimal, maximum: Decimal },
    ShortLimitExceeded { position: Decimal, minimum: Decimal },
}

#[derive(Debug, Clone, Default)]
pub struct RiskGuard {
    params: RiskParams,
}

impl RiskGuard {
    pub fn new(params: RiskParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &RiskParams {
        &self.params
    }

    pub fn long_limit_exceeded(&self, position: SignedSize) -> bool {
        self.params.check_position_limits && position.value() >= self.params.max_position
    }

    pub fn short_limit_exceeded(&self, position: SignedSize) -> bool {
        self.params.check_position_limits && position.value() <= self.params.min_position
    }

    /// Check whether a new entry on `side` may be sized.
    pub fn check_entry(&self, side: Side, position: SignedSize) -> RiskCheckResult {
        match side {
            Side::Buy if self.long_limit_exceeded(position) => {
                RiskCheckResult::Blocked(RiskViolation::LongLimitExceeded {
                    position: position.value(),
                    maximum: self.params.max_position,
                })
            }
            Side::Sell if self.short_limit_exceeded(position) => {
                RiskCheckResult::Blocked(RiskViolation::ShortLimitExceeded {
                    position: position.value(),
                    minimum: self.params.min_position,
                })
            }
            _ => RiskCheckResult::Allowed,
        }
    }
}
