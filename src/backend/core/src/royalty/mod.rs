//! Depth-decayed royalty rates.
//!
//! Rates are basis points (1% = 100 bps). The rate for depth `d` starts at
//! the initial rate and is multiplied by `decay_factor / 100` once per level,
//! truncating after every step, then raised to the floor. Depth 0 is the
//! primary author and always gets the initial rate. Depths past `max_depth`
//! get nothing.

use serde::{Deserialize, Serialize};

use crate::config::RoyaltyConfig;
use crate::db::ParametersRow;
use crate::error::{CascadeError, Result};
use crate::types::Amount;

/// Default initial rate, percent.
pub const DEFAULT_INITIAL_RATE: u32 = 10;
/// Default per-level decay factor, percent of the previous level.
pub const DEFAULT_DECAY_FACTOR: u32 = 65;
/// Default decay period, seconds (30 days).
pub const DEFAULT_DECAY_PERIOD: u64 = 30 * 24 * 60 * 60;

// ═══════════════════════════════════════════════════════════════════════════════
// Parameters
// ═══════════════════════════════════════════════════════════════════════════════

/// A published royalty parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoyaltyParameters {
    /// Percent of the price paid at depth 0.
    pub initial_rate: u32,
    /// Percent of the previous level's rate kept per level.
    pub decay_factor: u32,
    /// Seconds; recorded and served, not used by the depth schedule.
    pub decay_period: u64,
}

impl Default for RoyaltyParameters {
    fn default() -> Self {
        Self {
            initial_rate: DEFAULT_INITIAL_RATE,
            decay_factor: DEFAULT_DECAY_FACTOR,
            decay_period: DEFAULT_DECAY_PERIOD,
        }
    }
}

impl RoyaltyParameters {
    pub fn validate(&self) -> Result<()> {
        if self.initial_rate > 100 {
            return Err(CascadeError::invalid_parameters(format!(
                "initial_rate must be within 0..=100, got {}",
                self.initial_rate
            )));
        }
        if self.decay_factor > 100 {
            return Err(CascadeError::invalid_parameters(format!(
                "decay_factor must be within 0..=100, got {}",
                self.decay_factor
            )));
        }
        Ok(())
    }
}

impl TryFrom<&ParametersRow> for RoyaltyParameters {
    type Error = CascadeError;

    fn try_from(row: &ParametersRow) -> Result<Self> {
        let params = Self {
            initial_rate: u32::try_from(row.initial_rate)
                .map_err(|_| CascadeError::internal("stored initial_rate out of range"))?,
            decay_factor: u32::try_from(row.decay_factor)
                .map_err(|_| CascadeError::internal("stored decay_factor out of range"))?,
            decay_period: u64::try_from(row.decay_period)
                .map_err(|_| CascadeError::internal("stored decay_period out of range"))?,
        };
        params.validate()?;
        Ok(params)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Calculator
// ═══════════════════════════════════════════════════════════════════════════════

/// Computes rates and amounts for a fixed depth limit and floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoyaltyCalculator {
    max_depth: u32,
    floor_rate_bps: u32,
}

impl RoyaltyCalculator {
    pub fn new(max_depth: u32, floor_rate_bps: u32) -> Self {
        Self {
            max_depth,
            floor_rate_bps,
        }
    }

    pub fn from_config(config: &RoyaltyConfig) -> Self {
        Self::new(config.max_depth, config.floor_rate_bps)
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Rate in basis points for a depth, `None` past `max_depth`.
    ///
    /// The floor never lifts a dependency above the primary author's rate, so
    /// the schedule stays non-increasing in depth.
    pub fn rate(&self, depth: u32, params: &RoyaltyParameters) -> Option<u32> {
        if depth > self.max_depth {
            return None;
        }

        let initial_bps = u64::from(params.initial_rate) * 100;
        let mut bps = initial_bps;
        for _ in 0..depth {
            bps = bps * u64::from(params.decay_factor) / 100;
        }
        if depth > 0 {
            bps = bps.max(u64::from(self.floor_rate_bps).min(initial_bps));
        }

        Some(u32::try_from(bps).unwrap_or(u32::MAX))
    }

    /// `(amount, rate_bps)` owed at a depth, `None` past `max_depth`.
    pub fn allocate(
        &self,
        price: &Amount,
        depth: u32,
        params: &RoyaltyParameters,
    ) -> Option<(Amount, u32)> {
        self.rate(depth, params)
            .map(|bps| (price.scale_bps(bps), bps))
    }
}

impl Default for RoyaltyCalculator {
    fn default() -> Self {
        Self::from_config(&RoyaltyConfig::default())
    }
}

/// Cap a sequence of amounts so their sum never exceeds `price`.
///
/// Amounts are taken in order; the one that would cross the price is cut to
/// the remainder and every later one becomes zero.
pub fn cap_to_price(price: &Amount, amounts: &mut [Amount]) {
    let mut remaining = price.clone();
    for amount in amounts.iter_mut() {
        if *amount > remaining {
            *amount = remaining.clone();
        }
        remaining = remaining.saturating_sub(amount);
    }
}

/// Rate as a human percentage string, e.g. `650` → `"6.5"`.
pub fn bps_to_percent(bps: u32) -> String {
    let whole = bps / 100;
    let frac = bps % 100;
    match frac {
        0 => whole.to_string(),
        f if f % 10 == 0 => format!("{}.{}", whole, f / 10),
        f => format!("{}.{:02}", whole, f),
    }
}
