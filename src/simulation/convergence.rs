//! Checks for agreement between producer and consumer market shares.
use crate::market_class::MarketClassID;
use crate::units::Dimensionless;
use indexmap::IndexMap;

/// Classes with a producer share below this are ignored when checking convergence
const MAJORITY_SHARE: f64 = 0.5;

/// Thrashing is only considered from this sub-iteration onwards
const MIN_THRASHING_SUB_ITERATION: u32 = 5;

/// How many selections back to look for a repeating pattern
const THRASHING_LAGS: [usize; 3] = [3, 4, 5];

/// Producer and consumer shares of one market class, within its parent
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SharePair {
    /// The producer's share
    pub producer: f64,
    /// The consumer's share
    pub consumer: f64,
}

impl SharePair {
    /// Whether producer and consumer agree to within `tolerance`
    fn agrees(self, tolerance: f64) -> bool {
        relative_deviation(self.producer, self.consumer) <= tolerance
    }
}

/// Shares for each leaf market class
pub type MarketShares = IndexMap<MarketClassID, SharePair>;

/// The outcome of checking a grid search selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConvergenceStatus {
    /// Producer and consumer shares agree
    pub converged: bool,
    /// The search is cycling between a handful of selections
    pub thrashing: bool,
}

impl ConvergenceStatus {
    /// Whether the search can stop
    pub fn is_done(self) -> bool {
        self.converged || self.thrashing
    }
}

/// `|1 - a / b|`, which is zero if both values are zero and infinite if only `b` is
pub fn relative_deviation(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        return if a == 0.0 { 0.0 } else { f64::INFINITY };
    }

    (1.0 - a / b).abs()
}

/// Whether producer and consumer agree for every class with a majority producer share.
///
/// If no class has a majority share, the shares are considered to have converged.
pub fn is_converged(shares: &MarketShares, tolerance: Dimensionless) -> bool {
    shares
        .values()
        .filter(|pair| pair.producer >= MAJORITY_SHARE)
        .all(|pair| pair.agrees(tolerance.value()))
}

/// Whether the selections of the current producer decision are cycling.
///
/// # Arguments
///
/// * `current` - Shares of the latest selection
/// * `history` - Shares of the earlier selections for the same producer decision, oldest first
/// * `k` - The current sub-iteration
/// * `tolerance` - Relative tolerance for shares to be considered equal
pub fn is_thrashing(
    current: &MarketShares,
    history: &[MarketShares],
    k: u32,
    tolerance: Dimensionless,
) -> bool {
    let max_lag = THRASHING_LAGS.iter().copied().max().unwrap_or_default();
    if k < MIN_THRASHING_SUB_ITERATION || history.len() < max_lag {
        return false;
    }

    let tolerance = tolerance.value();
    current.iter().all(|(id, pair)| {
        if pair.agrees(tolerance) {
            return true;
        }

        THRASHING_LAGS.iter().any(|lag| {
            history[history.len() - lag].get(id).is_some_and(|earlier| {
                relative_deviation(pair.producer, earlier.producer) <= tolerance
                    && relative_deviation(pair.consumer, earlier.consumer) <= tolerance
            })
        })
    })
}

/// Check a selection for convergence and thrashing
pub fn detect_convergence_and_thrashing(
    current: &MarketShares,
    history: &[MarketShares],
    k: u32,
    tolerance: Dimensionless,
) -> ConvergenceStatus {
    ConvergenceStatus {
        converged: is_converged(current, tolerance),
        thrashing: is_thrashing(current, history, k, tolerance),
    }
}
