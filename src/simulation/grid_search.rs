//! Search over per-market-class price multipliers for the pricing which brings consumer demand
//! closest to the producer's plan.
//!
//! Each sub-iteration `k` evaluates a grid of multipliers centred on one, whose width grows with
//! `k`. Every grid row is priced by the consumer demand model and the sales response curve, then
//! rows which would change total sales, lose money or break compliance are discarded. The row
//! whose consumer shares best match the producer's shares wins.
use super::compliance::{ProducerSolution, WinningCombo, apply_total_sales};
use super::convergence::{MarketShares, SharePair};
use super::producer_consumer::RunContext;
use crate::manufacturer::Manufacturer;
use crate::market_class::MarketClassID;
use crate::units::{
    Dimensionless, Dollars, DollarsPerMile, DollarsPerVehicle, Megagrams, VehicleCount,
};
use anyhow::Result;
use indexmap::IndexMap;
use itertools::Itertools;
use log::debug;

/// The widening of the multiplier window per sub-iteration, either side of one
const HALF_RANGE_STEP: f64 = 0.05;

/// Multipliers are never lower than this
const MIN_MULTIPLIER: f64 = 0.01;

/// The most evenly spaced points in any class's multiplier window
const MAX_RANGE_SIZE: usize = 40;

/// The fewest evenly spaced points used when the grid has to be coarsened
const MIN_GRID_POINTS: usize = 3;

/// Floor on the price modification score
const MIN_PRICE_MODIFICATION_SCORE: f64 = 0.001;

/// Relative tolerance on revenue when checking that a row doesn't lose money
const PROFIT_TOLERANCE: f64 = 1e-9;

/// Pricing and demand for one market class within a grid row
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClassDemand {
    /// Price multiplier applied to the class's average cost
    pub multiplier: Dimensionless,
    /// Average cost from the producer's plan
    pub initial_average_cost: DollarsPerVehicle,
    /// Average cost with the multiplier applied (i.e. the price)
    pub average_cost: DollarsPerVehicle,
    /// Average retail fuel price from the producer's plan
    pub average_fuel_price: DollarsPerMile,
    /// Producer's share of the class within its parent
    pub producer_share_frac: Dimensionless,
    /// Producer's share of the class out of all sales
    pub producer_abs_share_frac: Dimensionless,
    /// Consumer's share of the class within its parent
    pub consumer_share_frac: Dimensionless,
    /// Consumer's share of the class out of all sales
    pub consumer_abs_share_frac: Dimensionless,
}

/// One row of the multiplier grid, with the consumer's response and its consequences
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SalesDemandCandidate {
    /// Pricing and demand for every leaf market class, in tree order
    pub classes: IndexMap<MarketClassID, ClassDemand>,
    /// Revenue of the producer's plan at unmodified prices
    pub initial_revenue: Dollars,
    /// Mismatch between producer and consumer shares, weighted by consumer absolute share
    pub share_weighted_share_delta: Dimensionless,
    /// Average price weighted by consumer absolute shares
    pub share_weighted_price: DollarsPerVehicle,
    /// Manufacturer sales at `share_weighted_price`
    pub new_vehicle_sales: VehicleCount,
    /// Manufacturing cost at the consumer's shares and sales
    pub total_combo_cost_dollars: Dollars,
    /// Lifetime certification CO2 at the consumer's shares and sales
    pub total_combo_cert_co2_megagrams: Megagrams,
    /// Lifetime target CO2 at the consumer's shares and sales
    pub total_combo_target_co2_megagrams: Megagrams,
    /// Net credits at the consumer's shares and sales
    pub total_combo_credits_co2_megagrams: Megagrams,
    /// Income from sales
    pub revenue: Dollars,
    /// Revenue minus manufacturing cost
    pub profit: Dollars,
    /// New sales as a fraction of the sales implied by the producer's plan
    pub sales_ratio: Dimensionless,
    /// How far prices moved from cost, on average
    pub price_modification_score: Dimensionless,
    /// Certification CO2 over target CO2
    pub compliance_ratio: Dimensionless,
    /// The inverse of `share_weighted_share_delta` (infinite for an exact match)
    pub score: f64,
}

impl SalesDemandCandidate {
    /// Producer and consumer shares (within parent) for each market class
    pub fn shares(&self) -> MarketShares {
        self.classes
            .iter()
            .map(|(id, class)| {
                let pair = SharePair {
                    producer: class.producer_share_frac.value(),
                    consumer: class.consumer_share_frac.value(),
                };
                (id.clone(), pair)
            })
            .collect()
    }

    /// Whether every class is priced at its average cost
    pub fn is_unmodified(&self) -> bool {
        self.classes
            .values()
            .all(|class| class.multiplier == Dimensionless(1.0))
    }

    /// Calculate the derived metrics once sales and totals are known
    fn calc_metrics(&mut self, initial_total_sales: VehicleCount) {
        self.share_weighted_share_delta = self
            .classes
            .values()
            .map(|class| {
                (class.producer_share_frac - class.consumer_share_frac).abs()
                    * class.consumer_abs_share_frac
            })
            .sum();
        self.revenue = self.share_weighted_price * self.new_vehicle_sales;
        self.profit = self.revenue - self.total_combo_cost_dollars;
        self.sales_ratio = if initial_total_sales == VehicleCount(0.0) {
            Dimensionless(0.0)
        } else {
            self.new_vehicle_sales / initial_total_sales
        };

        let mean_modification = self
            .classes
            .values()
            .map(|class| (1.0 - class.multiplier.value()).abs())
            .sum::<f64>()
            / self.classes.len().max(1) as f64;
        self.price_modification_score =
            Dimensionless(mean_modification.max(MIN_PRICE_MODIFICATION_SCORE));

        self.score = if self.share_weighted_share_delta == Dimensionless(0.0) {
            f64::INFINITY
        } else {
            1.0 / self.share_weighted_share_delta.value()
        };
    }

    /// Whether the row keeps total sales, makes no loss and stays compliant
    pub fn is_viable(&self, sales_ratio_tolerance: Dimensionless) -> bool {
        let sales_ok = (1.0 - self.sales_ratio.value()).abs() <= sales_ratio_tolerance.value();
        let profit_ok = self.profit.value() >= -PROFIT_TOLERANCE * self.revenue.value().abs();
        let credits_ok = self.total_combo_credits_co2_megagrams >= Megagrams(0.0);

        sales_ok && profit_ok && credits_ok
    }
}

/// The number of evenly spaced multipliers in each class's window at sub-iteration `k`
pub fn range_size(k: u32) -> usize {
    // Truncation is intended here
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let size = (10.0 * (1.0 + f64::from(k) / 2.0)) as usize;
    size.min(MAX_RANGE_SIZE)
}

/// `num` evenly spaced values from `start` to `stop` inclusive
fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    if num <= 1 {
        return vec![start];
    }

    let step = (stop - start) / (num - 1) as f64;
    let mut values: Vec<_> = (0..num).map(|i| start + step * i as f64).collect();
    values[num - 1] = stop;

    values
}

/// The multipliers tried for every class at sub-iteration `k`.
///
/// The values are sorted, unique and always include exactly 1.0.
pub fn multiplier_range(k: u32, num_points: usize) -> Vec<f64> {
    let half_range = HALF_RANGE_STEP * f64::from(k);
    let low = (1.0 - half_range).max(MIN_MULTIPLIER);
    let high = 1.0 + half_range;

    let mut values = linspace(low, high, num_points);
    values.push(1.0);
    values.sort_by(f64::total_cmp);
    values.dedup();

    values
}

/// The number of evenly spaced points per class, keeping the grid within `max_candidates` rows
fn points_per_class(k: u32, num_classes: usize, max_candidates: usize) -> usize {
    let full = range_size(k);

    // Allow one extra point per class for the identity multiplier
    let exponent = u32::try_from(num_classes).unwrap_or(u32::MAX);
    let full_count = (full + 1).checked_pow(exponent);
    if full_count.is_some_and(|count| count <= max_candidates) {
        return full;
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let reduced = (max_candidates as f64)
        .powf(1.0 / num_classes as f64)
        .floor() as usize;
    let points = reduced.saturating_sub(1).max(MIN_GRID_POINTS).min(full);
    debug!(
        "Multiplier grid for {num_classes} classes at sub-iteration {k} reduced from {full} to \
        {points} points per class"
    );

    points
}

/// Build the grid of price multiplier combinations for sub-iteration `k`.
///
/// Costs are scaled by the multipliers; consumer shares and sales are left to be filled in.
pub fn build_candidates(
    combo: &WinningCombo,
    k: u32,
    max_candidates: usize,
) -> Vec<SalesDemandCandidate> {
    let num_classes = combo.market_classes.len();
    let range = multiplier_range(k, points_per_class(k, num_classes, max_candidates));
    let initial_revenue: Dollars = combo
        .market_classes
        .values()
        .map(|aggregate| aggregate.sales * aggregate.average_cost)
        .sum();

    (0..num_classes)
        .map(|_| range.iter().copied())
        .multi_cartesian_product()
        .map(|multipliers| {
            let classes = combo
                .market_classes
                .iter()
                .zip(multipliers)
                .map(|((id, aggregate), multiplier)| {
                    let multiplier = Dimensionless(multiplier);
                    let demand = ClassDemand {
                        multiplier,
                        initial_average_cost: aggregate.average_cost,
                        average_cost: aggregate.average_cost * multiplier,
                        average_fuel_price: aggregate.average_fuel_price,
                        producer_share_frac: aggregate.producer_share_frac,
                        producer_abs_share_frac: aggregate.producer_abs_share_frac,
                        ..Default::default()
                    };
                    (id.clone(), demand)
                })
                .collect();

            SalesDemandCandidate {
                classes,
                initial_revenue,
                ..Default::default()
            }
        })
        .collect()
}

/// The result of evaluating one multiplier grid
#[derive(Debug, Clone, PartialEq)]
pub struct GridSearchOutcome {
    /// Every evaluated row, in grid order
    pub candidates: Vec<SalesDemandCandidate>,
    /// Index of the winning row, if any row was viable
    pub selected: Option<usize>,
}

impl GridSearchOutcome {
    /// The winning row, if any
    pub fn selected_candidate(&self) -> Option<&SalesDemandCandidate> {
        self.selected.map(|idx| &self.candidates[idx])
    }
}

/// Pick the viable row with the highest score (the first such row on ties)
pub fn select_candidate(
    candidates: &[SalesDemandCandidate],
    sales_ratio_tolerance: Dimensionless,
) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, candidate) in candidates.iter().enumerate() {
        if !candidate.is_viable(sales_ratio_tolerance) {
            continue;
        }
        if best.is_none_or(|(_, score)| candidate.score > score) {
            best = Some((idx, candidate.score));
        }
    }

    best.map(|(idx, _)| idx)
}

/// Evaluate the multiplier grid for sub-iteration `k` of a producer decision.
///
/// # Arguments
///
/// * `ctx` - The run context
/// * `manufacturer` - The manufacturer whose vehicles are being priced
/// * `year` - The calendar year
/// * `solution` - The producer's decision, with market class aggregates filled in
/// * `initial_total_sales` - Manufacturer sales at the producer's share-weighted price
/// * `k` - The sub-iteration number
pub fn run_grid_search(
    ctx: &RunContext,
    manufacturer: &Manufacturer,
    year: u32,
    solution: &ProducerSolution,
    initial_total_sales: VehicleCount,
    k: u32,
) -> Result<GridSearchOutcome> {
    let parameters = &ctx.model.parameters;
    let mut candidates = build_candidates(&solution.combo, k, parameters.max_grid_candidates);

    ctx.consumer_demand
        .demanded_shares(year, &ctx.model.market_classes, &mut candidates)?;
    for candidate in &mut candidates {
        candidate.share_weighted_price = candidate
            .classes
            .values()
            .map(|class| class.average_cost * class.consumer_abs_share_frac)
            .sum();
        candidate.new_vehicle_sales = ctx
            .sales_response
            .new_vehicle_sales(year, candidate.share_weighted_price)?
            * manufacturer.market_share;
    }

    apply_total_sales(&solution.vehicles, &mut candidates);
    for candidate in &mut candidates {
        candidate.calc_metrics(initial_total_sales);
    }

    let selected = select_candidate(&candidates, parameters.sales_ratio_tolerance);
    debug!(
        "Sub-iteration {k} for {} in {year}: {} candidates, {} viable",
        manufacturer.id,
        candidates.len(),
        candidates
            .iter()
            .filter(|c| c.is_viable(parameters.sales_ratio_tolerance))
            .count()
    );

    Ok(GridSearchOutcome {
        candidates,
        selected,
    })
}
