//! Iteration between a manufacturer's compliance decision and the consumer's response to its
//! prices, for one manufacturer and year.
//!
//! Each iteration runs the compliance search (given the consumer demand accepted last time, if
//! any), then searches over price multipliers for the pricing at which consumers most nearly buy
//! what the producer plans to build. The loop stops when producer and consumer shares agree, when
//! the pricing search is cycling or when the iteration limit is reached. Exactly one solution is
//! finalised for each manufacturer and year.
use super::aggregation::calc_market_class_data;
use super::compliance::{ComplianceSearch, ConsumerDemandSignal, ProducerSolution};
use super::consumer::ConsumerDemand;
use super::convergence::{ConvergenceStatus, detect_convergence_and_thrashing};
use super::grid_search::{SalesDemandCandidate, run_grid_search};
use super::production::ProductionStore;
use crate::manufacturer::{Manufacturer, ManufacturerID};
use crate::market::SalesResponse;
use crate::model::Model;
use crate::output::iteration_log::{IterationLogRow, IterationLogSink, RowKind};
use anyhow::Context;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

/// The number of earlier selections needed to check for thrashing
const THRASHING_HISTORY: usize = 5;

/// Everything needed to run producer-consumer iteration
pub struct RunContext<'a> {
    /// The model being run
    pub model: &'a Model,
    /// Finds the producer's compliant vehicle mix
    pub compliance_search: &'a dyn ComplianceSearch,
    /// Estimates consumer shares at given prices
    pub consumer_demand: &'a dyn ConsumerDemand,
    /// Total new vehicle sales as a function of price
    pub sales_response: SalesResponse<'a>,
}

/// Why producer-consumer iteration failed for a manufacturer and year
#[derive(Debug, Error)]
pub enum ProducerConsumerError {
    /// No compliant solution was found. The manufacturer is dropped from the rest of the run.
    #[error("Manufacturer {manufacturer} cannot comply with the GHG standards in {year}")]
    NonCompliant {
        /// The manufacturer which failed
        manufacturer: ManufacturerID,
        /// The year in which it failed
        year: u32,
    },
    /// Any other error, which aborts the run
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

/// How producer-consumer iteration ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Producer and consumer shares agree
    Converged,
    /// The pricing search was cycling
    Thrashing,
    /// The maximum number of iterations was reached
    IterationLimit,
    /// Iteration is switched off, so the first consumer response was accepted
    NotIterated,
    /// The producer could not comply with the latest demand, so the previous solution was used
    RolledBack,
}

/// The finalised result for one manufacturer and year
#[derive(Debug, Clone, PartialEq)]
pub struct YearOutcome {
    /// The manufacturer
    pub manufacturer_id: ManufacturerID,
    /// The calendar year
    pub year: u32,
    /// The finalised production
    pub solution: ProducerSolution,
    /// The consumer response accepted for the finalised production
    pub accepted: SalesDemandCandidate,
    /// Convergence status of the accepted candidate
    pub status: ConvergenceStatus,
    /// How iteration ended
    pub termination: Termination,
    /// The number of producer decisions which were accepted
    pub iterations: u32,
}

/// A compliant producer decision and the consumer response accepted for it
struct Decision {
    solution: ProducerSolution,
    accepted: SalesDemandCandidate,
    status: ConvergenceStatus,
    iteration: u32,
}

/// Run producer-consumer iteration for one manufacturer and year, then finalise the result.
///
/// # Arguments
///
/// * `ctx` - The run context
/// * `manufacturer` - The manufacturer
/// * `year` - The calendar year
/// * `production` - Finalised production, which receives this year's production on success
/// * `log` - The iteration log
pub fn run_producer_consumer(
    ctx: &RunContext,
    manufacturer: &Manufacturer,
    year: u32,
    production: &mut dyn ProductionStore,
    log: &mut dyn IterationLogSink,
) -> Result<YearOutcome, ProducerConsumerError> {
    let parameters = &ctx.model.parameters;
    let non_compliant = || ProducerConsumerError::NonCompliant {
        manufacturer: manufacturer.id.clone(),
        year,
    };

    let mut demand: Option<ConsumerDemandSignal> = None;
    let mut previous: Option<Decision> = None;
    let mut termination = Termination::IterationLimit;
    for iteration in 0..parameters.producer_consumer_max_iterations {
        let mut solution =
            ctx.compliance_search
                .search(manufacturer, year, demand.as_ref(), &*production)?;

        let decision = if solution.combo.is_compliant() {
            calc_market_class_data(
                &ctx.model.market_classes,
                &solution.vehicles,
                &mut solution.combo,
            );
            let (accepted, status) =
                search_prices(ctx, manufacturer, year, iteration, &solution, log)?;
            Some(Decision {
                solution,
                accepted,
                status,
                iteration,
            })
        } else {
            warn!(
                "Manufacturer {} is non-compliant in {year} (iteration {iteration}): credits {} Mg",
                manufacturer.id, solution.combo.total_combo_credits_co2_megagrams
            );
            None
        };

        let Some(decision) = decision else {
            if previous.is_none() {
                return Err(non_compliant());
            }
            info!(
                "Rolling back to the previous solution for {} in {year}",
                manufacturer.id
            );
            termination = Termination::RolledBack;
            break;
        };

        log.append(IterationLogRow {
            manufacturer_id: manufacturer.id.clone(),
            calendar_year: year,
            iteration,
            iteration_sub: None,
            kind: RowKind::Accepted,
            status: decision.status,
            compliant: true,
            candidate: decision.accepted.clone(),
        })?;
        demand = Some(ConsumerDemandSignal::from(&decision.accepted));

        let status = decision.status;
        previous = Some(decision);
        if status.converged {
            termination = Termination::Converged;
            break;
        }
        if status.thrashing {
            termination = Termination::Thrashing;
            break;
        }
        if !parameters.iterate_producer_consumer {
            termination = Termination::NotIterated;
            break;
        }
    }

    let decision = previous.ok_or_else(non_compliant)?;
    production.finalize_production(
        year,
        &manufacturer.id,
        &decision.solution.vehicles,
        &decision.solution.combo,
    )?;
    info!(
        "Finalised {} in {year} after {} iteration(s): {termination}",
        manufacturer.id,
        decision.iteration + 1
    );

    Ok(YearOutcome {
        manufacturer_id: manufacturer.id.clone(),
        year,
        solution: decision.solution,
        accepted: decision.accepted,
        status: decision.status,
        termination,
        iterations: decision.iteration + 1,
    })
}

/// Search for the pricing at which consumers best match a producer decision.
///
/// If the sub-iteration limit is reached, the best candidate seen is accepted. If no sub-iteration
/// produced a viable candidate at all, the producer's unmodified prices are accepted instead.
fn search_prices(
    ctx: &RunContext,
    manufacturer: &Manufacturer,
    year: u32,
    iteration: u32,
    solution: &ProducerSolution,
    log: &mut dyn IterationLogSink,
) -> anyhow::Result<(SalesDemandCandidate, ConvergenceStatus)> {
    let parameters = &ctx.model.parameters;
    let tolerance = parameters.producer_consumer_iteration_tolerance;
    let initial_total_sales = ctx
        .sales_response
        .new_vehicle_sales(year, solution.combo.share_weighted_price)?
        * manufacturer.market_share;

    let mut baseline: Option<SalesDemandCandidate> = None;
    let mut best: Option<SalesDemandCandidate> = None;
    for k in 0..parameters.max_sub_iterations {
        let outcome = run_grid_search(ctx, manufacturer, year, solution, initial_total_sales, k)?;
        log.record_evaluated(&manufacturer.id, year, iteration, k, &outcome.candidates)?;
        let log_row = |kind, status, candidate: &SalesDemandCandidate| IterationLogRow {
            manufacturer_id: manufacturer.id.clone(),
            calendar_year: year,
            iteration,
            iteration_sub: Some(k),
            kind,
            status,
            compliant: true,
            candidate: candidate.clone(),
        };

        if k == 0 {
            for candidate in &outcome.candidates {
                log.append(log_row(
                    RowKind::Baseline,
                    ConvergenceStatus::default(),
                    candidate,
                ))?;
            }
            baseline = outcome
                .candidates
                .iter()
                .find(|candidate| candidate.is_unmodified())
                .cloned();
        }

        let Some(candidate) = outcome.selected_candidate() else {
            debug!(
                "No viable candidates for {} in {year} at sub-iteration {k}",
                manufacturer.id
            );
            continue;
        };

        let history = log.recent_selected(&manufacturer.id, year, iteration, THRASHING_HISTORY);
        let status = detect_convergence_and_thrashing(&candidate.shares(), &history, k, tolerance);
        log.append(log_row(RowKind::Selected, status, candidate))?;

        if best.as_ref().is_none_or(|best| improves_on(candidate, best)) {
            best = Some(candidate.clone());
        }

        if status.is_done() && candidate.score > 0.0 {
            return Ok(choose_final(candidate.clone(), status, best));
        }
    }

    if let Some(best) = best {
        warn!(
            "Pricing for {} in {year} did not converge within {} sub-iterations; accepting the \
            best candidate found",
            manufacturer.id, parameters.max_sub_iterations
        );
        return Ok((best, ConvergenceStatus::default()));
    }

    warn!(
        "No viable pricing for {} in {year} within {} sub-iterations; accepting unmodified prices",
        manufacturer.id, parameters.max_sub_iterations
    );
    let baseline = baseline.context("No unmodified prices in the sub-iteration zero grid")?;

    Ok((baseline, ConvergenceStatus::default()))
}

/// Whether `candidate` should replace `best` as the best candidate seen so far
#[allow(clippy::float_cmp)]
fn improves_on(candidate: &SalesDemandCandidate, best: &SalesDemandCandidate) -> bool {
    candidate.score > best.score
        || (candidate.score == best.score
            && candidate.total_combo_cost_dollars <= best.total_combo_cost_dollars)
}

/// Pick between the final candidate and the best seen, preferring the cheaper.
///
/// A cheaper best candidate is accepted as converged.
fn choose_final(
    last: SalesDemandCandidate,
    status: ConvergenceStatus,
    best: Option<SalesDemandCandidate>,
) -> (SalesDemandCandidate, ConvergenceStatus) {
    match best {
        Some(best) if best.total_combo_cost_dollars < last.total_combo_cost_dollars => {
            let status = ConvergenceStatus {
                converged: true,
                thrashing: false,
            };
            (best, status)
        }
        _ => (last, status),
    }
}
