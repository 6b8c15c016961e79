//! Functionality for running the fleet simulation.
use crate::manufacturer::ManufacturerID;
use crate::market::SalesResponse;
use crate::model::Model;
use crate::output::DataWriter;
use crate::output::iteration_log::IterationLog;
use anyhow::Result;
use indexmap::IndexMap;
use log::{error, info};
use std::collections::HashSet;
use std::path::Path;

pub mod aggregation;
pub mod compliance;
use compliance::LinearComplianceSearch;
pub mod consumer;
use consumer::LogitConsumerDemand;
pub mod convergence;
pub mod grid_search;
pub mod producer_consumer;
use producer_consumer::{
    ProducerConsumerError, RunContext, Termination, YearOutcome, run_producer_consumer,
};
pub mod production;
use production::ProductionLedger;

/// The results of a completed run
#[derive(Debug, Default)]
pub struct RunSummary {
    /// The finalised outcome for every manufacturer and year which succeeded
    pub outcomes: Vec<YearOutcome>,
    /// Manufacturer-years for which no compliant solution was found
    pub failures: Vec<(ManufacturerID, u32)>,
}

impl RunSummary {
    /// Whether every manufacturer complied in every year
    pub fn all_compliant(&self) -> bool {
        self.failures.is_empty()
    }

    /// The number of finalised outcomes for each way iteration ended, in order of first occurrence
    pub fn termination_counts(&self) -> IndexMap<Termination, usize> {
        let mut counts = IndexMap::new();
        for outcome in &self.outcomes {
            *counts.entry(outcome.termination).or_insert(0) += 1;
        }

        counts
    }
}

/// Run the simulation.
///
/// Years are simulated in order, and all manufacturers are finalised for a year before the next
/// year begins. A manufacturer which cannot comply in a year is left out of the remaining years.
///
/// # Arguments:
///
/// * `model` - The model to run
/// * `output_path` - The folder to which output files will be written
/// * `debug_model` - Whether to write additional information (e.g. every grid row) to CSV files
pub fn run(model: &Model, output_path: &Path, debug_model: bool) -> Result<RunSummary> {
    let compliance_search = LinearComplianceSearch::new(model);
    let consumer_demand = LogitConsumerDemand::from_parameters(&model.parameters);
    let ctx = RunContext {
        model,
        compliance_search: &compliance_search,
        consumer_demand: &consumer_demand,
        sales_response: SalesResponse::new(
            &model.new_vehicle_market,
            model.parameters.new_vehicle_sales_response_elasticity,
        )?,
    };

    let mut production = ProductionLedger::new(model.iter_years().collect());
    let mut log = IterationLog::create(output_path, &model.market_classes, debug_model)?;
    let mut writer = DataWriter::create(output_path)?;
    let mut summary = RunSummary::default();
    let mut failed = HashSet::new();
    for year in model.iter_years() {
        info!("Milestone year: {year}");

        for manufacturer in model.manufacturers.values() {
            if failed.contains(&manufacturer.id) {
                continue;
            }

            match run_producer_consumer(&ctx, manufacturer, year, &mut production, &mut log) {
                Ok(outcome) => {
                    writer.write_outcome(&outcome)?;
                    summary.outcomes.push(outcome);
                }
                Err(ProducerConsumerError::NonCompliant { manufacturer, year }) => {
                    error!(
                        "Manufacturer {manufacturer} could not comply in {year} and will be \
                        skipped for the rest of the run"
                    );
                    failed.insert(manufacturer.clone());
                    summary.failures.push((manufacturer, year));
                }
                Err(ProducerConsumerError::Fatal(err)) => return Err(err),
            }
        }

        writer.flush()?;
    }

    Ok(summary)
}
