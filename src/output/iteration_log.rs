//! The producer-consumer iteration log.
//!
//! Every grid search selection is logged, along with the sub-iteration zero baseline and the
//! candidate accepted at the end of each producer decision. The CSV file is flushed after every
//! row so a run which fails part way through still leaves a usable log.
use crate::manufacturer::ManufacturerID;
use crate::market_class::MarketClassTree;
use crate::simulation::convergence::{ConvergenceStatus, MarketShares};
use crate::simulation::grid_search::{ClassDemand, SalesDemandCandidate};
use anyhow::{Context, Result};
use itertools::Itertools;
use std::fs::File;
use std::path::Path;
use strum::Display;

/// The output file name for the iteration log
pub const ITERATION_LOG_FILE_NAME: &str = "producer_consumer_iteration_log.csv";

/// The output file name for every evaluated grid row (debug only)
pub const DEBUG_SALES_DEMAND_FILE_NAME: &str = "debug_sales_demand.csv";

/// Columns common to every row
const FIXED_COLUMNS: [&str; 23] = [
    "manufacturer_id",
    "calendar_year",
    "iteration",
    "iteration_sub",
    "row_kind",
    "converged",
    "thrashing",
    "compliant",
    "initial_revenue",
    "share_weighted_share_delta",
    "share_weighted_price",
    "new_vehicle_sales",
    "total_combo_cost_dollars",
    "total_combo_cert_co2_megagrams",
    "total_combo_target_co2_megagrams",
    "total_combo_credits_co2_megagrams",
    "revenue",
    "profit",
    "sales_ratio",
    "price_modification_score",
    "compliance_ratio",
    "score",
    "num_classes",
];

/// Columns repeated for each market class, prefixed with the class ID
const CLASS_COLUMNS: [&str; 8] = [
    "multiplier",
    "initial_average_cost",
    "average_cost",
    "average_fuel_price",
    "producer_share_frac",
    "producer_abs_share_frac",
    "consumer_share_frac",
    "consumer_abs_share_frac",
];

/// What a row of the iteration log represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RowKind {
    /// A sub-iteration zero row (the producer's prices, unmodified)
    Baseline,
    /// The winning row of a sub-iteration
    Selected,
    /// The candidate taken forward at the end of a producer decision
    Accepted,
    /// Any evaluated grid row (debug output only)
    Evaluated,
}

/// One row of the iteration log
#[derive(Debug, Clone, PartialEq)]
pub struct IterationLogRow {
    /// The manufacturer making the decision
    pub manufacturer_id: ManufacturerID,
    /// The calendar year
    pub calendar_year: u32,
    /// The producer decision number, starting at zero
    pub iteration: u32,
    /// The grid search sub-iteration, or `None` for accepted rows
    pub iteration_sub: Option<u32>,
    /// What the row represents
    pub kind: RowKind,
    /// Convergence status at the time the row was logged
    pub status: ConvergenceStatus,
    /// Whether the producer's decision met its CO2 target
    pub compliant: bool,
    /// The grid row itself
    pub candidate: SalesDemandCandidate,
}

/// Somewhere to record the progress of producer-consumer iteration
pub trait IterationLogSink {
    /// Record a row
    fn append(&mut self, row: IterationLogRow) -> Result<()>;

    /// The shares of the last `n` selected rows for a producer decision, oldest first
    fn recent_selected(
        &self,
        manufacturer_id: &ManufacturerID,
        year: u32,
        iteration: u32,
        n: usize,
    ) -> Vec<MarketShares>;

    /// Record every row evaluated in a sub-iteration.
    ///
    /// Only needed for debugging, so ignored by default.
    fn record_evaluated(
        &mut self,
        _manufacturer_id: &ManufacturerID,
        _year: u32,
        _iteration: u32,
        _k: u32,
        _candidates: &[SalesDemandCandidate],
    ) -> Result<()> {
        Ok(())
    }
}

/// A selected row's key and shares, kept for thrashing detection
struct SelectedShares {
    manufacturer_id: ManufacturerID,
    year: u32,
    iteration: u32,
    shares: MarketShares,
}

/// The standard [`IterationLogSink`], which keeps rows in memory and optionally writes them to CSV
#[derive(Default)]
pub struct IterationLog {
    rows: Vec<IterationLogRow>,
    selected: Vec<SelectedShares>,
    writer: Option<csv::Writer<File>>,
    debug_writer: Option<csv::Writer<File>>,
}

impl IterationLog {
    /// Create an iteration log which is only kept in memory
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Create an iteration log which is also written to the output folder
    ///
    /// # Arguments
    ///
    /// * `output_path` - Folder where files will be saved
    /// * `tree` - The market classes, which determine the per-class columns
    /// * `save_debug_info` - Whether to also write every evaluated grid row
    pub fn create(output_path: &Path, tree: &MarketClassTree, save_debug_info: bool) -> Result<Self> {
        let header = header(tree);
        let new_writer = |file_name: &str| -> Result<csv::Writer<File>> {
            let file_path = output_path.join(file_name);
            let mut writer = csv::Writer::from_path(&file_path)
                .with_context(|| format!("Could not create {}", file_path.display()))?;
            writer.write_record(&header)?;
            writer.flush()?;
            Ok(writer)
        };

        let debug_writer = if save_debug_info {
            Some(new_writer(DEBUG_SALES_DEMAND_FILE_NAME)?)
        } else {
            None
        };

        Ok(Self {
            writer: Some(new_writer(ITERATION_LOG_FILE_NAME)?),
            debug_writer,
            ..Default::default()
        })
    }

    /// All rows logged so far
    pub fn rows(&self) -> &[IterationLogRow] {
        &self.rows
    }
}

impl IterationLogSink for IterationLog {
    fn append(&mut self, row: IterationLogRow) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            writer.write_record(to_record(&row))?;
            writer.flush()?;
        }

        if row.kind == RowKind::Selected {
            self.selected.push(SelectedShares {
                manufacturer_id: row.manufacturer_id.clone(),
                year: row.calendar_year,
                iteration: row.iteration,
                shares: row.candidate.shares(),
            });
        }
        self.rows.push(row);

        Ok(())
    }

    fn recent_selected(
        &self,
        manufacturer_id: &ManufacturerID,
        year: u32,
        iteration: u32,
        n: usize,
    ) -> Vec<MarketShares> {
        let mut recent = self
            .selected
            .iter()
            .rev()
            .filter(|s| {
                s.manufacturer_id == *manufacturer_id && s.year == year && s.iteration == iteration
            })
            .take(n)
            .map(|s| s.shares.clone())
            .collect_vec();
        recent.reverse();

        recent
    }

    fn record_evaluated(
        &mut self,
        manufacturer_id: &ManufacturerID,
        year: u32,
        iteration: u32,
        k: u32,
        candidates: &[SalesDemandCandidate],
    ) -> Result<()> {
        let Some(writer) = &mut self.debug_writer else {
            return Ok(());
        };

        for candidate in candidates {
            let row = IterationLogRow {
                manufacturer_id: manufacturer_id.clone(),
                calendar_year: year,
                iteration,
                iteration_sub: Some(k),
                kind: RowKind::Evaluated,
                status: ConvergenceStatus::default(),
                compliant: true,
                candidate: candidate.clone(),
            };
            writer.write_record(to_record(&row))?;
        }
        writer.flush()?;

        Ok(())
    }
}

/// The CSV header for a set of market classes
fn header(tree: &MarketClassTree) -> Vec<String> {
    let class_columns = tree
        .iter_ids()
        .cartesian_product(CLASS_COLUMNS)
        .map(|(id, column)| format!("{id}.{column}"));

    FIXED_COLUMNS
        .iter()
        .map(ToString::to_string)
        .chain(class_columns)
        .collect()
}

/// Convert a row to CSV fields, in the same order as [`header`]
fn to_record(row: &IterationLogRow) -> Vec<String> {
    let c = &row.candidate;
    let mut record = vec![
        row.manufacturer_id.to_string(),
        row.calendar_year.to_string(),
        row.iteration.to_string(),
        row.iteration_sub.map(|k| k.to_string()).unwrap_or_default(),
        row.kind.to_string(),
        row.status.converged.to_string(),
        row.status.thrashing.to_string(),
        row.compliant.to_string(),
        c.initial_revenue.to_string(),
        c.share_weighted_share_delta.to_string(),
        c.share_weighted_price.to_string(),
        c.new_vehicle_sales.to_string(),
        c.total_combo_cost_dollars.to_string(),
        c.total_combo_cert_co2_megagrams.to_string(),
        c.total_combo_target_co2_megagrams.to_string(),
        c.total_combo_credits_co2_megagrams.to_string(),
        c.revenue.to_string(),
        c.profit.to_string(),
        c.sales_ratio.to_string(),
        c.price_modification_score.to_string(),
        c.compliance_ratio.to_string(),
        c.score.to_string(),
        c.classes.len().to_string(),
    ];
    for class in c.classes.values() {
        record.extend(class_fields(class));
    }

    record
}

fn class_fields(class: &ClassDemand) -> [String; 8] {
    [
        class.multiplier.to_string(),
        class.initial_average_cost.to_string(),
        class.average_cost.to_string(),
        class.average_fuel_price.to_string(),
        class.producer_share_frac.to_string(),
        class.producer_abs_share_frac.to_string(),
        class.consumer_share_frac.to_string(),
        class.consumer_abs_share_frac.to_string(),
    ]
}
