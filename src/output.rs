//! The module responsible for writing output data to disk.
use crate::manufacturer::ManufacturerID;
use crate::market_class::{FuelingClass, MarketClassID};
use crate::simulation::producer_consumer::{Termination, YearOutcome};
use crate::standards::RegClassID;
use crate::units::{Dimensionless, Dollars, DollarsPerVehicle, GramsPerMile, Megagrams, VehicleCount};
use crate::vehicle::{CandidateVehicle, VehicleID};
use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::fs;
use std::fs::File;
use std::path::{Path, PathBuf};

pub mod iteration_log;
pub mod metadata;

/// The root folder in which model-specific output folders will be created
const OUTPUT_DIRECTORY_ROOT: &str = "fleetsim_results";

/// The output file name for finalised production
const PRODUCTION_FILE_NAME: &str = "production.csv";

/// The output file name for per-manufacturer annual results
const MANUFACTURER_ANNUAL_DATA_FILE_NAME: &str = "manufacturer_annual_data.csv";

/// Get the default output directory for the model specified at `model_dir`
pub fn get_output_dir(model_dir: &Path) -> Result<PathBuf> {
    // Canonicalise in case the user has specified "."
    let model_dir = model_dir
        .canonicalize()
        .context("Could not resolve path to model")?;

    let model_name = model_dir
        .file_name()
        .context("Model cannot be in root folder")?
        .to_str()
        .context("Invalid chars in model dir name")?;

    Ok([OUTPUT_DIRECTORY_ROOT, model_name].iter().collect())
}

/// Create a new output directory, which must be empty unless `allow_overwrite` is set.
///
/// Returns whether an existing directory's contents are being overwritten.
pub fn create_output_directory(output_dir: &Path, allow_overwrite: bool) -> Result<bool> {
    if output_dir.is_dir() {
        let is_empty = output_dir.read_dir()?.next().is_none();
        if is_empty {
            return Ok(false);
        }

        ensure!(
            allow_overwrite,
            "Output folder {} already exists and is not empty. Use --overwrite to replace it.",
            output_dir.display()
        );
        fs::remove_dir_all(output_dir)?;
        fs::create_dir_all(output_dir)?;
        return Ok(true);
    }

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Could not create output folder {}", output_dir.display()))?;

    Ok(false)
}

/// A finalised vehicle in the production CSV file
#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct ProductionRow {
    calendar_year: u32,
    manufacturer_id: ManufacturerID,
    vehicle_id: VehicleID,
    tech_option_id: String,
    market_class_id: MarketClassID,
    reg_class_id: RegClassID,
    fueling_class: FuelingClass,
    sales: VehicleCount,
    new_vehicle_mfr_cost_dollars: DollarsPerVehicle,
    cert_co2_grams_per_mile: GramsPerMile,
    target_co2_grams_per_mile: GramsPerMile,
}

impl ProductionRow {
    fn new(calendar_year: u32, vehicle: &CandidateVehicle) -> Self {
        Self {
            calendar_year,
            manufacturer_id: vehicle.manufacturer_id.clone(),
            vehicle_id: vehicle.vehicle_id.clone(),
            tech_option_id: vehicle.tech_option_id.clone(),
            market_class_id: vehicle.market_class_id.clone(),
            reg_class_id: vehicle.reg_class_id.clone(),
            fueling_class: vehicle.fueling_class,
            sales: vehicle.initial_registered_count,
            new_vehicle_mfr_cost_dollars: vehicle.new_vehicle_mfr_cost_dollars,
            cert_co2_grams_per_mile: vehicle.cert_co2_grams_per_mile,
            target_co2_grams_per_mile: vehicle.target_co2_grams_per_mile,
        }
    }
}

/// Represents a row in the manufacturer annual data CSV file
#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct ManufacturerAnnualRow {
    calendar_year: u32,
    manufacturer_id: ManufacturerID,
    termination: Termination,
    iterations: u32,
    converged: bool,
    thrashing: bool,
    total_sales: VehicleCount,
    total_cost_dollars: Dollars,
    cert_co2_megagrams: Megagrams,
    target_co2_megagrams: Megagrams,
    credits_co2_megagrams: Megagrams,
    compliance_ratio: Dimensionless,
    share_weighted_price: DollarsPerVehicle,
    consumer_share_weighted_price: DollarsPerVehicle,
    consumer_new_vehicle_sales: VehicleCount,
}

impl ManufacturerAnnualRow {
    fn new(outcome: &YearOutcome) -> Self {
        let combo = &outcome.solution.combo;
        Self {
            calendar_year: outcome.year,
            manufacturer_id: outcome.manufacturer_id.clone(),
            termination: outcome.termination,
            iterations: outcome.iterations,
            converged: outcome.status.converged,
            thrashing: outcome.status.thrashing,
            total_sales: combo.total_sales,
            total_cost_dollars: combo.total_combo_cost_dollars,
            cert_co2_megagrams: combo.total_combo_cert_co2_megagrams,
            target_co2_megagrams: combo.total_combo_target_co2_megagrams,
            credits_co2_megagrams: combo.total_combo_credits_co2_megagrams,
            compliance_ratio: combo.initial_compliance_ratio,
            share_weighted_price: combo.share_weighted_price,
            consumer_share_weighted_price: outcome.accepted.share_weighted_price,
            consumer_new_vehicle_sales: outcome.accepted.new_vehicle_sales,
        }
    }
}

/// An object for writing finalised results to file
pub struct DataWriter {
    production_writer: csv::Writer<File>,
    annual_writer: csv::Writer<File>,
}

impl DataWriter {
    /// Open CSV files to write output data to
    ///
    /// # Arguments
    ///
    /// * `output_path` - Folder where files will be saved
    pub fn create(output_path: &Path) -> Result<Self> {
        let new_writer = |file_name| {
            let file_path = output_path.join(file_name);
            csv::Writer::from_path(file_path)
        };

        Ok(Self {
            production_writer: new_writer(PRODUCTION_FILE_NAME)?,
            annual_writer: new_writer(MANUFACTURER_ANNUAL_DATA_FILE_NAME)?,
        })
    }

    /// Write the finalised production and annual summary for a manufacturer-year
    pub fn write_outcome(&mut self, outcome: &YearOutcome) -> Result<()> {
        for vehicle in &outcome.solution.vehicles {
            self.production_writer
                .serialize(ProductionRow::new(outcome.year, vehicle))?;
        }
        self.annual_writer
            .serialize(ManufacturerAnnualRow::new(outcome))?;

        Ok(())
    }

    /// Flush the underlying streams
    pub fn flush(&mut self) -> Result<()> {
        self.production_writer.flush()?;
        self.annual_writer.flush()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{candidate_vehicles, sales_demand_candidate};
    use crate::simulation::compliance::{ProducerSolution, WinningCombo};
    use crate::simulation::convergence::ConvergenceStatus;
    use itertools::{Itertools, assert_equal};
    use rstest::rstest;
    use std::iter;
    use tempfile::tempdir;

    fn outcome(vehicles: Vec<CandidateVehicle>) -> YearOutcome {
        let combo = WinningCombo::from_vehicles(&vehicles);
        YearOutcome {
            manufacturer_id: "OEM_A".into(),
            year: 2020,
            solution: ProducerSolution { vehicles, combo },
            accepted: sales_demand_candidate(0.4, 1000.0),
            status: ConvergenceStatus {
                converged: true,
                thrashing: false,
            },
            termination: Termination::Converged,
            iterations: 2,
        }
    }

    #[rstest]
    fn test_write_outcome(candidate_vehicles: Vec<CandidateVehicle>) {
        let outcome = outcome(candidate_vehicles);
        let dir = tempdir().unwrap();

        {
            let mut writer = DataWriter::create(dir.path()).unwrap();
            writer.write_outcome(&outcome).unwrap();
            writer.flush().unwrap();
        }

        // Read back and compare
        let records: Vec<ProductionRow> =
            csv::Reader::from_path(dir.path().join(PRODUCTION_FILE_NAME))
                .unwrap()
                .into_deserialize()
                .try_collect()
                .unwrap();
        assert_equal(
            records,
            outcome
                .solution
                .vehicles
                .iter()
                .map(|vehicle| ProductionRow::new(2020, vehicle)),
        );

        let records: Vec<ManufacturerAnnualRow> =
            csv::Reader::from_path(dir.path().join(MANUFACTURER_ANNUAL_DATA_FILE_NAME))
                .unwrap()
                .into_deserialize()
                .try_collect()
                .unwrap();
        assert_equal(records, iter::once(ManufacturerAnnualRow::new(&outcome)));
    }

    #[test]
    fn test_create_output_directory() {
        let dir = tempdir().unwrap();
        let output_dir = dir.path().join("results");

        // New folder
        assert!(!create_output_directory(&output_dir, false).unwrap());
        assert!(output_dir.is_dir());

        // Existing but empty
        assert!(!create_output_directory(&output_dir, false).unwrap());

        // Existing and not empty
        fs::write(output_dir.join("file.txt"), "data").unwrap();
        assert!(create_output_directory(&output_dir, false).is_err());
        assert!(create_output_directory(&output_dir, true).unwrap());
        assert!(!output_dir.join("file.txt").exists());
    }
}
