//! Defines the `ModelParameters` struct, which represents the contents of `model.toml`.
use crate::input::{input_err_msg, is_sorted_and_unique, read_toml};
use crate::units::{Dimensionless, Miles};
use anyhow::{Context, Result, ensure};
use log::warn;
use serde::Deserialize;
use std::path::Path;

const MODEL_PARAMETERS_FILE_NAME: &str = "model.toml";

macro_rules! define_unit_param_default {
    ($name:ident, $type: ty, $value: expr) => {
        fn $name() -> $type {
            <$type>::new($value)
        }
    };
}

macro_rules! define_param_default {
    ($name:ident, $type: ty, $value: expr) => {
        fn $name() -> $type {
            $value
        }
    };
}

define_unit_param_default!(default_sales_response_elasticity, Dimensionless, -0.4);
define_unit_param_default!(default_iteration_tolerance, Dimensionless, 0.01);
define_unit_param_default!(default_producer_share_band, Dimensionless, 0.05);
define_unit_param_default!(default_sales_ratio_tolerance, Dimensionless, 0.001);
define_unit_param_default!(default_consumer_fuel_miles, Miles, 75_000.0);
define_param_default!(default_iterate_producer_consumer, bool, true);
define_param_default!(default_max_iterations, u32, 10);
define_param_default!(default_max_sub_iterations, u32, 20);
define_param_default!(default_max_grid_candidates, usize, 200_000);
define_param_default!(default_logit_exponent, f64, -8.0);

/// Represents the contents of the entire model file.
#[derive(Debug, Deserialize, PartialEq)]
pub struct ModelParameters {
    /// Years to simulate, in order
    pub milestone_years: Vec<u32>,
    /// Price elasticity of total new vehicle sales
    #[serde(default = "default_sales_response_elasticity")]
    pub new_vehicle_sales_response_elasticity: Dimensionless,
    /// Whether to iterate between producer and consumer or accept the first consumer response
    #[serde(default = "default_iterate_producer_consumer")]
    pub iterate_producer_consumer: bool,
    /// The maximum number of producer decisions made for each manufacturer in a year
    #[serde(default = "default_max_iterations")]
    pub producer_consumer_max_iterations: u32,
    /// Relative tolerance for producer and consumer shares to be considered equal
    #[serde(default = "default_iteration_tolerance")]
    pub producer_consumer_iteration_tolerance: Dimensionless,
    /// The maximum number of pricing sub-iterations for each producer decision
    #[serde(default = "default_max_sub_iterations")]
    pub max_sub_iterations: u32,
    /// The maximum number of price multiplier combinations evaluated in one sub-iteration
    #[serde(default = "default_max_grid_candidates")]
    pub max_grid_candidates: usize,
    /// Half-width of the band around demanded shares which the producer must stay within
    #[serde(default = "default_producer_share_band")]
    pub producer_share_band: Dimensionless,
    /// Exponent applied to generalised cost in the consumer share model
    #[serde(default = "default_logit_exponent")]
    pub logit_exponent: f64,
    /// Miles of driving used to value fuel costs in consumer decisions
    #[serde(default = "default_consumer_fuel_miles")]
    pub consumer_fuel_miles: Miles,
    /// How far total sales may drift from the producer's planned sales, as a fraction
    #[serde(default = "default_sales_ratio_tolerance")]
    pub sales_ratio_tolerance: Dimensionless,
}

/// Check that the `milestone_years` parameter is valid
fn check_milestone_years(years: &[u32]) -> Result<()> {
    ensure!(!years.is_empty(), "`milestone_years` is empty");

    ensure!(
        is_sorted_and_unique(years),
        "`milestone_years` must be composed of unique values in order"
    );

    Ok(())
}

/// Check that the `new_vehicle_sales_response_elasticity` parameter is valid
fn check_sales_response_elasticity(value: Dimensionless) -> Result<()> {
    ensure!(
        value.is_finite() && value != Dimensionless(0.0) && value != Dimensionless(1.0),
        "new_vehicle_sales_response_elasticity must be a finite number other than zero or one"
    );

    Ok(())
}

/// Check that an iteration cap is valid
fn check_iteration_limit(name: &str, value: u32) -> Result<()> {
    ensure!(value > 0, "{name} cannot be zero");

    Ok(())
}

/// Check that a tolerance or fraction is in the range [0, 1)
fn check_fraction(name: &str, value: Dimensionless) -> Result<()> {
    ensure!(
        value >= Dimensionless(0.0) && value < Dimensionless(1.0),
        "{name} must be a number between zero and one"
    );

    Ok(())
}

/// Check that the `max_grid_candidates` parameter is valid
fn check_max_grid_candidates(value: usize) -> Result<()> {
    ensure!(value > 0, "max_grid_candidates cannot be zero");

    Ok(())
}

/// Check that the `logit_exponent` parameter is valid
fn check_logit_exponent(value: f64) -> Result<()> {
    ensure!(
        value.is_finite() && value < 0.0,
        "logit_exponent must be a finite number less than zero"
    );

    Ok(())
}

/// Check that the `consumer_fuel_miles` parameter is valid
fn check_consumer_fuel_miles(value: Miles) -> Result<()> {
    ensure!(
        value.is_finite() && value >= Miles(0.0),
        "consumer_fuel_miles must be a finite, non-negative number"
    );

    Ok(())
}

impl ModelParameters {
    /// Read a model file from the specified directory.
    ///
    /// # Arguments
    ///
    /// * `model_dir` - Folder containing model configuration files
    ///
    /// # Returns
    ///
    /// The model file contents as a [`ModelParameters`] struct or an error if the file is invalid
    pub fn from_path<P: AsRef<Path>>(model_dir: P) -> Result<ModelParameters> {
        let file_path = model_dir.as_ref().join(MODEL_PARAMETERS_FILE_NAME);
        let model_params: ModelParameters = read_toml(&file_path)?;

        model_params
            .validate()
            .with_context(|| input_err_msg(file_path))?;

        Ok(model_params)
    }

    /// Validate parameters after reading in file
    fn validate(&self) -> Result<()> {
        check_milestone_years(&self.milestone_years)?;
        check_sales_response_elasticity(self.new_vehicle_sales_response_elasticity)?;
        check_iteration_limit(
            "producer_consumer_max_iterations",
            self.producer_consumer_max_iterations,
        )?;
        check_iteration_limit("max_sub_iterations", self.max_sub_iterations)?;
        check_fraction(
            "producer_consumer_iteration_tolerance",
            self.producer_consumer_iteration_tolerance,
        )?;
        check_fraction("producer_share_band", self.producer_share_band)?;
        check_fraction("sales_ratio_tolerance", self.sales_ratio_tolerance)?;
        check_max_grid_candidates(self.max_grid_candidates)?;
        check_logit_exponent(self.logit_exponent)?;
        check_consumer_fuel_miles(self.consumer_fuel_miles)?;

        if !self.iterate_producer_consumer {
            warn!(
                "iterate_producer_consumer is false: the first consumer response will be accepted \
                without checking for convergence"
            );
        }

        Ok(())
    }
}
