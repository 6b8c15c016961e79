//! Vehicles and the technology packages available to them.
use crate::id::{define_id_getter, define_id_type};
use crate::manufacturer::ManufacturerID;
use crate::market_class::{FuelingClass, MarketClassID};
use crate::standards::RegClassID;
use crate::units::{DollarsPerMile, DollarsPerVehicle, GramsPerMile, Miles, VehicleCount};
use anyhow::{Context, Result};
use indexmap::IndexMap;
use std::rc::Rc;

define_id_type! {VehicleID}

/// A map of [`Vehicle`]s, keyed by vehicle ID
pub type VehicleMap = IndexMap<VehicleID, Rc<Vehicle>>;

/// A vehicle model offered by a manufacturer
#[derive(Debug, Clone, PartialEq)]
pub struct Vehicle {
    /// Unique identifier for the vehicle
    pub id: VehicleID,
    /// The manufacturer which produces this vehicle
    pub manufacturer_id: ManufacturerID,
    /// The (leaf) market class this vehicle is sold in
    pub market_class_id: MarketClassID,
    /// Fuelling class of the vehicle's market class
    pub fueling_class: FuelingClass,
    /// Regulatory class, which determines the applicable GHG standard
    pub reg_class_id: RegClassID,
    /// Number of vehicles registered in the year before the first simulated year
    pub base_year_registered_count: VehicleCount,
    /// Technology options available for each year
    pub technology_options: IndexMap<u32, Vec<TechnologyOption>>,
}
define_id_getter! {Vehicle, VehicleID}

impl Vehicle {
    /// The technology options available in a given year
    pub fn technology_options_for(&self, year: u32) -> Result<&[TechnologyOption]> {
        self.technology_options
            .get(&year)
            .map(Vec::as_slice)
            .with_context(|| {
                format!(
                    "Vehicle {} has no technology options for year {year}",
                    self.id
                )
            })
    }
}

/// One technology package for a vehicle in a particular year
#[derive(Debug, Clone, PartialEq)]
pub struct TechnologyOption {
    /// Identifier for the technology package (unique per vehicle and year)
    pub id: String,
    /// Manufacturer cost of building one vehicle with this package
    pub new_vehicle_mfr_cost_dollars: DollarsPerVehicle,
    /// Certification CO2 emissions rate
    pub cert_co2_grams_per_mile: GramsPerMile,
    /// Retail fuel (or electricity) cost of driving one mile
    pub retail_fuel_price: DollarsPerMile,
}

/// A vehicle with one technology option applied, sized to a number of sales.
///
/// These are the rows of a producer's solution and are what gets finalised as production.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateVehicle {
    /// The vehicle this candidate is built from
    pub vehicle_id: VehicleID,
    /// The technology option applied to the vehicle
    pub tech_option_id: String,
    /// The vehicle's manufacturer
    pub manufacturer_id: ManufacturerID,
    /// Leaf market class
    pub market_class_id: MarketClassID,
    /// Regulatory class
    pub reg_class_id: RegClassID,
    /// Fuelling class
    pub fueling_class: FuelingClass,
    /// Manufacturer cost per vehicle
    pub new_vehicle_mfr_cost_dollars: DollarsPerVehicle,
    /// Certification CO2 emissions rate
    pub cert_co2_grams_per_mile: GramsPerMile,
    /// CO2 target from the applicable standard
    pub target_co2_grams_per_mile: GramsPerMile,
    /// Lifetime miles used for CO2 mass accounting
    pub lifetime_vmt: Miles,
    /// Retail fuel cost per mile
    pub retail_fuel_price: DollarsPerMile,
    /// Number of vehicles produced
    pub initial_registered_count: VehicleCount,
}
