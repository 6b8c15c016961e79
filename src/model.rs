//! The model represents the static input data provided by the user.
use crate::manufacturer::{ManufacturerID, ManufacturerMap};
use crate::market::NewVehicleMarketMap;
use crate::market_class::MarketClassTree;
use crate::standards::GhgStandardMap;
use crate::vehicle::{Vehicle, VehicleMap};
use std::path::PathBuf;
use std::rc::Rc;

pub mod parameters;
pub use parameters::ModelParameters;

/// Model definition
#[derive(Debug)]
pub struct Model {
    /// Path to model folder
    pub model_path: PathBuf,
    /// Parameters from the model TOML file
    pub parameters: ModelParameters,
    /// The market class hierarchy
    pub market_classes: MarketClassTree,
    /// Manufacturers in the simulation
    pub manufacturers: ManufacturerMap,
    /// All vehicles, across manufacturers
    pub vehicles: VehicleMap,
    /// Reference new vehicle market for each year
    pub new_vehicle_market: NewVehicleMarketMap,
    /// GHG standards by regulatory class and year
    pub ghg_standards: GhgStandardMap,
}

impl Model {
    /// Iterate over the model's milestone years.
    pub fn iter_years(&self) -> impl Iterator<Item = u32> + '_ {
        self.parameters.milestone_years.iter().copied()
    }

    /// Iterate over the vehicles produced by a manufacturer
    pub fn iter_vehicles_for<'a>(
        &'a self,
        manufacturer_id: &'a ManufacturerID,
    ) -> impl Iterator<Item = &'a Rc<Vehicle>> {
        self.vehicles
            .values()
            .filter(move |vehicle| vehicle.manufacturer_id == *manufacturer_id)
    }
}
