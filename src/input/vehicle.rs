//! Code for reading vehicles and their technology options from CSV files.
use super::*;
use crate::id::IDCollection;
use crate::manufacturer::{ManufacturerID, ManufacturerMap};
use crate::market_class::{MarketClassTree, get_market_class};
use crate::units::{DollarsPerMile, DollarsPerVehicle, GramsPerMile, VehicleCount};
use crate::vehicle::{TechnologyOption, Vehicle, VehicleID, VehicleMap};
use anyhow::{bail, ensure};
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashSet;
use std::rc::Rc;

const VEHICLES_FILE_NAME: &str = "vehicles.csv";
const TECHNOLOGY_OPTIONS_FILE_NAME: &str = "technology_options.csv";

/// A vehicle as it appears in the input file
#[derive(Debug, PartialEq, Deserialize)]
struct VehicleRaw {
    vehicle_id: String,
    manufacturer_id: String,
    market_class_id: String,
    reg_class_id: String,
    base_year_registered_count: f64,
}

/// A technology option as it appears in the input file
#[derive(Debug, PartialEq, Deserialize)]
struct TechnologyOptionRaw {
    vehicle_id: String,
    year: u32,
    tech_option_id: String,
    new_vehicle_mfr_cost_dollars: f64,
    cert_co2_grams_per_mile: f64,
    retail_fuel_price: f64,
}

/// Read vehicles and their technology options from the model directory.
///
/// # Arguments
///
/// * `model_dir` - Folder containing model configuration files
/// * `manufacturers` - All manufacturers
/// * `market_classes` - The market class hierarchy
/// * `milestone_years` - Years being simulated
///
/// # Returns
///
/// A map of vehicles keyed by vehicle ID or an error.
pub fn read_vehicles(
    model_dir: &Path,
    manufacturers: &ManufacturerMap,
    market_classes: &MarketClassTree,
    milestone_years: &[u32],
) -> Result<VehicleMap> {
    let file_path = model_dir.join(VEHICLES_FILE_NAME);
    let vehicles = read_csv(&file_path)?;
    let mut vehicles = read_vehicles_from_iter(vehicles, manufacturers, market_classes)
        .with_context(|| input_err_msg(&file_path))?;

    let file_path = model_dir.join(TECHNOLOGY_OPTIONS_FILE_NAME);
    let options = read_csv(&file_path)?;
    read_technology_options_from_iter(options, &mut vehicles, milestone_years)
        .with_context(|| input_err_msg(&file_path))?;

    Ok(vehicles
        .into_iter()
        .map(|(id, vehicle)| (id, Rc::new(vehicle)))
        .collect())
}

fn read_vehicles_from_iter<I>(
    iter: I,
    manufacturers: &ManufacturerMap,
    market_classes: &MarketClassTree,
) -> Result<IndexMap<VehicleID, Vehicle>>
where
    I: IntoIterator<Item = VehicleRaw>,
{
    let mut vehicles = IndexMap::new();
    for raw in iter {
        let manufacturer_id: ManufacturerID = manufacturers.get_id(&raw.manufacturer_id)?;
        let market_class_id = market_classes.resolve_leaf(&raw.market_class_id)?;
        let fueling_class = get_market_class(market_classes, market_class_id.as_str())?.fueling_class;
        ensure!(
            raw.base_year_registered_count.is_finite() && raw.base_year_registered_count >= 0.0,
            "base_year_registered_count for vehicle {} must be a non-negative number",
            raw.vehicle_id
        );

        let id = VehicleID::from(raw.vehicle_id);
        let vehicle = Vehicle {
            id: id.clone(),
            manufacturer_id,
            market_class_id,
            fueling_class,
            reg_class_id: raw.reg_class_id.into(),
            base_year_registered_count: VehicleCount(raw.base_year_registered_count),
            technology_options: IndexMap::new(),
        };
        ensure!(
            vehicles.insert(id.clone(), vehicle).is_none(),
            "Duplicate vehicle ID {id}"
        );
    }

    for manufacturer_id in manufacturers.keys() {
        ensure!(
            vehicles
                .values()
                .any(|v| v.manufacturer_id == *manufacturer_id),
            "Manufacturer {manufacturer_id} has no vehicles"
        );
    }

    Ok(vehicles)
}

fn read_technology_options_from_iter<I>(
    iter: I,
    vehicles: &mut IndexMap<VehicleID, Vehicle>,
    milestone_years: &[u32],
) -> Result<()>
where
    I: IntoIterator<Item = TechnologyOptionRaw>,
{
    let mut seen = HashSet::new();
    for raw in iter {
        let Some(vehicle) = vehicles.get_mut(raw.vehicle_id.as_str()) else {
            bail!("Unknown vehicle ID {} found", raw.vehicle_id);
        };
        if !milestone_years.contains(&raw.year) {
            // Options for years which aren't simulated are harmless
            continue;
        }
        ensure!(
            seen.insert((vehicle.id.clone(), raw.year, raw.tech_option_id.clone())),
            "Duplicate technology option {} for vehicle {} in {}",
            raw.tech_option_id,
            vehicle.id,
            raw.year
        );
        ensure!(
            raw.new_vehicle_mfr_cost_dollars.is_finite() && raw.new_vehicle_mfr_cost_dollars >= 0.0,
            "Invalid cost for technology option {} of vehicle {}",
            raw.tech_option_id,
            vehicle.id
        );
        ensure!(
            raw.cert_co2_grams_per_mile.is_finite() && raw.retail_fuel_price.is_finite(),
            "Invalid CO2 rate or fuel price for technology option {} of vehicle {}",
            raw.tech_option_id,
            vehicle.id
        );

        vehicle
            .technology_options
            .entry(raw.year)
            .or_default()
            .push(TechnologyOption {
                id: raw.tech_option_id,
                new_vehicle_mfr_cost_dollars: DollarsPerVehicle(raw.new_vehicle_mfr_cost_dollars),
                cert_co2_grams_per_mile: GramsPerMile(raw.cert_co2_grams_per_mile),
                retail_fuel_price: DollarsPerMile(raw.retail_fuel_price),
            });
    }

    for vehicle in vehicles.values_mut() {
        for year in milestone_years {
            ensure!(
                vehicle.technology_options.contains_key(year),
                "Vehicle {} has no technology options for year {year}",
                vehicle.id
            );
        }
        vehicle.technology_options.sort_keys();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, manufacturers, market_class_tree};
    use rstest::rstest;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn vehicle_raw(id: &str, market_class_id: &str) -> VehicleRaw {
        VehicleRaw {
            vehicle_id: id.to_string(),
            manufacturer_id: "OEM_A".to_string(),
            market_class_id: market_class_id.to_string(),
            reg_class_id: "car".to_string(),
            base_year_registered_count: 100.0,
        }
    }

    fn option_raw(vehicle_id: &str, year: u32, tech_option_id: &str) -> TechnologyOptionRaw {
        TechnologyOptionRaw {
            vehicle_id: vehicle_id.to_string(),
            year,
            tech_option_id: tech_option_id.to_string(),
            new_vehicle_mfr_cost_dollars: 30_000.0,
            cert_co2_grams_per_mile: 200.0,
            retail_fuel_price: 0.1,
        }
    }

    #[rstest]
    fn test_read_vehicles(manufacturers: ManufacturerMap, market_class_tree: MarketClassTree) {
        let dir = tempdir().unwrap();
        {
            let mut file = File::create(dir.path().join(VEHICLES_FILE_NAME)).unwrap();
            writeln!(
                file,
                "vehicle_id,manufacturer_id,market_class_id,reg_class_id,base_year_registered_count
truck,OEM_A,hauling,truck,400
car,OEM_A,non_hauling,car,600"
            )
            .unwrap();
            let mut file = File::create(dir.path().join(TECHNOLOGY_OPTIONS_FILE_NAME)).unwrap();
            writeln!(
                file,
                "vehicle_id,year,tech_option_id,new_vehicle_mfr_cost_dollars,cert_co2_grams_per_mile,retail_fuel_price
truck,2020,base,40000,300,0.15
truck,2020,hybrid,43000,240,0.12
car,2020,base,25000,200,0.1
car,2030,base,25000,190,0.1"
            )
            .unwrap();
        }

        let vehicles =
            read_vehicles(dir.path(), &manufacturers, &market_class_tree, &[2020]).unwrap();
        assert_eq!(vehicles.len(), 2);
        let truck = &vehicles["truck"];
        assert_eq!(truck.market_class_id, "hauling".into());
        assert_eq!(truck.technology_options[&2020].len(), 2);
        assert_eq!(truck.base_year_registered_count, VehicleCount(400.0));

        // Options for years which aren't simulated are skipped
        assert!(!vehicles["car"].technology_options.contains_key(&2030));
    }

    #[rstest]
    fn test_read_vehicles_bad_market_class(
        manufacturers: ManufacturerMap,
        market_class_tree: MarketClassTree,
    ) {
        assert_error!(
            read_vehicles_from_iter(
                [vehicle_raw("car", "sedan")],
                &manufacturers,
                &market_class_tree
            ),
            "Unknown market class 'sedan'"
        );
    }

    #[rstest]
    fn test_read_vehicles_duplicate(
        manufacturers: ManufacturerMap,
        market_class_tree: MarketClassTree,
    ) {
        assert_error!(
            read_vehicles_from_iter(
                [
                    vehicle_raw("car", "non_hauling"),
                    vehicle_raw("car", "hauling")
                ],
                &manufacturers,
                &market_class_tree
            ),
            "Duplicate vehicle ID car"
        );
    }

    #[rstest]
    fn test_read_technology_options_missing_year(
        manufacturers: ManufacturerMap,
        market_class_tree: MarketClassTree,
    ) {
        let mut vehicles = read_vehicles_from_iter(
            [vehicle_raw("car", "non_hauling")],
            &manufacturers,
            &market_class_tree,
        )
        .unwrap();
        assert_error!(
            read_technology_options_from_iter(
                [option_raw("car", 2020, "base")],
                &mut vehicles,
                &[2020, 2021]
            ),
            "Vehicle car has no technology options for year 2021"
        );
    }

    #[rstest]
    fn test_read_technology_options_unknown_vehicle(
        manufacturers: ManufacturerMap,
        market_class_tree: MarketClassTree,
    ) {
        let mut vehicles = read_vehicles_from_iter(
            [vehicle_raw("car", "non_hauling")],
            &manufacturers,
            &market_class_tree,
        )
        .unwrap();
        assert_error!(
            read_technology_options_from_iter(
                [option_raw("bike", 2020, "base")],
                &mut vehicles,
                &[2020]
            ),
            "Unknown vehicle ID bike found"
        );
    }
}
