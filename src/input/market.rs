//! Code for reading the new vehicle market context and GHG standards from CSV files.
use super::*;
use crate::market::{NewVehicleMarket, NewVehicleMarketMap};
use crate::standards::{GhgStandard, GhgStandardMap, RegClassID};
use crate::units::{DollarsPerVehicle, GramsPerMile, Miles, VehicleCount};
use crate::vehicle::VehicleMap;
use anyhow::ensure;
use serde::Deserialize;

const NEW_VEHICLE_MARKET_FILE_NAME: &str = "new_vehicle_market.csv";
const GHG_STANDARDS_FILE_NAME: &str = "ghg_standards.csv";

/// One year of reference market data as it appears in the input file
#[derive(Debug, PartialEq, Deserialize)]
struct NewVehicleMarketRaw {
    year: u32,
    new_vehicle_sales: f64,
    new_vehicle_price_dollars: f64,
}

/// One GHG standard as it appears in the input file
#[derive(Debug, PartialEq, Deserialize)]
struct GhgStandardRaw {
    year: u32,
    reg_class_id: String,
    target_co2_grams_per_mile: f64,
    lifetime_vmt: f64,
}

/// Read the reference new vehicle market data from the model directory.
///
/// There must be an entry for every milestone year.
pub fn read_new_vehicle_market(
    model_dir: &Path,
    milestone_years: &[u32],
) -> Result<NewVehicleMarketMap> {
    let file_path = model_dir.join(NEW_VEHICLE_MARKET_FILE_NAME);
    let raw = read_csv(&file_path)?;
    read_new_vehicle_market_from_iter(raw, milestone_years)
        .with_context(|| input_err_msg(&file_path))
}

fn read_new_vehicle_market_from_iter<I>(
    iter: I,
    milestone_years: &[u32],
) -> Result<NewVehicleMarketMap>
where
    I: IntoIterator<Item = NewVehicleMarketRaw>,
{
    let mut market = NewVehicleMarketMap::new();
    for raw in iter {
        ensure!(
            raw.new_vehicle_sales.is_finite() && raw.new_vehicle_sales > 0.0,
            "new_vehicle_sales for {} must be greater than zero",
            raw.year
        );
        ensure!(
            raw.new_vehicle_price_dollars.is_finite() && raw.new_vehicle_price_dollars > 0.0,
            "new_vehicle_price_dollars for {} must be greater than zero",
            raw.year
        );

        let entry = NewVehicleMarket {
            sales: VehicleCount(raw.new_vehicle_sales),
            price: DollarsPerVehicle(raw.new_vehicle_price_dollars),
        };
        ensure!(
            market.insert(raw.year, entry).is_none(),
            "Duplicate entry for year {}",
            raw.year
        );
    }

    for year in milestone_years {
        ensure!(
            market.contains_key(year),
            "Missing new vehicle market data for year {year}"
        );
    }
    market.sort_keys();

    Ok(market)
}

/// Read GHG standards from the model directory.
///
/// There must be a standard for the reg class of every vehicle in every milestone year.
pub fn read_ghg_standards(
    model_dir: &Path,
    vehicles: &VehicleMap,
    milestone_years: &[u32],
) -> Result<GhgStandardMap> {
    let file_path = model_dir.join(GHG_STANDARDS_FILE_NAME);
    let raw = read_csv(&file_path)?;
    read_ghg_standards_from_iter(raw, vehicles, milestone_years)
        .with_context(|| input_err_msg(&file_path))
}

fn read_ghg_standards_from_iter<I>(
    iter: I,
    vehicles: &VehicleMap,
    milestone_years: &[u32],
) -> Result<GhgStandardMap>
where
    I: IntoIterator<Item = GhgStandardRaw>,
{
    let mut standards = GhgStandardMap::new();
    for raw in iter {
        ensure!(
            raw.target_co2_grams_per_mile.is_finite() && raw.target_co2_grams_per_mile >= 0.0,
            "Invalid CO2 target for reg class {} in {}",
            raw.reg_class_id,
            raw.year
        );
        ensure!(
            raw.lifetime_vmt.is_finite() && raw.lifetime_vmt > 0.0,
            "lifetime_vmt for reg class {} in {} must be greater than zero",
            raw.reg_class_id,
            raw.year
        );

        let reg_class_id: RegClassID = raw.reg_class_id.into();
        let standard = GhgStandard {
            target_co2_grams_per_mile: GramsPerMile(raw.target_co2_grams_per_mile),
            lifetime_vmt: Miles(raw.lifetime_vmt),
        };
        ensure!(
            standards
                .insert((reg_class_id.clone(), raw.year), standard)
                .is_none(),
            "Duplicate GHG standard for reg class {reg_class_id} in {}",
            raw.year
        );
    }

    for vehicle in vehicles.values() {
        for year in milestone_years {
            ensure!(
                standards.contains_key(&(vehicle.reg_class_id.clone(), *year)),
                "Missing GHG standard for reg class {} in {year}",
                vehicle.reg_class_id
            );
        }
    }

    Ok(standards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, vehicles};
    use rstest::rstest;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn standard_raw(year: u32, reg_class_id: &str) -> GhgStandardRaw {
        GhgStandardRaw {
            year,
            reg_class_id: reg_class_id.to_string(),
            target_co2_grams_per_mile: 200.0,
            lifetime_vmt: 150_000.0,
        }
    }

    #[test]
    fn test_read_new_vehicle_market() {
        let dir = tempdir().unwrap();
        {
            let mut file = File::create(dir.path().join(NEW_VEHICLE_MARKET_FILE_NAME)).unwrap();
            writeln!(
                file,
                "year,new_vehicle_sales,new_vehicle_price_dollars
2021,1010000,30500
2020,1000000,30000"
            )
            .unwrap();
        }

        let market = read_new_vehicle_market(dir.path(), &[2020, 2021]).unwrap();
        assert_eq!(market.keys().copied().collect::<Vec<_>>(), [2020, 2021]);
        assert_eq!(market[&2020].sales, VehicleCount(1_000_000.0));
        assert_eq!(market[&2021].price, DollarsPerVehicle(30_500.0));
    }

    #[test]
    fn test_read_new_vehicle_market_missing_year() {
        let raw = NewVehicleMarketRaw {
            year: 2020,
            new_vehicle_sales: 1.0,
            new_vehicle_price_dollars: 1.0,
        };
        assert_error!(
            read_new_vehicle_market_from_iter([raw], &[2020, 2021]),
            "Missing new vehicle market data for year 2021"
        );
    }

    #[rstest]
    fn test_read_ghg_standards(vehicles: VehicleMap) {
        let standards = read_ghg_standards_from_iter(
            [standard_raw(2020, "car"), standard_raw(2020, "truck")],
            &vehicles,
            &[2020],
        )
        .unwrap();
        assert_eq!(standards.len(), 2);
        assert_eq!(
            standards[&("truck".into(), 2020)].lifetime_vmt,
            Miles(150_000.0)
        );
    }

    #[rstest]
    fn test_read_ghg_standards_missing(vehicles: VehicleMap) {
        assert_error!(
            read_ghg_standards_from_iter([standard_raw(2020, "car")], &vehicles, &[2020]),
            "Missing GHG standard for reg class truck in 2020"
        );
    }

    #[rstest]
    fn test_read_ghg_standards_duplicate(vehicles: VehicleMap) {
        assert_error!(
            read_ghg_standards_from_iter(
                [standard_raw(2020, "car"), standard_raw(2020, "car")],
                &vehicles,
                &[2020]
            ),
            "Duplicate GHG standard for reg class car in 2020"
        );
    }
}
