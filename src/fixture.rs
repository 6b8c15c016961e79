//! Fixtures for tests

use crate::manufacturer::{Manufacturer, ManufacturerMap};
use crate::market::{NewVehicleMarket, NewVehicleMarketMap};
use crate::market_class::{FuelingClass, MarketClass, MarketClassTree};
use crate::model::{Model, ModelParameters};
use crate::simulation::aggregation::calc_market_class_data;
use crate::simulation::compliance::WinningCombo;
use crate::simulation::grid_search::{ClassDemand, SalesDemandCandidate};
use crate::standards::{GhgStandard, GhgStandardMap};
use crate::units::{
    Dimensionless, DollarsPerMile, DollarsPerVehicle, GramsPerMile, Miles, VehicleCount,
};
use crate::vehicle::{CandidateVehicle, TechnologyOption, Vehicle, VehicleMap};
use indexmap::indexmap;
use rstest::fixture;
use std::path::PathBuf;
use std::rc::Rc;

/// Assert that an error with the given message occurs
macro_rules! assert_error {
    ($result:expr, $msg:expr) => {
        assert_eq!(
            $result.unwrap_err().chain().next().unwrap().to_string(),
            $msg
        );
    };
}
pub(crate) use assert_error;

/// A market class with no share limits
pub fn market_class(id: &str, fueling_class: FuelingClass) -> MarketClass {
    MarketClass {
        id: id.into(),
        fueling_class,
        share_weight: Dimensionless(1.0),
        min_share: Dimensionless(0.0),
        max_share: Dimensionless(1.0),
    }
}

#[fixture]
pub fn market_class_tree() -> MarketClassTree {
    MarketClassTree::from_market_classes([
        market_class("hauling", FuelingClass::ICE),
        market_class("non_hauling", FuelingClass::ICE),
    ])
    .unwrap()
}

#[fixture]
pub fn manufacturers() -> ManufacturerMap {
    indexmap! {
        "OEM_A".into() => Manufacturer {
            id: "OEM_A".into(),
            description: "Manufacturer A".into(),
            market_share: Dimensionless(0.5),
        }
    }
}

fn technology_option(id: &str, cost: f64, co2: f64, fuel_price: f64) -> TechnologyOption {
    TechnologyOption {
        id: id.into(),
        new_vehicle_mfr_cost_dollars: DollarsPerVehicle(cost),
        cert_co2_grams_per_mile: GramsPerMile(co2),
        retail_fuel_price: DollarsPerMile(fuel_price),
    }
}

#[fixture]
pub fn vehicle() -> Vehicle {
    Vehicle {
        id: "car_ice".into(),
        manufacturer_id: "OEM_A".into(),
        market_class_id: "non_hauling".into(),
        fueling_class: FuelingClass::ICE,
        reg_class_id: "car".into(),
        base_year_registered_count: VehicleCount(600.0),
        technology_options: indexmap! {
            2020 => vec![
                technology_option("base", 25_000.0, 200.0, 0.1),
                technology_option("bev", 32_000.0, 0.0, 0.04),
            ]
        },
    }
}

#[fixture]
pub fn vehicles(vehicle: Vehicle) -> VehicleMap {
    let truck = Vehicle {
        id: "truck_ice".into(),
        market_class_id: "hauling".into(),
        reg_class_id: "truck".into(),
        base_year_registered_count: VehicleCount(400.0),
        technology_options: indexmap! {
            2020 => vec![
                technology_option("base", 40_000.0, 300.0, 0.15),
                technology_option("hybrid", 43_000.0, 240.0, 0.12),
            ]
        },
        ..vehicle.clone()
    };

    [truck, vehicle]
        .into_iter()
        .map(|vehicle| (vehicle.id.clone(), Rc::new(vehicle)))
        .collect()
}

/// A compliant mix of 400 trucks and 600 cars for manufacturer `OEM_A`
#[fixture]
pub fn candidate_vehicles() -> Vec<CandidateVehicle> {
    let truck = CandidateVehicle {
        vehicle_id: "truck".into(),
        tech_option_id: "base".into(),
        manufacturer_id: "OEM_A".into(),
        market_class_id: "hauling".into(),
        reg_class_id: "truck".into(),
        fueling_class: FuelingClass::ICE,
        new_vehicle_mfr_cost_dollars: DollarsPerVehicle(40_000.0),
        cert_co2_grams_per_mile: GramsPerMile(300.0),
        target_co2_grams_per_mile: GramsPerMile(320.0),
        lifetime_vmt: Miles(150_000.0),
        retail_fuel_price: DollarsPerMile(0.15),
        initial_registered_count: VehicleCount(400.0),
    };
    let car = CandidateVehicle {
        vehicle_id: "car".into(),
        market_class_id: "non_hauling".into(),
        reg_class_id: "car".into(),
        new_vehicle_mfr_cost_dollars: DollarsPerVehicle(25_000.0),
        cert_co2_grams_per_mile: GramsPerMile(200.0),
        target_co2_grams_per_mile: GramsPerMile(210.0),
        retail_fuel_price: DollarsPerMile(0.1),
        initial_registered_count: VehicleCount(600.0),
        ..truck.clone()
    };

    vec![truck, car]
}

/// [`candidate_vehicles`] summarised, with market class aggregates
pub fn combo_with_aggregates() -> WinningCombo {
    let vehicles = candidate_vehicles();
    let mut combo = WinningCombo::from_vehicles(&vehicles);
    calc_market_class_data(&market_class_tree(), &vehicles, &mut combo);
    combo
}

/// A grid row for [`candidate_vehicles`] at unmodified prices, where producer and consumer
/// agree on the given share of hauling vehicles
pub fn sales_demand_candidate(hauling_share: f64, total_sales: f64) -> SalesDemandCandidate {
    let class = |share: f64, cost: f64, fuel_price: f64| {
        let share = Dimensionless(share);
        ClassDemand {
            multiplier: Dimensionless(1.0),
            initial_average_cost: DollarsPerVehicle(cost),
            average_cost: DollarsPerVehicle(cost),
            average_fuel_price: DollarsPerMile(fuel_price),
            producer_share_frac: share,
            producer_abs_share_frac: share,
            consumer_share_frac: share,
            consumer_abs_share_frac: share,
        }
    };

    SalesDemandCandidate {
        classes: indexmap! {
            "hauling".into() => class(hauling_share, 40_000.0, 0.15),
            "non_hauling".into() => class(1.0 - hauling_share, 25_000.0, 0.1),
        },
        new_vehicle_sales: VehicleCount(total_sales),
        ..Default::default()
    }
}

/// Model parameters with default values for a single milestone year
pub fn model_parameters() -> ModelParameters {
    ModelParameters {
        milestone_years: vec![2020],
        new_vehicle_sales_response_elasticity: Dimensionless(-0.4),
        iterate_producer_consumer: true,
        producer_consumer_max_iterations: 10,
        producer_consumer_iteration_tolerance: Dimensionless(0.01),
        max_sub_iterations: 20,
        max_grid_candidates: 200_000,
        producer_share_band: Dimensionless(0.05),
        logit_exponent: -8.0,
        consumer_fuel_miles: Miles(75_000.0),
        sales_ratio_tolerance: Dimensionless(0.001),
    }
}

/// A model with one manufacturer selling a truck and a car in 2020
#[fixture]
pub fn model(manufacturers: ManufacturerMap) -> Model {
    let mut hauling = market_class("hauling", FuelingClass::ICE);
    hauling.min_share = Dimensionless(0.3);
    hauling.max_share = Dimensionless(0.5);
    let mut non_hauling = market_class("non_hauling", FuelingClass::ICE);
    non_hauling.min_share = Dimensionless(0.5);
    non_hauling.max_share = Dimensionless(0.7);

    let truck = Vehicle {
        id: "truck".into(),
        manufacturer_id: "OEM_A".into(),
        market_class_id: "hauling".into(),
        fueling_class: FuelingClass::ICE,
        reg_class_id: "truck".into(),
        base_year_registered_count: VehicleCount(400.0),
        technology_options: indexmap! {
            2020 => vec![
                technology_option("base", 40_000.0, 300.0, 0.15),
                technology_option("hybrid", 43_000.0, 240.0, 0.12),
            ]
        },
    };
    let car = Vehicle {
        id: "car".into(),
        market_class_id: "non_hauling".into(),
        reg_class_id: "car".into(),
        base_year_registered_count: VehicleCount(600.0),
        technology_options: indexmap! {
            2020 => vec![
                technology_option("base", 25_000.0, 200.0, 0.1),
                technology_option("bev", 32_000.0, 0.0, 0.04),
            ]
        },
        ..truck.clone()
    };

    let ghg_standards: GhgStandardMap = indexmap! {
        ("truck".into(), 2020) => GhgStandard {
            target_co2_grams_per_mile: GramsPerMile(320.0),
            lifetime_vmt: Miles(150_000.0),
        },
        ("car".into(), 2020) => GhgStandard {
            target_co2_grams_per_mile: GramsPerMile(210.0),
            lifetime_vmt: Miles(150_000.0),
        },
    };
    let new_vehicle_market: NewVehicleMarketMap = indexmap! {
        2020 => NewVehicleMarket {
            sales: VehicleCount(1_000_000.0),
            price: DollarsPerVehicle(30_000.0),
        }
    };

    Model {
        model_path: PathBuf::from("model"),
        parameters: model_parameters(),
        market_classes: MarketClassTree::from_market_classes([hauling, non_hauling]).unwrap(),
        manufacturers,
        vehicles: [truck, car]
            .into_iter()
            .map(|vehicle| (vehicle.id.clone(), Rc::new(vehicle)))
            .collect(),
        new_vehicle_market,
        ghg_standards,
    }
}
