//! Summarise a producer's vehicle mix for each market class.
use super::compliance::{MarketClassAggregate, WinningCombo};
use crate::market_class::{MarketClassID, MarketClassTree};
use crate::units::{Dimensionless, DollarsPerMile, DollarsPerVehicle, GramsPerMile, VehicleCount};
use crate::vehicle::CandidateVehicle;
use indexmap::IndexMap;

/// Divide `numerator` by `denominator`, returning zero when the denominator is zero
fn ratio_or_zero(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Fill in the per-market-class aggregates of `combo` and its share-weighted price.
///
/// Averages are weighted by each vehicle's registered count. Classes without vehicles (or
/// without sales) get all-zero aggregates.
pub fn calc_market_class_data(
    tree: &MarketClassTree,
    vehicles: &[CandidateVehicle],
    combo: &mut WinningCombo,
) {
    let mut aggregates: IndexMap<MarketClassID, MarketClassAggregate> = IndexMap::new();
    for id in tree.iter_ids() {
        let mut sales = 0.0;
        let mut co2 = 0.0;
        let mut cost = 0.0;
        let mut fuel_price = 0.0;
        for vehicle in vehicles.iter().filter(|v| v.market_class_id == *id) {
            let weight = vehicle.initial_registered_count.value();
            sales += weight;
            co2 += vehicle.cert_co2_grams_per_mile.value() * weight;
            cost += vehicle.new_vehicle_mfr_cost_dollars.value() * weight;
            fuel_price += vehicle.retail_fuel_price.value() * weight;
        }

        aggregates.insert(
            id.clone(),
            MarketClassAggregate {
                average_co2_gpmi: GramsPerMile(ratio_or_zero(co2, sales)),
                average_cost: DollarsPerVehicle(ratio_or_zero(cost, sales)),
                average_fuel_price: DollarsPerMile(ratio_or_zero(fuel_price, sales)),
                sales: VehicleCount(sales),
                producer_abs_share_frac: Dimensionless(ratio_or_zero(
                    sales,
                    combo.total_sales.value(),
                )),
                producer_share_frac: Dimensionless(0.0),
            },
        );
    }

    // Shares within the parent node
    let abs_shares: IndexMap<_, _> = aggregates
        .iter()
        .map(|(id, aggregate)| (id.clone(), aggregate.producer_abs_share_frac))
        .collect();
    for (id, aggregate) in &mut aggregates {
        let parent_total: f64 = tree
            .parent_group(id)
            .iter()
            .map(|sibling| abs_shares[sibling].value())
            .sum();
        aggregate.producer_share_frac = Dimensionless(ratio_or_zero(
            aggregate.producer_abs_share_frac.value(),
            parent_total,
        ));
    }

    combo.share_weighted_price = aggregates
        .values()
        .map(|aggregate| aggregate.average_cost * aggregate.producer_abs_share_frac)
        .sum();
    combo.market_classes = aggregates;
}
