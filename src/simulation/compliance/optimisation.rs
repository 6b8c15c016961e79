//! A linear programme which finds the cheapest compliant vehicle mix for a manufacturer.
//!
//! The decision variables are the shares of the manufacturer's total sales given to each vehicle
//! and technology option. Within a market class, vehicles keep the split they had in the previous
//! year's production; the technology options applied to them and the split between classes are
//! free, subject to the class share bounds.
use super::{ComplianceSearch, ConsumerDemandSignal, ProducerSolution, WinningCombo};
use crate::manufacturer::Manufacturer;
use crate::market_class::MarketClassID;
use crate::model::Model;
use crate::simulation::production::ProductionStore;
use crate::standards::{GhgStandard, get_standard};
use crate::units::{Dimensionless, GramsPerMile, VehicleCount};
use crate::vehicle::{CandidateVehicle, TechnologyOption, Vehicle, VehicleID};
use anyhow::{Context, Result, ensure};
use highs::{HighsModelStatus, RowProblem as Problem, Sense};
use indexmap::IndexMap;
use log::{debug, warn};
use std::ops::RangeInclusive;

/// A decision variable in the optimisation
type Variable = highs::Col;

/// Shares smaller than this are treated as zero when reading the solution
const MIN_SHARE: f64 = 1e-12;

/// Lower bound on credits per unit of share, so solver tolerances can't leave a feasible mix
/// with negative credits
const MIN_CREDITS_PER_SHARE: f64 = 1e-6;

/// Which quantity the optimisation targets
#[derive(Debug, Clone, Copy, PartialEq)]
enum Objective {
    /// Minimise cost subject to meeting the CO2 target
    MinimiseCost,
    /// Get as close to compliance as possible, ignoring cost
    MaximiseCredits,
}

/// A vehicle with one of its technology options applied
struct VehicleOption<'a> {
    vehicle: &'a Vehicle,
    option: &'a TechnologyOption,
    standard: &'a GhgStandard,
}

impl VehicleOption<'_> {
    /// Lifetime credits (Mg) generated by one unit of share
    fn credit_coefficient(&self) -> f64 {
        let margin: GramsPerMile = self.standard.target_co2_grams_per_mile
            - self.option.cert_co2_grams_per_mile;
        margin
            .lifetime_megagrams(self.standard.lifetime_vmt, VehicleCount(1.0))
            .value()
    }

    fn cost_coefficient(&self, objective: Objective) -> f64 {
        match objective {
            Objective::MinimiseCost => self.option.new_vehicle_mfr_cost_dollars.value(),
            Objective::MaximiseCredits => -self.credit_coefficient(),
        }
    }

    fn market_class_id(&self) -> &MarketClassID {
        &self.vehicle.market_class_id
    }
}

/// The reference compliance search, solved as a linear programme with HiGHS
pub struct LinearComplianceSearch<'a> {
    model: &'a Model,
}

impl<'a> LinearComplianceSearch<'a> {
    /// Create a new [`LinearComplianceSearch`] for the given model
    pub fn new(model: &'a Model) -> Self {
        Self { model }
    }

    /// Collect every vehicle and technology option available to the manufacturer
    fn collect_options<'b>(
        &'b self,
        manufacturer: &'b Manufacturer,
        year: u32,
    ) -> Result<Vec<VehicleOption<'b>>> {
        let mut options = Vec::new();
        for vehicle in self.model.iter_vehicles_for(&manufacturer.id) {
            let standard = get_standard(&self.model.ghg_standards, &vehicle.reg_class_id, year)?;
            for option in vehicle.technology_options_for(year)? {
                options.push(VehicleOption {
                    vehicle,
                    option,
                    standard,
                });
            }
        }
        ensure!(
            !options.is_empty(),
            "Manufacturer {} has no vehicles to produce in {year}",
            manufacturer.id
        );

        Ok(options)
    }

    /// Bounds on each class's share of the manufacturer's sales
    fn class_share_bounds(
        &self,
        demand: Option<&ConsumerDemandSignal>,
    ) -> IndexMap<MarketClassID, RangeInclusive<f64>> {
        let band = self.model.parameters.producer_share_band.value();
        self.model
            .market_classes
            .iter_leaves()
            .map(|market_class| {
                let bounds = match demand.and_then(|d| d.abs_shares.get(&market_class.id)) {
                    Some(share) => {
                        (share.value() - band).max(0.0)..=(share.value() + band).min(1.0)
                    }
                    None => market_class.min_share.value()..=market_class.max_share.value(),
                };
                (market_class.id.clone(), bounds)
            })
            .collect()
    }
}

impl ComplianceSearch for LinearComplianceSearch<'_> {
    fn search(
        &self,
        manufacturer: &Manufacturer,
        year: u32,
        demand: Option<&ConsumerDemandSignal>,
        production: &dyn ProductionStore,
    ) -> Result<ProducerSolution> {
        let options = self.collect_options(manufacturer, year)?;
        let fractions = within_class_fractions(&options, manufacturer, production);
        let bounds = self.class_share_bounds(demand);
        let total_sales = match demand {
            Some(demand) => demand.total_sales,
            None => {
                let market = self
                    .model
                    .new_vehicle_market
                    .get(&year)
                    .with_context(|| format!("No new vehicle market data for year {year}"))?;
                market.sales * manufacturer.market_share
            }
        };

        let shares = match solve_mix(&options, &fractions, &bounds, Objective::MinimiseCost) {
            Some(shares) => shares,
            None => {
                warn!(
                    "No compliant vehicle mix for manufacturer {} in {year}; finding the mix \
                    closest to compliance",
                    manufacturer.id
                );
                solve_mix(&options, &fractions, &bounds, Objective::MaximiseCredits)
                    .with_context(|| {
                        format!(
                            "Class share limits cannot be met by manufacturer {} in {year}",
                            manufacturer.id
                        )
                    })?
            }
        };

        let vehicles: Vec<_> = options
            .iter()
            .zip(shares)
            .filter(|(_, share)| *share > MIN_SHARE)
            .map(|(option, share)| to_candidate(option, total_sales * Dimensionless(share)))
            .collect();
        let combo = WinningCombo::from_vehicles(&vehicles);
        debug!(
            "Compliance search for {} in {year}: {} vehicles, credits {} Mg",
            manufacturer.id,
            vehicles.len(),
            combo.total_combo_credits_co2_megagrams
        );

        Ok(ProducerSolution { vehicles, combo })
    }
}

/// Each vehicle's share of its class, taken from the previous year's production.
///
/// Before any production has been finalised, the base year registered counts are used. If a
/// class had no sales, its vehicles are split evenly.
fn within_class_fractions(
    options: &[VehicleOption],
    manufacturer: &Manufacturer,
    production: &dyn ProductionStore,
) -> IndexMap<VehicleID, f64> {
    let mut counts: IndexMap<&VehicleID, (&Vehicle, VehicleCount)> = IndexMap::new();
    for option in options {
        let vehicle = option.vehicle;
        counts.entry(&vehicle.id).or_insert_with(|| {
            let count = production
                .registered_count(&manufacturer.id, &vehicle.id)
                .unwrap_or(vehicle.base_year_registered_count);
            (vehicle, count)
        });
    }

    let mut class_totals: IndexMap<&MarketClassID, (VehicleCount, usize)> = IndexMap::new();
    for (vehicle, count) in counts.values() {
        let (total, n) = class_totals.entry(&vehicle.market_class_id).or_default();
        *total += *count;
        *n += 1;
    }

    counts
        .values()
        .map(|(vehicle, count)| {
            let (total, n) = class_totals[&vehicle.market_class_id];
            let fraction = if total > VehicleCount(0.0) {
                (*count / total).value()
            } else {
                1.0 / n as f64
            };
            (vehicle.id.clone(), fraction)
        })
        .collect()
}

/// Build and solve the linear programme, returning the share for each option if feasible
fn solve_mix(
    options: &[VehicleOption],
    fractions: &IndexMap<VehicleID, f64>,
    bounds: &IndexMap<MarketClassID, RangeInclusive<f64>>,
    objective: Objective,
) -> Option<Vec<f64>> {
    let mut problem = Problem::default();
    let variables: Vec<Variable> = options
        .iter()
        .map(|option| problem.add_column(option.cost_coefficient(objective), 0.0..))
        .collect();

    // Shares sum to one
    problem.add_row(1.0..=1.0, variables.iter().map(|var| (*var, 1.0)));

    add_class_share_constraints(&mut problem, options, &variables, bounds);
    add_within_class_constraints(&mut problem, options, &variables, fractions);

    if objective == Objective::MinimiseCost {
        let terms = options
            .iter()
            .zip(&variables)
            .map(|(option, var)| (*var, option.credit_coefficient()));
        problem.add_row(MIN_CREDITS_PER_SHARE.., terms);
    }

    let mut highs_model = problem.optimise(Sense::Minimise);
    highs_model.set_option("output_flag", false);
    let solved = highs_model.try_solve().ok()?;
    match solved.status() {
        HighsModelStatus::Optimal => Some(
            solved
                .get_solution()
                .columns()
                .iter()
                .map(|share| share.max(0.0))
                .collect(),
        ),
        status => {
            debug!("Vehicle mix optimisation ({objective:?}) not solved: {status:?}");
            None
        }
    }
}

/// Keep each class's total share within its bounds
fn add_class_share_constraints(
    problem: &mut Problem,
    options: &[VehicleOption],
    variables: &[Variable],
    bounds: &IndexMap<MarketClassID, RangeInclusive<f64>>,
) {
    for (market_class_id, limits) in bounds {
        let terms: Vec<_> = options
            .iter()
            .zip(variables)
            .filter(|(option, _)| option.market_class_id() == market_class_id)
            .map(|(_, var)| (*var, 1.0))
            .collect();

        // The manufacturer has nothing to sell in this class
        if terms.is_empty() {
            continue;
        }

        problem.add_row(limits.clone(), terms);
    }
}

/// Fix each vehicle's share of its class
fn add_within_class_constraints(
    problem: &mut Problem,
    options: &[VehicleOption],
    variables: &[Variable],
    fractions: &IndexMap<VehicleID, f64>,
) {
    for (vehicle_id, fraction) in fractions {
        if *fraction >= 1.0 {
            continue;
        }

        let Some(class_id) = options
            .iter()
            .find(|option| option.vehicle.id == *vehicle_id)
            .map(VehicleOption::market_class_id)
        else {
            continue;
        };

        let terms: Vec<_> = options
            .iter()
            .zip(variables)
            .filter(|(option, _)| option.market_class_id() == class_id)
            .map(|(option, var)| {
                let coeff = if option.vehicle.id == *vehicle_id {
                    1.0 - fraction
                } else {
                    -fraction
                };
                (*var, coeff)
            })
            .collect();
        problem.add_row(0.0..=0.0, terms);
    }
}

/// Size a vehicle option to a number of sales
fn to_candidate(option: &VehicleOption, sales: VehicleCount) -> CandidateVehicle {
    CandidateVehicle {
        vehicle_id: option.vehicle.id.clone(),
        tech_option_id: option.option.id.clone(),
        manufacturer_id: option.vehicle.manufacturer_id.clone(),
        market_class_id: option.vehicle.market_class_id.clone(),
        reg_class_id: option.vehicle.reg_class_id.clone(),
        fueling_class: option.vehicle.fueling_class,
        new_vehicle_mfr_cost_dollars: option.option.new_vehicle_mfr_cost_dollars,
        cert_co2_grams_per_mile: option.option.cert_co2_grams_per_mile,
        target_co2_grams_per_mile: option.standard.target_co2_grams_per_mile,
        lifetime_vmt: option.standard.lifetime_vmt,
        retail_fuel_price: option.option.retail_fuel_price,
        initial_registered_count: sales,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, model};
    use crate::simulation::production::ProductionLedger;
    use crate::units::Dimensionless;
    use float_cmp::assert_approx_eq;
    use indexmap::indexmap;
    use rstest::rstest;

    fn sales_of(solution: &ProducerSolution, vehicle_id: &str, tech_option_id: &str) -> f64 {
        solution
            .vehicles
            .iter()
            .find(|v| v.vehicle_id.as_str() == vehicle_id && v.tech_option_id == tech_option_id)
            .map_or(0.0, |v| v.initial_registered_count.value())
    }

    fn search(model: &Model, demand: Option<&ConsumerDemandSignal>) -> Result<ProducerSolution> {
        let ledger = ProductionLedger::new(vec![2020]);
        let manufacturer = &model.manufacturers["OEM_A"];
        LinearComplianceSearch::new(model).search(manufacturer, 2020, demand, &ledger)
    }

    fn set_targets(model: &mut Model, truck: f64, car: f64) {
        for ((reg_class_id, _), standard) in &mut model.ghg_standards {
            standard.target_co2_grams_per_mile = GramsPerMile(match reg_class_id.as_str() {
                "truck" => truck,
                _ => car,
            });
        }
    }

    #[rstest]
    fn test_search_default_bounds(model: Model) {
        let solution = search(&model, None).unwrap();

        // Cars are cheaper, so take the largest share allowed
        assert_eq!(solution.vehicles.len(), 2);
        assert_approx_eq!(f64, sales_of(&solution, "car", "base"), 350_000.0, epsilon = 1e-3);
        assert_approx_eq!(f64, sales_of(&solution, "truck", "base"), 150_000.0, epsilon = 1e-3);
        assert!(solution.combo.is_compliant());
        assert_approx_eq!(
            f64,
            solution.combo.total_sales.value(),
            500_000.0,
            epsilon = 1e-3
        );
    }

    #[rstest]
    fn test_search_with_demand(model: Model) {
        let demand = ConsumerDemandSignal {
            abs_shares: indexmap! {
                "hauling".into() => Dimensionless(0.45),
                "non_hauling".into() => Dimensionless(0.55),
            },
            total_sales: VehicleCount(400_000.0),
        };
        let solution = search(&model, Some(&demand)).unwrap();

        // Within 0.05 of the demanded shares
        assert_approx_eq!(f64, sales_of(&solution, "car", "base"), 240_000.0, epsilon = 1e-3);
        assert_approx_eq!(f64, sales_of(&solution, "truck", "base"), 160_000.0, epsilon = 1e-3);
    }

    #[rstest]
    fn test_search_tight_standard(mut model: Model) {
        set_targets(&mut model, 280.0, 190.0);
        let solution = search(&model, None).unwrap();

        // Cleaner options are needed, but compliance is just met
        assert!(solution.combo.is_compliant());
        assert!(
            sales_of(&solution, "truck", "hybrid") > 0.0 || sales_of(&solution, "car", "bev") > 0.0
        );
        assert!(solution.combo.total_combo_credits_co2_megagrams.value() < 5.0);
    }

    #[rstest]
    fn test_search_impossible_standard(mut model: Model) {
        set_targets(&mut model, 0.0, 0.0);
        let solution = search(&model, None).unwrap();

        // The closest to compliance is returned
        assert!(!solution.combo.is_compliant());
        assert_approx_eq!(f64, sales_of(&solution, "truck", "hybrid"), 150_000.0, epsilon = 1e-3);
        assert_approx_eq!(f64, sales_of(&solution, "car", "bev"), 350_000.0, epsilon = 1e-3);
    }

    #[rstest]
    fn test_search_infeasible_bounds(model: Model) {
        let demand = ConsumerDemandSignal {
            abs_shares: indexmap! {
                "hauling".into() => Dimensionless(0.1),
                "non_hauling".into() => Dimensionless(0.1),
            },
            total_sales: VehicleCount(400_000.0),
        };
        assert_error!(
            search(&model, Some(&demand)),
            "Class share limits cannot be met by manufacturer OEM_A in 2020"
        );
    }
}
