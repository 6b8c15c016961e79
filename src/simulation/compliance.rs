//! The producer's side of the negotiation: choosing a vehicle mix which complies with the GHG
//! standards.
use super::grid_search::SalesDemandCandidate;
use super::production::ProductionStore;
use crate::manufacturer::Manufacturer;
use crate::market_class::MarketClassID;
use crate::units::{
    Dimensionless, Dollars, DollarsPerMile, DollarsPerVehicle, GramsPerMile, Megagrams,
    VehicleCount,
};
use crate::vehicle::CandidateVehicle;
use anyhow::Result;
use indexmap::IndexMap;

pub mod optimisation;
pub use optimisation::LinearComplianceSearch;

/// Net credits within this fraction of the target are treated as exactly zero
const CREDIT_TOLERANCE: f64 = 1e-9;

/// Per-market-class summary of a producer's vehicle mix
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MarketClassAggregate {
    /// Sales-weighted average certification CO2
    pub average_co2_gpmi: GramsPerMile,
    /// Sales-weighted average manufacturer cost
    pub average_cost: DollarsPerVehicle,
    /// Sales-weighted average retail fuel price
    pub average_fuel_price: DollarsPerMile,
    /// Total sales in the class
    pub sales: VehicleCount,
    /// Class sales as a fraction of the producer's total sales
    pub producer_abs_share_frac: Dimensionless,
    /// Class sales as a fraction of sales in the class's parent node
    pub producer_share_frac: Dimensionless,
}

/// The producer's compliant vehicle mix, summarised
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WinningCombo {
    /// Total vehicles produced
    pub total_sales: VehicleCount,
    /// Total manufacturing cost
    pub total_combo_cost_dollars: Dollars,
    /// Lifetime certification CO2
    pub total_combo_cert_co2_megagrams: Megagrams,
    /// Lifetime CO2 allowed by the standards
    pub total_combo_target_co2_megagrams: Megagrams,
    /// Target minus certification CO2 (negative means non-compliant)
    pub total_combo_credits_co2_megagrams: Megagrams,
    /// Average cost weighted by the producer's absolute class shares
    pub share_weighted_price: DollarsPerVehicle,
    /// Certification CO2 over target CO2
    pub initial_compliance_ratio: Dimensionless,
    /// Aggregates for every leaf market class, in tree order
    pub market_classes: IndexMap<MarketClassID, MarketClassAggregate>,
}

impl WinningCombo {
    /// Summarise a set of candidate vehicles.
    ///
    /// The per-class aggregates are left empty (see [`super::aggregation`]).
    pub fn from_vehicles(vehicles: &[CandidateVehicle]) -> Self {
        let totals = ComboTotals::from_sales(
            vehicles
                .iter()
                .map(|vehicle| (vehicle, vehicle.initial_registered_count)),
        );

        Self {
            total_sales: totals.sales,
            total_combo_cost_dollars: totals.cost,
            total_combo_cert_co2_megagrams: totals.cert_co2,
            total_combo_target_co2_megagrams: totals.target_co2,
            total_combo_credits_co2_megagrams: totals.credits_co2,
            initial_compliance_ratio: totals.compliance_ratio(),
            ..Default::default()
        }
    }

    /// Whether the combination meets its CO2 target
    pub fn is_compliant(&self) -> bool {
        self.total_combo_credits_co2_megagrams >= Megagrams(0.0)
    }
}

/// Cost and CO2 totals for a set of vehicles at given sales levels
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ComboTotals {
    /// Total sales
    pub sales: VehicleCount,
    /// Total manufacturing cost
    pub cost: Dollars,
    /// Lifetime certification CO2
    pub cert_co2: Megagrams,
    /// Lifetime target CO2
    pub target_co2: Megagrams,
    /// Net credits, with values indistinguishable from zero snapped to zero
    pub credits_co2: Megagrams,
}

impl ComboTotals {
    /// Accumulate totals over `(vehicle, sales)` pairs
    pub fn from_sales<'a, I>(iter: I) -> Self
    where
        I: IntoIterator<Item = (&'a CandidateVehicle, VehicleCount)>,
    {
        let mut totals = Self::default();
        for (vehicle, sales) in iter {
            totals.sales += sales;
            totals.cost += vehicle.new_vehicle_mfr_cost_dollars * sales;
            totals.cert_co2 += vehicle
                .cert_co2_grams_per_mile
                .lifetime_megagrams(vehicle.lifetime_vmt, sales);
            totals.target_co2 += vehicle
                .target_co2_grams_per_mile
                .lifetime_megagrams(vehicle.lifetime_vmt, sales);
        }
        totals.credits_co2 = net_credits(totals.target_co2, totals.cert_co2);

        totals
    }

    /// Certification CO2 as a fraction of target CO2 (zero if there is no target)
    pub fn compliance_ratio(&self) -> Dimensionless {
        if self.target_co2 == Megagrams(0.0) {
            return Dimensionless(0.0);
        }

        self.cert_co2 / self.target_co2
    }
}

/// Target minus certification CO2, snapping rounding noise around zero to exactly zero
pub fn net_credits(target: Megagrams, cert: Megagrams) -> Megagrams {
    let credits = target - cert;
    let scale = target.abs().value().max(cert.abs().value());
    if credits.abs().value() <= CREDIT_TOLERANCE * scale {
        Megagrams(0.0)
    } else {
        credits
    }
}

/// A producer's decision: the vehicles it will build and their summary
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerSolution {
    /// One entry per vehicle and technology option with non-zero sales
    pub vehicles: Vec<CandidateVehicle>,
    /// Totals and per-class aggregates for `vehicles`
    pub combo: WinningCombo,
}

/// What consumers want, as fed back to the producer
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerDemandSignal {
    /// Absolute share of the manufacturer's sales demanded in each leaf market class
    pub abs_shares: IndexMap<MarketClassID, Dimensionless>,
    /// Total sales for the manufacturer
    pub total_sales: VehicleCount,
}

impl From<&SalesDemandCandidate> for ConsumerDemandSignal {
    fn from(candidate: &SalesDemandCandidate) -> Self {
        Self {
            abs_shares: candidate
                .classes
                .iter()
                .map(|(id, class)| (id.clone(), class.consumer_abs_share_frac))
                .collect(),
            total_sales: candidate.new_vehicle_sales,
        }
    }
}

/// Searches for a compliant, minimum-cost vehicle mix for one manufacturer and year
pub trait ComplianceSearch {
    /// Find the producer's preferred vehicle mix.
    ///
    /// The returned combination may be non-compliant (negative credits) if no compliant mix
    /// exists; the caller decides what to do about it.
    ///
    /// # Arguments
    ///
    /// * `manufacturer` - The manufacturer making the decision
    /// * `year` - The calendar year
    /// * `demand` - Consumer demand from the previous iteration, if any
    /// * `production` - Production finalised in earlier years
    fn search(
        &self,
        manufacturer: &Manufacturer,
        year: u32,
        demand: Option<&ConsumerDemandSignal>,
        production: &dyn ProductionStore,
    ) -> Result<ProducerSolution>;
}

/// Re-derive cost and CO2 totals for grid rows, given their total and per-class sales.
///
/// Each vehicle's sales are the row's total sales times the consumer's absolute share for the
/// vehicle's class, split within the class in proportion to the producer's plan.
pub fn apply_total_sales(vehicles: &[CandidateVehicle], rows: &mut [SalesDemandCandidate]) {
    let mut class_sales: IndexMap<&MarketClassID, VehicleCount> = IndexMap::new();
    for vehicle in vehicles {
        *class_sales.entry(&vehicle.market_class_id).or_default() +=
            vehicle.initial_registered_count;
    }

    for row in rows {
        let sales_for = |vehicle: &CandidateVehicle| {
            let class_total = class_sales[&vehicle.market_class_id];
            let Some(class) = row.classes.get(&vehicle.market_class_id) else {
                return VehicleCount(0.0);
            };
            if class_total <= VehicleCount(0.0) {
                return VehicleCount(0.0);
            }

            let within_class = vehicle.initial_registered_count / class_total;
            row.new_vehicle_sales * class.consumer_abs_share_frac * within_class
        };

        let totals =
            ComboTotals::from_sales(vehicles.iter().map(|vehicle| (vehicle, sales_for(vehicle))));
        row.total_combo_cost_dollars = totals.cost;
        row.total_combo_cert_co2_megagrams = totals.cert_co2;
        row.total_combo_target_co2_megagrams = totals.target_co2;
        row.total_combo_credits_co2_megagrams = totals.credits_co2;
        row.compliance_ratio = totals.compliance_ratio();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{candidate_vehicles, sales_demand_candidate};
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    #[rstest]
    fn test_combo_from_vehicles(candidate_vehicles: Vec<CandidateVehicle>) {
        let combo = WinningCombo::from_vehicles(&candidate_vehicles);

        // 400 trucks at $40k and 600 cars at $25k
        assert_eq!(combo.total_sales, VehicleCount(1000.0));
        assert_eq!(combo.total_combo_cost_dollars, Dollars(31_000_000.0));

        // Trucks: 300 g/mi against 320, cars: 200 against 210, both over 150k miles
        assert_approx_eq!(
            f64,
            combo.total_combo_cert_co2_megagrams.value(),
            (300.0 * 400.0 + 200.0 * 600.0) * 0.15
        );
        assert_approx_eq!(
            f64,
            combo.total_combo_credits_co2_megagrams.value(),
            (20.0 * 400.0 + 10.0 * 600.0) * 0.15
        );
        assert!(combo.is_compliant());
        assert!(combo.initial_compliance_ratio < Dimensionless(1.0));
        assert!(combo.market_classes.is_empty());
    }

    #[rstest]
    #[case(100.0, 100.0, 0.0)]
    #[case(100.0, 100.0 * (1.0 + 1e-12), 0.0)]
    #[case(100.0, 90.0, 10.0)]
    #[case(90.0, 100.0, -10.0)]
    #[case(0.0, 0.0, 0.0)]
    fn test_net_credits(#[case] target: f64, #[case] cert: f64, #[case] expected: f64) {
        let credits = net_credits(Megagrams(target), Megagrams(cert));
        assert_approx_eq!(f64, credits.value(), expected);
    }

    #[rstest]
    fn test_apply_total_sales(candidate_vehicles: Vec<CandidateVehicle>) {
        let combo = WinningCombo::from_vehicles(&candidate_vehicles);
        let mut rows = [sales_demand_candidate(0.4, 1000.0)];
        apply_total_sales(&candidate_vehicles, &mut rows);

        // Shares and sales match the producer's plan, so totals are unchanged
        let row = &rows[0];
        assert_approx_eq!(
            f64,
            row.total_combo_cost_dollars.value(),
            combo.total_combo_cost_dollars.value()
        );
        assert_approx_eq!(
            f64,
            row.total_combo_credits_co2_megagrams.value(),
            combo.total_combo_credits_co2_megagrams.value()
        );
    }

    #[rstest]
    fn test_apply_total_sales_shift(candidate_vehicles: Vec<CandidateVehicle>) {
        // All sales move to the car class
        let mut rows = [sales_demand_candidate(0.0, 2000.0)];
        apply_total_sales(&candidate_vehicles, &mut rows);

        let row = &rows[0];
        assert_approx_eq!(f64, row.total_combo_cost_dollars.value(), 2000.0 * 25_000.0);
        assert_approx_eq!(
            f64,
            row.total_combo_cert_co2_megagrams.value(),
            2000.0 * 200.0 * 0.15
        );
    }

    #[test]
    fn test_demand_signal_from_candidate() {
        let candidate = sales_demand_candidate(0.25, 1234.0);
        let signal = ConsumerDemandSignal::from(&candidate);
        assert_eq!(signal.total_sales, VehicleCount(1234.0));
        assert_eq!(signal.abs_shares["hauling"], Dimensionless(0.25));
        assert_eq!(signal.abs_shares["non_hauling"], Dimensionless(0.75));
    }
}
