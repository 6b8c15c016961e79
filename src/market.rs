//! The new vehicle market and its response to changes in average price.
use crate::units::{Dimensionless, DollarsPerVehicle, VehicleCount};
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;

/// Reference context for the new vehicle market in one year
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewVehicleMarket {
    /// Total new vehicle sales in the reference scenario (Q0)
    pub sales: VehicleCount,
    /// Sales-weighted average new vehicle price in the reference scenario (P0)
    pub price: DollarsPerVehicle,
}

/// Reference market context keyed by year
pub type NewVehicleMarketMap = IndexMap<u32, NewVehicleMarket>;

/// The slope of the linear demand curve passing through the reference point.
///
/// This is the change in sales per dollar change in average price implied by a constant
/// `elasticity` at the reference point `(price, sales)`.
pub fn response_slope(
    sales: VehicleCount,
    price: DollarsPerVehicle,
    elasticity: Dimensionless,
) -> f64 {
    let e = elasticity.value();
    let (q0, p0) = (sales.value(), price.value());
    -(q0 * e - q0) / (p0 / e - p0)
}

/// Computes total new vehicle sales in response to the average new vehicle price.
///
/// Sales follow a straight line through the reference point for the year, so pricing at the
/// reference price always gives exactly the reference sales.
#[derive(Debug, Clone, Copy)]
pub struct SalesResponse<'a> {
    market: &'a NewVehicleMarketMap,
    elasticity: Dimensionless,
}

impl<'a> SalesResponse<'a> {
    /// Create a new [`SalesResponse`].
    ///
    /// Fails if the elasticity is zero, one or not finite, as the demand curve is undefined.
    pub fn new(market: &'a NewVehicleMarketMap, elasticity: Dimensionless) -> Result<Self> {
        ensure!(
            elasticity.is_finite()
                && elasticity != Dimensionless(0.0)
                && elasticity != Dimensionless(1.0),
            "Invalid sales response elasticity: {elasticity}"
        );

        Ok(Self { market, elasticity })
    }

    /// The reference market context for a year
    pub fn reference(&self, year: u32) -> Result<&'a NewVehicleMarket> {
        self.market
            .get(&year)
            .with_context(|| format!("No new vehicle market data for year {year}"))
    }

    /// Total new vehicle sales for the whole market, given the average new vehicle price
    pub fn new_vehicle_sales(
        &self,
        year: u32,
        average_price: DollarsPerVehicle,
    ) -> Result<VehicleCount> {
        let reference = self.reference(year)?;
        let slope = response_slope(reference.sales, reference.price, self.elasticity);
        let delta_price = (average_price - reference.price).value();

        Ok(reference.sales + VehicleCount(slope * delta_price))
    }
}
