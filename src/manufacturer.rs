//! Manufacturers are the producers in the simulation. Each one chooses a compliant mix of vehicles
//! every year.
use crate::id::{define_id_getter, define_id_type};
use crate::units::Dimensionless;
use indexmap::IndexMap;
use serde::Deserialize;

define_id_type! {ManufacturerID}

/// A map of [`Manufacturer`]s, keyed by manufacturer ID
pub type ManufacturerMap = IndexMap<ManufacturerID, Manufacturer>;

/// A vehicle manufacturer
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Manufacturer {
    /// Unique identifier for the manufacturer (e.g. "OEM_A")
    pub id: ManufacturerID,
    /// A text description of the manufacturer
    pub description: String,
    /// The manufacturer's share of the total new vehicle market
    pub market_share: Dimensionless,
}
define_id_getter! {Manufacturer, ManufacturerID}
