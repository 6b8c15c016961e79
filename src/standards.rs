//! GHG standards set the per-vehicle CO2 target for each regulatory class and year.
use crate::id::define_id_type;
use crate::units::{GramsPerMile, Miles};
use anyhow::{Context, Result};
use indexmap::IndexMap;

define_id_type! {RegClassID}

/// The CO2 standard which applies to one regulatory class in one year
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GhgStandard {
    /// Certification CO2 target
    pub target_co2_grams_per_mile: GramsPerMile,
    /// Lifetime vehicle miles travelled used to convert rates to masses
    pub lifetime_vmt: Miles,
}

/// GHG standards keyed by regulatory class and year
pub type GhgStandardMap = IndexMap<(RegClassID, u32), GhgStandard>;

/// Look up the standard for a regulatory class in a given year
pub fn get_standard<'a>(
    standards: &'a GhgStandardMap,
    reg_class_id: &RegClassID,
    year: u32,
) -> Result<&'a GhgStandard> {
    standards
        .get(&(reg_class_id.clone(), year))
        .with_context(|| format!("No GHG standard for reg class {reg_class_id} in {year}"))
}
