//! Finalised production, which becomes the base for the following year's decisions.
use super::compliance::WinningCombo;
use crate::manufacturer::ManufacturerID;
use crate::units::VehicleCount;
use crate::vehicle::{CandidateVehicle, VehicleID};
use anyhow::{Result, bail, ensure};
use log::debug;
use std::collections::HashMap;

/// Records the production chosen for each manufacturer and year
pub trait ProductionStore {
    /// The number of vehicles produced in the most recently finalised year.
    ///
    /// Returns `None` if nothing has been finalised for the manufacturer yet.
    fn registered_count(
        &self,
        manufacturer_id: &ManufacturerID,
        vehicle_id: &VehicleID,
    ) -> Option<VehicleCount>;

    /// Commit the production for a manufacturer and year.
    ///
    /// Each manufacturer-year can only be finalised once and years must be finalised in order.
    fn finalize_production(
        &mut self,
        year: u32,
        manufacturer_id: &ManufacturerID,
        vehicles: &[CandidateVehicle],
        combo: &WinningCombo,
    ) -> Result<()>;
}

/// In-memory [`ProductionStore`]
#[derive(Debug, Default)]
pub struct ProductionLedger {
    years: Vec<u32>,
    last_finalized: HashMap<ManufacturerID, u32>,
    registered: HashMap<ManufacturerID, HashMap<VehicleID, VehicleCount>>,
}

impl ProductionLedger {
    /// Create a ledger for a run covering the given (ordered) years
    pub fn new(years: Vec<u32>) -> Self {
        Self {
            years,
            ..Default::default()
        }
    }

    /// The year which must be finalised next for a manufacturer
    fn next_year(&self, manufacturer_id: &ManufacturerID) -> Option<u32> {
        match self.last_finalized.get(manufacturer_id) {
            None => self.years.first().copied(),
            Some(last) => self.years.iter().copied().find(|year| year > last),
        }
    }

    /// The last year finalised for a manufacturer
    pub fn last_finalized(&self, manufacturer_id: &ManufacturerID) -> Option<u32> {
        self.last_finalized.get(manufacturer_id).copied()
    }
}

impl ProductionStore for ProductionLedger {
    fn registered_count(
        &self,
        manufacturer_id: &ManufacturerID,
        vehicle_id: &VehicleID,
    ) -> Option<VehicleCount> {
        let registered = self.registered.get(manufacturer_id)?;
        Some(registered.get(vehicle_id).copied().unwrap_or_default())
    }

    fn finalize_production(
        &mut self,
        year: u32,
        manufacturer_id: &ManufacturerID,
        vehicles: &[CandidateVehicle],
        combo: &WinningCombo,
    ) -> Result<()> {
        if self
            .last_finalized(manufacturer_id)
            .is_some_and(|last| year <= last)
        {
            bail!("Production for manufacturer {manufacturer_id} in {year} already finalised");
        }
        let expected = self.next_year(manufacturer_id);
        ensure!(
            expected == Some(year),
            "Cannot finalise production for manufacturer {manufacturer_id} in {year}: \
            the previous year has not been finalised"
        );

        let mut registered = HashMap::new();
        for vehicle in vehicles {
            ensure!(
                vehicle.manufacturer_id == *manufacturer_id,
                "Vehicle {} does not belong to manufacturer {manufacturer_id}",
                vehicle.vehicle_id
            );
            *registered
                .entry(vehicle.vehicle_id.clone())
                .or_insert(VehicleCount(0.0)) += vehicle.initial_registered_count;
        }

        debug!(
            "Finalised production for {manufacturer_id} in {year}: {} vehicles, credits {} Mg",
            combo.total_sales, combo.total_combo_credits_co2_megagrams
        );
        self.registered.insert(manufacturer_id.clone(), registered);
        self.last_finalized.insert(manufacturer_id.clone(), year);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, candidate_vehicles};
    use rstest::rstest;

    #[rstest]
    fn test_finalize_production(candidate_vehicles: Vec<CandidateVehicle>) {
        let mut ledger = ProductionLedger::new(vec![2020, 2025]);
        let id = ManufacturerID::new("OEM_A");
        let combo = WinningCombo::from_vehicles(&candidate_vehicles);

        assert_eq!(ledger.registered_count(&id, &"truck".into()), None);
        ledger
            .finalize_production(2020, &id, &candidate_vehicles, &combo)
            .unwrap();
        assert_eq!(
            ledger.registered_count(&id, &"truck".into()),
            Some(VehicleCount(400.0))
        );

        // Vehicles not produced count as zero once the manufacturer has production
        assert_eq!(
            ledger.registered_count(&id, &"bike".into()),
            Some(VehicleCount(0.0))
        );

        // The next milestone year follows
        ledger
            .finalize_production(2025, &id, &candidate_vehicles, &combo)
            .unwrap();
        assert_eq!(ledger.last_finalized(&id), Some(2025));
    }

    #[rstest]
    fn test_finalize_production_twice(candidate_vehicles: Vec<CandidateVehicle>) {
        let mut ledger = ProductionLedger::new(vec![2020, 2021]);
        let id = ManufacturerID::new("OEM_A");
        let combo = WinningCombo::from_vehicles(&candidate_vehicles);
        ledger
            .finalize_production(2020, &id, &candidate_vehicles, &combo)
            .unwrap();
        assert_error!(
            ledger.finalize_production(2020, &id, &candidate_vehicles, &combo),
            "Production for manufacturer OEM_A in 2020 already finalised"
        );
    }

    #[rstest]
    fn test_finalize_production_out_of_order(candidate_vehicles: Vec<CandidateVehicle>) {
        let mut ledger = ProductionLedger::new(vec![2020, 2021]);
        let id = ManufacturerID::new("OEM_A");
        let combo = WinningCombo::from_vehicles(&candidate_vehicles);
        assert_error!(
            ledger.finalize_production(2021, &id, &candidate_vehicles, &combo),
            "Cannot finalise production for manufacturer OEM_A in 2021: the previous year has \
            not been finalised"
        );
    }
}
