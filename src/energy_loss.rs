// Continuous energy loss of charged particles traversing the medium.
//
// Ionization and radiative losses shift the spectrum of muons and electrons
// toward lower energies without removing particles. The matrix builder folds
// the tabulated stopping power dE/dX (GeV per g/cm^2) into the interaction
// operator as a first-order upwind derivative in energy, so the flux drifts
// down the grid at the local stopping power.

use crate::interp::interpolate_log_log;
use crate::species::Species;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tabulated stopping power for one species.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergyLossTable {
    pub species: Species,
    /// Energies in GeV, strictly increasing.
    pub energies: Vec<f64>,
    /// dE/dX in GeV per g/cm^2 at the tabulated energies.
    pub dedx: Vec<f64>,
}

/// Read-only collection of stopping-power tables, keyed by species.
///
/// Species without a table lose no energy continuously; hadrons are handled
/// through their interaction cross sections instead.
#[derive(Debug, Clone, Default)]
pub struct EnergyLossLibrary {
    tables: HashMap<Species, EnergyLossTable>,
}

impl EnergyLossLibrary {
    pub fn new(tables: Vec<EnergyLossTable>) -> Self {
        let mut map = HashMap::new();
        for t in tables {
            map.insert(t.species, t);
        }
        EnergyLossLibrary { tables: map }
    }

    /// Muon stopping power in air: dE/dX = a + b * E with the ionization
    /// plateau a = 2.0 MeV cm^2/g and the radiative slope b = 3.0e-6 cm^2/g.
    pub fn muon_air() -> Self {
        let energies: Vec<f64> = (0..=44).map(|i| 10f64.powf(-1.0 + 0.25 * i as f64)).collect();
        let dedx: Vec<f64> = energies.iter().map(|&e| 2.0e-3 + 3.0e-6 * e).collect();
        Self::new(
            [Species::MuPlus, Species::MuMinus]
                .into_iter()
                .map(|species| EnergyLossTable {
                    species,
                    energies: energies.clone(),
                    dedx: dedx.clone(),
                })
                .collect(),
        )
    }

    /// Energy-independent stopping power per species, for synthetic fixtures.
    pub fn constant(entries: &[(Species, f64)]) -> Self {
        Self::new(
            entries
                .iter()
                .map(|&(species, value)| EnergyLossTable {
                    species,
                    energies: vec![1e-2, 1e12],
                    dedx: vec![value, value],
                })
                .collect(),
        )
    }

    /// Stopping power in GeV per g/cm^2 at `energy`, log-log interpolated;
    /// zero for species without a table.
    pub fn dedx(&self, species: Species, energy: f64) -> f64 {
        self.tables
            .get(&species)
            .map_or(0.0, |t| interpolate_log_log(&t.energies, &t.dedx, energy).max(0.0))
    }

    pub fn has(&self, species: Species) -> bool {
        self.tables.contains_key(&species)
    }

    /// Species with a stopping-power table, in block order.
    pub fn species(&self) -> Vec<Species> {
        let mut v: Vec<Species> = self.tables.keys().copied().collect();
        v.sort();
        v
    }
}
