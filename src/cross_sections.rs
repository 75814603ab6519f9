// Inelastic projectile-target cross sections and interaction lengths.

use crate::energy_grid::EnergyGrid;
use crate::interp::interpolate_log_log;
use crate::species::Species;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Conversion mbarn -> cm^2.
pub const MBARN_TO_CM2: f64 = 1e-27;
/// Atomic mass unit in grams.
pub const AMU_G: f64 = 1.660_539_066_60e-24;

/// Tabulated inelastic cross section for one projectile species.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossSectionTable {
    pub projectile: Species,
    /// Projectile energies in GeV, strictly increasing.
    pub energies: Vec<f64>,
    /// Inelastic cross section in mbarn at the tabulated energies.
    pub sigma_mbarn: Vec<f64>,
}

/// Cross-section collection for one interaction model and target material.
///
/// Projectiles without a dedicated table are substituted following the usual
/// conventions of inclusive-flux calculations: charmed mesons use the kaon
/// cross section, baryons the nucleon one, leptons and photons interact
/// not at all, and any remaining hadron falls back to the pion table.
#[derive(Debug, Clone)]
pub struct CrossSectionLibrary {
    model: String,
    tables: HashMap<Species, CrossSectionTable>,
}

impl CrossSectionLibrary {
    pub fn new(model: impl Into<String>, tables: Vec<CrossSectionTable>) -> Self {
        let mut map = HashMap::new();
        for t in tables {
            map.insert(t.projectile, t);
        }
        CrossSectionLibrary {
            model: model.into(),
            tables: map,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Inelastic cross section in cm^2 at `energy` GeV, applying the
    /// substitution rules for projectiles without a dedicated table.
    pub fn sigma_cm2(&self, projectile: Species, energy: f64) -> f64 {
        if let Some(t) = self.tables.get(&projectile) {
            return interpolate_log_log(&t.energies, &t.sigma_mbarn, energy).max(0.0)
                * MBARN_TO_CM2;
        }
        if projectile.is_lepton() || projectile == Species::Gamma {
            return 0.0;
        }
        let substitute = match projectile {
            Species::Neutron => Species::Proton,
            Species::KMinus | Species::KZeroLong | Species::KZeroShort => Species::KPlus,
            _ => Species::PiPlus,
        };
        if substitute != projectile {
            if let Some(t) = self.tables.get(&substitute) {
                debug!(
                    "substituting {:?} cross section for {:?}",
                    substitute, projectile
                );
                return interpolate_log_log(&t.energies, &t.sigma_mbarn, energy).max(0.0)
                    * MBARN_TO_CM2;
            }
        }
        0.0
    }

    /// Interaction length 1/lambda_int in cm^2/g on the grid centers, i.e.
    /// the per-depth interaction rate of the projectile. Zero for species
    /// that do not interact hadronically with the target.
    pub fn inverse_interaction_length(
        &self,
        projectile: Species,
        grid: &EnergyGrid,
        a_target: f64,
    ) -> Vec<f64> {
        let m_target = a_target * AMU_G;
        grid.centers()
            .iter()
            .map(|&e| self.sigma_cm2(projectile, e) / m_target)
            .collect()
    }

    pub fn has(&self, projectile: Species) -> bool {
        self.tables.contains_key(&projectile)
    }

    /// Flat 1 mbarn-scale test fixture: constant cross section for the given
    /// projectiles over the full energy range.
    pub fn constant(model: impl Into<String>, entries: &[(Species, f64)]) -> Self {
        let tables = entries
            .iter()
            .map(|&(p, mb)| CrossSectionTable {
                projectile: p,
                energies: vec![1e-2, 1e12],
                sigma_mbarn: vec![mb, mb],
            })
            .collect();
        Self::new(model, tables)
    }
}
