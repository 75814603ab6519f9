// Fixed set of particle species propagated by the cascade equations.
//
// The set matches the "standard particles" of inclusive atmospheric flux
// calculations: nucleons, light mesons, muons, electrons/photons and the
// muon/electron neutrino flavors. The enum ordering defines the block layout
// of every state vector and coupling matrix.

use serde::{Deserialize, Serialize};

/// Particle species with fixed physical constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Species {
    Proton,
    Neutron,
    PiPlus,
    PiMinus,
    PiZero,
    KPlus,
    KMinus,
    KZeroLong,
    KZeroShort,
    Eta,
    MuPlus,
    MuMinus,
    Electron,
    Positron,
    Gamma,
    NuE,
    NuEBar,
    NuMu,
    NuMuBar,
}

/// All species in state-vector block order.
pub const ALL_SPECIES: [Species; 19] = [
    Species::Proton,
    Species::Neutron,
    Species::PiPlus,
    Species::PiMinus,
    Species::PiZero,
    Species::KPlus,
    Species::KMinus,
    Species::KZeroLong,
    Species::KZeroShort,
    Species::Eta,
    Species::MuPlus,
    Species::MuMinus,
    Species::Electron,
    Species::Positron,
    Species::Gamma,
    Species::NuE,
    Species::NuEBar,
    Species::NuMu,
    Species::NuMuBar,
];

impl Species {
    /// Block index of this species in state vectors and coupling matrices.
    pub fn index(self) -> usize {
        ALL_SPECIES.iter().position(|&s| s == self).unwrap()
    }

    /// Number of species blocks.
    pub const fn count() -> usize {
        ALL_SPECIES.len()
    }

    /// Rest mass in GeV.
    pub fn mass(self) -> f64 {
        match self {
            Species::Proton => 0.938272,
            Species::Neutron => 0.939565,
            Species::PiPlus | Species::PiMinus => 0.139570,
            Species::PiZero => 0.134977,
            Species::KPlus | Species::KMinus => 0.493677,
            Species::KZeroLong | Species::KZeroShort => 0.497611,
            Species::Eta => 0.547862,
            Species::MuPlus | Species::MuMinus => 0.105658,
            Species::Electron | Species::Positron => 0.000511,
            Species::Gamma | Species::NuE | Species::NuEBar | Species::NuMu | Species::NuMuBar => {
                0.0
            }
        }
    }

    /// Proper decay length c*tau in cm, `None` for (effectively) stable
    /// species. The neutron is treated as stable on shower time scales.
    pub fn ctau(self) -> Option<f64> {
        match self {
            Species::Proton | Species::Neutron => None,
            Species::PiPlus | Species::PiMinus => Some(780.45),
            Species::PiZero => Some(25.5e-7),
            Species::KPlus | Species::KMinus => Some(371.3),
            Species::KZeroLong => Some(1534.0),
            Species::KZeroShort => Some(2.6844),
            Species::Eta => Some(1.5e-17),
            Species::MuPlus | Species::MuMinus => Some(6.5860e4),
            Species::Electron
            | Species::Positron
            | Species::Gamma
            | Species::NuE
            | Species::NuEBar
            | Species::NuMu
            | Species::NuMuBar => None,
        }
    }

    /// Electric charge in units of e.
    pub fn charge(self) -> i8 {
        match self {
            Species::Proton | Species::PiPlus | Species::KPlus | Species::MuPlus
            | Species::Positron => 1,
            Species::PiMinus | Species::KMinus | Species::MuMinus | Species::Electron => -1,
            _ => 0,
        }
    }

    /// PDG Monte Carlo numbering, used as the interop key of yield tables.
    pub fn pdg_id(self) -> i32 {
        match self {
            Species::Proton => 2212,
            Species::Neutron => 2112,
            Species::PiPlus => 211,
            Species::PiMinus => -211,
            Species::PiZero => 111,
            Species::KPlus => 321,
            Species::KMinus => -321,
            Species::KZeroLong => 130,
            Species::KZeroShort => 310,
            Species::Eta => 221,
            Species::MuPlus => -13,
            Species::MuMinus => 13,
            Species::Electron => 11,
            Species::Positron => -11,
            Species::Gamma => 22,
            Species::NuE => 12,
            Species::NuEBar => -12,
            Species::NuMu => 14,
            Species::NuMuBar => -14,
        }
    }

    /// Look up a species by PDG id.
    pub fn from_pdg_id(pdg: i32) -> Option<Species> {
        ALL_SPECIES.iter().copied().find(|s| s.pdg_id() == pdg)
    }

    /// Hadrons that can interact with the target medium.
    pub fn is_hadron(self) -> bool {
        matches!(
            self,
            Species::Proton
                | Species::Neutron
                | Species::PiPlus
                | Species::PiMinus
                | Species::PiZero
                | Species::KPlus
                | Species::KMinus
                | Species::KZeroLong
                | Species::KZeroShort
                | Species::Eta
        )
    }

    pub fn is_lepton(self) -> bool {
        matches!(
            self,
            Species::MuPlus
                | Species::MuMinus
                | Species::Electron
                | Species::Positron
                | Species::NuE
                | Species::NuEBar
                | Species::NuMu
                | Species::NuMuBar
        )
    }

    /// Decay length in cm for a particle of total energy `energy` GeV,
    /// including the Lorentz boost. `None` for stable species.
    pub fn decay_length_cm(self, energy: f64) -> Option<f64> {
        let ctau = self.ctau()?;
        let mass = self.mass();
        if mass <= 0.0 {
            return None;
        }
        let gamma = (energy / mass).max(1.0);
        Some(ctau * gamma)
    }
}
