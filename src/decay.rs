// Decay channels and their secondary-energy distributions.
//
// Distributions are stored in the scaling variable x = E_child / E_parent,
// which is boost-invariant in the relativistic regime the cascade equations
// operate in. dN/dx integrates to the channel multiplicity (branching ratio
// times children per decay).

use crate::interp::Pchip;
use crate::species::Species;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

static STANDARD_DECAYS: Lazy<DecayLibrary> = Lazy::new(DecayLibrary::standard);

/// One decay channel parent -> child with its tabulated dN/dx.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayChannel {
    pub parent: Species,
    pub child: Species,
    /// x = E_child / E_parent nodes, strictly increasing within [0, 1].
    pub x_grid: Vec<f64>,
    /// dN/dx at the nodes; integral over x equals the channel multiplicity.
    pub dndx: Vec<f64>,
}

impl DecayChannel {
    /// Two-body decay P -> C + O where the parent is spinless (or averaged
    /// over polarization), so dN/dx is flat between the kinematic limits.
    ///
    /// `other_mass` is the mass of the unobserved companion O in GeV;
    /// `branching` scales the multiplicity.
    pub fn two_body(parent: Species, child: Species, other_mass: f64, branching: f64) -> Self {
        let m_p = parent.mass();
        let m_c = child.mass();
        // child energy and momentum in the parent rest frame
        let e_star = (m_p * m_p + m_c * m_c - other_mass * other_mass) / (2.0 * m_p);
        let p_star = (e_star * e_star - m_c * m_c).max(0.0).sqrt();
        let x_lo = ((e_star - p_star) / m_p).max(0.0);
        let x_hi = ((e_star + p_star) / m_p).min(1.0);
        let height = branching / (x_hi - x_lo);
        // narrow ramps at the kinematic limits keep the interpolant monotone;
        // nodes outside [0, 1] or coinciding with the limits are omitted
        let eps = 1e-6 * (x_hi - x_lo);
        let mut x_grid = Vec::with_capacity(6);
        let mut dndx = Vec::with_capacity(6);
        if x_lo > eps {
            x_grid.push(0.0);
            dndx.push(0.0);
            x_grid.push(x_lo - eps);
            dndx.push(0.0);
        }
        x_grid.push(x_lo);
        dndx.push(height);
        x_grid.push(x_hi);
        dndx.push(height);
        if x_hi < 1.0 - eps {
            x_grid.push(x_hi + eps);
            dndx.push(0.0);
            x_grid.push(1.0);
            dndx.push(0.0);
        }
        DecayChannel {
            parent,
            child,
            x_grid,
            dndx,
        }
    }

    /// Muon-neutrino spectrum from unpolarized muon decay,
    /// dN/dx = 2x^2(3 - 2x).
    pub fn michel_numu(parent: Species, child: Species) -> Self {
        Self::from_analytic(parent, child, |x| 2.0 * x * x * (3.0 - 2.0 * x))
    }

    /// Electron-neutrino spectrum from unpolarized muon decay,
    /// dN/dx = 12x^2(1 - x).
    pub fn michel_nue(parent: Species, child: Species) -> Self {
        Self::from_analytic(parent, child, |x| 12.0 * x * x * (1.0 - x))
    }

    /// Electron spectrum from unpolarized muon decay (same shape as the
    /// muon-neutrino spectrum).
    pub fn michel_electron(parent: Species, child: Species) -> Self {
        Self::michel_numu(parent, child)
    }

    fn from_analytic(parent: Species, child: Species, f: impl Fn(f64) -> f64) -> Self {
        let n = 51;
        let x_grid: Vec<f64> = (0..n).map(|i| i as f64 / (n - 1) as f64).collect();
        let dndx: Vec<f64> = x_grid.iter().map(|&x| f(x).max(0.0)).collect();
        DecayChannel {
            parent,
            child,
            x_grid,
            dndx,
        }
    }

    /// Children per decay landing with E_child in `[e_lo, e_hi]`, for a
    /// parent of energy `e_parent` (bin-integrated, multiplicity-conserving).
    pub fn multiplicity_in(&self, e_parent: f64, e_lo: f64, e_hi: f64) -> f64 {
        if e_parent <= 0.0 {
            return 0.0;
        }
        let x_lo = (e_lo / e_parent).clamp(0.0, 1.0);
        let x_hi = (e_hi / e_parent).clamp(0.0, 1.0);
        if x_hi <= x_lo {
            return 0.0;
        }
        let p = Pchip::new(&self.x_grid, &self.dndx);
        p.integrate(x_lo, x_hi).max(0.0)
    }

    /// Total multiplicity of the channel (integral of dN/dx).
    pub fn multiplicity(&self) -> f64 {
        let p = Pchip::new(&self.x_grid, &self.dndx);
        p.integrate(0.0, 1.0).max(0.0)
    }
}

/// Read-only collection of decay channels keyed by (parent, child).
#[derive(Debug, Clone, Default)]
pub struct DecayLibrary {
    channels: HashMap<(Species, Species), DecayChannel>,
}

impl DecayLibrary {
    pub fn new(channels: Vec<DecayChannel>) -> Self {
        let mut map = HashMap::new();
        for c in channels {
            map.insert((c.parent, c.child), c);
        }
        DecayLibrary { channels: map }
    }

    /// Standard decay channels of the atmospheric-cascade species set:
    /// pi/K two-body decays to muons and neutrinos, K0S -> pi pi,
    /// pi0 -> gamma gamma, eta -> gamma gamma, and muon Michel decays.
    pub fn standard() -> Self {
        use Species::*;
        let m_mu = MuPlus.mass();
        let m_pi = PiPlus.mass();
        let mut channels = vec![
            // pi+ -> mu+ nu_mu (and charge conjugate)
            DecayChannel::two_body(PiPlus, MuPlus, 0.0, 1.0),
            DecayChannel::two_body(PiPlus, NuMu, m_mu, 1.0),
            DecayChannel::two_body(PiMinus, MuMinus, 0.0, 1.0),
            DecayChannel::two_body(PiMinus, NuMuBar, m_mu, 1.0),
            // K+ -> mu+ nu_mu, BR 0.6356 (and charge conjugate)
            DecayChannel::two_body(KPlus, MuPlus, 0.0, 0.6356),
            DecayChannel::two_body(KPlus, NuMu, m_mu, 0.6356),
            DecayChannel::two_body(KMinus, MuMinus, 0.0, 0.6356),
            DecayChannel::two_body(KMinus, NuMuBar, m_mu, 0.6356),
            // K+ -> pi+ pi0, BR 0.2067
            DecayChannel::two_body(KPlus, PiPlus, PiZero.mass(), 0.2067),
            DecayChannel::two_body(KPlus, PiZero, m_pi, 0.2067),
            DecayChannel::two_body(KMinus, PiMinus, PiZero.mass(), 0.2067),
            DecayChannel::two_body(KMinus, PiZero, m_pi, 0.2067),
            // K0S -> pi+ pi-, BR 0.692
            DecayChannel::two_body(KZeroShort, PiPlus, m_pi, 0.692),
            DecayChannel::two_body(KZeroShort, PiMinus, m_pi, 0.692),
            // K0S -> pi0 pi0, BR 0.307 (two identical children)
            DecayChannel::two_body(KZeroShort, PiZero, PiZero.mass(), 2.0 * 0.307),
            // pi0 -> gamma gamma
            DecayChannel::two_body(PiZero, Gamma, 0.0, 2.0),
            // eta -> gamma gamma, BR 0.394
            DecayChannel::two_body(Eta, Gamma, 0.0, 2.0 * 0.394),
            // mu decays (Michel spectra, unpolarized)
            DecayChannel::michel_electron(MuMinus, Electron),
            DecayChannel::michel_numu(MuMinus, NuMu),
            DecayChannel::michel_nue(MuMinus, NuEBar),
            DecayChannel::michel_electron(MuPlus, Positron),
            DecayChannel::michel_numu(MuPlus, NuMuBar),
            DecayChannel::michel_nue(MuPlus, NuE),
        ];
        // K0L three-body channels approximated by the flat two-body kinematics
        // of the dominant semileptonic mode (K_e3 / K_mu3 averages)
        channels.push(DecayChannel::two_body(KZeroLong, PiPlus, m_mu, 0.406));
        channels.push(DecayChannel::two_body(KZeroLong, PiMinus, m_mu, 0.406));
        channels.push(DecayChannel::two_body(KZeroLong, MuPlus, m_pi, 0.135));
        channels.push(DecayChannel::two_body(KZeroLong, MuMinus, m_pi, 0.135));
        channels.push(DecayChannel::two_body(KZeroLong, NuMu, m_pi, 0.135));
        channels.push(DecayChannel::two_body(KZeroLong, NuMuBar, m_pi, 0.135));
        DecayLibrary::new(channels)
    }

    /// Shared copy of [`DecayLibrary::standard`], built on first use. The
    /// tables are immutable, so sharing across runs is safe.
    pub fn shared() -> &'static DecayLibrary {
        &STANDARD_DECAYS
    }

    pub fn get(&self, parent: Species, child: Species) -> Option<&DecayChannel> {
        self.channels.get(&(parent, child))
    }

    /// Children of `parent`, in block order.
    pub fn children(&self, parent: Species) -> Vec<Species> {
        let mut v: Vec<Species> = self
            .channels
            .keys()
            .filter(|&&(p, _)| p == parent)
            .map(|&(_, c)| c)
            .collect();
        v.sort();
        v
    }

    pub fn has_channels(&self, parent: Species) -> bool {
        self.channels.keys().any(|&(p, _)| p == parent)
    }

    /// Channels in deterministic block order.
    pub fn channels(&self) -> Vec<&DecayChannel> {
        let mut keys: Vec<(Species, Species)> = self.channels.keys().copied().collect();
        keys.sort();
        keys.iter().map(|k| &self.channels[k]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_body_pion_kinematic_limits() {
        // pi+ -> mu+ nu: x_mu in [r, 1] with r = (m_mu/m_pi)^2
        let ch = DecayChannel::two_body(Species::PiPlus, Species::MuPlus, 0.0, 1.0);
        let r = (Species::MuPlus.mass() / Species::PiPlus.mass()).powi(2);
        // all muon energy fractions below r are kinematically forbidden
        assert!(ch.multiplicity_in(100.0, 0.0, 0.9 * r * 100.0) < 1e-6);
        // the full range holds one muon per decay
        assert!((ch.multiplicity() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_two_body_neutrino_takes_the_rest() {
        let ch = DecayChannel::two_body(
            Species::PiPlus,
            Species::NuMu,
            Species::MuPlus.mass(),
            1.0,
        );
        let r = (Species::MuPlus.mass() / Species::PiPlus.mass()).powi(2);
        // neutrino x range is [0, 1-r]
        assert!(ch.multiplicity_in(100.0, (1.0 - 0.9 * r) * 100.0, 100.0) < 1e-6);
        assert!((ch.multiplicity() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_michel_spectra_normalized() {
        let numu = DecayChannel::michel_numu(Species::MuMinus, Species::NuMu);
        let nue = DecayChannel::michel_nue(Species::MuMinus, Species::NuEBar);
        assert!((numu.multiplicity() - 1.0).abs() < 1e-4);
        assert!((nue.multiplicity() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_standard_library_covers_unstable_species() {
        let lib = DecayLibrary::standard();
        for s in [
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
        ] {
            assert!(lib.has_channels(s), "no decay channels for {:?}", s);
        }
    }

    #[test]
    fn test_bin_integration_conserves_multiplicity() {
        let ch = DecayChannel::two_body(Species::PiPlus, Species::MuPlus, 0.0, 1.0);
        let e_parent = 50.0;
        // partition [0, e_parent] into 40 bins and sum
        let mut total = 0.0;
        for i in 0..40 {
            let lo = e_parent * i as f64 / 40.0;
            let hi = e_parent * (i + 1) as f64 / 40.0;
            total += ch.multiplicity_in(e_parent, lo, hi);
        }
        assert!((total - ch.multiplicity()).abs() < 1e-2, "total = {}", total);
    }
}
