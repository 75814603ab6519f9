// Solver and build configuration.

use crate::species::Species;
use crate::yield_table::LowEnergyExtension;
use serde::{Deserialize, Serialize};

/// Configuration shared by the matrix builder and the integrator.
///
/// Defaults follow the conventions of inclusive atmospheric-flux
/// calculations for air showers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Maximum fractional flux change allowed per explicit step; the step
    /// size is the tolerance divided by the stiffest explicit loss rate.
    pub step_tolerance: f64,
    /// Hard ceiling on the step size in g/cm^2.
    pub max_step: f64,
    /// Step budget per run; exceeding it fails the run.
    pub max_steps: usize,
    /// Ratio of decay length to interaction length (at `max_density`) below
    /// which a species is solved in local quasi-equilibrium instead of being
    /// explicitly propagated. The switchover is a numerical heuristic, so it
    /// is configurable rather than fixed.
    pub hybrid_crossover: f64,
    /// Largest density expected along the trajectory, in g/cm^3. Used only
    /// by the equilibration criterion.
    pub max_density: f64,
    /// Average mass number of the target medium (14.5 for air).
    pub a_target: f64,
    /// Negative flux components larger (in magnitude) than this fraction of
    /// the state maximum fail the run; smaller ones are clamped to zero.
    pub negative_tolerance: f64,
    /// Species whose decays are switched off.
    pub disable_decays: Vec<Species>,
    /// Species always solved in quasi-equilibrium, regardless of the
    /// crossover criterion.
    pub force_equilibrium: Vec<Species>,
    /// Species never solved in quasi-equilibrium.
    pub never_equilibrium: Vec<Species>,
    /// Integrate short-lived species out of the coupled system at build time
    /// by folding their decay feed-down into the production of stable
    /// secondaries.
    pub compact_mode: bool,
    /// Proper decay length (cm) below which a species counts as short-lived
    /// for compact mode. Default is c*tau of the K0S.
    pub compact_ctau_threshold: f64,
    /// Fold tabulated continuous energy losses (ionization/radiative dE/dX)
    /// into the interaction operator when a stopping-power library is
    /// supplied to the builder.
    pub continuous_losses: bool,
    /// Projectiles that must have yield tables at build time.
    pub required_projectiles: Vec<Species>,
    /// Optional low-energy interaction-model extension.
    pub low_energy_extension: Option<LowEnergyExtension>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            step_tolerance: 0.05,
            max_step: 10.0,
            max_steps: 2_000_000,
            hybrid_crossover: 0.5,
            max_density: 1.225e-3,
            a_target: 14.5,
            negative_tolerance: 1e-10,
            disable_decays: Vec::new(),
            force_equilibrium: Vec::new(),
            never_equilibrium: Vec::new(),
            compact_mode: false,
            compact_ctau_threshold: 2.6844,
            continuous_losses: true,
            required_projectiles: vec![
                Species::Proton,
                Species::Neutron,
                Species::PiPlus,
                Species::PiMinus,
                Species::KPlus,
                Species::KMinus,
            ],
            low_energy_extension: None,
        }
    }
}

impl SolverConfig {
    /// A permissive configuration for synthetic fixtures: no required
    /// projectiles and no forced behavior.
    pub fn bare() -> Self {
        SolverConfig {
            required_projectiles: Vec::new(),
            ..Default::default()
        }
    }
}
