// Read-only query surface over integration results.

use crate::error::{CascadeError, Result};
use crate::interp::interpolate_log_log;
use crate::species::Species;
use crate::state::{FluxState, FluxTrajectory};

/// Flux queries against one recorded state.
///
/// Energies exactly on a grid center return the stored value; energies in
/// between are log-log interpolated across the neighboring centers, which is
/// exact for power-law spectra. Queries outside the grid fail instead of
/// extrapolating. All fluxes are differential, particles / (cm^2 s sr GeV).
pub struct ResultAccessor<'a> {
    state: &'a FluxState,
}

impl<'a> ResultAccessor<'a> {
    pub fn new(state: &'a FluxState) -> Self {
        ResultAccessor { state }
    }

    /// Accessor over the trajectory state recorded at `depth`.
    ///
    /// The depth must be one of the depths requested at run time; results are
    /// not interpolated between recorded states.
    pub fn at_depth(trajectory: &'a FluxTrajectory, depth: f64) -> Result<Self> {
        let tol = 1e-9 * depth.abs().max(1.0);
        trajectory
            .states
            .iter()
            .find(|(d, _)| (d - depth).abs() <= tol)
            .map(|(_, s)| ResultAccessor { state: s })
            .ok_or(CascadeError::OutOfRange {
                quantity: "recorded depth [g/cm^2]",
                value: depth,
                min: trajectory.states.first().map_or(0.0, |(d, _)| *d),
                max: trajectory.final_depth(),
            })
    }

    /// Differential flux of `species` at `energy` GeV.
    pub fn flux(&self, species: Species, energy: f64) -> Result<f64> {
        let grid = self.state.grid();
        if energy < grid.e_min() || energy > grid.e_max() {
            return Err(CascadeError::OutOfRange {
                quantity: "energy [GeV]",
                value: energy,
                min: grid.e_min(),
                max: grid.e_max(),
            });
        }
        let spectrum = self.state.spectrum(species);
        Ok(interpolate_log_log(grid.centers(), &spectrum, energy).max(0.0))
    }

    /// Full differential spectrum of `species` on the grid centers.
    pub fn spectrum(&self, species: Species) -> Vec<f64> {
        self.state.spectrum(species)
    }

    /// Integral particle-number flux of `species` over the grid.
    pub fn particle_number(&self, species: Species) -> f64 {
        self.state.particle_number(species)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy_grid::EnergyGrid;
    use crate::state::{BalanceDiagnostics, TerminationReason};
    use std::sync::Arc;

    fn power_law_state() -> FluxState {
        let grid = Arc::new(EnergyGrid::new(1.0, 1e6, 60).unwrap());
        let mut state = FluxState::zeros(grid.clone());
        for (i, &e) in grid.centers().iter().enumerate() {
            state.set(Species::MuMinus, i, e.powf(-3.0));
        }
        state
    }

    #[test]
    fn test_on_grid_query_is_exact() {
        let state = power_law_state();
        let acc = ResultAccessor::new(&state);
        for (i, &e) in state.grid().centers().iter().enumerate() {
            assert_eq!(acc.flux(Species::MuMinus, e).unwrap(), state.get(Species::MuMinus, i));
        }
    }

    #[test]
    fn test_off_grid_query_recovers_power_law() {
        let state = power_law_state();
        let acc = ResultAccessor::new(&state);
        let e = 137.0; // between grid centers
        let got = acc.flux(Species::MuMinus, e).unwrap();
        let expect = e.powf(-3.0);
        assert!((got - expect).abs() / expect < 1e-6);
    }

    #[test]
    fn test_outside_grid_is_an_error() {
        let state = power_law_state();
        let acc = ResultAccessor::new(&state);
        assert!(matches!(
            acc.flux(Species::MuMinus, 0.5),
            Err(CascadeError::OutOfRange { .. })
        ));
        assert!(acc.flux(Species::MuMinus, 1e7).is_err());
    }

    #[test]
    fn test_at_depth_picks_the_recorded_state() {
        let state = power_law_state();
        let trajectory = FluxTrajectory {
            states: vec![(0.0, state.clone()), (100.0, state)],
            reason: TerminationReason::ReachedTarget,
            balance: BalanceDiagnostics::default(),
        };
        assert!(ResultAccessor::at_depth(&trajectory, 100.0).is_ok());
        assert!(matches!(
            ResultAccessor::at_depth(&trajectory, 55.0),
            Err(CascadeError::OutOfRange { .. })
        ));
    }
}
