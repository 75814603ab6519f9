// Flux state vectors and integration output.

use crate::energy_grid::EnergyGrid;
use crate::error::{CascadeError, Result};
use crate::species::{Species, ALL_SPECIES};
use nalgebra::DVector;
use std::sync::Arc;

/// Differential particle flux per (species, energy bin) at one depth.
///
/// Units: particles / (cm^2 s sr GeV). The vector is laid out in species
/// blocks of `grid.dim()` bins each, in [`ALL_SPECIES`] order. A state is
/// owned by the integrator while a run is in progress and handed to the
/// caller as part of the trajectory.
#[derive(Debug, Clone)]
pub struct FluxState {
    grid: Arc<EnergyGrid>,
    data: DVector<f64>,
}

impl FluxState {
    pub fn zeros(grid: Arc<EnergyGrid>) -> Self {
        let dim = grid.dim() * Species::count();
        FluxState {
            grid,
            data: DVector::zeros(dim),
        }
    }

    /// Wrap an existing vector; its length must match the grid layout.
    pub fn from_vector(grid: Arc<EnergyGrid>, data: DVector<f64>) -> Result<Self> {
        let expected = grid.dim() * Species::count();
        if data.len() != expected {
            return Err(CascadeError::OutOfRange {
                quantity: "state vector length",
                value: data.len() as f64,
                min: expected as f64,
                max: expected as f64,
            });
        }
        Ok(FluxState { grid, data })
    }

    pub fn grid(&self) -> &Arc<EnergyGrid> {
        &self.grid
    }

    /// Flat component index of `(species, bin)`.
    pub fn component(&self, species: Species, bin: usize) -> usize {
        species.index() * self.grid.dim() + bin
    }

    pub fn get(&self, species: Species, bin: usize) -> f64 {
        self.data[self.component(species, bin)]
    }

    pub fn set(&mut self, species: Species, bin: usize, value: f64) {
        let idx = self.component(species, bin);
        self.data[idx] = value;
    }

    pub fn add(&mut self, species: Species, bin: usize, value: f64) {
        let idx = self.component(species, bin);
        self.data[idx] += value;
    }

    /// Differential flux spectrum of one species over all bins.
    pub fn spectrum(&self, species: Species) -> Vec<f64> {
        let n = self.grid.dim();
        let off = species.index() * n;
        (0..n).map(|i| self.data[off + i]).collect()
    }

    /// Integral particle-number flux of one species (sum of phi * dE).
    pub fn particle_number(&self, species: Species) -> f64 {
        let n = self.grid.dim();
        let off = species.index() * n;
        self.grid
            .widths()
            .iter()
            .enumerate()
            .map(|(i, &w)| self.data[off + i] * w)
            .sum()
    }

    /// Total particle-number flux summed over all species.
    pub fn total_number(&self) -> f64 {
        ALL_SPECIES.iter().map(|&s| self.particle_number(s)).sum()
    }

    pub fn as_vector(&self) -> &DVector<f64> {
        &self.data
    }

    pub(crate) fn vector_mut(&mut self) -> &mut DVector<f64> {
        &mut self.data
    }

    /// Resolve a flat component index back to its (species, energy) pair.
    pub fn locate(&self, component: usize) -> (Species, f64) {
        let n = self.grid.dim();
        let species = ALL_SPECIES[component / n];
        let energy = self.grid.centers()[component % n];
        (species, energy)
    }
}

/// Why a run stopped stepping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The requested final depth was reached.
    ReachedTarget,
    /// The abort flag was raised between steps.
    Aborted,
}

/// Cumulative particle-number bookkeeping of one run.
///
/// Production and loss come from independently tabulated approximations, so
/// number balance is a diagnostic, never an enforced invariant.
#[derive(Debug, Clone, Default)]
pub struct BalanceDiagnostics {
    /// Total particle-number flux of the boundary condition.
    pub initial_number: f64,
    /// Number injected by the generalized-target source term.
    pub injected_number: f64,
    /// Total particle-number flux at the final depth.
    pub final_number: f64,
    /// Number of explicit integration steps taken.
    pub steps: usize,
}

impl BalanceDiagnostics {
    /// Relative net change of particle number over the run.
    pub fn relative_imbalance(&self) -> f64 {
        let reference = self.initial_number + self.injected_number;
        if reference == 0.0 {
            return 0.0;
        }
        (self.final_number - reference) / reference
    }
}

/// Ordered (depth, state) solution of one integration run, owned by the
/// caller once integration completes.
#[derive(Debug, Clone)]
pub struct FluxTrajectory {
    pub states: Vec<(f64, FluxState)>,
    pub reason: TerminationReason,
    pub balance: BalanceDiagnostics,
}

impl FluxTrajectory {
    /// State at the final recorded depth.
    pub fn final_state(&self) -> &FluxState {
        &self.states.last().expect("trajectory is never empty").1
    }

    pub fn final_depth(&self) -> f64 {
        self.states.last().expect("trajectory is never empty").0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Arc<EnergyGrid> {
        Arc::new(EnergyGrid::new(1.0, 1e4, 20).unwrap())
    }

    #[test]
    fn test_component_layout_is_blockwise() {
        let state = FluxState::zeros(grid());
        let n = state.grid().dim();
        assert_eq!(state.component(Species::Proton, 0), 0);
        assert_eq!(state.component(Species::Neutron, 0), n);
        assert_eq!(
            state.component(Species::NuMuBar, n - 1),
            Species::count() * n - 1
        );
    }

    #[test]
    fn test_get_set_round_trip() {
        let mut state = FluxState::zeros(grid());
        state.set(Species::MuMinus, 3, 42.0);
        assert_eq!(state.get(Species::MuMinus, 3), 42.0);
        assert_eq!(state.get(Species::MuPlus, 3), 0.0);
    }

    #[test]
    fn test_particle_number_weights_by_bin_width() {
        let g = grid();
        let mut state = FluxState::zeros(g.clone());
        // unit differential flux in every bin: number = sum of widths = span
        for i in 0..g.dim() {
            state.set(Species::Proton, i, 1.0);
        }
        let span = g.e_max() - g.e_min();
        assert!((state.particle_number(Species::Proton) - span).abs() / span < 1e-12);
    }

    #[test]
    fn test_locate_inverts_component() {
        let state = FluxState::zeros(grid());
        let idx = state.component(Species::KPlus, 7);
        let (species, energy) = state.locate(idx);
        assert_eq!(species, Species::KPlus);
        assert_eq!(energy, state.grid().centers()[7]);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let g = grid();
        let bad = DVector::zeros(3);
        assert!(FluxState::from_vector(g, bad).is_err());
    }
}
