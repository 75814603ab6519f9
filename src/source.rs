// Boundary conditions and injection sources.

use crate::energy_grid::EnergyGrid;
use crate::interp::interpolate_log_log;
use crate::species::Species;
use crate::state::FluxState;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Primary cosmic-ray spectrum at the top of the atmosphere.
///
/// Evaluated once per run to produce the initial [`FluxState`]. Units of the
/// resulting flux: particles / (cm^2 s sr GeV).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PrimarySpectrum {
    /// Power law phi(E) = normalization * E^(-spectral_index).
    PowerLaw {
        species: Species,
        normalization: f64,
        spectral_index: f64,
    },
    /// A single primary of the given energy; `amplitude` is the integral
    /// number flux deposited into the containing bin.
    Mono {
        species: Species,
        energy: f64,
        amplitude: f64,
    },
    /// Tabulated differential flux, log-log interpolated onto the grid.
    Tabulated {
        species: Species,
        energies: Vec<f64>,
        fluxes: Vec<f64>,
    },
}

impl PrimarySpectrum {
    /// Evaluate the spectrum into a fresh boundary state on `grid`.
    pub fn boundary_state(&self, grid: Arc<EnergyGrid>) -> FluxState {
        let mut state = FluxState::zeros(grid.clone());
        match self {
            PrimarySpectrum::PowerLaw {
                species,
                normalization,
                spectral_index,
            } => {
                for (i, &e) in grid.centers().iter().enumerate() {
                    state.set(*species, i, normalization * e.powf(-spectral_index));
                }
            }
            PrimarySpectrum::Mono {
                species,
                energy,
                amplitude,
            } => {
                if let Ok(bin) = grid.bin_index(*energy) {
                    // differential flux such that phi * dE = amplitude
                    state.set(*species, bin, amplitude / grid.widths()[bin]);
                }
            }
            PrimarySpectrum::Tabulated {
                species,
                energies,
                fluxes,
            } => {
                for (i, &e) in grid.centers().iter().enumerate() {
                    state.set(*species, i, interpolate_log_log(energies, fluxes, e).max(0.0));
                }
            }
        }
        state
    }
}

/// Injection term S(X) for generalized-target runs, added to the
/// flux derivative inside the step loop.
pub trait SourceTerm: Send + Sync {
    /// Accumulate the injection rate (per g/cm^2) at `depth` into `out`.
    fn inject(&self, depth: f64, out: &mut DVector<f64>);
}

/// Injection of a fixed spectrum at a constant rate over a depth window.
pub struct WindowedInjection {
    spectrum: FluxState,
    /// Injection rate per g/cm^2 of traversed depth.
    rate: f64,
    depth_range: (f64, f64),
}

impl WindowedInjection {
    pub fn new(spectrum: FluxState, rate: f64, depth_range: (f64, f64)) -> Self {
        WindowedInjection {
            spectrum,
            rate,
            depth_range,
        }
    }
}

impl SourceTerm for WindowedInjection {
    fn inject(&self, depth: f64, out: &mut DVector<f64>) {
        if depth >= self.depth_range.0 && depth <= self.depth_range.1 {
            out.axpy(self.rate, self.spectrum.as_vector(), 1.0);
        }
    }
}
