// Error taxonomy for grid construction, matrix building and integration.

use crate::species::Species;
use thiserror::Error;

/// Errors produced by the cascade engine.
///
/// Grid and matrix-build errors abort before any integration starts.
/// Integration-time errors abort only the current run; the shared
/// grid/matrices are never mutated and stay valid for other runs.
#[derive(Debug, Error)]
pub enum CascadeError {
    /// Invalid energy-grid construction parameters.
    #[error("invalid energy grid: {reason} (e_min={e_min}, e_max={e_max}, bins={bins})")]
    InvalidGrid {
        reason: String,
        e_min: f64,
        e_max: f64,
        bins: usize,
    },

    /// A required yield table or decay channel is absent at build time.
    /// `secondary` is `None` when no table at all exists for the projectile.
    #[error("missing yield data for projectile {projectile:?} (secondary: {secondary:?}) in model '{model}'")]
    MissingYieldData {
        projectile: Species,
        secondary: Option<Species>,
        model: String,
    },

    /// A flux component became non-finite or negative beyond tolerance.
    #[error(
        "numerical instability at depth {depth:.4} g/cm^2: \
         {species:?} at E={energy:.4e} GeV has flux {value:.4e}"
    )]
    NumericalInstability {
        species: Species,
        energy: f64,
        depth: f64,
        value: f64,
    },

    /// The adaptive stepper exhausted its step budget before the target depth.
    #[error(
        "step limit of {max_steps} exceeded at depth {depth:.4} of {target_depth:.4} g/cm^2 \
         (last step {last_step:.4e})"
    )]
    StepLimitExceeded {
        max_steps: usize,
        depth: f64,
        target_depth: f64,
        last_step: f64,
    },

    /// A query (energy or depth) lies outside the valid domain.
    #[error("{quantity} {value:.4e} outside valid range [{min:.4e}, {max:.4e}]")]
    OutOfRange {
        quantity: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

pub type Result<T> = std::result::Result<T, CascadeError>;
