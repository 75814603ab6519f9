// Module tree and public surface of the cascade-equation engine.

pub mod builder;
pub mod config;
pub mod cross_sections;
pub mod decay;
pub mod density;
pub mod energy_grid;
pub mod energy_loss;
pub mod error;
pub mod interp;
pub mod result;
pub mod solver;
pub mod source;
pub mod species;
pub mod state;
pub mod yield_table;

pub use builder::{CascadeOperators, MatrixBuilder};
pub use config::SolverConfig;
pub use cross_sections::{CrossSectionLibrary, CrossSectionTable};
pub use decay::{DecayChannel, DecayLibrary};
pub use density::{DensityProfile, GeneralizedTarget, IsothermalAtmosphere, TargetSegment};
pub use energy_grid::EnergyGrid;
pub use energy_loss::{EnergyLossLibrary, EnergyLossTable};
pub use error::{CascadeError, Result};
pub use result::ResultAccessor;
pub use solver::CascadeIntegrator;
pub use source::{PrimarySpectrum, SourceTerm, WindowedInjection};
pub use species::{Species, ALL_SPECIES};
pub use state::{BalanceDiagnostics, FluxState, FluxTrajectory, TerminationReason};
pub use yield_table::{LowEnergyExtension, YieldLibrary, YieldLibraryFile, YieldTable};
