// Logarithmic energy grid shared by all matrices and flux vectors.

use crate::error::{CascadeError, Result};

/// Discretization of particle kinetic energy in GeV.
///
/// Bin edges are spaced uniformly in log10(E); bin centers are the geometric
/// means of their edges. The grid is immutable after construction and shared
/// by reference (`Arc<EnergyGrid>`) across matrices and flux states. All
/// operators built against a grid must have matching dimension
/// [`EnergyGrid::dim`].
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyGrid {
    edges: Vec<f64>,
    centers: Vec<f64>,
    widths: Vec<f64>,
}

impl EnergyGrid {
    /// Build a grid spanning `[e_min, e_max]` GeV with `bins_per_decade`
    /// logarithmic bins per decade of energy.
    pub fn from_bins_per_decade(e_min: f64, e_max: f64, bins_per_decade: usize) -> Result<Self> {
        if e_min <= 0.0 || e_max <= 0.0 {
            return Err(CascadeError::InvalidGrid {
                reason: "energy bounds must be positive".into(),
                e_min,
                e_max,
                bins: 0,
            });
        }
        let decades = (e_max / e_min).log10();
        let bins = (decades * bins_per_decade as f64).round() as usize;
        Self::new(e_min, e_max, bins)
    }

    /// Build a grid spanning `[e_min, e_max]` GeV with `bins` logarithmic bins.
    pub fn new(e_min: f64, e_max: f64, bins: usize) -> Result<Self> {
        if e_min <= 0.0 || e_max <= 0.0 {
            return Err(CascadeError::InvalidGrid {
                reason: "energy bounds must be positive".into(),
                e_min,
                e_max,
                bins,
            });
        }
        if e_min >= e_max {
            return Err(CascadeError::InvalidGrid {
                reason: "e_min must be below e_max".into(),
                e_min,
                e_max,
                bins,
            });
        }
        if bins < 2 {
            return Err(CascadeError::InvalidGrid {
                reason: "at least 2 bins required".into(),
                e_min,
                e_max,
                bins,
            });
        }

        let log_min = e_min.log10();
        let log_step = (e_max.log10() - log_min) / bins as f64;
        let edges: Vec<f64> = (0..=bins)
            .map(|i| 10f64.powf(log_min + i as f64 * log_step))
            .collect();
        let centers: Vec<f64> = edges.windows(2).map(|w| (w[0] * w[1]).sqrt()).collect();
        let widths: Vec<f64> = edges.windows(2).map(|w| w[1] - w[0]).collect();

        Ok(EnergyGrid {
            edges,
            centers,
            widths,
        })
    }

    /// Number of energy bins.
    pub fn dim(&self) -> usize {
        self.centers.len()
    }

    /// Bin edges, length `dim() + 1`, strictly increasing.
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Bin centers (geometric means), strictly increasing.
    pub fn centers(&self) -> &[f64] {
        &self.centers
    }

    /// Bin widths in GeV.
    pub fn widths(&self) -> &[f64] {
        &self.widths
    }

    pub fn e_min(&self) -> f64 {
        self.edges[0]
    }

    pub fn e_max(&self) -> f64 {
        *self.edges.last().unwrap()
    }

    /// Bin index containing `energy` (floor semantics: largest `i` with
    /// `edges[i] <= energy`). Errors if the energy is outside the grid.
    pub fn bin_index(&self, energy: f64) -> Result<usize> {
        if energy < self.e_min() || energy > self.e_max() {
            return Err(CascadeError::OutOfRange {
                quantity: "energy [GeV]",
                value: energy,
                min: self.e_min(),
                max: self.e_max(),
            });
        }
        // binary search over edges, same scheme as the interpolators
        let mut low = 0usize;
        let mut high = self.edges.len() - 1;
        while high - low > 1 {
            let mid = (low + high) >> 1;
            if self.edges[mid] <= energy {
                low = mid;
            } else {
                high = mid;
            }
        }
        Ok(low.min(self.dim() - 1))
    }

    /// Center energy of bin `index`.
    pub fn energy_at(&self, index: usize) -> Result<f64> {
        self.centers.get(index).copied().ok_or(CascadeError::OutOfRange {
            quantity: "bin index",
            value: index as f64,
            min: 0.0,
            max: (self.dim() - 1) as f64,
        })
    }
}
