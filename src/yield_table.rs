// Tabulated secondary-particle yields of hadronic interaction models.
//
// A yield table stores the differential distribution dN/dE_sec of a secondary
// species per interaction of a projectile, on the raw energy grids of the
// model that produced it. The library is the read-only external-data adapter
// consumed by the matrix builder; tables are resampled onto the solver's
// energy grid only at build time.

use crate::error::{CascadeError, Result};
use crate::interp::{interpolate_log_log, Pchip};
use crate::species::Species;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Raw differential yield dN/dE_sec for one (projectile, secondary) pair.
///
/// `yields[i][k]` is dN/dE_sec in 1/GeV at projectile energy
/// `projectile_energies[i]` and secondary energy `secondary_energies[k]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YieldTable {
    pub projectile: Species,
    pub secondary: Species,
    /// Projectile energies in GeV, strictly increasing.
    pub projectile_energies: Vec<f64>,
    /// Secondary energies in GeV, strictly increasing.
    pub secondary_energies: Vec<f64>,
    pub yields: Vec<Vec<f64>>,
}

impl YieldTable {
    fn validate(&self) -> Result<()> {
        let ok_grid = |g: &[f64]| g.len() >= 2 && g.windows(2).all(|w| w[1] > w[0] && w[0] > 0.0);
        if !ok_grid(&self.projectile_energies)
            || !ok_grid(&self.secondary_energies)
            || self.yields.len() != self.projectile_energies.len()
            || self.yields.iter().any(|r| r.len() != self.secondary_energies.len())
        {
            return Err(CascadeError::InvalidGrid {
                reason: format!(
                    "malformed yield table {:?} -> {:?}",
                    self.projectile, self.secondary
                ),
                e_min: self.projectile_energies.first().copied().unwrap_or(f64::NAN),
                e_max: self.projectile_energies.last().copied().unwrap_or(f64::NAN),
                bins: self.projectile_energies.len(),
            });
        }
        Ok(())
    }

    /// Continuous differential yield dN/dE_sec at `(e_proj, e_sec)`.
    ///
    /// Monotone-cubic (PCHIP) in secondary energy, log-log between the
    /// bracketing projectile-energy rows. Never negative.
    pub fn eval(&self, e_proj: f64, e_sec: f64) -> f64 {
        let row = self.row_at(e_proj);
        let p = Pchip::new(&self.secondary_energies, &row);
        p.eval(e_sec).max(0.0)
    }

    /// dN/dE_sec at projectile energy `e_proj` on the raw secondary grid.
    pub(crate) fn row_at(&self, e_proj: f64) -> Vec<f64> {
        (0..self.secondary_energies.len())
            .map(|k| {
                let column: Vec<f64> = self.yields.iter().map(|r| r[k]).collect();
                interpolate_log_log(&self.projectile_energies, &column, e_proj).max(0.0)
            })
            .collect()
    }

    /// True if every tabulated value is zero.
    pub fn is_zero(&self) -> bool {
        self.yields.iter().flatten().all(|&v| v == 0.0)
    }
}

/// Settings for merging a low-energy interaction model into a high-energy one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LowEnergyExtension {
    /// Projectile energy in GeV around which the two models are blended.
    pub transition_energy: f64,
    /// Number of projectile-energy nodes over which the blend is linear.
    pub n_interp_nodes: usize,
}

impl Default for LowEnergyExtension {
    fn default() -> Self {
        LowEnergyExtension {
            transition_energy: 80.0,
            n_interp_nodes: 3,
        }
    }
}

/// Read-only collection of yield tables for one interaction model.
#[derive(Debug, Clone)]
pub struct YieldLibrary {
    model: String,
    target: String,
    valid_range: (f64, f64),
    tables: HashMap<(Species, Species), YieldTable>,
}

/// Serialized form of a [`YieldLibrary`] (JSON adapter).
#[derive(Debug, Serialize, Deserialize)]
pub struct YieldLibraryFile {
    pub model: String,
    pub target: String,
    pub valid_range: (f64, f64),
    pub tables: Vec<YieldTable>,
}

impl YieldLibrary {
    /// Assemble a library from raw tables. Fails on malformed grids;
    /// negative tabulated values are clamped to zero with a warning.
    pub fn from_tables(
        model: impl Into<String>,
        target: impl Into<String>,
        valid_range: (f64, f64),
        tables: Vec<YieldTable>,
    ) -> Result<Self> {
        let mut map = HashMap::new();
        for mut t in tables {
            t.validate()?;
            let mut clamped = 0.0;
            let mut total = 0.0;
            for row in t.yields.iter_mut() {
                for v in row.iter_mut() {
                    if *v < 0.0 {
                        clamped -= *v;
                        *v = 0.0;
                    }
                    total += *v;
                }
            }
            if clamped > 0.0 && clamped > 1e-6 * total.max(f64::MIN_POSITIVE) {
                warn!(
                    "clamped negative yield mass {:.3e} in {:?} -> {:?}",
                    clamped, t.projectile, t.secondary
                );
            }
            map.insert((t.projectile, t.secondary), t);
        }
        Ok(YieldLibrary {
            model: model.into(),
            target: target.into(),
            valid_range,
            tables: map,
        })
    }

    /// Load from the JSON adapter format.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: YieldLibraryFile = serde_json::from_str(json).map_err(|e| {
            CascadeError::InvalidGrid {
                reason: format!("yield library JSON: {e}"),
                e_min: f64::NAN,
                e_max: f64::NAN,
                bins: 0,
            }
        })?;
        Self::from_tables(file.model, file.target, file.valid_range, file.tables)
    }

    /// Interaction-model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Target-material descriptor (e.g. "air").
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Valid projectile-energy range of the model in GeV.
    pub fn valid_range(&self) -> (f64, f64) {
        self.valid_range
    }

    pub fn get(&self, projectile: Species, secondary: Species) -> Option<&YieldTable> {
        self.tables.get(&(projectile, secondary))
    }

    /// Continuous yield lookup; errors if the pair is not tabulated.
    pub fn get_yield(
        &self,
        projectile: Species,
        secondary: Species,
        e_proj: f64,
        e_sec: f64,
    ) -> Result<f64> {
        self.get(projectile, secondary)
            .map(|t| t.eval(e_proj, e_sec))
            .ok_or(CascadeError::MissingYieldData {
                projectile,
                secondary: Some(secondary),
                model: self.model.clone(),
            })
    }

    /// Projectiles with at least one tabulated secondary.
    pub fn projectiles(&self) -> Vec<Species> {
        let mut v: Vec<Species> = self.tables.keys().map(|&(p, _)| p).collect();
        v.sort();
        v.dedup();
        v
    }

    /// Secondaries tabulated for `projectile`, in block order.
    pub fn secondaries(&self, projectile: Species) -> Vec<Species> {
        let mut v: Vec<Species> = self
            .tables
            .keys()
            .filter(|&&(p, _)| p == projectile)
            .map(|&(_, s)| s)
            .collect();
        v.sort();
        v
    }

    /// Tabulated pairs in deterministic block order.
    pub fn pairs(&self) -> Vec<(Species, Species)> {
        let mut v: Vec<(Species, Species)> = self.tables.keys().copied().collect();
        v.sort();
        v
    }

    /// Merge a low-energy model into this (high-energy) one.
    ///
    /// Within a window of `ext.n_interp_nodes` projectile-energy nodes around
    /// `ext.transition_energy` the yields are blended linearly; below the
    /// window the low-energy model applies, above it the high-energy one.
    /// Pairs absent from the low-energy model (or tabulated on a different
    /// raw grid) keep the high-energy yields unchanged. A transition energy
    /// outside the tabulated projectile range selects one model for the whole
    /// table instead of blending.
    pub fn blend_low_energy(&self, low: &YieldLibrary, ext: &LowEnergyExtension) -> YieldLibrary {
        let mut tables = Vec::new();
        for (key, he) in &self.tables {
            let mut merged = he.clone();
            match low.tables.get(key) {
                Some(le)
                    if le.projectile_energies == he.projectile_energies
                        && le.secondary_energies == he.secondary_energies =>
                {
                    let egrid = &he.projectile_energies;
                    // a transition outside the tabulated range leaves a single
                    // model covering the whole table
                    if ext.transition_energy <= egrid[0] {
                        debug!(
                            "transition below {:?} -> {:?} table, keeping {}",
                            key.0, key.1, self.model
                        );
                    } else if ext.transition_energy > *egrid.last().unwrap() {
                        merged.yields = le.yields.clone();
                        debug!(
                            "transition above {:?} -> {:?} table, taking {}",
                            key.0, key.1, low.model
                        );
                    } else {
                        let t_idx = egrid
                            .iter()
                            .position(|&e| e >= ext.transition_energy)
                            .expect("transition inside the tabulated range");
                        let half = ext.n_interp_nodes / 2;
                        let lo = t_idx.saturating_sub(half + 1);
                        let hi = (t_idx + half + 1).min(egrid.len() - 1);
                        let span = (hi - lo).max(1) as f64;
                        for (i, row) in merged.yields.iter_mut().enumerate() {
                            let w_he = if i <= lo {
                                0.0
                            } else if i >= hi {
                                1.0
                            } else {
                                (i - lo) as f64 / span
                            };
                            for (k, v) in row.iter_mut().enumerate() {
                                *v = w_he * *v + (1.0 - w_he) * le.yields[i][k];
                            }
                        }
                        debug!(
                            "blended {:?} -> {:?} over nodes {}..{} ({} <- {})",
                            key.0, key.1, lo, hi, self.model, low.model
                        );
                    }
                }
                _ => {
                    debug!(
                        "no low-energy table for {:?} -> {:?}, keeping {}",
                        key.0, key.1, self.model
                    );
                }
            }
            tables.push(merged);
        }
        // from_tables cannot fail here: the inputs already validated
        YieldLibrary::from_tables(
            format!("{}+{}", self.model, low.model),
            self.target.clone(),
            (low.valid_range.0.min(self.valid_range.0), self.valid_range.1),
            tables,
        )
        .expect("blending preserves table validity")
    }
}
