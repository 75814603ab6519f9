// Assembly of the discretized cascade operators.
//
// The coupled cascade equations are linear in the flux vector, so the whole
// interaction/decay physics collapses into two sparse block matrices built
// once per (yield model, grid, config) and shared read-only by every run:
//
//   d phi / dX = int_m * phi + (1/rho(X)) * dec_m * phi
//
// int_m carries production and loss per g/cm^2 of traversed matter; dec_m
// carries them per cm of path length and is rescaled by the local density
// inside the step loop. Block (secondary, projectile) of either matrix maps
// the projectile spectrum onto the bin-integrated secondary spectrum.

use crate::config::SolverConfig;
use crate::cross_sections::CrossSectionLibrary;
use crate::decay::{DecayChannel, DecayLibrary};
use crate::energy_grid::EnergyGrid;
use crate::energy_loss::EnergyLossLibrary;
use crate::error::{CascadeError, Result};
use crate::interp::Pchip;
use crate::species::{Species, ALL_SPECIES};
use crate::yield_table::{YieldLibrary, YieldTable};
use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Immutable discretized operators of one cascade system.
///
/// Constructed once by [`MatrixBuilder::build`] and shared (behind an `Arc`)
/// by any number of concurrent integration runs; nothing here is mutated
/// after construction.
#[derive(Debug, Clone)]
pub struct CascadeOperators {
    grid: Arc<EnergyGrid>,
    /// Interaction production minus loss, per g/cm^2.
    int_m: CsrMatrix<f64>,
    /// Decay production minus loss, per cm (multiply by 1/rho at step time).
    dec_m: CsrMatrix<f64>,
    /// Interaction plus continuous-energy-loss rate per component, per
    /// g/cm^2 (non-negative).
    loss_int: DVector<f64>,
    /// Decay loss rate per component, per cm (non-negative).
    loss_dec: DVector<f64>,
    /// Components solved in local quasi-equilibrium instead of being
    /// explicitly stepped.
    equilibrated: Vec<bool>,
    /// Species folded out of the system entirely by compact mode.
    folded: Vec<Species>,
}

impl CascadeOperators {
    /// Assemble operators directly from their parts. Intended for synthetic
    /// systems in tests and benchmarks; [`MatrixBuilder`] is the physics path.
    pub fn from_parts(
        grid: Arc<EnergyGrid>,
        int_m: CsrMatrix<f64>,
        dec_m: CsrMatrix<f64>,
        loss_int: DVector<f64>,
        loss_dec: DVector<f64>,
        equilibrated: Vec<bool>,
    ) -> Result<Self> {
        let dim = grid.dim() * Species::count();
        let square = |m: &CsrMatrix<f64>| m.nrows() == dim && m.ncols() == dim;
        if !square(&int_m)
            || !square(&dec_m)
            || loss_int.len() != dim
            || loss_dec.len() != dim
            || equilibrated.len() != dim
        {
            return Err(CascadeError::InvalidGrid {
                reason: "operator dimensions do not match the grid layout".into(),
                e_min: grid.e_min(),
                e_max: grid.e_max(),
                bins: grid.dim(),
            });
        }
        Ok(CascadeOperators {
            grid,
            int_m,
            dec_m,
            loss_int,
            loss_dec,
            equilibrated,
            folded: Vec::new(),
        })
    }

    pub fn grid(&self) -> &Arc<EnergyGrid> {
        &self.grid
    }

    /// Total system dimension (species blocks times energy bins).
    pub fn dim(&self) -> usize {
        self.grid.dim() * Species::count()
    }

    pub fn int_matrix(&self) -> &CsrMatrix<f64> {
        &self.int_m
    }

    pub fn dec_matrix(&self) -> &CsrMatrix<f64> {
        &self.dec_m
    }

    pub fn loss_int(&self) -> &DVector<f64> {
        &self.loss_int
    }

    pub fn loss_dec(&self) -> &DVector<f64> {
        &self.loss_dec
    }

    pub fn equilibrated(&self) -> &[bool] {
        &self.equilibrated
    }

    pub fn is_equilibrated(&self, species: Species, bin: usize) -> bool {
        self.equilibrated[species.index() * self.grid.dim() + bin]
    }

    /// Species removed from explicit propagation by compact mode.
    pub fn folded(&self) -> &[Species] {
        &self.folded
    }
}

/// Builds [`CascadeOperators`] from the tabulated physics inputs.
///
/// Construction is a pure function of its inputs: building twice from the
/// same tables and grid produces identical matrices. Blocks are computed in
/// parallel per (projectile, secondary) pair and merged in a fixed order.
pub struct MatrixBuilder<'a> {
    grid: Arc<EnergyGrid>,
    yields: &'a YieldLibrary,
    cross_sections: &'a CrossSectionLibrary,
    decays: &'a DecayLibrary,
    config: &'a SolverConfig,
    energy_losses: Option<&'a EnergyLossLibrary>,
}

/// Count blocks keyed (produced species, source species), in fixed order.
type BlockMap = BTreeMap<(Species, Species), DMatrix<f64>>;

impl<'a> MatrixBuilder<'a> {
    pub fn new(
        grid: Arc<EnergyGrid>,
        yields: &'a YieldLibrary,
        cross_sections: &'a CrossSectionLibrary,
        decays: &'a DecayLibrary,
        config: &'a SolverConfig,
    ) -> Self {
        MatrixBuilder {
            grid,
            yields,
            cross_sections,
            decays,
            config,
            energy_losses: None,
        }
    }

    /// Attach a stopping-power library; its dE/dX tables are folded into the
    /// interaction operator when `SolverConfig::continuous_losses` is set.
    pub fn with_energy_losses(mut self, losses: &'a EnergyLossLibrary) -> Self {
        self.energy_losses = Some(losses);
        self
    }

    /// Build the operators from the high-energy yield library alone.
    pub fn build(&self) -> Result<CascadeOperators> {
        self.build_from(self.yields)
    }

    /// Blend a low-energy yield model into the primary one before building.
    pub fn build_with_low_energy(&self, low: &YieldLibrary) -> Result<CascadeOperators> {
        let ext = self.config.low_energy_extension.clone().unwrap_or_default();
        let merged = self.yields.blend_low_energy(low, &ext);
        self.build_from(&merged)
    }

    fn build_from(&self, yields: &YieldLibrary) -> Result<CascadeOperators> {
        self.check_required_projectiles(yields)?;
        self.check_decay_coverage()?;

        let n = self.grid.dim();
        let dim = n * Species::count();

        // per-species loss rates on the grid centers
        let lambda_int: Vec<Vec<f64>> = ALL_SPECIES
            .iter()
            .map(|&s| {
                self.cross_sections
                    .inverse_interaction_length(s, &self.grid, self.config.a_target)
            })
            .collect();
        let lambda_dec: Vec<Vec<f64>> = ALL_SPECIES
            .iter()
            .map(|&s| {
                if self.config.disable_decays.contains(&s) {
                    return vec![0.0; n];
                }
                self.grid
                    .centers()
                    .iter()
                    .map(|&e| s.decay_length_cm(e).map_or(0.0, |l| 1.0 / l))
                    .collect()
            })
            .collect();

        // bin-integrated count blocks, parallel per tabulated pair
        let pairs = yields.pairs();
        let mut int_blocks: BlockMap = pairs
            .par_iter()
            .map(|&(p, s)| {
                let table = yields.get(p, s).expect("pair listed by the library");
                ((s, p), self.interaction_block(table))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .filter(|(_, b)| b.amax() > 0.0)
            .collect();

        let channels = self.decays.channels();
        let mut dec_blocks: BlockMap = channels
            .par_iter()
            .copied()
            .filter(|c| !self.config.disable_decays.contains(&c.parent))
            .map(|c| ((c.child, c.parent), self.decay_block(c)))
            .collect::<Vec<_>>()
            .into_iter()
            .filter(|(_, b)| b.amax() > 0.0)
            .collect();

        let folded = if self.config.compact_mode {
            self.fold_prompt_decays(&mut int_blocks, &mut dec_blocks)
        } else {
            Vec::new()
        };

        // loss-rate vectors; folded species are removed from the system
        let mut loss_int = DVector::zeros(dim);
        let mut loss_dec = DVector::zeros(dim);
        for &s in ALL_SPECIES.iter() {
            if folded.contains(&s) {
                continue;
            }
            let off = s.index() * n;
            for j in 0..n {
                loss_int[off + j] = lambda_int[s.index()][j];
                loss_dec[off + j] = lambda_dec[s.index()][j];
            }
        }

        // continuous energy loss: a first-order upwind derivative in energy,
        // so flux drifts toward lower bins at the local stopping power while
        // the particle itself survives
        let mut drift: Vec<(usize, usize, f64)> = Vec::new();
        if self.config.continuous_losses {
            if let Some(losses) = self.energy_losses {
                let centers = self.grid.centers();
                for s in losses.species() {
                    if folded.contains(&s) {
                        continue;
                    }
                    let off = s.index() * n;
                    for i in 0..n {
                        let spacing = if i + 1 < n {
                            centers[i + 1] - centers[i]
                        } else {
                            centers[n - 1] - centers[n - 2]
                        };
                        let out = losses.dedx(s, centers[i]) / spacing;
                        if out > 0.0 {
                            loss_int[off + i] += out;
                        }
                        if i + 1 < n {
                            let inflow = losses.dedx(s, centers[i + 1]) / spacing;
                            if inflow > 0.0 {
                                drift.push((off + i, off + i + 1, inflow));
                            }
                        }
                    }
                }
            }
        }

        let equilibrated = self.equilibrated_mask(&lambda_int, &lambda_dec, &folded);

        let widths = self.grid.widths();
        let mut int_coo = CooMatrix::new(dim, dim);
        for (&(s, p), block) in &int_blocks {
            let (row0, col0) = (s.index() * n, p.index() * n);
            for j in 0..n {
                let rate = lambda_int[p.index()][j];
                if rate == 0.0 {
                    continue;
                }
                for i in 0..n {
                    let c = block[(i, j)];
                    if c != 0.0 {
                        int_coo.push(row0 + i, col0 + j, c * rate * widths[j] / widths[i]);
                    }
                }
            }
        }
        let mut dec_coo = CooMatrix::new(dim, dim);
        for (&(c, p), block) in &dec_blocks {
            let (row0, col0) = (c.index() * n, p.index() * n);
            for j in 0..n {
                let rate = lambda_dec[p.index()][j];
                if rate == 0.0 {
                    continue;
                }
                for i in 0..n {
                    let d = block[(i, j)];
                    if d != 0.0 {
                        dec_coo.push(row0 + i, col0 + j, d * rate * widths[j] / widths[i]);
                    }
                }
            }
        }
        for (i, j, v) in drift {
            int_coo.push(i, j, v);
        }
        // diagonal loss terms
        for k in 0..dim {
            if loss_int[k] != 0.0 {
                int_coo.push(k, k, -loss_int[k]);
            }
            if loss_dec[k] != 0.0 {
                dec_coo.push(k, k, -loss_dec[k]);
            }
        }

        let int_m = CsrMatrix::from(&int_coo);
        let dec_m = CsrMatrix::from(&dec_coo);
        info!(
            "built cascade operators for '{}' on {} bins: {} interaction / {} decay entries, \
             {} equilibrated components, {} folded species",
            yields.model(),
            n,
            int_m.nnz(),
            dec_m.nnz(),
            equilibrated.iter().filter(|&&e| e).count(),
            folded.len()
        );

        Ok(CascadeOperators {
            grid: self.grid.clone(),
            int_m,
            dec_m,
            loss_int,
            loss_dec,
            equilibrated,
            folded,
        })
    }

    fn check_required_projectiles(&self, yields: &YieldLibrary) -> Result<()> {
        for &p in &self.config.required_projectiles {
            if yields.secondaries(p).is_empty() {
                return Err(CascadeError::MissingYieldData {
                    projectile: p,
                    secondary: None,
                    model: yields.model().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Every unstable species must have decay channels, or the decay matrix
    /// would silently destroy particle number.
    fn check_decay_coverage(&self) -> Result<()> {
        for &s in ALL_SPECIES.iter() {
            if s.ctau().is_some()
                && !self.config.disable_decays.contains(&s)
                && !self.decays.has_channels(s)
            {
                return Err(CascadeError::MissingYieldData {
                    projectile: s,
                    secondary: None,
                    model: "decay channels".into(),
                });
            }
        }
        Ok(())
    }

    /// Secondaries per interaction, integrated over each destination bin.
    ///
    /// `block[(i, j)]` counts secondaries landing in bin `i` per interaction
    /// of a projectile at the center energy of bin `j`. Secondaries above the
    /// projectile energy are kinematically forbidden and excluded.
    fn interaction_block(&self, table: &YieldTable) -> DMatrix<f64> {
        let n = self.grid.dim();
        let edges = self.grid.edges();
        let mut block = DMatrix::zeros(n, n);
        for j in 0..n {
            let e_proj = self.grid.centers()[j];
            let row = table.row_at(e_proj);
            let pchip = Pchip::new(&table.secondary_energies, &row);
            for i in 0..n {
                let lo = edges[i];
                let hi = edges[i + 1].min(e_proj);
                if hi <= lo {
                    continue;
                }
                block[(i, j)] = pchip.integrate(lo, hi).max(0.0);
            }
        }
        block
    }

    /// Children per decay, integrated over each destination bin in the
    /// scaling variable x = E_child / E_parent.
    fn decay_block(&self, channel: &DecayChannel) -> DMatrix<f64> {
        let n = self.grid.dim();
        let edges = self.grid.edges();
        let pchip = Pchip::new(&channel.x_grid, &channel.dndx);
        let mut block = DMatrix::zeros(n, n);
        for j in 0..n {
            let e_parent = self.grid.centers()[j];
            for i in 0..n {
                let x_lo = (edges[i] / e_parent).clamp(0.0, 1.0);
                let x_hi = (edges[i + 1] / e_parent).clamp(0.0, 1.0);
                if x_hi <= x_lo {
                    continue;
                }
                block[(i, j)] = pchip.integrate(x_lo, x_hi).max(0.0);
            }
        }
        block
    }

    /// Compact mode: species with a proper decay length below the threshold
    /// decay promptly and are folded out of the coupled system, rerouting
    /// every production into them through their decay distributions.
    fn fold_prompt_decays(
        &self,
        int_blocks: &mut BlockMap,
        dec_blocks: &mut BlockMap,
    ) -> Vec<Species> {
        let folded: Vec<Species> = ALL_SPECIES
            .iter()
            .copied()
            .filter(|s| {
                matches!(s.ctau(), Some(ct) if ct <= self.config.compact_ctau_threshold)
                    && !self.config.disable_decays.contains(s)
            })
            .collect();

        // chains are short (K0S -> pi0 -> gamma is the deepest), so a few
        // reroute passes reach the fixpoint
        for _ in 0..10 {
            let mut changed = false;
            for &f in &folded {
                let feeds: Vec<(Species, DMatrix<f64>)> = dec_blocks
                    .iter()
                    .filter(|((_, parent), _)| *parent == f)
                    .map(|(&(child, _), d)| (child, d.clone()))
                    .collect();
                if feeds.is_empty() {
                    continue;
                }
                let reroute = |blocks: &mut BlockMap, changed: &mut bool| {
                    let sources: Vec<Species> = blocks
                        .keys()
                        .filter(|&&(prod, src)| prod == f && src != f)
                        .map(|&(_, src)| src)
                        .collect();
                    for src in sources {
                        let into_f = blocks.remove(&(f, src)).expect("key just listed");
                        for (child, d) in &feeds {
                            let add = d * &into_f;
                            blocks
                                .entry((*child, src))
                                .and_modify(|b| *b += &add)
                                .or_insert(add);
                        }
                        *changed = true;
                    }
                };
                reroute(int_blocks, &mut changed);
                reroute(dec_blocks, &mut changed);
            }
            if !changed {
                break;
            }
        }

        // folded species neither interact nor decay explicitly
        int_blocks.retain(|&(prod, src), _| !folded.contains(&prod) && !folded.contains(&src));
        dec_blocks.retain(|&(prod, src), _| !folded.contains(&prod) && !folded.contains(&src));
        debug!("compact mode folded species: {:?}", folded);
        folded
    }

    /// Per-component switchover between explicit stepping and the local
    /// quasi-equilibrium solution.
    ///
    /// A hadron bin is equilibrated when its decay depth at the maximum
    /// trajectory density falls below `hybrid_crossover` interaction lengths;
    /// at that point decay dominates so strongly that explicit stepping would
    /// demand prohibitively small steps. Non-hadrons never meet the criterion
    /// (no interaction length), but can be forced per configuration.
    fn equilibrated_mask(
        &self,
        lambda_int: &[Vec<f64>],
        lambda_dec: &[Vec<f64>],
        folded: &[Species],
    ) -> Vec<bool> {
        let n = self.grid.dim();
        let mut mask = vec![false; n * Species::count()];
        for &s in ALL_SPECIES.iter() {
            if folded.contains(&s) || self.config.never_equilibrium.contains(&s) {
                continue;
            }
            let forced = self.config.force_equilibrium.contains(&s);
            for j in 0..n {
                let dec_rate = lambda_dec[s.index()][j];
                if dec_rate == 0.0 {
                    continue;
                }
                let eq = if forced {
                    true
                } else if s.is_hadron() && lambda_int[s.index()][j] > 0.0 {
                    let decay_depth = self.config.max_density / dec_rate;
                    decay_depth * lambda_int[s.index()][j] < self.config.hybrid_crossover
                } else {
                    false
                };
                mask[s.index() * n + j] = eq;
            }
        }
        mask
    }
}
