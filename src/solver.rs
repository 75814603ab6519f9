// Depth integration of the coupled cascade equations.
//
// The integrator advances the flux vector with explicit forward-Euler steps
//
//   phi(X + dX) = phi(X) + dX * (int_m * phi + (1/rho(X)) * dec_m * phi + S(X))
//
// where the step size adapts to the stiffest explicit loss rate. Components
// whose decay outruns their interaction length (the equilibrated mask built
// by the matrix builder) would force vanishing steps if propagated
// explicitly; they are instead held at their local quasi-equilibrium value,
// production divided by total loss rate, refined once per step.
//
// A run owns its flux state exclusively; the operators behind the Arc are
// read-only, so independent runs can execute concurrently.

use crate::builder::CascadeOperators;
use crate::config::SolverConfig;
use crate::density::DensityProfile;
use crate::error::{CascadeError, Result};
use crate::source::SourceTerm;
use crate::state::{BalanceDiagnostics, FluxState, FluxTrajectory, TerminationReason};
use log::{debug, info};
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Accumulate `out += alpha * m * x` row by row.
pub(crate) fn spmv_into(m: &CsrMatrix<f64>, x: &DVector<f64>, alpha: f64, out: &mut DVector<f64>) {
    for (i, row) in m.row_iter().enumerate() {
        let mut acc = 0.0;
        for (&j, &v) in row.col_indices().iter().zip(row.values()) {
            acc += v * x[j];
        }
        out[i] += alpha * acc;
    }
}

/// Depth integrator over one set of [`CascadeOperators`].
///
/// The integrator itself is stateless between runs; every run gets its own
/// private flux state, so a single integrator may serve concurrent runs.
pub struct CascadeIntegrator {
    operators: Arc<CascadeOperators>,
    config: SolverConfig,
}

impl CascadeIntegrator {
    pub fn new(operators: Arc<CascadeOperators>, config: SolverConfig) -> Self {
        CascadeIntegrator { operators, config }
    }

    pub fn operators(&self) -> &Arc<CascadeOperators> {
        &self.operators
    }

    /// Integrate from depth 0 to the last entry of `output_depths`,
    /// recording the flux state at every listed depth.
    pub fn run(
        &self,
        boundary: FluxState,
        profile: &dyn DensityProfile,
        output_depths: &[f64],
    ) -> Result<FluxTrajectory> {
        self.run_with_source(boundary, profile, output_depths, None, None)
    }

    /// Full-surface run: optional injection source along the trajectory and
    /// an optional abort flag checked cooperatively between steps.
    pub fn run_with_source(
        &self,
        boundary: FluxState,
        profile: &dyn DensityProfile,
        output_depths: &[f64],
        source: Option<&dyn SourceTerm>,
        abort: Option<&AtomicBool>,
    ) -> Result<FluxTrajectory> {
        let ops = &self.operators;
        let grid = ops.grid();
        if boundary.grid().as_ref() != grid.as_ref() {
            return Err(CascadeError::InvalidGrid {
                reason: "boundary state grid does not match the operators".into(),
                e_min: boundary.grid().e_min(),
                e_max: boundary.grid().e_max(),
                bins: boundary.grid().dim(),
            });
        }
        self.check_output_depths(output_depths, profile)?;
        let target = *output_depths.last().unwrap();

        let dim = ops.dim();
        let mut phi = boundary;
        let mut balance = BalanceDiagnostics {
            initial_number: phi.total_number(),
            ..Default::default()
        };
        self.settle_prompt_flux(&mut phi);
        debug!(
            "run initialized: target depth {:.2} g/cm^2 on profile '{}' through {}",
            target,
            profile.name(),
            profile.material_at(target)?
        );

        let mut states: Vec<(f64, FluxState)> = vec![(0.0, phi.clone())];
        let mut deriv = DVector::zeros(dim);
        let mut src_vec = DVector::zeros(dim);
        let mut x = 0.0;
        let mut out_idx = 0;
        // never sample the density at the exact trajectory start, where thin
        // atmospheres vanish; the midpoint of the upcoming step is used instead
        let mut rho = profile.density((0.5 * self.config.max_step).min(0.5 * target))?;
        let mut reason = TerminationReason::ReachedTarget;

        loop {
            if abort.map_or(false, |a| a.load(Ordering::Relaxed)) {
                debug!("run aborted at depth {:.4} g/cm^2", x);
                states.push((x, phi.clone()));
                reason = TerminationReason::Aborted;
                break;
            }

            let next_output = output_depths[out_idx];
            // step size against the midpoint density of the upcoming step
            let trial = self.step_size(1.0 / rho, x, next_output);
            let x_mid = (x + 0.5 * trial).min(profile.max_depth());
            rho = profile.density(x_mid)?;
            let rho_inv = 1.0 / rho;
            let reach = next_output - x;
            let mut dx = self.step_size(rho_inv, x, next_output);
            let landing = dx >= reach;
            if landing {
                dx = reach;
            }

            balance.steps += 1;
            if balance.steps > self.config.max_steps {
                return Err(CascadeError::StepLimitExceeded {
                    max_steps: self.config.max_steps,
                    depth: x,
                    target_depth: target,
                    last_step: dx,
                });
            }

            deriv.fill(0.0);
            spmv_into(ops.int_matrix(), phi.as_vector(), 1.0, &mut deriv);
            spmv_into(ops.dec_matrix(), phi.as_vector(), rho_inv, &mut deriv);
            if let Some(src) = source {
                src_vec.fill(0.0);
                src.inject(x, &mut src_vec);
                deriv += &src_vec;
                balance.injected_number += dx * self.number_of(&src_vec);
            }

            // explicit update for slow components, equilibrium for fast ones
            let eq = ops.equilibrated();
            {
                let v = phi.vector_mut();
                for k in 0..dim {
                    if eq[k] {
                        let rate = ops.loss_int()[k] + rho_inv * ops.loss_dec()[k];
                        if rate > 0.0 {
                            v[k] += deriv[k] / rate;
                        }
                    } else {
                        v[k] += dx * deriv[k];
                    }
                }
            }
            // one refinement pass so fast components see each other's update
            deriv.fill(0.0);
            spmv_into(ops.int_matrix(), phi.as_vector(), 1.0, &mut deriv);
            spmv_into(ops.dec_matrix(), phi.as_vector(), rho_inv, &mut deriv);
            {
                let v = phi.vector_mut();
                for k in 0..dim {
                    if eq[k] {
                        let rate = ops.loss_int()[k] + rho_inv * ops.loss_dec()[k];
                        if rate > 0.0 {
                            v[k] += deriv[k] / rate;
                        }
                    }
                }
            }

            x = if landing { next_output } else { x + dx };
            self.check_stability(&mut phi, x)?;

            if landing {
                states.push((x, phi.clone()));
                out_idx += 1;
                if out_idx == output_depths.len() {
                    break;
                }
            }
        }

        balance.final_number = states.last().expect("initial state recorded").1.total_number();
        info!(
            "run finished at depth {:.2} g/cm^2 after {} steps (number balance {:+.3e})",
            states.last().unwrap().0,
            balance.steps,
            balance.relative_imbalance()
        );
        Ok(FluxTrajectory {
            states,
            reason,
            balance,
        })
    }

    fn check_output_depths(&self, depths: &[f64], profile: &dyn DensityProfile) -> Result<()> {
        if depths.is_empty() {
            return Err(CascadeError::OutOfRange {
                quantity: "output depth count",
                value: 0.0,
                min: 1.0,
                max: f64::INFINITY,
            });
        }
        let mut prev = 0.0;
        for &d in depths {
            if d <= prev || d > profile.max_depth() {
                return Err(CascadeError::OutOfRange {
                    quantity: "output depth [g/cm^2]",
                    value: d,
                    min: prev,
                    max: profile.max_depth(),
                });
            }
            prev = d;
        }
        Ok(())
    }

    /// Largest step keeping every explicitly propagated component within the
    /// fractional tolerance against its own loss rate.
    fn step_size(&self, rho_inv: f64, x: f64, next_output: f64) -> f64 {
        let ops = &self.operators;
        let eq = ops.equilibrated();
        let mut max_rate: f64 = 0.0;
        for k in 0..ops.dim() {
            if !eq[k] {
                let rate = ops.loss_int()[k] + rho_inv * ops.loss_dec()[k];
                max_rate = max_rate.max(rate);
            }
        }
        let dx = if max_rate > 0.0 {
            self.config.step_tolerance / max_rate
        } else {
            self.config.max_step
        };
        dx.min(self.config.max_step).min(next_output - x)
    }

    /// Flux injected into equilibrated components (e.g. a boundary condition
    /// containing prompt resonances) decays away before the first step;
    /// push it through the decay chains so its children are not lost.
    fn settle_prompt_flux(&self, phi: &mut FluxState) {
        let ops = &self.operators;
        let dim = ops.dim();
        let eq = ops.equilibrated();
        for _ in 0..10 {
            let mut y = DVector::zeros(dim);
            let mut any = false;
            {
                let v = phi.vector_mut();
                for k in 0..dim {
                    if eq[k] && v[k] != 0.0 {
                        let rate = ops.loss_dec()[k];
                        if rate > 0.0 {
                            y[k] = v[k] / rate;
                            any = true;
                        }
                        v[k] = 0.0;
                    }
                }
            }
            if !any {
                break;
            }
            // decay production only: add the loss diagonal back
            let mut prod = DVector::zeros(dim);
            spmv_into(ops.dec_matrix(), &y, 1.0, &mut prod);
            for k in 0..dim {
                prod[k] += ops.loss_dec()[k] * y[k];
            }
            *phi.vector_mut() += &prod;
        }
    }

    /// Negative components within tolerance are clamped to zero; anything
    /// worse, or non-finite, fails the run with full context.
    fn check_stability(&self, phi: &mut FluxState, depth: f64) -> Result<()> {
        let max_abs = phi.as_vector().amax();
        let floor = -self.config.negative_tolerance * max_abs;
        for k in 0..phi.as_vector().len() {
            let val = phi.as_vector()[k];
            if !val.is_finite() || val < floor {
                let (species, energy) = phi.locate(k);
                return Err(CascadeError::NumericalInstability {
                    species,
                    energy,
                    depth,
                    value: val,
                });
            }
        }
        let v = phi.vector_mut();
        for k in 0..v.len() {
            if v[k] < 0.0 {
                v[k] = 0.0;
            }
        }
        Ok(())
    }

    /// Integral particle number of a raw component vector.
    fn number_of(&self, v: &DVector<f64>) -> f64 {
        let widths = self.operators.grid().widths();
        let n = widths.len();
        v.iter()
            .enumerate()
            .map(|(k, &val)| val * widths[k % n])
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::density::GeneralizedTarget;
    use crate::energy_grid::EnergyGrid;
    use crate::species::Species;
    use nalgebra_sparse::CooMatrix;

    fn grid() -> Arc<EnergyGrid> {
        Arc::new(EnergyGrid::new(1.0, 1e3, 12).unwrap())
    }

    fn empty_ops(grid: Arc<EnergyGrid>) -> CascadeOperators {
        let dim = grid.dim() * Species::count();
        CascadeOperators::from_parts(
            grid,
            CsrMatrix::from(&CooMatrix::new(dim, dim)),
            CsrMatrix::from(&CooMatrix::new(dim, dim)),
            DVector::zeros(dim),
            DVector::zeros(dim),
            vec![false; dim],
        )
        .unwrap()
    }

    #[test]
    fn test_trivial_operators_preserve_flux() {
        let g = grid();
        let ops = Arc::new(empty_ops(g.clone()));
        let solver = CascadeIntegrator::new(ops, SolverConfig::bare());
        let mut boundary = FluxState::zeros(g.clone());
        for i in 0..g.dim() {
            boundary.set(Species::Proton, i, 3.0);
        }
        let target = GeneralizedTarget::uniform(1.0, 200.0, "slab").unwrap();
        let traj = solver
            .run(boundary.clone(), &target, &[50.0, 100.0])
            .unwrap();
        assert_eq!(traj.reason, TerminationReason::ReachedTarget);
        assert_eq!(traj.final_depth(), 100.0);
        for i in 0..g.dim() {
            assert_eq!(traj.final_state().get(Species::Proton, i), 3.0);
        }
        assert!(traj.balance.relative_imbalance().abs() < 1e-12);
    }

    #[test]
    fn test_pure_loss_matches_exponential() {
        let g = grid();
        let dim = g.dim() * Species::count();
        let lambda = 50.0_f64;
        let mut coo = CooMatrix::new(dim, dim);
        let mut loss_int = DVector::zeros(dim);
        for j in 0..g.dim() {
            let k = Species::Proton.index() * g.dim() + j;
            coo.push(k, k, -1.0 / lambda);
            loss_int[k] = 1.0 / lambda;
        }
        let ops = Arc::new(
            CascadeOperators::from_parts(
                g.clone(),
                CsrMatrix::from(&coo),
                CsrMatrix::from(&CooMatrix::new(dim, dim)),
                loss_int,
                DVector::zeros(dim),
                vec![false; dim],
            )
            .unwrap(),
        );
        let mut config = SolverConfig::bare();
        config.step_tolerance = 1e-4;
        let solver = CascadeIntegrator::new(ops, config);

        let mut boundary = FluxState::zeros(g.clone());
        boundary.set(Species::Proton, 4, 1.0);
        let target = GeneralizedTarget::uniform(1.0, 500.0, "slab").unwrap();
        let depth = 100.0;
        let traj = solver.run(boundary, &target, &[depth]).unwrap();

        let expect = (-depth / lambda).exp();
        let got = traj.final_state().get(Species::Proton, 4);
        assert!(
            (got - expect).abs() / expect < 1e-3,
            "got {}, expect {}",
            got,
            expect
        );
    }

    #[test]
    fn test_quasi_equilibrium_matches_closed_form() {
        // stable C feeds fast-decaying A at constant rate g; A decays to B.
        // Quasi-steady state: phi_A = g*phi_C/r with r the decay rate per
        // depth, and phi_B grows linearly with slope g*phi_C.
        let grid = Arc::new(EnergyGrid::new(1.0, 1e3, 12).unwrap());
        let n = grid.dim();
        let dim = n * Species::count();
        let c = Species::Proton.index() * n;
        let a = Species::PiZero.index() * n;
        let b = Species::Gamma.index() * n;
        let gen_rate = 0.02; // per g/cm^2
        let dec_rate = 5.0; // per cm

        let mut int_coo = CooMatrix::new(dim, dim);
        int_coo.push(a, c, gen_rate);
        let mut dec_coo = CooMatrix::new(dim, dim);
        dec_coo.push(b, a, dec_rate);
        dec_coo.push(a, a, -dec_rate);
        let mut loss_dec = DVector::zeros(dim);
        loss_dec[a] = dec_rate;
        let mut eq = vec![false; dim];
        eq[a] = true;

        let ops = Arc::new(
            CascadeOperators::from_parts(
                grid.clone(),
                CsrMatrix::from(&int_coo),
                CsrMatrix::from(&dec_coo),
                DVector::zeros(dim),
                loss_dec,
                eq,
            )
            .unwrap(),
        );
        let mut config = SolverConfig::bare();
        config.max_step = 0.05;
        let solver = CascadeIntegrator::new(ops, config);

        let mut boundary = FluxState::zeros(grid.clone());
        boundary.set(Species::Proton, 0, 1.0);
        let rho = 1.0;
        let target = GeneralizedTarget::uniform(rho, 100.0, "slab").unwrap();
        let depth = 10.0;
        let traj = solver.run(boundary, &target, &[depth]).unwrap();
        let state = traj.final_state();

        let phi_a = state.get(Species::PiZero, 0);
        let phi_b = state.get(Species::Gamma, 0);
        let expect_a = gen_rate * 1.0 / (dec_rate / rho);
        let expect_b = gen_rate * 1.0 * depth;
        assert!(
            (phi_a - expect_a).abs() / expect_a < 1e-6,
            "phi_A = {}, expect {}",
            phi_a,
            expect_a
        );
        assert!(
            (phi_b - expect_b).abs() / expect_b < 2e-2,
            "phi_B = {}, expect {}",
            phi_b,
            expect_b
        );
        // no negative or divergent flux anywhere despite the stiff decay
        assert!(state.as_vector().iter().all(|v| v.is_finite() && *v >= 0.0));
    }

    #[test]
    fn test_prompt_boundary_flux_feeds_children() {
        // flux injected directly into an equilibrated component must cascade
        // into its children instead of silently vanishing
        let grid = Arc::new(EnergyGrid::new(1.0, 1e3, 12).unwrap());
        let n = grid.dim();
        let dim = n * Species::count();
        let a = Species::PiZero.index() * n;
        let b = Species::Gamma.index() * n;
        let dec_rate = 5.0;

        let mut dec_coo = CooMatrix::new(dim, dim);
        dec_coo.push(b, a, 2.0 * dec_rate); // two photons per decay
        dec_coo.push(a, a, -dec_rate);
        let mut loss_dec = DVector::zeros(dim);
        loss_dec[a] = dec_rate;
        let mut eq = vec![false; dim];
        eq[a] = true;

        let ops = Arc::new(
            CascadeOperators::from_parts(
                grid.clone(),
                CsrMatrix::from(&CooMatrix::new(dim, dim)),
                CsrMatrix::from(&dec_coo),
                DVector::zeros(dim),
                loss_dec,
                eq,
            )
            .unwrap(),
        );
        let solver = CascadeIntegrator::new(ops, SolverConfig::bare());

        let mut boundary = FluxState::zeros(grid.clone());
        boundary.set(Species::PiZero, 0, 1.5);
        let target = GeneralizedTarget::uniform(1.0, 100.0, "slab").unwrap();
        let traj = solver.run(boundary, &target, &[1.0]).unwrap();
        let first = &traj.states[0].1;
        assert_eq!(first.get(Species::PiZero, 0), 0.0);
        assert!((first.get(Species::Gamma, 0) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_negative_flux_beyond_tolerance_fails() {
        let g = grid();
        let dim = g.dim() * Species::count();
        let c = Species::Proton.index() * g.dim();
        let a = Species::PiPlus.index() * g.dim();
        let mut coo = CooMatrix::new(dim, dim);
        coo.push(a, c, -5.0); // unphysical negative coupling
        let ops = Arc::new(
            CascadeOperators::from_parts(
                g.clone(),
                CsrMatrix::from(&coo),
                CsrMatrix::from(&CooMatrix::new(dim, dim)),
                DVector::zeros(dim),
                DVector::zeros(dim),
                vec![false; dim],
            )
            .unwrap(),
        );
        let solver = CascadeIntegrator::new(ops, SolverConfig::bare());
        let mut boundary = FluxState::zeros(g.clone());
        boundary.set(Species::Proton, 0, 1.0);
        let target = GeneralizedTarget::uniform(1.0, 100.0, "slab").unwrap();
        let err = solver.run(boundary, &target, &[50.0]);
        assert!(matches!(
            err,
            Err(CascadeError::NumericalInstability {
                species: Species::PiPlus,
                ..
            })
        ));
    }

    #[test]
    fn test_subtolerance_negative_flux_clamped_to_zero() {
        // roundoff-scale negative couplings must not leak negative components
        // into the recorded states; they are clamped after every step
        let g = grid();
        let dim = g.dim() * Species::count();
        let c = Species::Proton.index() * g.dim();
        let a = Species::PiPlus.index() * g.dim();
        let mut coo = CooMatrix::new(dim, dim);
        coo.push(a, c, -1e-14);
        let ops = Arc::new(
            CascadeOperators::from_parts(
                g.clone(),
                CsrMatrix::from(&coo),
                CsrMatrix::from(&CooMatrix::new(dim, dim)),
                DVector::zeros(dim),
                DVector::zeros(dim),
                vec![false; dim],
            )
            .unwrap(),
        );
        let solver = CascadeIntegrator::new(ops, SolverConfig::bare());
        let mut boundary = FluxState::zeros(g.clone());
        boundary.set(Species::Proton, 0, 1.0);
        let target = GeneralizedTarget::uniform(1.0, 100.0, "slab").unwrap();
        let traj = solver.run(boundary, &target, &[50.0]).unwrap();
        assert_eq!(traj.final_state().get(Species::PiPlus, 0), 0.0);
        for (_, state) in &traj.states {
            assert!(state.as_vector().iter().all(|v| *v >= 0.0));
        }
    }

    #[test]
    fn test_step_budget_enforced() {
        let g = grid();
        let dim = g.dim() * Species::count();
        let k = Species::Proton.index() * g.dim();
        let mut coo = CooMatrix::new(dim, dim);
        coo.push(k, k, -1.0);
        let mut loss_int = DVector::zeros(dim);
        loss_int[k] = 1.0;
        let ops = Arc::new(
            CascadeOperators::from_parts(
                g.clone(),
                CsrMatrix::from(&coo),
                CsrMatrix::from(&CooMatrix::new(dim, dim)),
                loss_int,
                DVector::zeros(dim),
                vec![false; dim],
            )
            .unwrap(),
        );
        let mut config = SolverConfig::bare();
        config.step_tolerance = 0.01;
        config.max_steps = 3;
        let solver = CascadeIntegrator::new(ops, config);
        let mut boundary = FluxState::zeros(g.clone());
        boundary.set(Species::Proton, 0, 1.0);
        let target = GeneralizedTarget::uniform(1.0, 100.0, "slab").unwrap();
        let err = solver.run(boundary, &target, &[50.0]);
        assert!(matches!(
            err,
            Err(CascadeError::StepLimitExceeded { max_steps: 3, .. })
        ));
    }

    #[test]
    fn test_abort_between_steps() {
        let g = grid();
        let ops = Arc::new(empty_ops(g.clone()));
        let solver = CascadeIntegrator::new(ops, SolverConfig::bare());
        let boundary = FluxState::zeros(g.clone());
        let target = GeneralizedTarget::uniform(1.0, 100.0, "slab").unwrap();
        let abort = AtomicBool::new(true);
        let traj = solver
            .run_with_source(boundary, &target, &[50.0], None, Some(&abort))
            .unwrap();
        assert_eq!(traj.reason, TerminationReason::Aborted);
    }

    #[test]
    fn test_output_depth_beyond_profile_rejected() {
        let g = grid();
        let ops = Arc::new(empty_ops(g.clone()));
        let solver = CascadeIntegrator::new(ops, SolverConfig::bare());
        let boundary = FluxState::zeros(g.clone());
        let target = GeneralizedTarget::uniform(1.0, 100.0, "slab").unwrap();
        assert!(matches!(
            solver.run(boundary, &target, &[150.0]),
            Err(CascadeError::OutOfRange { .. })
        ));
    }
}
