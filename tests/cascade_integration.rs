// End-to-end scenarios exercising the public API: build operators from
// tabulated fixtures, integrate through a target, query the results.

use approx::assert_relative_eq;
use atmcascade::cross_sections::{AMU_G, MBARN_TO_CM2};
use atmcascade::{
    CascadeIntegrator, CrossSectionLibrary, CrossSectionTable, DecayLibrary, EnergyGrid,
    EnergyLossLibrary, FluxState, GeneralizedTarget, IsothermalAtmosphere, MatrixBuilder,
    PrimarySpectrum, ResultAccessor, SolverConfig, Species, YieldLibrary, YieldTable,
};
use std::sync::Arc;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn flat_yield(projectile: Species, secondary: Species, dnde: f64) -> YieldTable {
    YieldTable {
        projectile,
        secondary,
        projectile_energies: vec![0.5, 10.0, 100.0, 2e4],
        secondary_energies: vec![0.5, 10.0, 100.0, 2e4],
        yields: vec![vec![dnde; 4]; 4],
    }
}

fn cross_sections() -> CrossSectionLibrary {
    CrossSectionLibrary::new(
        "FIXTURE",
        vec![
            CrossSectionTable {
                projectile: Species::Proton,
                energies: vec![1e-2, 1e12],
                sigma_mbarn: vec![290.0, 290.0],
            },
            CrossSectionTable {
                projectile: Species::PiPlus,
                energies: vec![1e-2, 1e12],
                sigma_mbarn: vec![170.0, 170.0],
            },
        ],
    )
}

#[test]
fn test_proton_attenuation_matches_exponential() {
    init_logging();
    // no secondaries tabulated: protons are only removed by interactions,
    // so the flux at depth X is the boundary flux times exp(-X / lambda)
    let grid = Arc::new(EnergyGrid::new(1.0, 1e4, 16).unwrap());
    let yields = YieldLibrary::from_tables("FIXTURE", "air", (0.5, 2e4), vec![]).unwrap();
    let xs = cross_sections();
    let decays = DecayLibrary::standard();
    let mut config = SolverConfig::bare();
    config.step_tolerance = 1e-4;
    let ops = Arc::new(
        MatrixBuilder::new(grid.clone(), &yields, &xs, &decays, &config)
            .build()
            .unwrap(),
    );
    let solver = CascadeIntegrator::new(ops, config.clone());

    let boundary = PrimarySpectrum::PowerLaw {
        species: Species::Proton,
        normalization: 1.0,
        spectral_index: 2.7,
    }
    .boundary_state(grid.clone());
    let slab = GeneralizedTarget::uniform(1.0, 500.0, "slab").unwrap();
    let depth = 100.0;
    let traj = solver.run(boundary.clone(), &slab, &[depth]).unwrap();

    let lambda = config.a_target * AMU_G / (290.0 * MBARN_TO_CM2);
    let attenuation = (-depth / lambda).exp();
    for i in 0..grid.dim() {
        let expect = boundary.get(Species::Proton, i) * attenuation;
        let got = traj.final_state().get(Species::Proton, i);
        assert!(
            (got - expect).abs() / expect < 1e-3,
            "bin {}: got {}, expect {}",
            i,
            got,
            expect
        );
    }
}

#[test]
fn test_atmospheric_run_produces_muons_and_neutrinos() {
    init_logging();
    let grid = Arc::new(EnergyGrid::new(1.0, 1e4, 16).unwrap());
    let yields = YieldLibrary::from_tables(
        "FIXTURE",
        "air",
        (0.5, 2e4),
        vec![
            flat_yield(Species::Proton, Species::PiPlus, 0.05),
            flat_yield(Species::Proton, Species::PiMinus, 0.04),
            flat_yield(Species::PiPlus, Species::PiPlus, 0.1),
        ],
    )
    .unwrap();
    let xs = cross_sections();
    let decays = DecayLibrary::standard();
    let config = SolverConfig::bare();
    let ops = Arc::new(
        MatrixBuilder::new(grid.clone(), &yields, &xs, &decays, &config)
            .build()
            .unwrap(),
    );
    let solver = CascadeIntegrator::new(ops, config);

    let boundary = PrimarySpectrum::PowerLaw {
        species: Species::Proton,
        normalization: 1.0,
        spectral_index: 2.7,
    }
    .boundary_state(grid.clone());
    let atmosphere = IsothermalAtmosphere::new(0.0);
    let depths = [100.0, 500.0, 1030.0];
    let traj = solver.run(boundary, &atmosphere, &depths).unwrap();

    // one recorded state per requested depth plus the initial one
    assert_eq!(traj.states.len(), depths.len() + 1);
    for w in traj.states.windows(2) {
        assert!(w[1].0 > w[0].0);
    }
    let ground = traj.final_state();
    assert!(ground.particle_number(Species::MuPlus) > 0.0);
    assert!(ground.particle_number(Species::MuMinus) > 0.0);
    assert!(ground.particle_number(Species::NuMu) > 0.0);
    assert!(ground.particle_number(Species::NuMuBar) > 0.0);
    // protons attenuate with depth
    let shallow = &traj.states[1].1;
    assert!(
        ground.particle_number(Species::Proton) < shallow.particle_number(Species::Proton)
    );
    assert!(traj.balance.relative_imbalance().is_finite());
}

#[test]
fn test_result_accessor_round_trip_after_run() {
    init_logging();
    let grid = Arc::new(EnergyGrid::new(1.0, 1e4, 16).unwrap());
    let yields = YieldLibrary::from_tables(
        "FIXTURE",
        "air",
        (0.5, 2e4),
        vec![flat_yield(Species::Proton, Species::PiPlus, 0.05)],
    )
    .unwrap();
    let xs = cross_sections();
    let decays = DecayLibrary::shared();
    let config = SolverConfig::bare();
    let ops = Arc::new(
        MatrixBuilder::new(grid.clone(), &yields, &xs, decays, &config)
            .build()
            .unwrap(),
    );
    let solver = CascadeIntegrator::new(ops, config);
    let boundary = PrimarySpectrum::PowerLaw {
        species: Species::Proton,
        normalization: 1.0,
        spectral_index: 2.7,
    }
    .boundary_state(grid.clone());
    let atmosphere = IsothermalAtmosphere::new(0.0);
    let traj = solver.run(boundary, &atmosphere, &[500.0, 1030.0]).unwrap();

    let acc = ResultAccessor::at_depth(&traj, 1030.0).unwrap();
    // grid-aligned queries return the stored values exactly
    for (i, &e) in grid.centers().iter().enumerate() {
        assert_eq!(
            acc.flux(Species::Proton, e).unwrap(),
            traj.final_state().get(Species::Proton, i)
        );
    }
    // off-grid query sits between its neighboring bins
    let e = (grid.centers()[4] * grid.centers()[5]).sqrt();
    let between = acc.flux(Species::Proton, e).unwrap();
    let (lo, hi) = (
        traj.final_state().get(Species::Proton, 5).min(traj.final_state().get(Species::Proton, 4)),
        traj.final_state().get(Species::Proton, 5).max(traj.final_state().get(Species::Proton, 4)),
    );
    assert!(between >= lo && between <= hi);
    // depths never recorded are rejected
    assert!(ResultAccessor::at_depth(&traj, 750.0).is_err());
}

#[test]
fn test_compact_mode_agrees_with_explicit_prompt_decay() {
    init_logging();
    // pi0 handled in quasi-equilibrium (normal mode) versus folded out at
    // build time (compact mode): the photon output must agree closely, since
    // the pi0 decay length is vastly shorter than its interaction length
    let grid = Arc::new(EnergyGrid::new(1.0, 1e3, 16).unwrap());
    let yields = YieldLibrary::from_tables(
        "FIXTURE",
        "air",
        (0.5, 2e3),
        vec![flat_yield(Species::Proton, Species::PiZero, 0.2)],
    )
    .unwrap();
    let xs = cross_sections();
    let decays = DecayLibrary::standard();

    let run = |compact: bool| {
        let mut config = SolverConfig::bare();
        config.compact_mode = compact;
        let ops = Arc::new(
            MatrixBuilder::new(grid.clone(), &yields, &xs, &decays, &config)
                .build()
                .unwrap(),
        );
        let solver = CascadeIntegrator::new(ops, config);
        let boundary = PrimarySpectrum::PowerLaw {
            species: Species::Proton,
            normalization: 1.0,
            spectral_index: 2.7,
        }
        .boundary_state(grid.clone());
        let slab = GeneralizedTarget::uniform(1.0, 100.0, "slab").unwrap();
        let traj = solver.run(boundary, &slab, &[50.0]).unwrap();
        traj.final_state().particle_number(Species::Gamma)
    };

    let explicit = run(false);
    let compact = run(true);
    assert!(explicit > 0.0);
    assert_relative_eq!(compact, explicit, max_relative = 0.02);
}

#[test]
fn test_constant_stopping_power_drains_top_bin_exponentially() {
    init_logging();
    // with a constant dE/dX and the muon decay switched off, the occupied
    // top bin feeds only its lower neighbor, so it drains exponentially at
    // rate dedx / (c_top - c_below)
    let grid = Arc::new(EnergyGrid::new(1.0, 10.0, 8).unwrap());
    let yields = YieldLibrary::from_tables("FIXTURE", "air", (0.5, 2e4), vec![]).unwrap();
    let xs = cross_sections();
    let decays = DecayLibrary::standard();
    let mut config = SolverConfig::bare();
    config.disable_decays = vec![Species::MuMinus];
    config.step_tolerance = 1e-4;
    let dedx = 0.5;
    let losses = EnergyLossLibrary::constant(&[(Species::MuMinus, dedx)]);
    let ops = Arc::new(
        MatrixBuilder::new(grid.clone(), &yields, &xs, &decays, &config)
            .with_energy_losses(&losses)
            .build()
            .unwrap(),
    );
    let solver = CascadeIntegrator::new(ops, config);

    let top = grid.dim() - 1;
    let mut boundary = FluxState::zeros(grid.clone());
    boundary.set(Species::MuMinus, top, 1.0);
    let slab = GeneralizedTarget::uniform(1.0, 50.0, "slab").unwrap();
    let depth = 5.0;
    let traj = solver.run(boundary, &slab, &[depth]).unwrap();

    let rate = dedx / (grid.centers()[top] - grid.centers()[top - 1]);
    let expect = (-rate * depth).exp();
    let got = traj.final_state().get(Species::MuMinus, top);
    assert!(
        (got - expect).abs() / expect < 1e-3,
        "got {}, expect {}",
        got,
        expect
    );
    // the lost flux reappears at lower energies instead of vanishing
    assert!(traj.final_state().get(Species::MuMinus, top - 1) > 0.0);
    assert!(traj.final_state().as_vector().iter().all(|v| *v >= 0.0));
}

#[test]
fn test_low_energy_blend_softens_low_energy_production() {
    init_logging();
    let grid = Arc::new(EnergyGrid::new(1.0, 1e4, 16).unwrap());
    let he = YieldLibrary::from_tables(
        "HE",
        "air",
        (50.0, 2e4),
        vec![flat_yield(Species::Proton, Species::PiPlus, 0.2)],
    )
    .unwrap();
    let le = YieldLibrary::from_tables(
        "LE",
        "air",
        (0.5, 200.0),
        vec![flat_yield(Species::Proton, Species::PiPlus, 0.1)],
    )
    .unwrap();
    let xs = cross_sections();
    let decays = DecayLibrary::standard();
    let mut config = SolverConfig::bare();
    config.low_energy_extension = Some(Default::default());
    let builder = MatrixBuilder::new(grid.clone(), &he, &xs, &decays, &config);

    let pure = builder.build().unwrap();
    let blended = builder.build_with_low_energy(&le).unwrap();
    // the blended operator produces fewer pions from low-energy protons
    let n = grid.dim();
    let row = Species::PiPlus.index() * n;
    let col = Species::Proton.index() * n;
    let entry = |ops: &atmcascade::CascadeOperators| {
        ops.int_matrix()
            .triplet_iter()
            .find(|&(i, j, _)| i == row && j == col)
            .map(|(_, _, &v)| v)
            .unwrap_or(0.0)
    };
    let (p, b) = (entry(&pure), entry(&blended));
    assert!(b > 0.0 && b < p, "pure = {}, blended = {}", p, b);
}
