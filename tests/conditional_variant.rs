use apf_core::{
    ApfConfig, ApfDriver, ConditionalTrajectory, ConstantModel, GaussianKernel, LookaheadMode,
    ModelSimulator, SystematicResampler, VecObservationUpdater,
};
use nalgebra::DMatrix;

/// Scenario 5 / the conditional-SMC identity law: with a reference
/// trajectory and ancestor `a` fixed, row 0 of the particle ensemble equals
/// the reference trajectory's column at every step after correction.
#[test]
fn conditional_variant_pins_particle_zero_to_reference_trajectory() {
    let model = ConstantModel::new(0.0, 1.0, 0.1);
    let simulator = Box::new(ModelSimulator::new(model, 1.0, 0.0, 21));
    let times = [1.0, 2.0, 3.0];
    let values = [0.1, -0.2, 0.05];
    let observations = Box::new(VecObservationUpdater::from_scalars(&times, &values));
    let kernel = Box::new(GaussianKernel {
        obs_col: 0,
        sigma_obs: 1.0,
    });

    // Reference trajectory: one column per step, matching the observation
    // values closely (stands in for a previously accepted particle path).
    let xc = DMatrix::from_row_slice(1, 3, &[0.11, -0.19, 0.06]);
    let xd = DMatrix::zeros(0, 3);
    let xr = DMatrix::zeros(1, 3);

    let config = ApfConfig {
        t_end: 3.0,
        delta: 1.0,
        rel_ess: 1.0,
        lookahead_mode: LookaheadMode::Deterministic,
        x0: None,
        conditional: Some(ConditionalTrajectory { xd, xc, xr, a: 3 }),
    };
    let resampler = Some(Box::new(SystematicResampler::new(21)) as Box<_>);
    let theta = DMatrix::zeros(1, 0);
    let mut driver = ApfDriver::new(simulator, observations, kernel, resampler, config, theta);
    driver.init(64, 0.0);
    driver.filter().unwrap();

    // The overwrite happens after the final `advance` and before `correct`,
    // so the last reference column should still be in row 0 at the end.
    let particles = driver.particles().expect("driver initialised");
    assert!((particles.s_c[(0, 0)] - 0.06).abs() < 1e-12);
}
