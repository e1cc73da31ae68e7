use apf_core::{
    ApfConfig, ApfDriver, ConstantModel, GaussianKernel, LookaheadMode, ModelSimulator,
    SystematicResampler, VecObservationUpdater,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nalgebra::DMatrix;

fn run_filter(p: usize) -> f64 {
    let model = ConstantModel::new(0.0, 1.0, 0.1);
    let simulator = Box::new(ModelSimulator::new(model, 1.0, 0.0, 7));
    let times: Vec<f64> = (1..=20).map(|k| k as f64).collect();
    let values: Vec<f64> = times.iter().map(|t| 0.1 * (t * 0.3).sin()).collect();
    let observations = Box::new(VecObservationUpdater::from_scalars(&times, &values));
    let kernel = Box::new(GaussianKernel {
        obs_col: 0,
        sigma_obs: 0.5,
    });
    let config = ApfConfig {
        t_end: 20.0,
        delta: 1.0,
        rel_ess: 0.5,
        lookahead_mode: LookaheadMode::Deterministic,
        x0: None,
        conditional: None,
    };
    let theta = DMatrix::zeros(1, 0);
    let resampler = Some(Box::new(SystematicResampler::new(1)) as Box<_>);
    let mut driver = ApfDriver::new(simulator, observations, kernel, resampler, config, theta);
    driver.init(p, 0.0);
    driver.filter().unwrap().ll
}

fn bench_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("apf_filter");
    for &p in &[100usize, 1_000] {
        group.bench_function(format!("p={p}"), |b| {
            b.iter(|| black_box(run_filter(black_box(p))))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_filter);
criterion_main!(benches);
