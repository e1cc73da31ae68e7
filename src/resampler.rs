//! The resampler collaborator (spec §4.4): given log-weights, produces an
//! ancestor index vector and a new log-weight vector, rearranging particle
//! rows to match.
//!
//! The three schemes below generalise the teacher's `resampling_sort`/
//! `resampling_stratified`/`resampling_systematic` (`particle_filter.rs`)
//! from permuting a `Vec<OVector<T, S>>` of whole particles to producing an
//! ancestor-index vector from log-weights and delegating the permutation to
//! `ParticleState::permute_rows` — the same cumulative-weight inverse-CDF
//! search, generalised to work on the dense matrix representation spec §3
//! requires instead of a `Vec` of particle structs.

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::particles::ParticleState;

pub trait Resampler {
    /// Unconditional resample: ancestors drawn in proportion to `exp(lw_in)`.
    fn resample(
        &mut self,
        lw_in: &[f64],
        lw_out: &mut [f64],
        ancestors: &mut [usize],
        theta: &DMatrix<f64>,
        s: &mut ParticleState,
    );

    /// Conditional resample (used by particle-Gibbs-style samplers): output
    /// index 0 is forced to descend from `a_fixed`; the rest are drawn from
    /// the standard procedure.
    fn resample_conditional(
        &mut self,
        a_fixed: usize,
        lw_in: &[f64],
        lw_out: &mut [f64],
        ancestors: &mut [usize],
        theta: &DMatrix<f64>,
        s: &mut ParticleState,
    );
}

/// Cumulative weights `W[i] = sum_{j<=i} exp(lw[j])`, stable against a
/// `-inf` log-weight (contributes zero, never selected).
fn cumulative_weights(lw: &[f64]) -> (Vec<f64>, f64) {
    let m = lw.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mut cum = Vec::with_capacity(lw.len());
    let mut acc = 0.0;
    for &x in lw {
        let w = if m.is_finite() { (x - m).exp() } else { 0.0 };
        acc += w;
        cum.push(acc);
    }
    (cum, acc)
}

/// Inverse-CDF lookup: first index whose cumulative weight exceeds `draw`.
fn locate(cum: &[f64], draw: f64) -> usize {
    match cum.binary_search_by(|probe| probe.partial_cmp(&draw).unwrap()) {
        Ok(i) => i,
        Err(i) => i.min(cum.len() - 1),
    }
}

fn do_resample(
    draws: &[f64],
    lw_in: &[f64],
    lw_out: &mut [f64],
    ancestors: &mut [usize],
    s: &mut ParticleState,
) {
    let p = lw_in.len();
    let (cum, total) = cumulative_weights(lw_in);
    let uniform_lw = -(p as f64).ln();
    if total <= 0.0 {
        // every particle impossible: fall back to identity ancestry rather
        // than dividing by zero, matching the "-inf absorbed" failure policy.
        for i in 0..p {
            ancestors[i] = i;
            lw_out[i] = uniform_lw;
        }
        return;
    }
    for i in 0..p {
        ancestors[i] = locate(&cum, draws[i] * total);
        lw_out[i] = uniform_lw;
    }
    s.permute_rows(ancestors);
}

/// Teacher's `resampling_sort`: one i.i.d. `Uniform(0,1)` draw per output.
pub struct MultinomialResampler {
    rng: StdRng,
}

impl MultinomialResampler {
    pub fn new(seed: u64) -> Self {
        MultinomialResampler {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Resampler for MultinomialResampler {
    fn resample(
        &mut self,
        lw_in: &[f64],
        lw_out: &mut [f64],
        ancestors: &mut [usize],
        _theta: &DMatrix<f64>,
        s: &mut ParticleState,
    ) {
        let p = lw_in.len();
        let draws: Vec<f64> = (0..p).map(|_| self.rng.gen::<f64>()).collect();
        do_resample(&draws, lw_in, lw_out, ancestors, s);
    }

    fn resample_conditional(
        &mut self,
        a_fixed: usize,
        lw_in: &[f64],
        lw_out: &mut [f64],
        ancestors: &mut [usize],
        theta: &DMatrix<f64>,
        s: &mut ParticleState,
    ) {
        resample_conditional_generic(self, a_fixed, lw_in, lw_out, ancestors, theta, s);
    }
}

/// Teacher's `resampling_stratified`: draw `i` stratified over `[i/P, (i+1)/P)`.
pub struct StratifiedResampler {
    rng: StdRng,
}

impl StratifiedResampler {
    pub fn new(seed: u64) -> Self {
        StratifiedResampler {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Resampler for StratifiedResampler {
    fn resample(
        &mut self,
        lw_in: &[f64],
        lw_out: &mut [f64],
        ancestors: &mut [usize],
        _theta: &DMatrix<f64>,
        s: &mut ParticleState,
    ) {
        let p = lw_in.len();
        let draws: Vec<f64> = (0..p)
            .map(|i| (i as f64 + self.rng.gen::<f64>()) / p as f64)
            .collect();
        do_resample(&draws, lw_in, lw_out, ancestors, s);
    }

    fn resample_conditional(
        &mut self,
        a_fixed: usize,
        lw_in: &[f64],
        lw_out: &mut [f64],
        ancestors: &mut [usize],
        theta: &DMatrix<f64>,
        s: &mut ParticleState,
    ) {
        resample_conditional_generic(self, a_fixed, lw_in, lw_out, ancestors, theta, s);
    }
}

/// Teacher's `resampling_systematic`: a single shared draw offsets every stratum.
pub struct SystematicResampler {
    rng: StdRng,
}

impl SystematicResampler {
    pub fn new(seed: u64) -> Self {
        SystematicResampler {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Resampler for SystematicResampler {
    fn resample(
        &mut self,
        lw_in: &[f64],
        lw_out: &mut [f64],
        ancestors: &mut [usize],
        _theta: &DMatrix<f64>,
        s: &mut ParticleState,
    ) {
        let p = lw_in.len();
        let u0 = self.rng.gen::<f64>();
        let draws: Vec<f64> = (0..p).map(|i| (i as f64 + u0) / p as f64).collect();
        do_resample(&draws, lw_in, lw_out, ancestors, s);
    }

    fn resample_conditional(
        &mut self,
        a_fixed: usize,
        lw_in: &[f64],
        lw_out: &mut [f64],
        ancestors: &mut [usize],
        theta: &DMatrix<f64>,
        s: &mut ParticleState,
    ) {
        resample_conditional_generic(self, a_fixed, lw_in, lw_out, ancestors, theta, s);
    }
}

/// Shared conditional-resample shape (spec §4.4): run the unconditional
/// scheme for every particle, then overwrite output 0 with a fresh gather of
/// `a_fixed` from the pre-resample particle, so the returned ancestor vector
/// and the particle rows in `s` stay consistent.
fn resample_conditional_generic<R: Resampler + ?Sized>(
    resampler: &mut R,
    a_fixed: usize,
    lw_in: &[f64],
    lw_out: &mut [f64],
    ancestors: &mut [usize],
    theta: &DMatrix<f64>,
    s: &mut ParticleState,
) {
    assert!(a_fixed < lw_in.len(), "conditioned ancestor out of range");
    let (pre_d, pre_c, pre_r) = s.snapshot_dcr();
    resampler.resample(lw_in, lw_out, ancestors, theta, s);

    ancestors[0] = a_fixed;
    s.s_d.set_row(0, &pre_d.row(a_fixed));
    s.s_c.set_row(0, &pre_c.row(a_fixed));
    s.s_r.set_row(0, &pre_r.row(a_fixed));
    let uniform_lw = -(s.p as f64).ln();
    lw_out[0] = uniform_lw;
}
