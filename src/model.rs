//! The model contract `B`.
//!
//! Spec §1 places the model-description language out of scope as a DSL; the
//! core still needs some Rust-level contract to operate on an opaque `B`, so
//! this is reconstructed in the shape of the teacher's `MeasurementModel`/
//! `MotionModel` traits (`models::measurement`, `models::motion` — referenced
//! by `particle_filter.rs` and `extended_kalman_filter.rs` but not present in
//! the retrieved teacher subset): a plain trait, monomorphic in `f64` since
//! the particle matrices are always `f64` here, rather than generic over a
//! `RealField` the way the teacher is (the teacher's genericity over `T` is a
//! concern of its own static-dimension `nalgebra` types; this crate's
//! dimensions are run-time, so the dynamic `DMatrix` route is taken instead).

use nalgebra::DMatrix;
use rand::rngs::StdRng;

use crate::particles::StaticHandling;

/// A user-supplied model: the D/C/R/P variable groups, an initial draw, and
/// the deterministic half of one transition step (the stochastic half is the
/// `R` columns handed in, already sampled by the `Simulator`).
pub trait Model: Send + Sync {
    fn nd(&self) -> usize;
    fn nc(&self) -> usize;
    fn nr(&self) -> usize;
    fn np(&self) -> usize;

    fn static_handling(&self) -> StaticHandling {
        StaticHandling::Shared
    }

    /// Draw the initial `(D, C, P)` state for `p` particles.
    fn init(&self, p: usize, rng: &mut StdRng) -> (DMatrix<f64>, DMatrix<f64>, DMatrix<f64>);

    /// Advance `d`/`c` in place from `t` to `t + dt`, consuming the raw
    /// (standard-normal) random inputs in `r` and the model parameters in
    /// `theta`. Must be a pure function of its arguments: determinism given
    /// `r` is the contract the lookahead's zero-filled buffer relies on.
    fn step(
        &self,
        t: f64,
        dt: f64,
        d: &mut DMatrix<f64>,
        c: &mut DMatrix<f64>,
        r: &DMatrix<f64>,
        theta: &DMatrix<f64>,
    );
}

/// Scalar constant-velocity model used by the trivial end-to-end scenario
/// (spec §8 scenario 1): `C = [x]`, `x_{k+1} = x_k + sigma_r * r`, no `D`/`P`
/// nodes. `sigma_r` small keeps the dynamics close to truly constant while
/// still giving the ensemble enough spread for resampling to matter.
pub struct ConstantModel {
    pub init_mean: f64,
    pub init_sd: f64,
    pub sigma_r: f64,
}

impl ConstantModel {
    pub fn new(init_mean: f64, init_sd: f64, sigma_r: f64) -> Self {
        ConstantModel {
            init_mean,
            init_sd,
            sigma_r,
        }
    }
}

impl Model for ConstantModel {
    fn nd(&self) -> usize {
        0
    }
    fn nc(&self) -> usize {
        1
    }
    fn nr(&self) -> usize {
        1
    }
    fn np(&self) -> usize {
        0
    }

    fn init(&self, p: usize, rng: &mut StdRng) -> (DMatrix<f64>, DMatrix<f64>, DMatrix<f64>) {
        use rand_distr::{Distribution, Normal};
        let normal = Normal::new(self.init_mean, self.init_sd.max(1e-12)).unwrap();
        let c = DMatrix::from_fn(p, 1, |_, _| normal.sample(rng));
        (DMatrix::zeros(p, 0), c, DMatrix::zeros(1, 0))
    }

    fn step(
        &self,
        _t: f64,
        _dt: f64,
        _d: &mut DMatrix<f64>,
        c: &mut DMatrix<f64>,
        r: &DMatrix<f64>,
        _theta: &DMatrix<f64>,
    ) {
        for i in 0..c.nrows() {
            c[(i, 0)] += self.sigma_r * r[(i, 0)];
        }
    }
}

/// Scalar linear-Gaussian model `x_{k+1} = a*x_k + sigma_r*r`, used by the
/// marginal log-likelihood convergence law (spec §8), compared against the
/// exact scalar Kalman recursion in `tests/kalman_convergence.rs`.
pub struct LinearGaussianModel {
    pub a: f64,
    pub init_mean: f64,
    pub init_sd: f64,
    pub sigma_r: f64,
}

impl Model for LinearGaussianModel {
    fn nd(&self) -> usize {
        0
    }
    fn nc(&self) -> usize {
        1
    }
    fn nr(&self) -> usize {
        1
    }
    fn np(&self) -> usize {
        0
    }

    fn init(&self, p: usize, rng: &mut StdRng) -> (DMatrix<f64>, DMatrix<f64>, DMatrix<f64>) {
        use rand_distr::{Distribution, Normal};
        let normal = Normal::new(self.init_mean, self.init_sd.max(1e-12)).unwrap();
        let c = DMatrix::from_fn(p, 1, |_, _| normal.sample(rng));
        (DMatrix::zeros(p, 0), c, DMatrix::zeros(1, 0))
    }

    fn step(
        &self,
        _t: f64,
        _dt: f64,
        _d: &mut DMatrix<f64>,
        c: &mut DMatrix<f64>,
        r: &DMatrix<f64>,
        _theta: &DMatrix<f64>,
    ) {
        for i in 0..c.nrows() {
            c[(i, 0)] = self.a * c[(i, 0)] + self.sigma_r * r[(i, 0)];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn constant_model_step_is_deterministic_given_r() {
        let model = ConstantModel::new(0.0, 1.0, 0.1);
        let mut rng = StdRng::seed_from_u64(7);
        let (d0, mut c, p0) = model.init(4, &mut rng);
        let r = DMatrix::from_row_slice(4, 1, &[0.5, -0.5, 1.0, 0.0]);
        let theta = p0.clone();
        let mut d = d0.clone();
        let before = c.clone();
        model.step(0.0, 1.0, &mut d, &mut c, &r, &theta);
        for i in 0..4 {
            assert!((c[(i, 0)] - (before[(i, 0)] + 0.1 * r[(i, 0)])).abs() < 1e-12);
        }
    }
}
