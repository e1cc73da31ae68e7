use nalgebra::DMatrix;
use serde::Serialize;

/// How model parameters (`P` nodes) are shared across the particle ensemble.
///
/// Named after the source implementation's `StaticHandling` template parameter
/// (spec §9 design note 1): the same algorithm must work whether parameters
/// are held in common or drawn per particle, and the choice is a tagged
/// variant selected at construction rather than a compile-time specialisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StaticHandling {
    /// A single row of parameters, shared by every particle.
    Shared,
    /// One row of parameters per particle.
    PerParticle,
}

/// Dense, row-major particle ensemble: row `p` is particle `p`'s sub-vectors.
///
/// `s_d`, `s_c`, `s_r` are `P x N*` matrices; `s_p` is `1 x NP` under
/// `StaticHandling::Shared` or `P x NP` under `StaticHandling::PerParticle`.
#[derive(Debug, Clone, Serialize)]
pub struct ParticleState {
    pub p: usize,
    pub nd: usize,
    pub nc: usize,
    pub nr: usize,
    pub np: usize,
    pub static_handling: StaticHandling,
    pub s_d: DMatrix<f64>,
    pub s_c: DMatrix<f64>,
    pub s_r: DMatrix<f64>,
    pub s_p: DMatrix<f64>,
}

impl ParticleState {
    pub fn new(
        p: usize,
        nd: usize,
        nc: usize,
        nr: usize,
        np: usize,
        static_handling: StaticHandling,
    ) -> Self {
        let p_rows = match static_handling {
            StaticHandling::Shared => 1,
            StaticHandling::PerParticle => p,
        };
        ParticleState {
            p,
            nd,
            nc,
            nr,
            np,
            static_handling,
            s_d: DMatrix::zeros(p, nd),
            s_c: DMatrix::zeros(p, nc),
            s_r: DMatrix::zeros(p, nr),
            s_p: DMatrix::zeros(p_rows, np),
        }
    }

    /// Copy of `(s_d, s_c, s_r)`, used by the lookahead routine to stash the
    /// pre-excursion state before the auxiliary forward pass (spec §4.7.5
    /// step 3) and to restore it afterwards (step 9).
    pub fn snapshot_dcr(&self) -> (DMatrix<f64>, DMatrix<f64>, DMatrix<f64>) {
        (self.s_d.clone(), self.s_c.clone(), self.s_r.clone())
    }

    pub fn restore_dcr(&mut self, snap: &(DMatrix<f64>, DMatrix<f64>, DMatrix<f64>)) {
        self.s_d.copy_from(&snap.0);
        self.s_c.copy_from(&snap.1);
        self.s_r.copy_from(&snap.2);
    }

    /// Permute every particle row according to `ancestors` (used by a
    /// resampler to rearrange `s_d`/`s_c`/`s_r`, and per-particle `s_p` under
    /// `StaticHandling::PerParticle`).
    pub fn permute_rows(&mut self, ancestors: &[usize]) {
        debug_assert_eq!(ancestors.len(), self.p);
        let gather = |m: &DMatrix<f64>| -> DMatrix<f64> {
            DMatrix::from_fn(m.nrows(), m.ncols(), |i, j| m[(ancestors[i], j)])
        };
        self.s_d = gather(&self.s_d);
        self.s_c = gather(&self.s_c);
        self.s_r = gather(&self.s_r);
        if self.static_handling == StaticHandling::PerParticle {
            self.s_p = gather(&self.s_p);
        }
    }
}
