//! The simulator collaborator (spec §4.1).
//!
//! Represented as the "capability interface" recommended by spec §9 design
//! note 1: the driver (`crate::filter`) is written against `dyn Simulator`,
//! never against a concrete integrator, so a host/device or CPU/GPU backend
//! can be swapped in without touching the driver.

use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

use crate::model::Model;
use crate::particles::{ParticleState, StaticHandling};

/// External contract consumed by the driver. `mark`/`restore` realise the
/// "scoped snapshot value" of spec §9 design note 4: the core pushes at most
/// one level, and the lookahead's save/restore obligation is lexically local
/// (push in `lookahead`, pop before it returns).
pub trait Simulator {
    /// Integration step size `delta`, used to compute `nupdates` per interval.
    fn delta(&self) -> f64;

    /// The simulator's own notion of time; must equal `t_filter` between steps.
    fn t_sim(&self) -> f64;

    /// Resize the pre-allocated R-buffer to `rows x cols` and zero it. Used by
    /// the lookahead routine ahead of its deterministic auxiliary pass.
    fn resize_and_zero_r_buffer(&mut self, rows: usize, cols: usize);

    /// Pin the number of `delta`-sized update chunks the next `advance` call
    /// will consume, rather than deriving it from `t_sim`/`t_target`. Mirrors
    /// the source's `rUpdater.setNext(nupdates)`; cleared after one use.
    fn set_next_update_count(&mut self, nupdates: usize);

    /// Push a snapshot of simulator-internal state (time, RNG stream
    /// position, pending-update cursor). Nestable; the core uses one level.
    fn mark(&mut self);

    /// Pop the most recent snapshot, restoring simulator-internal state.
    fn restore(&mut self);

    /// Integrate `D`/`C` and draw/consume `R` so that `s` reflects the state
    /// at `t_target`, consuming the R-buffer in `nupdates` chunks where
    /// `nupdates = floor(t_target/delta) - floor(t_sim/delta)` unless a
    /// pinned count was set via `set_next_update_count`. Deterministic given
    /// the R-buffer contents.
    fn advance(&mut self, t_target: f64, theta: &DMatrix<f64>, s: &mut ParticleState);

    /// Draw (or, if `x0` is given, broadcast) the initial particle ensemble.
    /// Lives on the trait, not just the concrete simulator, so the driver can
    /// call it against `dyn Simulator` per spec §9 design note 1.
    fn init_particles(&mut self, p: usize, x0: Option<&DVector<f64>>) -> ParticleState;
}

struct SimulatorSnapshot {
    t_sim: f64,
    rng: rand::rngs::StdRng,
    pending_chunks: Option<usize>,
}

/// Reference `Simulator` built directly on a user `Model`. Spec §1 places the
/// concrete integrator out of scope, but a core with no runnable simulator
/// fails every end-to-end property in spec §8, so this is the "illustrative"
/// implementation the crate actually exercises in its tests.
pub struct ModelSimulator<M: Model> {
    model: M,
    delta: f64,
    t_sim: f64,
    rng: rand::rngs::StdRng,
    r_buffer: DMatrix<f64>,
    pending_chunks: Option<usize>,
    mark_stack: Vec<SimulatorSnapshot>,
}

impl<M: Model> ModelSimulator<M> {
    pub fn new(model: M, delta: f64, t0: f64, seed: u64) -> Self {
        ModelSimulator {
            model,
            delta,
            t_sim: t0,
            rng: rand::rngs::StdRng::seed_from_u64(seed),
            r_buffer: DMatrix::zeros(0, 0),
            pending_chunks: None,
            mark_stack: Vec::new(),
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    fn nupdates_for(&self, t_target: f64) -> usize {
        let from = (self.t_sim / self.delta).floor();
        let to = (t_target / self.delta).floor();
        (to - from).max(0.0) as usize
    }
}

impl<M: Model> Simulator for ModelSimulator<M> {
    fn delta(&self) -> f64 {
        self.delta
    }

    fn t_sim(&self) -> f64 {
        self.t_sim
    }

    fn resize_and_zero_r_buffer(&mut self, rows: usize, cols: usize) {
        self.r_buffer = DMatrix::zeros(rows, cols);
    }

    fn set_next_update_count(&mut self, nupdates: usize) {
        self.pending_chunks = Some(nupdates);
    }

    fn mark(&mut self) {
        self.mark_stack.push(SimulatorSnapshot {
            t_sim: self.t_sim,
            rng: self.rng.clone(),
            pending_chunks: self.pending_chunks,
        });
    }

    fn restore(&mut self) {
        let snap = self
            .mark_stack
            .pop()
            .expect("Simulator::restore called without a matching mark");
        self.t_sim = snap.t_sim;
        self.rng = snap.rng;
        self.pending_chunks = snap.pending_chunks;
    }

    fn advance(&mut self, t_target: f64, theta: &DMatrix<f64>, s: &mut ParticleState) {
        let nr = self.model.nr();
        let prepared = self.pending_chunks.take();
        let nupdates = prepared.unwrap_or_else(|| self.nupdates_for(t_target));

        if nupdates == 0 {
            self.t_sim = t_target;
            return;
        }

        let p = s.p;
        if prepared.is_none() {
            // Normal path: fresh standard-normal draws, not a pre-staged
            // (e.g. zero-filled) buffer from the lookahead routine.
            self.r_buffer = DMatrix::from_fn(p, nr * nupdates, |_, _| {
                StandardNormal.sample(&mut self.rng)
            });
        }
        debug_assert_eq!(self.r_buffer.nrows(), p);
        debug_assert!(self.r_buffer.ncols() >= nr * nupdates);

        let dt = self.delta;
        let mut t = self.t_sim;
        for chunk in 0..nupdates {
            let r_chunk = self.r_buffer.columns(chunk * nr, nr).into_owned();
            self.model
                .step(t, dt, &mut s.s_d, &mut s.s_c, &r_chunk, theta);
            s.s_r.copy_from(&r_chunk);
            t += dt;
        }
        self.t_sim = t_target;
    }

    fn init_particles(&mut self, p: usize, x0: Option<&DVector<f64>>) -> ParticleState {
        let nd = self.model.nd();
        let nc = self.model.nc();
        let np = self.model.np();
        let static_handling = self.model.static_handling();
        match x0 {
            Some(x0) => {
                assert_eq!(
                    x0.len(),
                    nd + nc + np,
                    "x0 length must equal ND+NC+NP"
                );
                let mut state =
                    ParticleState::new(p, nd, nc, self.model.nr(), np, static_handling);
                for i in 0..p {
                    for j in 0..nd {
                        state.s_d[(i, j)] = x0[j];
                    }
                    for j in 0..nc {
                        state.s_c[(i, j)] = x0[nd + j];
                    }
                }
                match static_handling {
                    StaticHandling::Shared => {
                        for j in 0..np {
                            state.s_p[(0, j)] = x0[nd + nc + j];
                        }
                    }
                    StaticHandling::PerParticle => {
                        for i in 0..p {
                            for j in 0..np {
                                state.s_p[(i, j)] = x0[nd + nc + j];
                            }
                        }
                    }
                }
                state
            }
            None => {
                let (s_d, s_c, s_p) = self.model.init(p, &mut self.rng);
                let mut state = ParticleState::new(p, nd, nc, self.model.nr(), np, static_handling);
                state.s_d = s_d;
                state.s_c = s_c;
                state.s_p = s_p;
                state
            }
        }
    }
}
