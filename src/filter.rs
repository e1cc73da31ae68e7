//! The APF driver (spec §4.7): the filter loop, lookahead, and conditional
//! variant, written against the collaborator traits (`dyn Simulator`, `dyn
//! ObservationUpdater`, `dyn LogLikelihoodKernel`, `dyn Resampler`) rather
//! than concrete types, so any backend satisfying those contracts can drive
//! the same loop — the "capability interface" shape used throughout.

use log::{debug, info, trace, warn};
use nalgebra::DVector;

use crate::cache::{OutputCache, OutputSink, StepRecord};
use crate::error::ApfResult;
use crate::likelihood::LogLikelihoodKernel;
use crate::observations::ObservationUpdater;
use crate::particles::ParticleState;
use crate::resampler::Resampler;
use crate::simulator::Simulator;
use crate::weights::{ess, logsumexp, normalise};

/// How the lookahead populates its auxiliary R-buffer. `Deterministic` (the
/// default) zero-fills it, realising the expected-trajectory proposal;
/// `MeanPreservingRandom` is the configuration escape hatch spec §4.7.5
/// permits but does not mandate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookaheadMode {
    Deterministic,
    MeanPreservingRandom,
}

/// A particle-Gibbs-style reference trajectory: one column per step, plus
/// the ancestor that row 0 is conditioned to descend from (spec §4.7.6).
pub struct ConditionalTrajectory {
    pub xd: nalgebra::DMatrix<f64>,
    pub xc: nalgebra::DMatrix<f64>,
    pub xr: nalgebra::DMatrix<f64>,
    pub a: usize,
}

/// Run parameters (spec §6), constructed directly by the caller rather than
/// parsed from a config file or DSL — the teacher repo has no config-file
/// layer to ground one in.
pub struct ApfConfig {
    pub t_end: f64,
    pub delta: f64,
    pub rel_ess: f64,
    pub lookahead_mode: LookaheadMode,
    pub x0: Option<DVector<f64>>,
    pub conditional: Option<ConditionalTrajectory>,
}

impl Default for ApfConfig {
    fn default() -> Self {
        ApfConfig {
            t_end: 0.0,
            delta: 1.0,
            rel_ess: 0.5,
            lookahead_mode: LookaheadMode::Deterministic,
            x0: None,
            conditional: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialised,
    Initialised,
    Running,
    Terminated,
}

/// Summary of a completed run (spec §4.5 / §6): marginal log-likelihood
/// estimator plus its per-step decomposition and per-step ESS.
#[derive(Debug, Clone)]
pub struct FilterSummary {
    pub ll: f64,
    pub ll_k: Vec<f64>,
    pub ess_k: Vec<f64>,
}

pub struct ApfDriver {
    simulator: Box<dyn Simulator>,
    observations: Box<dyn ObservationUpdater>,
    kernel: Box<dyn LogLikelihoodKernel>,
    resampler: Option<Box<dyn Resampler>>,
    config: ApfConfig,
    theta: nalgebra::DMatrix<f64>,

    phase: Phase,
    s: Option<ParticleState>,
    lw1: Vec<f64>,
    lw2: Vec<f64>,
    ancestors: Vec<usize>,
    t_filter: f64,
    step: usize,

    cache: OutputCache,
    stage1_history: Vec<Vec<f64>>,
    stage2_history: Vec<Vec<f64>>,
}

impl ApfDriver {
    pub fn new(
        simulator: Box<dyn Simulator>,
        observations: Box<dyn ObservationUpdater>,
        kernel: Box<dyn LogLikelihoodKernel>,
        resampler: Option<Box<dyn Resampler>>,
        config: ApfConfig,
        theta: nalgebra::DMatrix<f64>,
    ) -> Self {
        ApfDriver {
            simulator,
            observations,
            kernel,
            resampler,
            config,
            theta,
            phase: Phase::Uninitialised,
            s: None,
            lw1: Vec::new(),
            lw2: Vec::new(),
            ancestors: Vec::new(),
            t_filter: 0.0,
            step: 0,
            cache: OutputCache::new(),
            stage1_history: Vec::new(),
            stage2_history: Vec::new(),
        }
    }

    /// §4.7.2: draw the initial ensemble and zero both weight vectors.
    pub fn init(&mut self, p: usize, t0: f64) {
        assert_eq!(
            self.phase,
            Phase::Uninitialised,
            "init called outside the Uninitialised state"
        );
        let s = self.simulator.init_particles(p, self.config.x0.as_ref());
        self.lw1 = vec![0.0; p];
        self.lw2 = vec![0.0; p];
        self.ancestors = (0..p).collect();
        assert_eq!(
            self.lw2.len(),
            self.ancestors.len(),
            "lw2 and ancestor vector must have equal length"
        );
        self.t_filter = t0;
        self.s = Some(s);
        self.step = 0;
        self.phase = Phase::Initialised;
        info!("apf initialised with {p} particles at t0={t0}");
    }

    /// The current particle ensemble, if the driver has been initialised.
    pub fn particles(&self) -> Option<&ParticleState> {
        self.s.as_ref()
    }

    /// §4.7.3: the resample decision. Ordering is correctness-critical and
    /// is implemented exactly as numbered.
    fn resample(&mut self) -> bool {
        // 1. normalise(lw2).
        normalise(&mut self.lw2);

        // 2. no more observations: no resample.
        if !self.observations.has_next() {
            return false;
        }

        // 3. lw1 <- lw2, seeding the stage-1 computation from the posterior.
        let tau = self.observations.next_time();
        self.lw1.copy_from_slice(&self.lw2);

        // 4. no resampler configured, or the next observation is already
        // behind the filter: no resample.
        if self.resampler.is_none() || tau <= self.t_filter {
            return false;
        }

        // 5. lookahead mutates lw1 in place.
        self.lookahead(tau);

        let p = self.lw1.len();
        let threshold = p as f64 * self.config.rel_ess;
        let should_resample = self.config.rel_ess >= 1.0 || ess(&self.lw1) <= threshold;

        if should_resample {
            // 6.
            let resampler = self.resampler.as_mut().unwrap();
            let theta = &self.theta;
            let s = self.s.as_mut().expect("driver not initialised");
            match &self.config.conditional {
                Some(cond) => {
                    let a = cond.a;
                    resampler.resample_conditional(
                        a,
                        &self.lw1,
                        &mut self.lw2,
                        &mut self.ancestors,
                        theta,
                        s,
                    );
                }
                None => {
                    resampler.resample(&self.lw1, &mut self.lw2, &mut self.ancestors, theta, s);
                }
            }
            debug!("resampled at t_filter={}, ess={}", self.t_filter, ess(&self.lw1));
            true
        } else {
            // 7. undo the lookahead augmentation for reporting: no resample
            // means stage-1 equals stage-2, ancestry is the identity.
            self.lw1.copy_from_slice(&self.lw2);
            for (i, a) in self.ancestors.iter_mut().enumerate() {
                *a = i;
            }
            false
        }
        // 8. postcondition (t_sim == t_filter) is restored by the caller's
        // subsequent `advance` to `t_filter`; lookahead always restores the
        // simulator to its pre-excursion time via mark()/restore().
    }

    /// §4.7.5: deterministic (or mean-preserving-random) one-step lookahead.
    fn lookahead(&mut self, tau: f64) {
        if !self.observations.has_next() || tau > self.config.t_end {
            return;
        }
        let nupdates = ((tau / self.config.delta).floor()
            - (self.t_filter / self.config.delta).floor())
        .max(0.0) as usize;
        if nupdates == 0 {
            return;
        }

        let s = self.s.as_mut().expect("driver not initialised");
        let snapshot = s.snapshot_dcr();

        self.simulator.mark();

        let nr_cols = s.s_r.ncols();
        match self.config.lookahead_mode {
            LookaheadMode::Deterministic => {
                self.simulator
                    .resize_and_zero_r_buffer(s.p, nr_cols * nupdates);
            }
            LookaheadMode::MeanPreservingRandom => {
                // Leave the buffer to the simulator's own sampling path; only
                // pin the update count so `advance` draws fresh noise.
            }
        }
        self.simulator.set_next_update_count(nupdates);
        self.simulator.advance(tau, &self.theta, s);

        let y = self.observations.peek_value();
        self.kernel.log_likelihood(s, &y, &mut self.lw1);

        s.restore_dcr(&snapshot);
        self.simulator.restore();
    }

    /// §4.7.4/4.7.6: one full filter run to `t_end`.
    pub fn filter(&mut self) -> ApfResult<FilterSummary> {
        assert!(
            self.config.t_end > self.t_filter,
            "t_end must exceed the filter's current time"
        );
        assert!(
            (0.0..=1.0).contains(&self.config.rel_ess),
            "relEss must lie in [0, 1]"
        );
        assert_eq!(self.phase, Phase::Initialised, "filter() requires init() first");
        self.phase = Phase::Running;

        while self.t_filter < self.config.t_end && self.observations.has_next() {
            // this iteration's predict/correct target is the next observation time.
            let tau = self.observations.next_time();
            let r = self.resample();

            self.simulator.advance(
                tau,
                &self.theta,
                self.s.as_mut().expect("driver not initialised"),
            );

            if let Some(cond) = &self.config.conditional {
                let n = self.step;
                if n < cond.xd.ncols().max(cond.xc.ncols()).max(cond.xr.ncols()) {
                    let s = self.s.as_mut().expect("driver not initialised");
                    if cond.xd.ncols() > n {
                        s.s_d.set_row(0, &cond.xd.column(n).transpose());
                    }
                    if cond.xc.ncols() > n {
                        s.s_c.set_row(0, &cond.xc.column(n).transpose());
                    }
                    if cond.xr.ncols() > n {
                        s.s_r.set_row(0, &cond.xr.column(n).transpose());
                    }
                }
            }

            let (_t, y) = self.observations.consume();
            self.kernel
                .log_likelihood(self.s.as_ref().expect("driver not initialised"), &y, &mut self.lw2);

            self.output(r)?;
            self.step += 1;
            self.t_filter = self.simulator.t_sim();
            trace!("step {} complete, t_filter={}", self.step, self.t_filter);
        }

        self.synchronize();
        self.phase = Phase::Terminated;
        Ok(self.summarise())
    }

    /// §4.7.7: record this step's diagnostics into the output cache.
    fn output(&mut self, resampled: bool) -> ApfResult<()> {
        self.stage1_history.push(self.lw1.clone());
        self.stage2_history.push(self.lw2.clone());

        let ll_increment = logsumexp(&self.lw2) - logsumexp(&self.lw1);
        let particle_state = self.s.as_ref().expect("driver not initialised").clone();
        self.cache.put(StepRecord {
            step: self.step,
            time: self.t_filter,
            lw1: self.lw1.clone(),
            lw2: self.lw2.clone(),
            ancestors: self.ancestors.clone(),
            particle_state,
            ll_increment,
            resampled,
        });
        Ok(())
    }

    pub fn flush(&mut self, sink: &mut dyn OutputSink) -> ApfResult<()> {
        self.cache.flush_to(sink).map_err(|e| {
            warn!("output sink flush failed: {e}");
            e
        })
    }

    /// No-op barrier matching interface parity with an eventual
    /// device-offloaded simulator; the teacher's own stack has no async
    /// runtime either.
    fn synchronize(&self) {}

    /// §4.5: the marginal log-likelihood estimator and its decomposition.
    pub fn summarise(&self) -> FilterSummary {
        let k = self.stage1_history.len();
        let mut ll_k = Vec::with_capacity(k);
        for i in 0..k {
            let lse1 = logsumexp(&self.stage1_history[i]);
            let lse2 = logsumexp(&self.stage2_history[i]);
            ll_k.push(if i == 0 { lse2 } else { lse2 - lse1 });
        }
        let ll: f64 = ll_k.iter().sum();
        let ess_k = self
            .stage2_history
            .iter()
            .map(|lw2| {
                let mut normalised = lw2.clone();
                normalise(&mut normalised);
                ess(&normalised)
            })
            .collect();
        FilterSummary { ll, ll_k, ess_k }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::likelihood::GaussianKernel;
    use crate::model::ConstantModel;
    use crate::observations::VecObservationUpdater;
    use crate::resampler::SystematicResampler;
    use crate::simulator::ModelSimulator;
    use nalgebra::DMatrix;

    fn build_driver(rel_ess: f64, resampler: Option<Box<dyn Resampler>>) -> ApfDriver {
        let model = ConstantModel::new(0.0, 1.0, 0.1);
        let simulator = Box::new(ModelSimulator::new(model, 1.0, 0.0, 11));
        let observations = Box::new(VecObservationUpdater::from_scalars(
            &[1.0, 2.0, 3.0, 4.0],
            &[0.1, 0.2, -0.1, 0.0],
        ));
        let kernel = Box::new(GaussianKernel {
            obs_col: 0,
            sigma_obs: 0.5,
        });
        let config = ApfConfig {
            t_end: 4.0,
            delta: 1.0,
            rel_ess,
            lookahead_mode: LookaheadMode::Deterministic,
            x0: None,
            conditional: None,
        };
        let theta = DMatrix::zeros(1, 0);
        let mut driver = ApfDriver::new(simulator, observations, kernel, resampler, config, theta);
        driver.init(200, 0.0);
        driver
    }

    #[test]
    fn scenario_1_trivial_constant_model_runs_to_completion() {
        let mut driver = build_driver(0.5, Some(Box::new(SystematicResampler::new(3))));
        let summary = driver.filter().unwrap();
        assert_eq!(summary.ll_k.len(), 4);
        assert!(summary.ll.is_finite());
        for e in &summary.ess_k {
            assert!(*e >= 1.0 - 1e-6 && *e <= 200.0 + 1e-6);
        }
    }

    #[test]
    fn rel_ess_zero_never_triggers_resampling() {
        // relEss=0 means ess(lw1) <= P*0 is only true for a degenerate
        // ensemble, so the ancestor vector stays the identity throughout.
        let mut driver = build_driver(0.0, Some(Box::new(SystematicResampler::new(4))));
        driver.filter().unwrap();
        let last = driver.cache.get(3).expect("step 3 recorded");
        assert!(last.ancestors.iter().enumerate().all(|(i, &a)| a == i));
    }

    #[test]
    fn rel_ess_one_forces_resampling_every_step() {
        let mut driver = build_driver(1.0, Some(Box::new(SystematicResampler::new(5))));
        driver.filter().unwrap();
        for k in 0..4 {
            assert!(driver.cache.get(k).unwrap().resampled);
        }
    }

    #[test]
    fn no_resampler_disables_resampling_entirely() {
        let mut driver = build_driver(1.0, None);
        driver.filter().unwrap();
        for k in 0..4 {
            let record = driver.cache.get(k).unwrap();
            assert!(!record.resampled);
            assert!(record.ancestors.iter().enumerate().all(|(i, &a)| a == i));
        }
    }

    #[test]
    fn ancestors_are_always_within_particle_bounds() {
        let mut driver = build_driver(0.5, Some(Box::new(SystematicResampler::new(6))));
        driver.filter().unwrap();
        for k in 0..4 {
            let record = driver.cache.get(k).unwrap();
            assert!(record.ancestors.iter().all(|&a| a < 200));
        }
    }
}
