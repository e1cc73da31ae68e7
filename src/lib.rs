//! Core of an Auxiliary Particle Filter (APF) for sequential Bayesian state
//! estimation of continuous-time, partially-observed stochastic dynamical
//! systems: two-stage (stage-1 lookahead-augmented, stage-2 corrected)
//! log-weights, a deterministic one-step lookahead guiding the resample
//! decision, and an optional conditional-ancestor variant for particle-Gibbs
//! style samplers.

pub mod cache;
pub mod error;
pub mod filter;
pub mod likelihood;
pub mod model;
pub mod observations;
pub mod particles;
pub mod resampler;
pub mod simulator;
pub mod weights;

pub use cache::{JsonFileSink, MemorySink, OutputCache, OutputSink, StepRecord};
pub use error::{ApfError, ApfResult};
pub use filter::{ApfConfig, ApfDriver, ConditionalTrajectory, FilterSummary, LookaheadMode};
pub use likelihood::{GaussianKernel, LogLikelihoodKernel, LogNormalKernel, LogNormalShape};
pub use model::{ConstantModel, LinearGaussianModel, Model};
pub use observations::{ObservationUpdater, VecObservationUpdater};
pub use particles::{ParticleState, StaticHandling};
pub use resampler::{MultinomialResampler, Resampler, StratifiedResampler, SystematicResampler};
pub use simulator::{ModelSimulator, Simulator};
pub use weights::{ess, logsumexp, normalise, summarise, WeightSummary};
