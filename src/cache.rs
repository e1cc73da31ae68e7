//! Output caching and sinks (spec §4.6 / §6). The driver writes each step's
//! diagnostics into an `OutputCache` as it runs, and flushes completed steps
//! out to an `OutputSink` — separating "the driver produced this row" from
//! "this row has been durably written somewhere", which is what lets the
//! conditional/particle-Gibbs variant discard an aborted run without having
//! touched the sink at all.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::error::{ApfError, ApfResult};
use crate::particles::ParticleState;

/// One step's worth of recorded diagnostics (spec §4.6 / §6 persisted state
/// layout): both log-weight vectors (stage-1 augmented and stage-2
/// corrected), the ancestor vector that produced this step's particles, a
/// snapshot of the particle state itself, the per-step log-likelihood
/// increment used by the marginal estimator, and the resampled flag.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: usize,
    pub time: f64,
    pub lw1: Vec<f64>,
    pub lw2: Vec<f64>,
    pub ancestors: Vec<usize>,
    pub particle_state: ParticleState,
    pub ll_increment: f64,
    pub resampled: bool,
}

/// In-order, append-only cache of `StepRecord`s keyed by step index. Tolerant
/// of a step being written out of order (the conditional variant may replay
/// a step after an aborted excursion) via `put` overwriting any existing slot.
#[derive(Debug, Default)]
pub struct OutputCache {
    records: Vec<Option<StepRecord>>,
}

impl OutputCache {
    pub fn new() -> Self {
        OutputCache { records: Vec::new() }
    }

    pub fn put(&mut self, record: StepRecord) {
        let k = record.step;
        if k >= self.records.len() {
            self.records.resize_with(k + 1, || None);
        }
        self.records[k] = Some(record);
    }

    pub fn get(&self, k: usize) -> Option<&StepRecord> {
        self.records.get(k).and_then(|r| r.as_ref())
    }

    pub fn size(&self) -> usize {
        self.records.len()
    }

    pub fn is_valid(&self, k: usize) -> bool {
        self.get(k).is_some()
    }

    /// Drop every record strictly before `k`, used once the driver knows it
    /// will never need to re-examine an earlier step (after a successful
    /// resample, mirroring the source's cache-clean-on-resample behaviour).
    pub fn clean(&mut self, before: usize) {
        for slot in self.records.iter_mut().take(before.min(self.records.len())) {
            *slot = None;
        }
    }

    /// Drain every cached record to `sink`, dispatching each of its streams
    /// to the sink's own per-stream method (spec §6 persisted state layout:
    /// `stage1_log_weights[k]`, `stage2_log_weights[k]`, `ancestors[k]`,
    /// particle state snapshots, and the resampled flag).
    pub fn flush_to(&mut self, sink: &mut dyn OutputSink) -> ApfResult<()> {
        for slot in self.records.iter_mut() {
            if let Some(record) = slot.take() {
                sink.write_stage1_log_weights(record.step, &record.lw1)?;
                sink.write_stage2_log_weights(record.step, &record.lw2)?;
                sink.write_ancestors(record.step, &record.ancestors)?;
                sink.write_particle_state(record.step, &record.particle_state)?;
                sink.write_resampled(record.step, record.resampled)?;
            }
        }
        sink.flush()
    }
}

/// Durable destination for flushed steps (spec §4.6 / §6). A driver is
/// written against `dyn OutputSink`, the same capability-interface shape as
/// the simulator/kernel/resampler collaborators. One method per persisted
/// stream, matching the three named streams of spec §6 ("Persisted state
/// layout") plus particle state and the resampled flag it also requires.
pub trait OutputSink {
    fn write_stage1_log_weights(&mut self, k: usize, lw1: &[f64]) -> ApfResult<()>;
    fn write_stage2_log_weights(&mut self, k: usize, lw2: &[f64]) -> ApfResult<()>;
    fn write_ancestors(&mut self, k: usize, ancestors: &[usize]) -> ApfResult<()>;
    fn write_particle_state(&mut self, k: usize, state: &ParticleState) -> ApfResult<()>;
    fn write_resampled(&mut self, k: usize, resampled: bool) -> ApfResult<()>;
    fn flush(&mut self) -> ApfResult<()>;
}

/// In-memory sink, used by tests that need to inspect every step afterwards
/// without going through the filesystem. Reassembles the per-stream writes
/// into whole `StepRecord`s, keyed by step index, since a step's five writes
/// always arrive together during one `flush_to` call.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<StepRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    fn record_mut(&mut self, step: usize) -> &mut StepRecord {
        if let Some(idx) = self.records.iter().position(|r| r.step == step) {
            &mut self.records[idx]
        } else {
            self.records.push(StepRecord {
                step,
                time: 0.0,
                lw1: Vec::new(),
                lw2: Vec::new(),
                ancestors: Vec::new(),
                particle_state: ParticleState::new(0, 0, 0, 0, 0, crate::particles::StaticHandling::Shared),
                ll_increment: 0.0,
                resampled: false,
            });
            self.records.last_mut().unwrap()
        }
    }
}

impl OutputSink for MemorySink {
    fn write_stage1_log_weights(&mut self, k: usize, lw1: &[f64]) -> ApfResult<()> {
        self.record_mut(k).lw1 = lw1.to_vec();
        Ok(())
    }

    fn write_stage2_log_weights(&mut self, k: usize, lw2: &[f64]) -> ApfResult<()> {
        self.record_mut(k).lw2 = lw2.to_vec();
        Ok(())
    }

    fn write_ancestors(&mut self, k: usize, ancestors: &[usize]) -> ApfResult<()> {
        self.record_mut(k).ancestors = ancestors.to_vec();
        Ok(())
    }

    fn write_particle_state(&mut self, k: usize, state: &ParticleState) -> ApfResult<()> {
        self.record_mut(k).particle_state = state.clone();
        Ok(())
    }

    fn write_resampled(&mut self, k: usize, resampled: bool) -> ApfResult<()> {
        self.record_mut(k).resampled = resampled;
        Ok(())
    }

    fn flush(&mut self) -> ApfResult<()> {
        Ok(())
    }
}

/// Newline-delimited JSON file sink: one tagged record per stream write, via
/// `serde_json`, in the vein of the teacher corpus's `io::json`/`io::ensemble`
/// output convention (periodic whole-state dumps keyed by step). Wire format
/// is sink-defined (spec §6); this one keeps the five streams distinguishable
/// by a `"stream"` tag rather than re-joining them into one record per line.
pub struct JsonFileSink {
    writer: BufWriter<File>,
}

impl JsonFileSink {
    pub fn create(path: &Path) -> ApfResult<Self> {
        let file = File::create(path).map_err(|e| ApfError::SinkWrite {
            step: 0,
            source: e.to_string(),
        })?;
        Ok(JsonFileSink {
            writer: BufWriter::new(file),
        })
    }

    fn write_line<T: Serialize>(&mut self, step: usize, stream: &str, value: &T) -> ApfResult<()> {
        let line = serde_json::json!({ "step": step, "stream": stream, "value": value });
        writeln!(self.writer, "{line}").map_err(|e| ApfError::SinkWrite {
            step,
            source: e.to_string(),
        })
    }
}

impl OutputSink for JsonFileSink {
    fn write_stage1_log_weights(&mut self, k: usize, lw1: &[f64]) -> ApfResult<()> {
        self.write_line(k, "stage1_log_weights", &lw1)
    }

    fn write_stage2_log_weights(&mut self, k: usize, lw2: &[f64]) -> ApfResult<()> {
        self.write_line(k, "stage2_log_weights", &lw2)
    }

    fn write_ancestors(&mut self, k: usize, ancestors: &[usize]) -> ApfResult<()> {
        self.write_line(k, "ancestors", &ancestors)
    }

    fn write_particle_state(&mut self, k: usize, state: &ParticleState) -> ApfResult<()> {
        self.write_line(k, "particle_state", state)
    }

    fn write_resampled(&mut self, k: usize, resampled: bool) -> ApfResult<()> {
        self.write_line(k, "resampled", &resampled)
    }

    fn flush(&mut self) -> ApfResult<()> {
        self.writer.flush().map_err(|e| ApfError::SinkWrite {
            step: 0,
            source: e.to_string(),
        })
    }
}
