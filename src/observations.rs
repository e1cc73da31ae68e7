//! The observation updater collaborator (spec §4.2): a finite, strictly
//! increasing sequence of observation times with associated observation
//! vectors, exposed as a peek/consume cursor so the lookahead can look at the
//! next observation without consuming it.

use nalgebra::DVector;

pub trait ObservationUpdater {
    fn has_next(&self) -> bool;
    /// Peek the next observation time without consuming it.
    fn next_time(&self) -> f64;
    /// Peek the next observation's value without consuming it. Needed by the
    /// lookahead, which evaluates the predictive likelihood of the upcoming
    /// observation but must not consume it (spec: the observation is
    /// consumed exactly once, during `correct`).
    fn peek_value(&self) -> DVector<f64>;
    /// Advance the cursor, returning the time and observation vector.
    fn consume(&mut self) -> (f64, DVector<f64>);
}

/// Reference `ObservationUpdater` backed by a sorted, in-memory schedule.
pub struct VecObservationUpdater {
    schedule: Vec<(f64, DVector<f64>)>,
    cursor: usize,
}

impl VecObservationUpdater {
    pub fn new(schedule: Vec<(f64, DVector<f64>)>) -> Self {
        for w in schedule.windows(2) {
            assert!(
                w[1].0 > w[0].0,
                "observation schedule must be strictly increasing in time"
            );
        }
        VecObservationUpdater {
            schedule,
            cursor: 0,
        }
    }

    pub fn from_scalars(times: &[f64], values: &[f64]) -> Self {
        assert_eq!(times.len(), values.len());
        let schedule = times
            .iter()
            .zip(values.iter())
            .map(|(&t, &y)| (t, DVector::from_element(1, y)))
            .collect();
        Self::new(schedule)
    }
}

impl ObservationUpdater for VecObservationUpdater {
    fn has_next(&self) -> bool {
        self.cursor < self.schedule.len()
    }

    fn next_time(&self) -> f64 {
        self.schedule[self.cursor].0
    }

    fn peek_value(&self) -> DVector<f64> {
        self.schedule[self.cursor].1.clone()
    }

    fn consume(&mut self) -> (f64, DVector<f64>) {
        let (t, y) = self.schedule[self.cursor].clone();
        self.cursor += 1;
        (t, y)
    }
}
