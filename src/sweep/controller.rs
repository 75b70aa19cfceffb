use itertools::izip;
use num::complex::Complex;
use tracing::{debug, info, warn};

use super::plan::{Segment, SweepPlan};
use super::{CancelPolicy, CancelToken};
use crate::device::{Connection, Transport};
use crate::network::{DataState, FrequencyPoint, SParameterSet};
use crate::result::{Error, Result};

/// Progress of the controller through a sweep.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SweepState {
    #[default]
    Idle,
    /// A segment's `scan` is being sent.
    RequestingSegment,
    /// Waiting for the device to return a segment.
    AwaitingData,
    /// The last sweep gave up on a segment.
    Aborted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SweepOutcome {
    /// Every point of the plan, in frequency order.
    Complete(SParameterSet),
    /// Cancelled between segments. `partial` is only filled in under
    /// [`CancelPolicy::ReturnPartial`] and when at least one segment was read.
    Cancelled { partial: Option<SParameterSet> },
}

/// Runs a [`SweepPlan`] segment by segment against one connection.
#[derive(Debug)]
pub struct SweepController {
    max_retries: u32,
    state: SweepState,
}

impl SweepController {
    pub fn new(max_retries: u32) -> Self {
        SweepController {
            max_retries,
            state: SweepState::Idle,
        }
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Acquires every segment of `plan`, `averages` times over.
    ///
    /// A segment that still fails after `max_retries` retries aborts the whole
    /// sweep with [`Error::SweepAborted`]; no partial data is returned in that
    /// case. Errors that retrying cannot fix abort on the first occurrence.
    /// The reported `points_acquired` counts every point read so far, across
    /// all averaging passes.
    pub fn run<T: Transport>(
        &mut self,
        conn: &mut Connection<T>,
        plan: &SweepPlan,
        cancel: &CancelToken,
        policy: CancelPolicy,
    ) -> Result<SweepOutcome> {
        let segments = plan.segments();
        let averages = plan.request().averages.max(1);
        let mut average = Average::default();

        for pass in 0..averages {
            let mut points: Vec<FrequencyPoint> = Vec::with_capacity(plan.total_points());
            for (index, segment) in segments.iter().enumerate() {
                if cancel.is_cancelled() {
                    self.state = SweepState::Idle;
                    info!(
                        segment = index + 1,
                        segments = segments.len(),
                        pass = pass + 1,
                        "Sweep cancelled"
                    );
                    return self.cancelled(policy, &average, &points);
                }
                let acquired = pass * plan.total_points() + points.len();
                let records = self.acquire(conn, index, segment, segments.len(), acquired)?;
                points.extend(records);
            }
            average.add(&points)?;
            debug!(pass = pass + 1, averages, points = points.len(), "Sweep pass complete");
        }

        self.state = SweepState::Idle;
        let set = average.finish()?;
        info!(
            points = set.len(),
            segments = segments.len(),
            averages,
            start = set.sweep().start(),
            stop = set.sweep().stop(),
            "Sweep complete"
        );
        Ok(SweepOutcome::Complete(set))
    }

    fn acquire<T: Transport>(
        &mut self,
        conn: &mut Connection<T>,
        index: usize,
        segment: &Segment,
        segments: usize,
        points_acquired: usize,
    ) -> Result<Vec<FrequencyPoint>> {
        let mut attempt = 0;
        loop {
            self.state = SweepState::RequestingSegment;
            let result = conn
                .request_segment(segment.start, segment.stop, segment.points)
                .and_then(|request| {
                    self.state = SweepState::AwaitingData;
                    conn.await_segment(request)
                });
            match result {
                Ok(records) => return Ok(records),
                Err(e) if e.is_recoverable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        segment = index + 1,
                        segments,
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "Segment failed, retrying"
                    );
                }
                Err(e) => {
                    self.state = SweepState::Aborted;
                    warn!(segment = index + 1, segments, error = %e, "Sweep aborted");
                    return Err(Error::SweepAborted {
                        segment: index + 1,
                        segments,
                        points_acquired,
                        source: Box::new(e),
                    });
                }
            }
        }
    }

    fn cancelled(
        &self,
        policy: CancelPolicy,
        average: &Average,
        points: &[FrequencyPoint],
    ) -> Result<SweepOutcome> {
        let partial = match policy {
            CancelPolicy::Discard => None,
            CancelPolicy::ReturnPartial if average.passes > 0 => Some(average.finish()?),
            CancelPolicy::ReturnPartial if !points.is_empty() => {
                Some(SParameterSet::from_points(points, DataState::Raw)?)
            }
            CancelPolicy::ReturnPartial => None,
        };
        Ok(SweepOutcome::Cancelled { partial })
    }
}

impl Default for SweepController {
    fn default() -> Self {
        SweepController::new(3)
    }
}

/// Point-wise running sum of complete sweep passes.
#[derive(Debug, Default)]
struct Average {
    freqs: Vec<u64>,
    s11: Vec<Complex<f64>>,
    s21: Option<Vec<Complex<f64>>>,
    passes: usize,
}

impl Average {
    fn add(&mut self, points: &[FrequencyPoint]) -> Result<()> {
        if self.passes == 0 {
            self.freqs = points.iter().map(|p| p.freq).collect();
            self.s11 = points.iter().map(|p| p.s11).collect();
            self.s21 = points.iter().map(|p| p.s21).collect();
            self.passes = 1;
            return Ok(());
        }
        if points.len() != self.freqs.len()
            || points.iter().zip(&self.freqs).any(|(p, &f)| p.freq != f)
        {
            return Err(Error::Protocol(
                "frequencies changed between averaged sweeps".into(),
            ));
        }
        for (sum, point) in self.s11.iter_mut().zip(points) {
            *sum += point.s11;
        }
        match (&mut self.s21, points.iter().map(|p| p.s21).collect::<Option<Vec<_>>>()) {
            (Some(sums), Some(values)) => {
                for (sum, value) in sums.iter_mut().zip(values) {
                    *sum += value;
                }
            }
            (s21, _) => *s21 = None,
        }
        self.passes += 1;
        Ok(())
    }

    fn finish(&self) -> Result<SParameterSet> {
        let n = self.passes as f64;
        let points: Vec<FrequencyPoint> = match &self.s21 {
            Some(s21) => izip!(&self.freqs, &self.s11, s21)
                .map(|(&freq, &s11, &s21)| FrequencyPoint {
                    freq,
                    s11: s11 / n,
                    s21: Some(s21 / n),
                })
                .collect(),
            None => izip!(&self.freqs, &self.s11)
                .map(|(&freq, &s11)| FrequencyPoint {
                    freq,
                    s11: s11 / n,
                    s21: None,
                })
                .collect(),
        };
        SParameterSet::from_points(&points, DataState::Raw)
    }
}
