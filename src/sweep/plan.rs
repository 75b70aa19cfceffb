use serde::{Deserialize, Serialize};

use crate::frequency::{linear_grid, FrequencyRange};
use crate::result::{Error, Result};

/// A sweep as asked for by the caller.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepRequest {
    pub range: FrequencyRange,
    /// Full sweeps averaged point-wise into one result.
    pub averages: usize,
}

impl SweepRequest {
    pub fn new(range: FrequencyRange) -> Self {
        SweepRequest { range, averages: 1 }
    }

    pub fn with_averages(mut self, averages: usize) -> Self {
        self.averages = averages;
        self
    }
}

/// One device `scan`: a linear sweep the device performs on its own.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub start: u64,
    pub stop: u64,
    pub points: usize,
}

impl Segment {
    pub fn frequencies(&self) -> Vec<u64> {
        linear_grid(self.start, self.stop, self.points)
    }
}

/// A request split into device-sized segments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweepPlan {
    request: SweepRequest,
    segments: Vec<Segment>,
}

impl SweepPlan {
    /// Splits `request` into `⌈N/M⌉` contiguous segments of at most
    /// `max_points` each.
    ///
    /// Segment sizes differ by at most one point. Segment endpoints lie on the
    /// requested grid; the device fills in the points between them linearly.
    pub fn new(request: SweepRequest, max_points: usize) -> Result<Self> {
        if max_points == 0 {
            return Err(Error::InvalidSweep("device reports 0 points per sweep".into()));
        }
        if request.averages == 0 {
            return Err(Error::InvalidSweep("averages must be at least 1".into()));
        }
        let range = request.range;
        let total = range.npoints;
        let count = (total + max_points - 1) / max_points;
        let base = total / count;
        let extra = total % count;

        let mut segments = Vec::with_capacity(count);
        let mut first = 0;
        for index in 0..count {
            let points = base + usize::from(index < extra);
            let last = first + points - 1;
            let segment = Segment {
                start: range.point(first),
                stop: range.point(last),
                points,
            };
            if points > 1 && segment.stop - segment.start < (points - 1) as u64 {
                return Err(Error::InvalidSweep(format!(
                    "segment {} ({}..{} Hz) cannot hold {} distinct points",
                    index + 1,
                    segment.start,
                    segment.stop,
                    points
                )));
            }
            if let Some(previous) = segments.last().map(|s: &Segment| s.stop) {
                if segment.start <= previous {
                    return Err(Error::InvalidSweep(format!(
                        "segment {} starts at {} Hz, not above the previous stop {} Hz",
                        index + 1,
                        segment.start,
                        previous
                    )));
                }
            }
            segments.push(segment);
            first = last + 1;
        }

        Ok(SweepPlan { request, segments })
    }

    pub fn request(&self) -> &SweepRequest {
        &self.request
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn total_points(&self) -> usize {
        self.segments.iter().map(|s| s.points).sum()
    }

    /// Every frequency the plan will measure, in order.
    pub fn frequencies(&self) -> Vec<u64> {
        self.segments.iter().flat_map(Segment::frequencies).collect()
    }
}
