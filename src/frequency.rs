use std::fmt;
use std::ops::Mul;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::result::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FreqUnit {
    Hz,
    KHz,
    MHz,
    GHz,
    THz,
}

impl FreqUnit {
    /// Hz per one of this unit.
    pub fn multiplier(self) -> f64 {
        self * 1.
    }

    /// Frequency in this unit for a value given in Hz.
    pub fn from_hz(self, hz: u64) -> f64 {
        hz as f64 / self.multiplier()
    }

    /// Value in this unit converted to whole Hz.
    pub fn to_hz(self, value: f64) -> Option<u64> {
        let hz = (self * value).round();
        if hz.is_finite() && hz >= 0. && hz <= u64::MAX as f64 {
            Some(hz as u64)
        } else {
            None
        }
    }
}

impl FromStr for FreqUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use FreqUnit::*;
        match s.to_ascii_lowercase().as_str() {
            "hz" => Ok(Hz),
            "khz" => Ok(KHz),
            "mhz" => Ok(MHz),
            "ghz" => Ok(GHz),
            "thz" => Ok(THz),
            other => Err(Error::InvalidSweep(format!("unknown frequency unit '{}'", other))),
        }
    }
}

impl fmt::Display for FreqUnit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use FreqUnit::*;
        let s = match self {
            Hz => "HZ",
            KHz => "KHZ",
            MHz => "MHZ",
            GHz => "GHZ",
            THz => "THZ",
        };
        f.write_str(s)
    }
}

impl Mul<f64> for FreqUnit {
    type Output = f64;

    fn mul(self, rhs: f64) -> f64 {
        use FreqUnit::*;
        match self {
            Hz => rhs,
            KHz => 1e3 * rhs,
            MHz => 1e6 * rhs,
            GHz => 1e9 * rhs,
            THz => 1e12 * rhs,
        }
    }
}

/// How points are distributed across a requested span.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepSpacing {
    #[default]
    Linear,
    /// Segment boundaries follow a logarithmic grid; points inside a segment are linear.
    Logarithmic,
}

/// Represents a requested frequency band
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FrequencyRange {
    pub start: u64,
    pub stop: u64,
    pub npoints: usize,
    #[serde(default)]
    pub spacing: SweepSpacing,
}

impl FrequencyRange {
    pub fn new(start: u64, stop: u64, npoints: usize, spacing: SweepSpacing) -> Result<Self, Error> {
        if npoints == 0 {
            return Err(Error::InvalidSweep("point count must be > 0".into()));
        }
        if start > stop {
            return Err(Error::InvalidSweep(format!(
                "start {} Hz is above stop {} Hz",
                start, stop
            )));
        }
        if npoints > 1 && stop - start < (npoints - 1) as u64 {
            return Err(Error::InvalidSweep(format!(
                "{} points do not fit in a {} Hz span",
                npoints,
                stop - start
            )));
        }
        if spacing == SweepSpacing::Logarithmic && start == 0 {
            return Err(Error::InvalidSweep(
                "logarithmic sweeps cannot start at 0 Hz".into(),
            ));
        }
        Ok(FrequencyRange {
            start,
            stop,
            npoints,
            spacing,
        })
    }

    /// Frequency of point `index` on the global grid.
    pub fn point(&self, index: usize) -> u64 {
        match self.spacing {
            SweepSpacing::Linear => linear_point(self.start, self.stop, self.npoints, index),
            SweepSpacing::Logarithmic => {
                if self.npoints < 2 {
                    return self.start;
                }
                let ratio = self.stop as f64 / self.start as f64;
                let exponent = index as f64 / (self.npoints - 1) as f64;
                let f = (self.start as f64 * ratio.powf(exponent)).round() as u64;
                f.clamp(self.start, self.stop)
            }
        }
    }
}

/// `index`-th point of an evenly spaced grid, in integer Hz.
///
/// Matches the firmware's own step computation so frequencies reported by the
/// device and frequencies planned here agree exactly.
pub fn linear_point(start: u64, stop: u64, npoints: usize, index: usize) -> u64 {
    if npoints < 2 {
        return start;
    }
    let span = (stop - start) as u128;
    start + (span * index as u128 / (npoints - 1) as u128) as u64
}

/// Parses a frequency such as `915000`, `1.5MHz` or `2.4 ghz` into Hz.
pub fn parse_frequency(text: &str) -> Result<u64, Error> {
    let text = text.trim();
    let split = text
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(text.len());
    let (value, unit) = text.split_at(split);
    let unit = match unit.trim() {
        "" => FreqUnit::Hz,
        unit => unit.parse()?,
    };
    value
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(|value| unit.to_hz(value))
        .ok_or_else(|| Error::InvalidSweep(format!("invalid frequency '{}'", text)))
}

pub fn linear_grid(start: u64, stop: u64, npoints: usize) -> Vec<u64> {
    (0..npoints)
        .map(|i| linear_point(start, stop, npoints, i))
        .collect()
}
