//! SOL / SOLT error correction.
//!
//! A [`Calibrator`] collects raw measurements of the reference standards and
//! turns them into an immutable [`CalibrationModel`]. The recorded standards
//! are released as soon as the model exists; only the error terms are kept.
//!
//! For every frequency the one-port error box
//!
//! ```text
//! Γm = e00 + e10e01·Γ / (1 − e11·Γ)
//! ```
//!
//! is rewritten as the linear system `e00 + Γ·Γm·e11 − Γ·Δe = Γm` with
//! `Δe = e00·e11 − e10e01`, one row per standard, and solved in closed form.

mod file;
mod model;
mod standard;

use std::collections::BTreeMap;

use num::complex::Complex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use self::file::CalibrationFile;
pub use self::model::{CalibrationModel, InterpolationPolicy, ReflectionTerms, TransmissionTerms};
pub use self::standard::{
    LoadModel, OpenModel, ShortModel, Standard, StandardKind, ThroughModel, STANDARD_Z0,
};
use crate::network::{DataState, SParam, SParameterSet};
use crate::result::{Error, Result};

/// Magnitude below which a correction denominator is treated as zero.
pub const DEGENERATE_EPSILON: f64 = 1e-12;

type C64 = Complex<f64>;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationClass {
    /// Short, open, load on port 1.
    #[default]
    OnePort,
    /// One-port terms plus through and isolation for forward transmission.
    TwoPort,
}

impl CalibrationClass {
    pub fn required(self) -> &'static [StandardKind] {
        match self {
            CalibrationClass::OnePort => &[StandardKind::Open, StandardKind::Short, StandardKind::Load],
            CalibrationClass::TwoPort => &[
                StandardKind::Open,
                StandardKind::Short,
                StandardKind::Load,
                StandardKind::Through,
                StandardKind::Isolation,
            ],
        }
    }
}

/// Accumulates standard measurements for one calibration run.
#[derive(Debug, Default)]
pub struct Calibrator {
    class: CalibrationClass,
    recorded: BTreeMap<StandardKind, (Standard, SParameterSet)>,
}

impl Calibrator {
    pub fn new(class: CalibrationClass) -> Self {
        Calibrator {
            class,
            recorded: BTreeMap::new(),
        }
    }

    pub fn class(&self) -> CalibrationClass {
        self.class
    }

    /// Stores the raw response of `standard`, replacing an earlier one of the same kind.
    pub fn record_standard(&mut self, standard: Standard, raw: SParameterSet) -> Result<()> {
        if raw.state() == DataState::Corrected {
            return Err(Error::AlreadyCorrected);
        }
        let needed = match standard.kind() {
            StandardKind::Through | StandardKind::Isolation => SParam::S21,
            _ => SParam::S11,
        };
        if raw.get(needed).is_none() {
            return Err(Error::MissingParameter(needed));
        }
        debug!(standard = ?standard.kind(), points = raw.len(), "Recorded calibration standard");
        self.recorded.insert(standard.kind(), (standard, raw));
        Ok(())
    }

    pub fn is_recorded(&self, kind: StandardKind) -> bool {
        self.recorded.contains_key(&kind)
    }

    /// Standards still needed before [`Calibrator::compute_model`] can succeed.
    pub fn missing(&self) -> Vec<StandardKind> {
        self.class
            .required()
            .iter()
            .copied()
            .filter(|kind| !self.recorded.contains_key(kind))
            .collect()
    }

    /// Solves the error model at every frequency.
    ///
    /// On success the recorded standards are discarded. On failure they are
    /// kept so a single bad standard can be re-measured.
    pub fn compute_model(&mut self) -> Result<CalibrationModel> {
        let missing = self.missing();
        if !missing.is_empty() {
            return Err(Error::IncompleteCalibration { missing });
        }

        let (_, reference) = &self.recorded[&StandardKind::Open];
        let sweep = reference.sweep().clone();
        for (_, raw) in self.recorded.values() {
            if raw.sweep() != &sweep {
                let frequency = raw
                    .freqs()
                    .iter()
                    .zip(sweep.freqs())
                    .find(|(a, b)| a != b)
                    .map_or_else(|| raw.sweep().stop().max(sweep.stop()), |(a, _)| *a);
                return Err(Error::FrequencyMismatch { frequency });
            }
        }

        let open = self.reflection(StandardKind::Open);
        let short = self.reflection(StandardKind::Short);
        let load = self.reflection(StandardKind::Load);

        let mut reflection = Vec::with_capacity(sweep.len());
        for (i, &freq) in sweep.freqs().iter().enumerate() {
            let rows = [
                (short.0.gamma(freq), short.1[i]),
                (open.0.gamma(freq), open.1[i]),
                (load.0.gamma(freq), load.1[i]),
            ];
            reflection.push(solve_one_port(rows, freq)?);
        }

        let transmission = match self.class {
            CalibrationClass::OnePort => None,
            CalibrationClass::TwoPort => Some(self.transmission_terms(&reflection)?),
        };

        let standards = self.recorded.values().map(|(s, _)| *s).collect();
        let model =
            CalibrationModel::new(self.class, sweep, standards, reflection, transmission)?;
        self.recorded.clear();
        info!(
            class = ?model.class(),
            points = model.sweep().len(),
            start = model.sweep().start(),
            stop = model.sweep().stop(),
            "Calibration model computed"
        );
        Ok(model)
    }

    fn reflection(&self, kind: StandardKind) -> (Standard, Vec<C64>) {
        self.trace(kind, SParam::S11)
    }

    fn trace(&self, kind: StandardKind, param: SParam) -> (Standard, Vec<C64>) {
        let (standard, raw) = &self.recorded[&kind];
        let values = raw.get(param).map(|v| v.to_vec()).unwrap_or_default();
        (*standard, values)
    }

    fn transmission_terms(&self, reflection: &[ReflectionTerms]) -> Result<Vec<TransmissionTerms>> {
        let (through, thru_s21) = self.trace(StandardKind::Through, SParam::S21);
        let (_, isolation) = self.trace(StandardKind::Isolation, SParam::S21);
        let thru_reflect = self
            .recorded
            .get(&StandardKind::ThroughReflect)
            .and_then(|(_, raw)| raw.s11())
            .map(|v| v.to_vec());

        let (_, reference) = &self.recorded[&StandardKind::Through];
        let mut terms = Vec::with_capacity(reflection.len());
        for (i, &freq) in reference.freqs().iter().enumerate() {
            let gt = through.gamma(freq);
            let gt2 = gt * gt;
            if gt.norm() < DEGENERATE_EPSILON {
                return Err(Error::CalibrationDegenerate { frequency: freq });
            }
            let e30 = isolation[i];
            let e22 = match &thru_reflect {
                Some(values) => reflection[i].correct(values[i], freq)? / gt2,
                None => C64::new(0., 0.),
            };
            let e10e32 = (thru_s21[i] - e30) * (C64::new(1., 0.) - reflection[i].e11 * e22 * gt2) / gt;
            if e10e32.norm() < DEGENERATE_EPSILON {
                return Err(Error::CalibrationDegenerate { frequency: freq });
            }
            terms.push(TransmissionTerms { e30, e22, e10e32 });
        }
        Ok(terms)
    }
}

/// Closed-form solution of the one-port error box from three `(Γ, Γm)` pairs.
fn solve_one_port(rows: [(C64, C64); 3], freq: u64) -> Result<ReflectionTerms> {
    let one = C64::new(1., 0.);
    let matrix = rows.map(|(g, gm)| [one, g * gm, -g]);
    let rhs = rows.map(|(_, gm)| gm);

    let det = det3(&matrix);
    if det.norm() < DEGENERATE_EPSILON {
        return Err(Error::CalibrationDegenerate { frequency: freq });
    }
    let solve = |column: usize| {
        let mut m = matrix;
        for (row, value) in m.iter_mut().zip(rhs.iter()) {
            row[column] = *value;
        }
        det3(&m) / det
    };
    Ok(ReflectionTerms {
        e00: solve(0),
        e11: solve(1),
        delta_e: solve(2),
    })
}

fn det3(m: &[[C64; 3]; 3]) -> C64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}
