use num::complex::Complex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::standard::Standard;
use super::{CalibrationClass, DEGENERATE_EPSILON};
use crate::network::{DataState, SParam, SParameterSet, Sweep};
use crate::result::{Error, Result};

/// How a frequency that is not one of the calibrated points is handled.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationPolicy {
    /// Only calibrated frequencies are accepted.
    #[default]
    Exact,
    /// Error terms are interpolated linearly (in the complex plane) between
    /// the two nearest calibrated frequencies. Frequencies outside the
    /// calibrated range are still rejected.
    Linear,
}

/// Three-term one-port error model at one frequency.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReflectionTerms {
    /// Directivity.
    pub e00: Complex<f64>,
    /// Source match.
    pub e11: Complex<f64>,
    /// `e00·e11 − e10e01`.
    pub delta_e: Complex<f64>,
}

impl ReflectionTerms {
    /// Reflection tracking.
    pub fn e10e01(&self) -> Complex<f64> {
        self.e00 * self.e11 - self.delta_e
    }

    /// Inverse of the error box: `Γ = (Γm − e00) / (Γm·e11 − Δe)`.
    pub fn correct(&self, measured: Complex<f64>, freq: u64) -> Result<Complex<f64>> {
        let denominator = measured * self.e11 - self.delta_e;
        if denominator.norm() < DEGENERATE_EPSILON {
            return Err(Error::CalibrationDegenerate { frequency: freq });
        }
        Ok((measured - self.e00) / denominator)
    }

    fn lerp(&self, other: &Self, t: f64) -> Self {
        ReflectionTerms {
            e00: lerp(self.e00, other.e00, t),
            e11: lerp(self.e11, other.e11, t),
            delta_e: lerp(self.delta_e, other.delta_e, t),
        }
    }
}

/// Forward transmission terms of the one-path two-port model.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransmissionTerms {
    /// Isolation (leakage).
    pub e30: Complex<f64>,
    /// Port-2 load match.
    pub e22: Complex<f64>,
    /// Transmission tracking.
    pub e10e32: Complex<f64>,
}

impl TransmissionTerms {
    /// Corrects a forward `(S11m, S21m)` pair.
    ///
    /// Only the forward path is measured, so the device is taken to be
    /// reciprocal and symmetric (`S12 = S21`, `S22 = S11`). With `g` the
    /// one-port corrected input reflection and `u = (S21m − e30)/e10e32 · (1 − e11·g)`:
    ///
    /// ```text
    /// D   = (1 − e22·g) / (1 − e22²·u²)
    /// S21 = u·D
    /// S11 = g − e22·u²·D
    /// ```
    ///
    /// which removes the load-match reflection from both parameters. With
    /// `e22 = 0` this is the enhanced-response correction.
    pub fn correct(
        &self,
        reflection: &ReflectionTerms,
        s11_measured: Complex<f64>,
        s21_measured: Complex<f64>,
        freq: u64,
    ) -> Result<(Complex<f64>, Complex<f64>)> {
        let one = Complex::new(1., 0.);
        let g = reflection.correct(s11_measured, freq)?;
        let u = (s21_measured - self.e30) / self.e10e32 * (one - reflection.e11 * g);
        let denominator = one - self.e22 * self.e22 * u * u;
        if denominator.norm() < DEGENERATE_EPSILON {
            return Err(Error::CalibrationDegenerate { frequency: freq });
        }
        let d = (one - self.e22 * g) / denominator;
        Ok((g - self.e22 * u * u * d, u * d))
    }

    fn lerp(&self, other: &Self, t: f64) -> Self {
        TransmissionTerms {
            e30: lerp(self.e30, other.e30, t),
            e22: lerp(self.e22, other.e22, t),
            e10e32: lerp(self.e10e32, other.e10e32, t),
        }
    }
}

fn lerp(a: Complex<f64>, b: Complex<f64>, t: f64) -> Complex<f64> {
    a + (b - a) * t
}

/// Per-frequency error correction computed from measured standards.
///
/// A model never changes after it is built; every correction takes it by
/// shared reference, so several models can be kept side by side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationModel {
    class: CalibrationClass,
    sweep: Sweep,
    standards: Vec<Standard>,
    reflection: Vec<ReflectionTerms>,
    transmission: Option<Vec<TransmissionTerms>>,
}

impl CalibrationModel {
    pub(crate) fn new(
        class: CalibrationClass,
        sweep: Sweep,
        standards: Vec<Standard>,
        reflection: Vec<ReflectionTerms>,
        transmission: Option<Vec<TransmissionTerms>>,
    ) -> Result<Self> {
        let model = CalibrationModel {
            class,
            sweep,
            standards,
            reflection,
            transmission,
        };
        model.validate()?;
        Ok(model)
    }

    /// Checks the shape of a model, e.g. one read back from disk.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.reflection.len() != self.sweep.len() {
            return Err(Error::LengthMismatch {
                label: "reflection terms".into(),
                expected: self.sweep.len(),
                actual: self.reflection.len(),
            });
        }
        match (&self.class, &self.transmission) {
            (CalibrationClass::OnePort, Some(t)) => Err(Error::LengthMismatch {
                label: "transmission terms of a one-port model".into(),
                expected: 0,
                actual: t.len(),
            }),
            (CalibrationClass::TwoPort, Some(t)) if t.len() != self.sweep.len() => {
                Err(Error::LengthMismatch {
                    label: "transmission terms".into(),
                    expected: self.sweep.len(),
                    actual: t.len(),
                })
            }
            (CalibrationClass::TwoPort, None) => Err(Error::IncompleteCalibration {
                missing: CalibrationClass::TwoPort.required().to_vec(),
            }),
            _ => Ok(()),
        }
    }

    pub fn class(&self) -> CalibrationClass {
        self.class
    }

    pub fn sweep(&self) -> &Sweep {
        &self.sweep
    }

    pub fn standards(&self) -> &[Standard] {
        &self.standards
    }

    pub fn reflection_terms(&self) -> &[ReflectionTerms] {
        &self.reflection
    }

    pub fn transmission_terms(&self) -> Option<&[TransmissionTerms]> {
        self.transmission.as_deref()
    }

    /// Whether every frequency of `sweep` can be corrected under `policy`.
    ///
    /// A model that is no longer compatible with the active sweep (range or
    /// point count changed) should be discarded by its owner.
    pub fn is_compatible_with(&self, sweep: &Sweep, policy: InterpolationPolicy) -> bool {
        match policy {
            InterpolationPolicy::Exact => sweep
                .freqs()
                .iter()
                .all(|&f| self.sweep.index_of(f).is_some()),
            InterpolationPolicy::Linear => {
                sweep.start() >= self.sweep.start() && sweep.stop() <= self.sweep.stop()
            }
        }
    }

    /// Error terms at `freq` according to `policy`.
    pub fn terms_at(
        &self,
        freq: u64,
        policy: InterpolationPolicy,
    ) -> Result<(ReflectionTerms, Option<TransmissionTerms>)> {
        if let Some(i) = self.sweep.index_of(freq) {
            return Ok((
                self.reflection[i],
                self.transmission.as_ref().map(|t| t[i]),
            ));
        }
        if policy == InterpolationPolicy::Exact
            || freq < self.sweep.start()
            || freq > self.sweep.stop()
        {
            return Err(Error::FrequencyMismatch { frequency: freq });
        }

        // freq lies strictly between two calibrated points
        let freqs = self.sweep.freqs();
        let upper = freqs.partition_point(|&f| f < freq);
        let lower = upper - 1;
        let t = (freq - freqs[lower]) as f64 / (freqs[upper] - freqs[lower]) as f64;
        Ok((
            self.reflection[lower].lerp(&self.reflection[upper], t),
            self.transmission
                .as_ref()
                .map(|tx| tx[lower].lerp(&tx[upper], t)),
        ))
    }

    /// Corrects a raw data set.
    ///
    /// Corrected data is not a valid input: calling this on a set whose
    /// state is [`DataState::Corrected`] fails with [`Error::AlreadyCorrected`].
    /// S21 is corrected only by a two-port model; a one-port model drops it
    /// from the result rather than passing raw values through.
    pub fn apply(&self, raw: &SParameterSet, policy: InterpolationPolicy) -> Result<SParameterSet> {
        if raw.state() == DataState::Corrected {
            return Err(Error::AlreadyCorrected);
        }
        let s11_raw = raw.s11().ok_or(Error::MissingParameter(SParam::S11))?;
        let s21_raw = raw.s21().filter(|_| self.transmission.is_some());
        if raw.s21().is_some() && s21_raw.is_none() {
            debug!("One-port calibration active, S21 is dropped from corrected data");
        }

        let mut s11 = Vec::with_capacity(raw.len());
        let mut s21 = Vec::with_capacity(raw.len());
        for (i, &freq) in raw.freqs().iter().enumerate() {
            let (reflection, transmission) = self.terms_at(freq, policy)?;
            match (s21_raw, transmission) {
                (Some(measured), Some(terms)) => {
                    let (gamma, gain) = terms.correct(&reflection, s11_raw[i], measured[i], freq)?;
                    s11.push(gamma);
                    s21.push(gain);
                }
                _ => s11.push(reflection.correct(s11_raw[i], freq)?),
            }
        }

        let mut corrected = SParameterSet::new(raw.sweep().clone(), DataState::Corrected)
            .with_z0(raw.z0())
            .with_param(SParam::S11, s11)?;
        if s21_raw.is_some() {
            corrected = corrected.with_param(SParam::S21, s21)?;
        }
        Ok(corrected)
    }
}
