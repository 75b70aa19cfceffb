//! Engineering quantities computed from S-parameters.
//!
//! All functions are pure. Degenerate inputs produce sentinels rather than
//! errors: an infinite VSWR for a full reflection, `None` for the impedance of
//! an open circuit.

pub mod tdr;
mod window;

use std::f64::consts::PI;

use itertools::Itertools;
use num::complex::Complex;

pub use self::tdr::{analyze, TdrConfig, TdrMode, TdrResult};
pub use self::window::Window;
use crate::result::{Error, Result};

/// `|1 − Γ|` below which the impedance is treated as infinite.
pub const OPEN_EPSILON: f64 = 1e-12;

/// Voltage standing wave ratio, `(1 + |Γ|) / (1 − |Γ|)`.
pub fn vswr(s11: Complex<f64>) -> f64 {
    let mag = s11.norm();
    if mag >= 1. {
        f64::INFINITY
    } else {
        (1. + mag) / (1. - mag)
    }
}

/// Input impedance `z0·(1 + Γ) / (1 − Γ)`, or `None` for an open circuit.
pub fn impedance(s11: Complex<f64>, z0: f64) -> Option<Complex<f64>> {
    let one = Complex::new(1., 0.);
    let denominator = one - s11;
    if denominator.norm() < OPEN_EPSILON {
        return None;
    }
    Some((one + s11) / denominator * z0)
}

/// `−20·log10|Γ|`; infinite for a perfect match.
pub fn return_loss_db(s11: Complex<f64>) -> f64 {
    let mag = s11.norm();
    if mag == 0. {
        f64::INFINITY
    } else {
        -20. * mag.log10()
    }
}

/// `20·log10|S21|`; `−∞` when nothing is transmitted.
pub fn s21_gain_db(s21: Complex<f64>) -> f64 {
    let mag = s21.norm();
    if mag == 0. {
        f64::NEG_INFINITY
    } else {
        20. * mag.log10()
    }
}

/// Phase in degrees, in `(−180, 180]`.
pub fn phase_deg(value: Complex<f64>) -> f64 {
    value.arg().to_degrees()
}

/// Reactive part of an impedance expressed as a series component.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SeriesEquivalent {
    /// Purely resistive (or measured at 0 Hz).
    Resistive,
    /// Farads.
    Capacitance(f64),
    /// Henries.
    Inductance(f64),
}

pub fn series_equivalent(z: Complex<f64>, freq: u64) -> SeriesEquivalent {
    let omega = 2. * PI * freq as f64;
    if freq == 0 || z.im == 0. {
        SeriesEquivalent::Resistive
    } else if z.im < 0. {
        SeriesEquivalent::Capacitance(-1. / (omega * z.im))
    } else {
        SeriesEquivalent::Inductance(z.im / omega)
    }
}

/// `|X| / R`; infinite for a pure reactance.
pub fn q_factor(z: Complex<f64>) -> f64 {
    if z.re == 0. {
        f64::INFINITY
    } else {
        (z.im / z.re).abs()
    }
}

/// Continuous phase in radians: jumps larger than π between neighbours are
/// taken as wraps.
pub fn unwrap_phase(values: &[Complex<f64>]) -> Vec<f64> {
    let mut unwrapped = Vec::with_capacity(values.len());
    let mut offset = 0.;
    if let Some(first) = values.first() {
        unwrapped.push(first.arg());
    }
    for (previous, current) in values.iter().tuple_windows() {
        let step = current.arg() - previous.arg();
        if step > PI {
            offset -= 2. * PI;
        } else if step < -PI {
            offset += 2. * PI;
        }
        unwrapped.push(current.arg() + offset);
    }
    unwrapped
}

/// Group delay `−dφ/dω` in seconds at every frequency.
///
/// Central differences inside the trace, one-sided differences at its ends.
pub fn group_delay(freqs: &[u64], values: &[Complex<f64>]) -> Result<Vec<f64>> {
    if freqs.len() != values.len() {
        return Err(Error::LengthMismatch {
            label: "group delay trace".into(),
            expected: freqs.len(),
            actual: values.len(),
        });
    }
    let n = values.len();
    if n < 2 {
        return Err(Error::InsufficientData {
            needed: 2,
            actual: n,
        });
    }
    let phase = unwrap_phase(values);
    let omega: Vec<f64> = freqs.iter().map(|&f| 2. * PI * f as f64).collect();
    let slope = |a: usize, b: usize| -(phase[b] - phase[a]) / (omega[b] - omega[a]);

    Ok((0..n)
        .map(|i| match i {
            0 => slope(0, 1),
            i if i == n - 1 => slope(n - 2, n - 1),
            i => slope(i - 1, i + 1),
        })
        .collect())
}
