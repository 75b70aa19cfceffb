//! Time-domain reflectometry from a swept S11 trace.
//!
//! The reflection spectrum is windowed, zero-padded and inverse transformed.
//! In lowpass mode the trace is assumed to start near DC and is mirrored into
//! negative frequencies, which makes the impulse response real and allows a
//! step response (and from it an impedance profile) to be formed. Bandpass
//! mode keeps the spectrum complex and only the impulse magnitude is known.

use num::complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::window::Window;
use crate::result::{Error, Result};

pub const SPEED_OF_LIGHT: f64 = 299_792_458.;

/// Nominal velocity factors of common coaxial cables.
pub const CABLE_VELOCITY_FACTORS: &[(&str, f64)] = &[
    ("Jelly filled", 0.64),
    ("Polyethylene", 0.66),
    ("PTFE (Teflon)", 0.70),
    ("Pulp insulation", 0.72),
    ("Foam or cellular PE", 0.78),
    ("Semi-solid PE (SSPE)", 0.84),
    ("Air (helical spacers)", 0.94),
    ("RG-6/U PE 75 Ω (Belden 8215)", 0.66),
    ("RG-6/U Foam 75 Ω (Belden 9290)", 0.81),
    ("RG-8/U PE 50 Ω (Belden 8237)", 0.66),
    ("RG-8/U Foam (Belden 8214)", 0.78),
    ("RG-8/U (Belden 9913)", 0.84),
    ("RG-8/U (Shireen RFC400 Low Loss)", 0.86),
    ("RG-8X (Belden 9258)", 0.82),
    ("RG-8X (Wireman Super 8 CQ106)", 0.81),
    ("RG-8X (Wireman MINI-8 Lo-Loss CQ118)", 0.82),
    ("RG-58 (Wireman CQ 58 Lo-Loss Flex CQ129FF)", 0.79),
    ("RG-11/U 75 Ω Foam HDPE (Belden 9292)", 0.84),
    ("RG-58/U 52 Ω PE (Belden 9201)", 0.66),
    ("RG-58A/U 54 Ω Foam (Belden 8219)", 0.73),
    ("RG-59A/U PE 75 Ω (Belden 8241)", 0.66),
    ("RG-59A/U Foam 75 Ω (Belden 8241F)", 0.78),
    ("RG-174 PE (Belden 8216)", 0.66),
    ("RG-174 Foam (Belden 7805R)", 0.735),
    ("RG-213/U PE (Belden 8267)", 0.66),
    ("RG316", 0.695),
    ("RG402", 0.695),
    ("LMR-240", 0.84),
    ("LMR-240UF", 0.80),
    ("LMR-400", 0.85),
    ("LMR-400UF", 0.83),
    ("Davis Bury-FLEX", 0.82),
];

/// Looks up a cable by case-insensitive substring of its name.
pub fn cable_velocity_factor(name: &str) -> Option<f64> {
    let needle = name.to_ascii_lowercase();
    CABLE_VELOCITY_FACTORS
        .iter()
        .find(|(cable, _)| cable.to_ascii_lowercase().contains(&needle))
        .map(|&(_, vf)| vf)
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TdrMode {
    #[default]
    Lowpass,
    Bandpass,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TdrConfig {
    pub mode: TdrMode,
    pub window: Window,
    pub velocity_factor: f64,
    /// Transform length after zero padding.
    pub fft_points: usize,
    /// Reference impedance for the step impedance profile.
    pub z0: f64,
}

impl Default for TdrConfig {
    fn default() -> Self {
        TdrConfig {
            mode: TdrMode::Lowpass,
            window: Window::Hann,
            velocity_factor: 0.66,
            fft_points: 8192,
            z0: 50.,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TdrResult {
    /// One-way distance in metres for every time bin, `t·c·vf` with `t` in `[0, 1/Δf]`.
    pub distance: Vec<f64>,
    /// Impulse response scaled back to reflection amplitude. Magnitude only in bandpass mode.
    pub impulse: Vec<f64>,
    /// Lowpass only: integrated impulse response.
    pub step: Option<Vec<f64>>,
    /// Lowpass only: `z0·(1+s)/(1−s)` of the step response.
    pub step_impedance: Option<Vec<f64>>,
    /// Index of the strongest impulse.
    pub peak_index: usize,
    /// Half the distance at the impulse peak, i.e. the length to the discontinuity.
    pub cable_length_m: f64,
}

/// Transforms a uniformly spaced S11 trace into the time domain.
pub fn analyze(freqs: &[u64], s11: &[Complex<f64>], config: &TdrConfig) -> Result<TdrResult> {
    if freqs.len() != s11.len() {
        return Err(Error::LengthMismatch {
            label: "S11".into(),
            expected: freqs.len(),
            actual: s11.len(),
        });
    }
    if s11.len() < 2 {
        return Err(Error::InsufficientData {
            needed: 2,
            actual: s11.len(),
        });
    }
    let step_hz = freqs[1].saturating_sub(freqs[0]);
    if step_hz == 0 {
        return Err(Error::InvalidSweep("TDR needs a non-zero frequency step".into()));
    }
    if !(config.velocity_factor > 0. && config.velocity_factor <= 1.) {
        return Err(Error::InvalidSweep(format!(
            "velocity factor {} outside (0, 1]",
            config.velocity_factor
        )));
    }

    let n = config.fft_points;
    let (impulse_raw, spectrum_len) = match config.mode {
        TdrMode::Lowpass => (lowpass_impulse(s11, config.window, n)?, 2 * s11.len() - 1),
        TdrMode::Bandpass => (bandpass_impulse(s11, config.window, n)?, s11.len()),
    };

    let peak_index = impulse_raw
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0;

    let scale = n as f64 / config.window.correction(spectrum_len);
    let impulse: Vec<f64> = impulse_raw.iter().map(|v| v * scale).collect();

    let (step, step_impedance) = match config.mode {
        TdrMode::Lowpass => {
            let step = step_response(&impulse_raw);
            let z = step
                .iter()
                .map(|&s| (config.z0 * (1. + s) / (1. - s)).abs())
                .collect();
            (Some(step), Some(z))
        }
        TdrMode::Bandpass => (None, None),
    };

    let time_span = 1. / step_hz as f64;
    let distance: Vec<f64> = (0..n)
        .map(|i| {
            let t = if n > 1 { time_span * i as f64 / (n - 1) as f64 } else { 0. };
            t * config.velocity_factor * SPEED_OF_LIGHT
        })
        .collect();
    let cable_length_m = distance[peak_index] / 2.;
    debug!(
        mode = ?config.mode,
        window = %config.window,
        points = s11.len(),
        fft_points = n,
        peak_index,
        cable_length_m,
        "TDR computed"
    );

    Ok(TdrResult {
        distance,
        impulse,
        step,
        step_impedance,
        peak_index,
        cable_length_m,
    })
}

/// Mirrors the spectrum into negative frequencies, windows it, centres it in
/// an `n`-point buffer and returns the real inverse transform.
fn lowpass_impulse(s11: &[Complex<f64>], window: Window, n: usize) -> Result<Vec<f64>> {
    let len = 2 * s11.len() - 1;
    if n < len + 1 {
        return Err(Error::InvalidSweep(format!(
            "{} FFT points cannot hold a {}-point mirrored spectrum",
            n, len
        )));
    }
    // negative frequencies first, DC in the middle
    let mirrored = s11[1..]
        .iter()
        .rev()
        .map(|v| v.conj())
        .chain(s11.iter().copied());
    let coefficients = window.coefficients(len);

    // DC lands on bin 0; positive frequencies follow, negative ones wrap to the end
    let mut buffer = vec![Complex::new(0., 0.); n];
    let half = s11.len() - 1;
    for (k, (value, w)) in mirrored.zip(coefficients).enumerate() {
        let offset = k as isize - half as isize;
        let bin = offset.rem_euclid(n as isize) as usize;
        buffer[bin] = value * w;
    }
    inverse_fft(&mut buffer);
    Ok(buffer.iter().map(|v| v.re).collect())
}

fn bandpass_impulse(s11: &[Complex<f64>], window: Window, n: usize) -> Result<Vec<f64>> {
    if n < s11.len() {
        return Err(Error::InvalidSweep(format!(
            "{} FFT points cannot hold {} samples",
            n,
            s11.len()
        )));
    }
    let mut buffer = vec![Complex::new(0., 0.); n];
    for ((slot, value), w) in buffer
        .iter_mut()
        .zip(s11)
        .zip(window.coefficients(s11.len()))
    {
        *slot = *value * w;
    }
    inverse_fft(&mut buffer);
    Ok(buffer.iter().map(|v| v.norm()).collect())
}

/// Normalized inverse FFT in place.
fn inverse_fft(buffer: &mut [Complex<f64>]) {
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_inverse(buffer.len());
    fft.process(buffer);
    let scale = 1. / buffer.len() as f64;
    for value in buffer.iter_mut() {
        *value *= scale;
    }
}

/// Running sum of the impulse response, plus the same sum taken from the end
/// of the buffer to fold back the part of the response that wrapped into
/// negative time.
fn step_response(impulse: &[f64]) -> Vec<f64> {
    let mut forward = 0.;
    let mut backward = 0.;
    impulse
        .iter()
        .zip(impulse.iter().rev())
        .map(|(&a, &b)| {
            forward += a;
            backward += b;
            forward + backward
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::PI;

    /// S11 of a lossless line of `length` metres ending in `gamma`.
    fn line(freqs: &[u64], length: f64, vf: f64, gamma: f64) -> Vec<Complex<f64>> {
        freqs
            .iter()
            .map(|&f| {
                let phase = -2. * 2. * PI * f as f64 * length / (vf * SPEED_OF_LIGHT);
                Complex::from_polar(gamma, phase)
            })
            .collect()
    }

    fn grid(step: u64, n: usize) -> Vec<u64> {
        (0..n as u64).map(|i| (i + 1) * step).collect()
    }

    #[test]
    fn lowpass_finds_open_end() {
        // lowpass needs a harmonic grid starting at (or near) DC
        let freqs: Vec<u64> = (0..201).map(|i| i * 3_000_000).collect();
        let s11 = line(&freqs, 10., 0.66, 1.);
        let result = analyze(&freqs, &s11, &TdrConfig::default()).unwrap();
        let resolution = result.distance[1] / 2.;
        assert!(
            (result.cable_length_m - 10.).abs() < 2. * resolution + 0.2,
            "{} m",
            result.cable_length_m
        );
        assert!(result.impulse[result.peak_index] > 0.5);
        assert!(result.step.is_some());
    }

    #[test]
    fn bandpass_short_is_positive_peak() {
        let freqs = grid(2_000_000, 301);
        let s11 = line(&freqs, 4.5, 0.8, -1.);
        let config = TdrConfig {
            mode: TdrMode::Bandpass,
            window: Window::Kaiser(6.),
            velocity_factor: 0.8,
            ..Default::default()
        };
        let result = analyze(&freqs, &s11, &config).unwrap();
        assert!((result.cable_length_m - 4.5).abs() < 0.2, "{} m", result.cable_length_m);
        assert!(result.step_impedance.is_none());
    }

    #[test]
    fn matched_line_has_nominal_impedance() {
        let freqs = grid(1_000_000, 101);
        let s11 = vec![Complex::new(0., 0.); 101];
        let result = analyze(&freqs, &s11, &TdrConfig::default()).unwrap();
        let z = result.step_impedance.unwrap();
        assert!((z[10] - 50.).abs() < 1e-9);
    }

    #[test]
    fn rejects_short_input() {
        let err = analyze(&[1], &[Complex::new(0., 0.)], &TdrConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InsufficientData { needed: 2, actual: 1 }));
        let freqs = grid(1_000_000, 101);
        let s11 = vec![Complex::new(0., 0.); 101];
        let config = TdrConfig {
            fft_points: 64,
            ..Default::default()
        };
        assert!(analyze(&freqs, &s11, &config).is_err());
    }

    #[test]
    fn velocity_table() {
        assert_eq!(cable_velocity_factor("lmr-400uf"), Some(0.83));
        assert_eq!(cable_velocity_factor("RG316"), Some(0.695));
        assert_eq!(cable_velocity_factor("unobtainium"), None);
    }
}
