//! Calibration standards and their ideal responses.
//!
//! A standard differs from another only by data: the reflection (or, for the
//! through, transmission) coefficient it is known to present at a given
//! frequency. Every model defaults to the ideal device.

use std::f64::consts::PI;

use num::complex::Complex;
use serde::{Deserialize, Serialize};

/// Reference impedance the standard definitions are expressed against.
pub const STANDARD_Z0: f64 = 50.;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StandardKind {
    Open,
    Short,
    Load,
    Through,
    Isolation,
    /// Port-1 reflection measured while the through is connected.
    ThroughReflect,
}

/// Open with a fringing-capacitance polynomial `C(f) = c0 + c1·f + c2·f² + c3·f³`.
///
/// Coefficients use the customary kit units: `c0` in fF, `c1` in 1e-27 F/Hz,
/// `c2` in 1e-36 F/Hz², `c3` in 1e-45 F/Hz³.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenModel {
    pub c0: f64,
    pub c1: f64,
    pub c2: f64,
    pub c3: f64,
    pub offset_delay_ps: f64,
}

/// Short with an inductance polynomial: `l0` in pH, `l1` in 1e-24 H/Hz,
/// `l2` in 1e-33 H/Hz², `l3` in 1e-42 H/Hz³.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShortModel {
    pub l0: f64,
    pub l1: f64,
    pub l2: f64,
    pub l3: f64,
    pub offset_delay_ps: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadModel {
    pub resistance: f64,
    pub inductance_ph: f64,
    pub capacitance_ff: f64,
    pub offset_delay_ps: f64,
}

impl Default for LoadModel {
    fn default() -> Self {
        LoadModel {
            resistance: STANDARD_Z0,
            inductance_ph: 0.,
            capacitance_ff: 0.,
            offset_delay_ps: 0.,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThroughModel {
    pub offset_delay_ps: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Standard {
    Open(OpenModel),
    Short(ShortModel),
    Load(LoadModel),
    Through(ThroughModel),
    Isolation,
    ThroughReflect,
}

impl Standard {
    pub fn ideal(kind: StandardKind) -> Self {
        match kind {
            StandardKind::Open => Standard::Open(OpenModel::default()),
            StandardKind::Short => Standard::Short(ShortModel::default()),
            StandardKind::Load => Standard::Load(LoadModel::default()),
            StandardKind::Through => Standard::Through(ThroughModel::default()),
            StandardKind::Isolation => Standard::Isolation,
            StandardKind::ThroughReflect => Standard::ThroughReflect,
        }
    }

    pub fn kind(&self) -> StandardKind {
        match self {
            Standard::Open(_) => StandardKind::Open,
            Standard::Short(_) => StandardKind::Short,
            Standard::Load(_) => StandardKind::Load,
            Standard::Through(_) => StandardKind::Through,
            Standard::Isolation => StandardKind::Isolation,
            Standard::ThroughReflect => StandardKind::ThroughReflect,
        }
    }

    /// Known response at `freq` Hz: reflection for one-port standards,
    /// transmission for the through, zero leakage for isolation.
    pub fn gamma(&self, freq: u64) -> Complex<f64> {
        let f = freq as f64;
        let omega = 2. * PI * f;
        match self {
            Standard::Open(m) => {
                let c = (m.c0 + m.c1 * 1e-12 * f + m.c2 * 1e-21 * f * f + m.c3 * 1e-30 * f * f * f)
                    * 1e-15;
                if omega * c == 0. {
                    return delay_factor(f, m.offset_delay_ps, 2.);
                }
                let z = Complex::new(0., -1. / (omega * c));
                reflection(z) * delay_factor(f, m.offset_delay_ps, 2.)
            }
            Standard::Short(m) => {
                let l = (m.l0 + m.l1 * 1e-12 * f + m.l2 * 1e-21 * f * f + m.l3 * 1e-30 * f * f * f)
                    * 1e-12;
                let z = Complex::new(0., omega * l);
                reflection(z) * delay_factor(f, m.offset_delay_ps, 2.)
            }
            Standard::Load(m) => {
                let jwl = Complex::new(0., omega * m.inductance_ph * 1e-12);
                let z = if m.capacitance_ff > 0. {
                    let r = Complex::new(m.resistance, 0.);
                    r / Complex::new(1., omega * m.resistance * m.capacitance_ff * 1e-15) + jwl
                } else {
                    Complex::new(m.resistance, 0.) + jwl
                };
                reflection(z) * delay_factor(f, m.offset_delay_ps, 2.)
            }
            Standard::Through(m) => delay_factor(f, m.offset_delay_ps, 1.),
            Standard::Isolation => Complex::new(0., 0.),
            Standard::ThroughReflect => Complex::new(0., 0.),
        }
    }
}

fn reflection(z: Complex<f64>) -> Complex<f64> {
    let zn = z / STANDARD_Z0;
    (zn - 1.) / (zn + 1.)
}

/// Phase rotation of an offset line traversed `passes` times.
fn delay_factor(f: f64, delay_ps: f64, passes: f64) -> Complex<f64> {
    Complex::new(0., -2. * PI * f * passes * delay_ps * 1e-12).exp()
}
