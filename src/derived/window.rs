use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::result::Error;

/// Taper applied to the spectrum before the inverse FFT.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "beta", rename_all = "lowercase")]
pub enum Window {
    #[default]
    Hann,
    Blackman,
    /// Kaiser window with shape parameter β; 0 is rectangular, larger values
    /// trade resolution for lower sidelobes.
    Kaiser(f64),
}

impl Window {
    /// Symmetric window of length `len`.
    pub fn coefficients(&self, len: usize) -> Vec<f64> {
        if len == 1 {
            return vec![1.];
        }
        let m = (len - 1) as f64;
        (0..len)
            .map(|i| {
                let x = i as f64;
                match *self {
                    Window::Hann => 0.5 - 0.5 * (2. * PI * x / m).cos(),
                    Window::Blackman => {
                        0.42 - 0.5 * (2. * PI * x / m).cos() + 0.08 * (4. * PI * x / m).cos()
                    }
                    Window::Kaiser(beta) => {
                        let r = 2. * x / m - 1.;
                        bessel_i0(beta * (1. - r * r).max(0.).sqrt()) / bessel_i0(beta)
                    }
                }
            })
            .collect()
    }

    /// Amplitude lost to the taper: approximately the sum of the coefficients.
    pub fn correction(&self, len: usize) -> f64 {
        match self {
            Window::Hann => len as f64 / 2.,
            Window::Blackman => len as f64 * 0.42,
            Window::Kaiser(_) => self.coefficients(len).iter().sum(),
        }
    }
}

/// Modified Bessel function of the first kind, order zero.
fn bessel_i0(x: f64) -> f64 {
    let quarter_x2 = x * x / 4.;
    let mut term = 1.;
    let mut sum = 1.;
    for k in 1..500 {
        term *= quarter_x2 / (k * k) as f64;
        sum += term;
        if term < sum * 1e-17 {
            break;
        }
    }
    sum
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Window::Hann => write!(f, "hann"),
            Window::Blackman => write!(f, "blackman"),
            Window::Kaiser(beta) => write!(f, "kaiser:{}", beta),
        }
    }
}

/// Parses `hann`, `blackman`, `kaiser` (β = 6) or `kaiser:<β>`.
impl FromStr for Window {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let (name, arg) = match lower.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (lower.as_str(), None),
        };
        match (name, arg) {
            ("hann" | "hanning", None) => Ok(Window::Hann),
            ("blackman", None) => Ok(Window::Blackman),
            ("kaiser", None) => Ok(Window::Kaiser(6.)),
            ("kaiser", Some(beta)) => beta
                .parse::<f64>()
                .ok()
                .filter(|b| b.is_finite() && *b >= 0.)
                .map(Window::Kaiser)
                .ok_or_else(|| Error::InvalidSweep(format!("invalid Kaiser beta '{}'", beta))),
            _ => Err(Error::InvalidSweep(format!("unknown window '{}'", s))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_hann_endpoints() {
        let w = Window::Hann.coefficients(5);
        assert_eq!(w.len(), 5);
        assert!(w[0].abs() < 1e-15);
        assert!((w[2] - 1.).abs() < 1e-15);
        assert!((w[1] - 0.5).abs() < 1e-15);
    }

    #[test]
    fn test_kaiser() {
        // β = 0 is rectangular
        assert!(Window::Kaiser(0.).coefficients(7).iter().all(|v| (v - 1.).abs() < 1e-15));
        let w = Window::Kaiser(6.).coefficients(9);
        assert!((w[4] - 1.).abs() < 1e-12);
        assert!((w[0] - 1. / bessel_i0(6.)).abs() < 1e-12);
        assert!((w[1] - w[7]).abs() < 1e-12);
        assert!(Window::Kaiser(100.).coefficients(11)[0] < 1e-30);
    }

    #[test]
    fn test_bessel() {
        assert_eq!(bessel_i0(0.), 1.);
        assert!((bessel_i0(1.) - 1.2660658777520082).abs() < 1e-14);
    }

    #[test]
    fn test_parse() {
        assert_eq!("Hann".parse::<Window>().unwrap(), Window::Hann);
        assert_eq!("kaiser".parse::<Window>().unwrap(), Window::Kaiser(6.));
        assert_eq!("kaiser:13".parse::<Window>().unwrap(), Window::Kaiser(13.));
        assert!("kaiser:-1".parse::<Window>().is_err());
        assert!("triangle".parse::<Window>().is_err());
        assert_eq!(Window::Kaiser(13.).to_string(), "kaiser:13");
    }
}
