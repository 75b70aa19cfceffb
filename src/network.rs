use std::collections::BTreeMap;
use std::fmt;

use ndarray::prelude::*;
use num::complex::Complex;
use serde::{Deserialize, Serialize};

use crate::frequency::FrequencyRange;
use crate::result::{Error, Result};
use crate::CxArray1;

/// S-parameter labels, in Touchstone 2-port column order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SParam {
    S11,
    S21,
    S12,
    S22,
}

impl SParam {
    pub const ALL: [SParam; 4] = [SParam::S11, SParam::S21, SParam::S12, SParam::S22];

    pub fn is_reflection(self) -> bool {
        matches!(self, SParam::S11 | SParam::S22)
    }
}

impl fmt::Display for SParam {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Whether error correction has been applied to a data set.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataState {
    Raw,
    Corrected,
}

/// A single frequency with the complex readings taken there.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FrequencyPoint {
    pub freq: u64,
    pub s11: Complex<f64>,
    pub s21: Option<Complex<f64>>,
}

/// Ordered list of measured frequencies, strictly increasing and never empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u64>", into = "Vec<u64>")]
pub struct Sweep {
    freqs: Vec<u64>,
}

impl Sweep {
    pub fn new(freqs: Vec<u64>) -> Result<Self> {
        if freqs.is_empty() {
            return Err(Error::InvalidSweep("a sweep needs at least one point".into()));
        }
        if let Some(pair) = freqs.windows(2).find(|w| w[0] >= w[1]) {
            return Err(Error::InvalidSweep(format!(
                "frequencies must be strictly increasing ({} Hz followed by {} Hz)",
                pair[0], pair[1]
            )));
        }
        Ok(Sweep { freqs })
    }

    pub fn from_range(range: &FrequencyRange) -> Result<Self> {
        Sweep::new((0..range.npoints).map(|i| range.point(i)).collect())
    }

    pub fn freqs(&self) -> &[u64] {
        &self.freqs
    }

    pub fn len(&self) -> usize {
        self.freqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freqs.is_empty()
    }

    pub fn start(&self) -> u64 {
        self.freqs[0]
    }

    pub fn stop(&self) -> u64 {
        self.freqs[self.freqs.len() - 1]
    }

    /// Index of an exact frequency, if it is part of the sweep.
    pub fn index_of(&self, freq: u64) -> Option<usize> {
        self.freqs.binary_search(&freq).ok()
    }
}

impl TryFrom<Vec<u64>> for Sweep {
    type Error = Error;

    fn try_from(freqs: Vec<u64>) -> Result<Self> {
        Sweep::new(freqs)
    }
}

impl From<Sweep> for Vec<u64> {
    fn from(sweep: Sweep) -> Self {
        sweep.freqs
    }
}

/// Complex S-parameter traces aligned index-for-index with a [`Sweep`].
#[derive(Clone, Debug, PartialEq)]
pub struct SParameterSet {
    sweep: Sweep,
    params: BTreeMap<SParam, CxArray1>,
    z0: f64,
    state: DataState,
}

impl SParameterSet {
    pub fn new(sweep: Sweep, state: DataState) -> Self {
        SParameterSet {
            sweep,
            params: BTreeMap::new(),
            z0: 50.,
            state,
        }
    }

    /// Builds a one-port set from a frequency list and S11 values.
    pub fn one_port(freqs: Vec<u64>, s11: Vec<Complex<f64>>, state: DataState) -> Result<Self> {
        SParameterSet::new(Sweep::new(freqs)?, state).with_param(SParam::S11, s11)
    }

    pub fn from_points(points: &[FrequencyPoint], state: DataState) -> Result<Self> {
        let sweep = Sweep::new(points.iter().map(|p| p.freq).collect())?;
        let mut set = SParameterSet::new(sweep, state)
            .with_param(SParam::S11, points.iter().map(|p| p.s11).collect())?;
        if points.iter().all(|p| p.s21.is_some()) {
            let s21 = points.iter().filter_map(|p| p.s21).collect();
            set.insert(SParam::S21, Array::from_vec(s21))?;
        }
        Ok(set)
    }

    pub fn with_param(mut self, label: SParam, values: Vec<Complex<f64>>) -> Result<Self> {
        self.insert(label, Array::from_vec(values))?;
        Ok(self)
    }

    pub fn with_z0(mut self, z0: f64) -> Self {
        self.z0 = z0;
        self
    }

    pub fn insert(&mut self, label: SParam, values: CxArray1) -> Result<()> {
        if values.len() != self.sweep.len() {
            return Err(Error::LengthMismatch {
                label: label.to_string(),
                expected: self.sweep.len(),
                actual: values.len(),
            });
        }
        self.params.insert(label, values);
        Ok(())
    }

    pub fn get(&self, label: SParam) -> Option<&CxArray1> {
        self.params.get(&label)
    }

    pub fn s11(&self) -> Option<&CxArray1> {
        self.get(SParam::S11)
    }

    pub fn s21(&self) -> Option<&CxArray1> {
        self.get(SParam::S21)
    }

    pub fn labels(&self) -> impl Iterator<Item = SParam> + '_ {
        self.params.keys().copied()
    }

    pub fn sweep(&self) -> &Sweep {
        &self.sweep
    }

    pub fn freqs(&self) -> &[u64] {
        self.sweep.freqs()
    }

    pub fn len(&self) -> usize {
        self.sweep.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sweep.is_empty()
    }

    pub fn z0(&self) -> f64 {
        self.z0
    }

    pub fn state(&self) -> DataState {
        self.state
    }

    /// 2 when any transmission or port-2 parameter is present, 1 otherwise.
    pub fn nports(&self) -> usize {
        if self.params.keys().any(|&p| p != SParam::S11) {
            2
        } else {
            1
        }
    }

    pub fn points(&self) -> Vec<FrequencyPoint> {
        let s21 = self.s21();
        self.freqs()
            .iter()
            .enumerate()
            .map(|(i, &freq)| FrequencyPoint {
                freq,
                s11: self.s11().map_or(Complex::new(0., 0.), |s| s[i]),
                s21: s21.map(|s| s[i]),
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn c(re: f64, im: f64) -> Complex<f64> {
        Complex::new(re, im)
    }

    #[test]
    fn test_instantiation() {
        let set = SParameterSet::one_port(
            vec![1_000_000, 2_000_000, 3_000_000],
            vec![c(1., 0.); 3],
            DataState::Raw,
        )
        .unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.nports(), 1);
        assert_eq!(set.z0(), 50.);
        assert_eq!(set.sweep().stop(), 3_000_000);
    }

    #[test]
    fn test_sweep_rejects_duplicates() {
        assert!(Sweep::new(vec![1, 2, 2, 3]).is_err());
        assert!(Sweep::new(vec![3, 2]).is_err());
        assert!(Sweep::new(vec![]).is_err());
        assert_eq!(Sweep::new(vec![5, 9]).unwrap().index_of(9), Some(1));
    }

    #[test]
    fn test_length_mismatch() {
        let sweep = Sweep::new(vec![1, 2, 3]).unwrap();
        let err = SParameterSet::new(sweep, DataState::Raw)
            .with_param(SParam::S21, vec![c(0., 0.); 2])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::LengthMismatch {
                expected: 3,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_points_roundtrip() {
        let points = vec![
            FrequencyPoint {
                freq: 10,
                s11: c(0.1, 0.2),
                s21: Some(c(0.9, 0.)),
            },
            FrequencyPoint {
                freq: 20,
                s11: c(0.3, -0.2),
                s21: Some(c(0.8, 0.1)),
            },
        ];
        let set = SParameterSet::from_points(&points, DataState::Raw).unwrap();
        assert_eq!(set.nports(), 2);
        assert_eq!(set.points(), points);
    }
}
