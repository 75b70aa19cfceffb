//! Measurement core for NanoVNA-family vector network analyzers.
//!
//! The crate drives sweeps over a serial link ([`device`], [`sweep`]),
//! corrects raw readings with SOL/SOLT calibration ([`calibration`]),
//! exchanges data as Touchstone files ([`touchstone`]) and derives
//! engineering quantities such as VSWR or distance-to-fault ([`derived`]).

pub mod calibration;
pub mod config;
pub mod derived;
pub mod device;
pub mod frequency;
pub mod logging;
pub mod network;
pub mod result;
pub mod sweep;
pub mod touchstone;

use ndarray::prelude::Array1;
use num::complex::Complex;

pub use crate::network::{DataState, FrequencyPoint, SParam, SParameterSet, Sweep};
pub use crate::result::{Error, Result};

pub type CxArray1 = Array1<Complex<f64>>;
