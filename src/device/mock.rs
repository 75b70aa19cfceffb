//! Simulated NanoVNA for tests and `--simulate` runs.
//!
//! [`MockDevice`] implements [`std::io::Read`] and [`std::io::Write`] and
//! answers the shell commands the driver uses (`version`, `info`, `scan`) the
//! way the firmware does, including echo, prompt and chunked reads. The
//! measured values come from a configurable device under test seen through an
//! [`ErrorBox`], so a calibration run against the mock recovers known terms.
//! Faults can be queued through a [`MockHandle`] to exercise the driver's
//! error paths.

use std::collections::VecDeque;
use std::f64::consts::PI;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{BufMut, BytesMut};
use num::complex::Complex;
use tracing::trace;

use super::{COMMAND_TERMINATOR, LINE_TERMINATOR, PROMPT};
use crate::frequency::linear_point;

type C64 = Complex<f64>;

const SPEED_OF_LIGHT: f64 = 299_792_458.;

/// Systematic errors of the simulated front end.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ErrorBox {
    pub e00: C64,
    pub e11: C64,
    pub e10e01: C64,
    pub e30: C64,
    pub e22: C64,
    pub e10e32: C64,
    /// Extra electrical length on port 1, applied as a round-trip phase on `e10e01`.
    pub port_delay_ps: f64,
}

impl ErrorBox {
    /// A perfect front end: raw readings equal the device under test.
    pub fn ideal() -> Self {
        ErrorBox {
            e00: C64::new(0., 0.),
            e11: C64::new(0., 0.),
            e10e01: C64::new(1., 0.),
            e30: C64::new(0., 0.),
            e22: C64::new(0., 0.),
            e10e32: C64::new(1., 0.),
            port_delay_ps: 0.,
        }
    }

    /// Roughly what an uncalibrated NanoVNA-H looks like at the SMA jacks.
    pub fn typical() -> Self {
        ErrorBox {
            e00: C64::new(0.04, -0.03),
            e11: C64::new(0.08, 0.05),
            e10e01: C64::new(0.92, 0.07),
            e30: C64::new(0.002, -0.001),
            e22: C64::new(0.06, -0.02),
            e10e32: C64::new(0.85, -0.12),
            port_delay_ps: 35.,
        }
    }

    fn tracking(&self, freq: u64) -> C64 {
        let phase = -2. * 2. * PI * freq as f64 * self.port_delay_ps * 1e-12;
        self.e10e01 * C64::from_polar(1., phase)
    }

    /// Raw `(S11, S21)` the analyzer reports for a device with the given
    /// S-parameters, port 2 terminated by the analyzer's own load match.
    pub fn measure(&self, freq: u64, s: [C64; 4]) -> (C64, C64) {
        let [s11, s21, s12, s22] = s;
        let one = C64::new(1., 0.);
        let gamma_in = s11 + s21 * s12 * self.e22 / (one - s22 * self.e22);
        let s11m = self.e00 + self.tracking(freq) * gamma_in / (one - self.e11 * gamma_in);
        let denominator = (one - self.e11 * s11) * (one - self.e22 * s22) - self.e11 * self.e22 * s21 * s12;
        let s21m = self.e30 + self.e10e32 * s21 / denominator;
        (s11m, s21m)
    }
}

impl Default for ErrorBox {
    fn default() -> Self {
        ErrorBox::ideal()
    }
}

/// What is connected to the simulated ports.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Dut {
    Open,
    Short,
    Load,
    /// Port 1 wired straight to port 2.
    Through,
    /// Both ports terminated, nothing between them.
    Isolation,
    /// Fixed reflection coefficient on port 1.
    Reflection(C64),
    /// Fixed impedance on port 1, in ohms against 50 Ω.
    Impedance(C64),
    /// Lossless line of `length_m` ending in `termination` (a reflection coefficient).
    Cable {
        length_m: f64,
        velocity_factor: f64,
        termination: C64,
    },
    /// Matched two-port with the given forward and reverse transmission.
    Attenuator { s21: C64 },
}

impl Dut {
    /// `[S11, S21, S12, S22]` at `freq`.
    pub fn s_parameters(&self, freq: u64) -> [C64; 4] {
        let zero = C64::new(0., 0.);
        let one = C64::new(1., 0.);
        match *self {
            Dut::Open => [one, zero, zero, zero],
            Dut::Short => [-one, zero, zero, zero],
            Dut::Load | Dut::Isolation => [zero; 4],
            Dut::Through => [zero, one, one, zero],
            Dut::Reflection(gamma) => [gamma, zero, zero, zero],
            Dut::Impedance(z) => [(z - 50.) / (z + 50.), zero, zero, zero],
            Dut::Cable {
                length_m,
                velocity_factor,
                termination,
            } => {
                let delay = length_m / (velocity_factor * SPEED_OF_LIGHT);
                let phase = -2. * 2. * PI * freq as f64 * delay;
                [termination * C64::from_polar(1., phase), zero, zero, zero]
            }
            Dut::Attenuator { s21 } => [zero, s21, s21, zero],
        }
    }
}

/// Misbehaviour injected into the next `scan` response.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    /// The command is swallowed; nothing comes back.
    Drop,
    /// Stray bytes arrive before the echo.
    Noise,
    /// The body is cut short (last text line or last binary record missing).
    Truncate,
    /// A value in the body is mangled.
    Corrupt,
}

#[derive(Debug)]
struct State {
    version: String,
    board: String,
    error_box: ErrorBox,
    dut: Dut,
    faults: VecDeque<Fault>,
    commands: Vec<String>,
}

/// Test-side controls of a [`MockDevice`], usable after the device was moved
/// into a connection.
#[derive(Clone, Debug)]
pub struct MockHandle {
    state: Arc<Mutex<State>>,
}

impl MockHandle {
    pub fn set_dut(&self, dut: Dut) {
        lock(&self.state).dut = dut;
    }

    pub fn set_error_box(&self, error_box: ErrorBox) {
        lock(&self.state).error_box = error_box;
    }

    /// Queues a fault for the next `scan`; queued faults apply one per scan.
    pub fn push_fault(&self, fault: Fault) {
        lock(&self.state).faults.push_back(fault);
    }

    /// Every command received so far.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.clone()
    }

    /// Number of `scan` commands received so far.
    pub fn scan_count(&self) -> usize {
        lock(&self.state)
            .commands
            .iter()
            .filter(|c| c.starts_with("scan "))
            .count()
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory stand-in for a NanoVNA serial port.
#[derive(Debug)]
pub struct MockDevice {
    state: Arc<Mutex<State>>,
    input: Vec<u8>,
    output: VecDeque<u8>,
    chunk: usize,
}

impl MockDevice {
    /// A NanoVNA-H4 on firmware 1.2.27 (401 points, binary scans).
    pub fn new() -> Self {
        MockDevice::with_firmware("1.2.27", "NanoVNA-H 4")
    }

    pub fn with_firmware(version: &str, board: &str) -> Self {
        MockDevice {
            state: Arc::new(Mutex::new(State {
                version: version.to_string(),
                board: board.to_string(),
                error_box: ErrorBox::ideal(),
                dut: Dut::Load,
                faults: VecDeque::new(),
                commands: Vec::new(),
            })),
            input: Vec::new(),
            output: VecDeque::new(),
            chunk: 64,
        }
    }

    /// Largest number of bytes a single read returns.
    pub fn with_chunk_size(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    pub fn with_error_box(self, error_box: ErrorBox) -> Self {
        self.handle().set_error_box(error_box);
        self
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn respond(&mut self, command: &str) {
        let mut state = lock(&self.state);
        state.commands.push(command.to_string());
        trace!(command, "Mock device received command");

        let mut words = command.split_whitespace();
        let name = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();

        let fault = if name == "scan" {
            state.faults.pop_front()
        } else {
            None
        };
        if fault == Some(Fault::Drop) {
            return;
        }

        let body = match name {
            "version" => text_body(&[state.version.as_str()]),
            "info" => {
                let model = format!("Model:        {}", state.board);
                text_body(&[
                    model.as_str(),
                    "Frequency:    10k ~ 1.5GHz",
                    "Build time:   Jan  1 2024 - 00:00:00",
                ])
            }
            "scan" => match scan(&state, &args, fault) {
                Some(body) => body,
                None => text_body(&["usage: scan {start(Hz)} {stop(Hz)} [points] [outmask]"]),
            },
            "" => BytesMut::new(),
            _ => text_body(&[format!("{}?", name).as_str()]),
        };
        drop(state);

        if fault == Some(Fault::Noise) {
            self.output.extend(b"\x00\xffcal\r\nch> ".iter());
        }
        self.output.extend(command.as_bytes());
        self.output.extend(LINE_TERMINATOR);
        self.output.extend(body.iter());
        self.output.extend(PROMPT);
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        MockDevice::new()
    }
}

fn text_body(lines: &[&str]) -> BytesMut {
    let mut body = BytesMut::new();
    for line in lines {
        body.put_slice(line.as_bytes());
        body.put_slice(LINE_TERMINATOR);
    }
    body
}

fn scan(state: &State, args: &[&str], fault: Option<Fault>) -> Option<BytesMut> {
    let start: u64 = args.first()?.parse().ok()?;
    let stop: u64 = args.get(1)?.parse().ok()?;
    let points: usize = args.get(2).map_or(Some(101), |a| a.parse().ok())?;
    let mask: u16 = args.get(3).map_or(Some(0), |a| a.parse().ok())?;

    let readings: Vec<(u64, C64, C64)> = (0..points)
        .map(|i| {
            let freq = linear_point(start, stop, points, i);
            let (s11, s21) = state
                .error_box
                .measure(freq, state.dut.s_parameters(freq));
            (freq, s11, s21)
        })
        .collect();

    let mut body = BytesMut::new();
    if mask & 0x80 != 0 {
        let echoed_points = if fault == Some(Fault::Corrupt) {
            points + 1
        } else {
            points
        };
        body.put_u16_le(mask);
        body.put_u16_le(echoed_points as u16);
        for (freq, s11, s21) in &readings {
            body.put_u32_le(*freq as u32);
            body.put_f32_le(s11.re as f32);
            body.put_f32_le(s11.im as f32);
            body.put_f32_le(s21.re as f32);
            body.put_f32_le(s21.im as f32);
        }
        if fault == Some(Fault::Truncate) {
            body.truncate(body.len().saturating_sub(super::BINARY_RECORD_LEN));
        }
    } else {
        let kept = match fault {
            Some(Fault::Truncate) => points.saturating_sub(1),
            _ => points,
        };
        for (index, (freq, s11, s21)) in readings.iter().take(kept).enumerate() {
            let line = if fault == Some(Fault::Corrupt) && index == 1 {
                format!("{} {:.9} x{:.9} {:.9} {:.9}", freq, s11.re, s11.im, s21.re, s21.im)
            } else {
                format!("{} {:.9} {:.9} {:.9} {:.9}", freq, s11.re, s11.im, s21.re, s21.im)
            };
            body.put_slice(line.as_bytes());
            body.put_slice(LINE_TERMINATOR);
        }
    }
    Some(body)
}

impl Write for MockDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.input.extend_from_slice(buf);
        while let Some(end) = self
            .input
            .iter()
            .position(|b| COMMAND_TERMINATOR.contains(b) || *b == b'\n')
        {
            let line: Vec<u8> = self.input.drain(..=end).collect();
            let command = String::from_utf8_lossy(&line[..end]).trim().to_string();
            if !command.is_empty() {
                self.respond(&command);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for MockDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.output.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.chunk).min(self.output.len());
        for (slot, byte) in buf.iter_mut().zip(self.output.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}
