//! Reassembly of shell frames from arbitrarily chunked reads, and decoding
//! of scan payloads.

use bytes::{Buf, BytesMut};
use nom::character::complete::{space0, space1, u64 as dec_u64};
use nom::combinator::all_consuming;
use nom::number::complete::double;
use nom::sequence::{preceded, terminated, tuple};
use nom::IResult;
use num::complex::Complex;

use super::{BINARY_RECORD_LEN, LINE_TERMINATOR, PROMPT};
use crate::network::FrequencyPoint;
use crate::result::{Error, Result};

/// Bytes received from the device that have not been consumed yet.
#[derive(Debug, Default)]
pub(crate) struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Consumes everything up to and including the echo of `command`.
    ///
    /// Returns the number of stray bytes that preceded the echo, or `None`
    /// while the echo is still incomplete.
    pub fn take_echo(&mut self, command: &str) -> Option<usize> {
        let mut echo = command.as_bytes().to_vec();
        echo.extend_from_slice(LINE_TERMINATOR);
        let position = find(&self.buf, &echo)?;
        self.buf.advance(position + echo.len());
        Some(position)
    }

    /// Splits off the bytes before the next prompt and drops the prompt.
    pub fn take_until_prompt(&mut self) -> Option<BytesMut> {
        let position = find(&self.buf, PROMPT)?;
        let body = self.buf.split_to(position);
        self.buf.advance(PROMPT.len());
        Some(body)
    }

    pub fn take_exact(&mut self, len: usize) -> Option<BytesMut> {
        if self.buf.len() < len {
            return None;
        }
        Some(self.buf.split_to(len))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Non-empty lines of a text response.
pub(crate) fn text_lines(body: &[u8]) -> Result<Vec<&str>> {
    let text = std::str::from_utf8(body)
        .map_err(|_| Error::Protocol("response is not valid text".into()))?;
    Ok(text
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect())
}

type ScanFields = (u64, f64, f64, f64, f64);

fn scan_line(input: &str) -> IResult<&str, ScanFields> {
    all_consuming(terminated(
        tuple((
            preceded(space0, dec_u64),
            preceded(space1, double),
            preceded(space1, double),
            preceded(space1, double),
            preceded(space1, double),
        )),
        space0,
    ))(input)
}

/// Decodes the text form of `scan ... 7`: `freq s11re s11im s21re s21im` per line.
pub(crate) fn decode_text_scan(body: &[u8]) -> Result<Vec<FrequencyPoint>> {
    text_lines(body)?
        .into_iter()
        .enumerate()
        .map(|(index, line)| {
            let (_, (freq, a, b, c, d)) = scan_line(line).map_err(|_| {
                Error::Protocol(format!("malformed scan line {}: '{}'", index + 1, line))
            })?;
            Ok(FrequencyPoint {
                freq,
                s11: Complex::new(a, b),
                s21: Some(Complex::new(c, d)),
            })
        })
        .collect()
}

/// Decodes a binary scan block: `u16` mask and `u16` point count, then one
/// fixed-width record per point.
pub(crate) fn decode_binary_scan(body: &[u8], mask: u16, points: usize) -> Result<Vec<FrequencyPoint>> {
    let expected = binary_scan_len(points);
    if body.len() != expected {
        return Err(Error::Protocol(format!(
            "binary scan block is {} bytes, expected {}",
            body.len(),
            expected
        )));
    }
    let mut buf = body;
    let echoed_mask = buf.get_u16_le();
    let echoed_points = buf.get_u16_le() as usize;
    if echoed_mask != mask || echoed_points != points {
        return Err(Error::Protocol(format!(
            "binary scan header mismatch: mask {:#06x}, {} points",
            echoed_mask, echoed_points
        )));
    }
    let mut records = Vec::with_capacity(points);
    for _ in 0..points {
        let freq = buf.get_u32_le() as u64;
        let s11 = Complex::new(buf.get_f32_le() as f64, buf.get_f32_le() as f64);
        let s21 = Complex::new(buf.get_f32_le() as f64, buf.get_f32_le() as f64);
        records.push(FrequencyPoint {
            freq,
            s11,
            s21: Some(s21),
        });
    }
    Ok(records)
}

pub(crate) fn binary_scan_len(points: usize) -> usize {
    4 + points * BINARY_RECORD_LEN
}
