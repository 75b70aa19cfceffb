//! NanoVNA shell protocol driver.
//!
//! The firmware speaks a line-oriented shell: a command is sent terminated by
//! `\r`, the device echoes it back followed by `\r\n`, prints its response and
//! finishes with the `ch> ` prompt. Sweep data is requested with
//! `scan <start> <stop> <points> <mask>`; with bit 7 of the mask set the
//! response is a little-endian binary block instead of text.

mod connection;
mod frame;
mod info;
pub mod mock;
#[cfg(feature = "serial")]
mod ports;

use std::io::{Read, Write};

pub use self::connection::{Connection, DriverState, SegmentRequest};
pub use self::info::{DeviceInfo, FirmwareVersion, ScanMode};
pub use self::mock::{Dut, ErrorBox, Fault, MockDevice, MockHandle};
#[cfg(feature = "serial")]
pub use self::ports::{available_ports, PortInfo, NANOVNA_PID, NANOVNA_VID};

/// Shell prompt printed after every response.
pub const PROMPT: &[u8] = b"ch> ";

/// Terminator appended to every command.
pub const COMMAND_TERMINATOR: &[u8] = b"\r";

/// Terminator of echoed commands and text response lines.
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Scan mask: frequency, S11 and S21 columns.
pub const SCAN_MASK_TEXT: u16 = 0b0000_0111;

/// Scan mask: the text columns plus binary output.
pub const SCAN_MASK_BINARY: u16 = 0b1000_0111;

/// Bytes per binary scan record: `u32` frequency and two complex `f32` pairs.
pub const BINARY_RECORD_LEN: usize = 4 + 8 + 8;

/// Byte stream to a device.
///
/// Reads are expected to return `ErrorKind::TimedOut` (or `WouldBlock`) when
/// no data arrived within the transport's own poll interval, which is how
/// serial ports behave.
pub trait Transport: Read + Write + Send {}

impl<T: Read + Write + Send + ?Sized> Transport for T {}
