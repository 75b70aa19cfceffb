use std::io::ErrorKind;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::frame::{self, FrameBuffer};
use super::info::{DeviceInfo, ScanMode};
use super::{Transport, COMMAND_TERMINATOR, SCAN_MASK_BINARY, SCAN_MASK_TEXT};
use crate::network::FrequencyPoint;
use crate::result::{Error, Result};

#[cfg(feature = "serial")]
use crate::config::SerialSettings;

/// Where the driver is within a request/response exchange.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DriverState {
    /// No exchange in progress.
    Idle,
    /// Command written; waiting for the device to echo it.
    AwaitingEcho,
    /// Echo seen; collecting the response body.
    AwaitingBody,
    /// Binary payload complete; waiting for the closing prompt.
    AwaitingPrompt,
}

/// A `scan` command that was sent and whose response has not been read yet.
#[derive(Clone, Debug)]
pub struct SegmentRequest {
    command: String,
    start_hz: u64,
    stop_hz: u64,
    points: usize,
    mode: ScanMode,
}

impl SegmentRequest {
    pub fn points(&self) -> usize {
        self.points
    }
}

/// Shape of the response body an exchange expects.
#[derive(Copy, Clone, Debug)]
enum Body {
    /// Text terminated by the prompt.
    Text,
    /// Exactly this many bytes, then the prompt.
    Binary(usize),
}

/// An open session with one device.
///
/// A connection handles one exchange at a time; callers that share it must
/// serialize access (see [`crate::sweep::SweepWorker`]).
pub struct Connection<T: Transport> {
    port: String,
    transport: T,
    buffer: FrameBuffer,
    state: DriverState,
    timeout: Duration,
    info: DeviceInfo,
}

#[cfg(feature = "serial")]
impl Connection<Box<dyn serialport::SerialPort>> {
    /// Opens a serial port and queries the device's capabilities.
    pub fn open(port: &str, settings: &SerialSettings) -> Result<Self> {
        let transport = serialport::new(port, settings.baud_rate)
            .timeout(Duration::from_millis(settings.poll_interval_ms))
            .open()
            .map_err(|e| Error::Connection {
                port: port.to_string(),
                message: e.to_string(),
            })?;
        debug!(port, baud = settings.baud_rate, "Serial port opened");
        Connection::with_transport(port, transport, settings.read_timeout())
    }
}

impl<T: Transport> Connection<T> {
    /// Wraps an already open transport and queries the device's capabilities.
    pub fn with_transport(port: impl Into<String>, transport: T, timeout: Duration) -> Result<Self> {
        let port = port.into();
        let mut connection = Connection {
            port: port.clone(),
            transport,
            buffer: FrameBuffer::default(),
            state: DriverState::Idle,
            timeout,
            info: DeviceInfo {
                version: super::FirmwareVersion::new(0, 0, 0),
                board: String::new(),
                max_points: 0,
                ports: 0,
                scan_mode: ScanMode::Text,
            },
        };
        connection.info = connection.identify().map_err(|e| Error::Connection {
            port: port.clone(),
            message: format!("device did not identify: {}", e),
        })?;
        debug!(
            port = %port,
            board = %connection.info.board,
            version = %connection.info.version,
            max_points = connection.info.max_points,
            "Device identified"
        );
        Ok(connection)
    }

    fn identify(&mut self) -> Result<DeviceInfo> {
        let version = self.query_text("version")?;
        let version = version.first().cloned().unwrap_or_default();
        let info = self.query_text("info")?;
        let info: Vec<&str> = info.iter().map(String::as_str).collect();
        DeviceInfo::from_responses(&version, &info)
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Sends `command` and returns the raw response body (without echo and prompt).
    pub fn query(&mut self, command: &str) -> Result<Vec<u8>> {
        self.exchange(command, Body::Text).map(|body| body.to_vec())
    }

    /// Like [`Connection::query`], split into non-empty lines.
    pub fn query_text(&mut self, command: &str) -> Result<Vec<String>> {
        let body = self.query(command)?;
        Ok(frame::text_lines(&body)?
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// Runs one device sweep of `points` points between `start_hz` and `stop_hz`.
    ///
    /// The segment is a single transaction: it either returns every point in
    /// increasing frequency order or fails as a whole.
    pub fn read_sweep_segment(
        &mut self,
        start_hz: u64,
        stop_hz: u64,
        points: usize,
    ) -> Result<Vec<FrequencyPoint>> {
        let request = self.request_segment(start_hz, stop_hz, points)?;
        self.await_segment(request)
    }

    /// Validates a segment and sends its `scan` command.
    ///
    /// Must be followed by [`Connection::await_segment`] before any other
    /// command is sent.
    pub fn request_segment(
        &mut self,
        start_hz: u64,
        stop_hz: u64,
        points: usize,
    ) -> Result<SegmentRequest> {
        if points == 0 || points > self.info.max_points {
            return Err(Error::InvalidSweep(format!(
                "{} points requested, device supports 1..={}",
                points, self.info.max_points
            )));
        }
        if start_hz > stop_hz || (points > 1 && stop_hz - start_hz < (points - 1) as u64) {
            return Err(Error::InvalidSweep(format!(
                "{} points do not fit in {}..{} Hz",
                points, start_hz, stop_hz
            )));
        }
        let mask = match self.info.scan_mode {
            ScanMode::Binary => SCAN_MASK_BINARY,
            ScanMode::Text => SCAN_MASK_TEXT,
        };
        let request = SegmentRequest {
            command: format!("scan {} {} {} {}", start_hz, stop_hz, points, mask),
            start_hz,
            stop_hz,
            points,
            mode: self.info.scan_mode,
        };
        if let Err(e) = self.send(&request.command) {
            self.state = DriverState::Idle;
            return Err(e);
        }
        Ok(request)
    }

    /// Collects and decodes the response to a [`Connection::request_segment`].
    pub fn await_segment(&mut self, request: SegmentRequest) -> Result<Vec<FrequencyPoint>> {
        let records = match request.mode {
            ScanMode::Binary => {
                let len = frame::binary_scan_len(request.points);
                let body = self.receive(&request.command, Body::Binary(len))?;
                frame::decode_binary_scan(&body, SCAN_MASK_BINARY, request.points)?
            }
            ScanMode::Text => {
                let body = self.receive(&request.command, Body::Text)?;
                frame::decode_text_scan(&body)?
            }
        };

        if records.len() != request.points {
            return Err(Error::Protocol(format!(
                "expected {} points, device returned {}",
                request.points,
                records.len()
            )));
        }
        if records.windows(2).any(|w| w[0].freq >= w[1].freq)
            || records[0].freq != request.start_hz
            || records[request.points - 1].freq != request.stop_hz
        {
            return Err(Error::Protocol(format!(
                "device returned frequencies outside {}..{} Hz or out of order",
                request.start_hz, request.stop_hz
            )));
        }
        trace!(
            start_hz = request.start_hz,
            stop_hz = request.stop_hz,
            points = request.points,
            "Segment read"
        );
        Ok(records)
    }

    fn exchange(&mut self, command: &str, body: Body) -> Result<bytes::BytesMut> {
        if let Err(e) = self.send(command) {
            self.state = DriverState::Idle;
            return Err(e);
        }
        self.receive(command, body)
    }

    fn send(&mut self, command: &str) -> Result<()> {
        // anything left over belongs to an earlier, abandoned exchange
        if self.buffer.len() > 0 {
            debug!(bytes = self.buffer.len(), "Discarding stale input");
            self.buffer.clear();
        }

        let mut line = command.as_bytes().to_vec();
        line.extend_from_slice(COMMAND_TERMINATOR);
        self.transport
            .write_all(&line)
            .and_then(|_| self.transport.flush())
            .map_err(|e| Error::Connection {
                port: self.port.clone(),
                message: e.to_string(),
            })?;
        trace!(command, "Sent command");
        self.state = DriverState::AwaitingEcho;
        Ok(())
    }

    fn receive(&mut self, command: &str, body: Body) -> Result<bytes::BytesMut> {
        let result = self.run_receive(command, body);
        self.state = DriverState::Idle;
        if let Err(e) = &result {
            debug!(command, error = %e, "Exchange failed");
        }
        result
    }

    fn run_receive(&mut self, command: &str, body: Body) -> Result<bytes::BytesMut> {
        let deadline = Instant::now() + self.timeout;
        let mut payload = None;
        loop {
            match self.state {
                DriverState::AwaitingEcho => {
                    if let Some(skipped) = self.buffer.take_echo(command) {
                        if skipped > 0 {
                            warn!(command, skipped, "Discarded out-of-sync bytes before echo");
                        }
                        self.state = DriverState::AwaitingBody;
                        continue;
                    }
                }
                DriverState::AwaitingBody => match body {
                    Body::Text => {
                        if let Some(text) = self.buffer.take_until_prompt() {
                            return Ok(text);
                        }
                    }
                    Body::Binary(len) => {
                        if let Some(data) = self.buffer.take_exact(len) {
                            payload = Some(data);
                            self.state = DriverState::AwaitingPrompt;
                            continue;
                        }
                    }
                },
                DriverState::AwaitingPrompt => {
                    if let Some(trailing) = self.buffer.take_until_prompt() {
                        if !trailing.is_empty() {
                            return Err(Error::Protocol(format!(
                                "{} unexpected bytes after binary payload",
                                trailing.len()
                            )));
                        }
                        return payload
                            .take()
                            .ok_or_else(|| Error::Protocol("binary payload missing".into()));
                    }
                }
                DriverState::Idle => {
                    return Err(Error::Protocol(format!(
                        "no command in flight while waiting for '{}'",
                        command
                    )));
                }
            }
            self.fill(command, deadline)?;
        }
    }

    /// Reads whatever the transport has, failing once `deadline` has passed.
    fn fill(&mut self, command: &str, deadline: Instant) -> Result<()> {
        let mut chunk = [0u8; 512];
        loop {
            if Instant::now() >= deadline {
                return Err(Error::Timeout {
                    command: command.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
            match self.transport.read(&mut chunk) {
                Ok(0) => std::thread::sleep(Duration::from_millis(1)),
                Ok(n) => {
                    self.buffer.extend(&chunk[..n]);
                    return Ok(());
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    return Err(Error::Connection {
                        port: self.port.clone(),
                        message: e.to_string(),
                    })
                }
            }
        }
    }
}

impl<T: Transport> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("port", &self.port)
            .field("state", &self.state)
            .field("info", &self.info)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::mock::{Dut, Fault, MockDevice};
    use crate::device::FirmwareVersion;

    fn connect(device: MockDevice) -> Connection<MockDevice> {
        Connection::with_transport("mock", device, Duration::from_millis(50)).unwrap()
    }

    #[test]
    fn identifies_on_open() {
        let conn = connect(MockDevice::new());
        assert_eq!(conn.info().version, FirmwareVersion::new(1, 2, 27));
        assert_eq!(conn.info().max_points, 401);
        assert_eq!(conn.state(), DriverState::Idle);
    }

    #[test]
    fn query_returns_body() {
        let mut conn = connect(MockDevice::new());
        assert_eq!(conn.query_text("version").unwrap(), vec!["1.2.27".to_string()]);
    }

    #[test]
    fn binary_segment() {
        let device = MockDevice::new();
        device.handle().set_dut(Dut::Short);
        let mut conn = connect(device);
        let points = conn.read_sweep_segment(1_000_000, 2_000_000, 11).unwrap();
        assert_eq!(points.len(), 11);
        assert_eq!(points[5].freq, 1_500_000);
        assert!((points[0].s11.re + 1.).abs() < 1e-6);
    }

    #[test]
    fn text_segment() {
        let mut conn = connect(MockDevice::with_firmware("0.7.3", "NanoVNA-H"));
        assert_eq!(conn.info().scan_mode, ScanMode::Text);
        let points = conn.read_sweep_segment(1_000_000, 1_100_000, 101).unwrap();
        assert_eq!(points.len(), 101);
        assert_eq!(points[100].freq, 1_100_000);
    }

    #[test]
    fn rejects_oversized_segment() {
        let mut conn = connect(MockDevice::new());
        assert!(matches!(
            conn.read_sweep_segment(1_000_000, 2_000_000, 402),
            Err(Error::InvalidSweep(_))
        ));
    }

    #[test]
    fn timeout_then_recovers() {
        let device = MockDevice::new();
        let handle = device.handle();
        let mut conn = connect(device);
        handle.push_fault(Fault::Drop);
        assert!(matches!(
            conn.read_sweep_segment(1_000_000, 2_000_000, 11),
            Err(Error::Timeout { .. })
        ));
        assert_eq!(conn.state(), DriverState::Idle);
        assert_eq!(conn.read_sweep_segment(1_000_000, 2_000_000, 11).unwrap().len(), 11);
    }

    #[test]
    fn skips_noise_before_echo() {
        let device = MockDevice::new();
        let handle = device.handle();
        let mut conn = connect(device);
        handle.push_fault(Fault::Noise);
        assert_eq!(conn.read_sweep_segment(1_000_000, 2_000_000, 11).unwrap().len(), 11);
    }

    #[test]
    fn malformed_text_is_protocol_error_and_stream_stays_in_sync() {
        let device = MockDevice::with_firmware("0.7.3", "NanoVNA-H");
        let handle = device.handle();
        let mut conn = connect(device);
        handle.push_fault(Fault::Corrupt);
        assert!(matches!(
            conn.read_sweep_segment(1_000_000, 2_000_000, 11),
            Err(Error::Protocol(_))
        ));
        assert_eq!(conn.read_sweep_segment(1_000_000, 2_000_000, 11).unwrap().len(), 11);
    }

    #[test]
    fn truncated_text_is_protocol_error() {
        let device = MockDevice::with_firmware("0.7.3", "NanoVNA-H");
        let handle = device.handle();
        let mut conn = connect(device);
        handle.push_fault(Fault::Truncate);
        assert!(matches!(
            conn.read_sweep_segment(1_000_000, 2_000_000, 11),
            Err(Error::Protocol(_))
        ));
    }
}
