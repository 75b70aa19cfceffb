use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::result::{Error, Result};

/// How sweep data is read back from the device.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScanMode {
    /// `scan` with the binary flag: fixed-width little-endian records.
    Binary,
    /// `scan` with text output, one line per point.
    Text,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FirmwareVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FirmwareVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        FirmwareVersion {
            major,
            minor,
            patch,
        }
    }

    /// Extracts the first `x.y.z` triple, e.g. from `1.2.27` or `0.7.1-4-gab12`.
    pub fn parse(text: &str) -> Option<Self> {
        static VERSION: OnceLock<Regex> = OnceLock::new();
        let re = VERSION.get_or_init(|| {
            Regex::new(r"(\d+)\.(\d+)\.(\d+)").expect("version pattern is valid")
        });
        let caps = re.captures(text)?;
        Some(FirmwareVersion {
            major: caps[1].parse().ok()?,
            minor: caps[2].parse().ok()?,
            patch: caps[3].parse().ok()?,
        })
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// First firmware with the `scan` command and an output mask.
const SCAN_MASK_SINCE: FirmwareVersion = FirmwareVersion::new(0, 7, 1);
/// First firmware that can emit binary scan blocks.
const BINARY_SCAN_SINCE: FirmwareVersion = FirmwareVersion::new(1, 0, 0);
/// First H4 firmware with 401 points per sweep.
const H4_401_POINTS_SINCE: FirmwareVersion = FirmwareVersion::new(1, 0, 45);

/// Capabilities queried once when a connection is opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub version: FirmwareVersion,
    pub board: String,
    /// Most points a single `scan` may request.
    pub max_points: usize,
    pub ports: usize,
    pub scan_mode: ScanMode,
}

impl DeviceInfo {
    /// Derives capabilities from the `version` and `info` responses.
    pub fn from_responses(version: &str, info: &[&str]) -> Result<Self> {
        static BOARD: OnceLock<Regex> = OnceLock::new();
        let version = FirmwareVersion::parse(version)
            .ok_or_else(|| Error::Protocol(format!("unrecognized firmware version '{}'", version)))?;
        if version < SCAN_MASK_SINCE {
            return Err(Error::Protocol(format!(
                "firmware {} predates the scan command (need {} or later)",
                version, SCAN_MASK_SINCE
            )));
        }

        let re = BOARD.get_or_init(|| {
            Regex::new(r"(?i)^\s*(?:board|model)\s*:\s*(.+?)\s*$").expect("board pattern is valid")
        });
        let board = info
            .iter()
            .find_map(|line| re.captures(line).map(|c| c[1].to_string()))
            .or_else(|| info.first().map(|line| line.trim().to_string()))
            .unwrap_or_else(|| "NanoVNA".to_string());

        let is_h4 = board.replace(' ', "").to_ascii_uppercase().contains("H4");
        let max_points = if is_h4 && version >= H4_401_POINTS_SINCE {
            401
        } else {
            101
        };
        let scan_mode = if version >= BINARY_SCAN_SINCE {
            ScanMode::Binary
        } else {
            ScanMode::Text
        };

        Ok(DeviceInfo {
            version,
            board,
            max_points,
            ports: 2,
            scan_mode,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_versions() {
        assert_eq!(FirmwareVersion::parse("1.2.27"), Some(FirmwareVersion::new(1, 2, 27)));
        assert_eq!(
            FirmwareVersion::parse("0.7.1-4-gab12cd"),
            Some(FirmwareVersion::new(0, 7, 1))
        );
        assert_eq!(FirmwareVersion::parse("unknown"), None);
        assert!(FirmwareVersion::new(1, 0, 45) > FirmwareVersion::new(1, 0, 9));
    }

    #[test]
    fn h4_capabilities() {
        let info = DeviceInfo::from_responses(
            "1.2.27",
            &["Model:        NanoVNA-H 4", "Frequency:    10k ~ 1.5GHz"],
        )
        .unwrap();
        assert_eq!(info.board, "NanoVNA-H 4");
        assert_eq!(info.max_points, 401);
        assert_eq!(info.scan_mode, ScanMode::Binary);
    }

    #[test]
    fn older_firmware_uses_text() {
        let info = DeviceInfo::from_responses("0.7.3", &["Board: NanoVNA-H"]).unwrap();
        assert_eq!(info.max_points, 101);
        assert_eq!(info.scan_mode, ScanMode::Text);
    }

    #[test]
    fn rejects_firmware_without_scan() {
        assert!(DeviceInfo::from_responses("0.2.3", &[]).is_err());
    }
}
