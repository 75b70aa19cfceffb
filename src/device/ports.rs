use serialport::{SerialPortInfo, SerialPortType};
use tracing::debug;

use crate::result::{Error, Result};

/// USB vendor id of the STM32 virtual COM port NanoVNA firmware enumerates as.
pub const NANOVNA_VID: u16 = 0x0483;
/// USB product id of the same.
pub const NANOVNA_PID: u16 = 0x5740;

/// A USB serial port that may have an analyzer behind it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub vid: u16,
    pub pid: u16,
    pub product: Option<String>,
}

impl PortInfo {
    /// Whether the USB ids are those of a NanoVNA.
    pub fn is_nanovna(&self) -> bool {
        self.vid == NANOVNA_VID && self.pid == NANOVNA_PID
    }
}

/// Lists USB serial ports, likely analyzers first.
pub fn available_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(|e| Error::Connection {
        port: "*".into(),
        message: format!("cannot enumerate serial ports: {}", e),
    })?;
    Ok(usb_ports(ports))
}

fn usb_ports(ports: Vec<SerialPortInfo>) -> Vec<PortInfo> {
    let mut found: Vec<PortInfo> = ports
        .into_iter()
        .filter_map(|port| match port.port_type {
            SerialPortType::UsbPort(usb) => Some(PortInfo {
                name: port.port_name,
                vid: usb.vid,
                pid: usb.pid,
                product: usb.product,
            }),
            _ => {
                debug!(port = %port.port_name, "Skipping non-USB serial port");
                None
            }
        })
        .collect();
    // stable: keeps the OS order within each group
    found.sort_by_key(|port| !port.is_nanovna());
    found
}
