use std::io::{Read, Write};
use std::time::Duration;

use lightctl_traits::{LineLink, LinkError, PortInfo};
use serialport::{SerialPort, SerialPortType};

use crate::error::{HwError, Result};
use crate::util::LineBuffer;

/// Every serial port the OS reports, with USB descriptors where available.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(|e| HwError::Serial(e.to_string()))?;
    Ok(ports
        .into_iter()
        .map(|p| match p.port_type {
            SerialPortType::UsbPort(usb) => PortInfo {
                port: p.port_name,
                description: usb.product,
                manufacturer: usb.manufacturer,
                serial_number: usb.serial_number,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                location: None,
            },
            _ => PortInfo {
                port: p.port_name,
                ..PortInfo::default()
            },
        })
        .collect())
}

/// `\n`-terminated line link over a serial port.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    buf: LineBuffer,
    info: PortInfo,
}

impl SerialLink {
    /// Open `path` at `baud`. Boards that reset on open get `settle` to boot
    /// before the first command.
    pub fn open(path: &str, baud: u32, settle: Duration) -> Result<Self> {
        let info = list_ports()?
            .into_iter()
            .find(|p| p.port.eq_ignore_ascii_case(path))
            .unwrap_or_else(|| PortInfo {
                port: path.to_string(),
                ..PortInfo::default()
            });
        let port = serialport::new(path, baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_millis(50))
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => HwError::PortNotFound(path.to_string()),
                _ => HwError::Serial(e.to_string()),
            })?;
        tracing::info!(port = path, baud, serial = ?info.serial_number, "serial port opened");
        if !settle.is_zero() {
            std::thread::sleep(settle);
        }
        Ok(Self {
            port,
            buf: LineBuffer::new(),
            info,
        })
    }

    fn fill(&mut self) -> Result<()> {
        let available = self
            .port
            .bytes_to_read()
            .map_err(|e| HwError::Serial(e.to_string()))?;
        if available == 0 {
            return Ok(());
        }
        let mut chunk = vec![0u8; available as usize];
        let n = self.port.read(&mut chunk)?;
        self.buf.extend(&chunk[..n])
    }
}

impl LineLink for SerialLink {
    fn write_line(&mut self, line: &str) -> std::result::Result<(), LinkError> {
        self.port.write_all(line.trim().as_bytes())?;
        self.port.write_all(b"\n")?;
        self.port.flush()?;
        tracing::trace!(line, "serial -> device");
        Ok(())
    }

    fn try_read_line(&mut self) -> std::result::Result<Option<String>, LinkError> {
        if let Some(line) = self.buf.pop_line() {
            return Ok(Some(line));
        }
        self.fill()?;
        let line = self.buf.pop_line();
        if let Some(l) = &line {
            tracing::trace!(line = %l, "serial <- device");
        }
        Ok(line)
    }

    fn clear_input(&mut self) -> std::result::Result<(), LinkError> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| HwError::Serial(e.to_string()))?;
        self.buf.clear();
        Ok(())
    }

    fn port_info(&self) -> PortInfo {
        self.info.clone()
    }
}
