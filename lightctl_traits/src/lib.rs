pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// Boxed error used at the transport boundary.
pub type LinkError = Box<dyn std::error::Error + Send + Sync>;

/// USB/serial descriptor of the port a device is attached to.
///
/// Every field is optional because clone boards and virtual ports report
/// only a subset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortInfo {
    pub port: String,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub location: Option<String>,
}

/// Line-oriented, `\n`-terminated ASCII link to a stimulus controller.
pub trait LineLink {
    /// Send one line. Implementations append the terminator.
    fn write_line(&mut self, line: &str) -> Result<(), LinkError>;

    /// Non-blocking read: a complete line if one is buffered, `None` otherwise.
    /// The returned line has its terminator and surrounding whitespace removed.
    fn try_read_line(&mut self) -> Result<Option<String>, LinkError>;

    /// Drop any buffered input.
    fn clear_input(&mut self) -> Result<(), LinkError> {
        while self.try_read_line()?.is_some() {}
        Ok(())
    }

    /// Descriptor of the underlying port, used to derive a stable device identity.
    fn port_info(&self) -> PortInfo {
        PortInfo::default()
    }
}

impl<L: LineLink + ?Sized> LineLink for &mut L {
    fn write_line(&mut self, line: &str) -> Result<(), LinkError> {
        (**self).write_line(line)
    }

    fn try_read_line(&mut self) -> Result<Option<String>, LinkError> {
        (**self).try_read_line()
    }

    fn clear_input(&mut self) -> Result<(), LinkError> {
        (**self).clear_input()
    }

    fn port_info(&self) -> PortInfo {
        (**self).port_info()
    }
}

impl<L: LineLink + ?Sized> LineLink for Box<L> {
    fn write_line(&mut self, line: &str) -> Result<(), LinkError> {
        (**self).write_line(line)
    }

    fn try_read_line(&mut self) -> Result<Option<String>, LinkError> {
        (**self).try_read_line()
    }

    fn clear_input(&mut self) -> Result<(), LinkError> {
        (**self).clear_input()
    }

    fn port_info(&self) -> PortInfo {
        (**self).port_info()
    }
}
