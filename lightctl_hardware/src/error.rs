use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("serial port error: {0}")]
    Serial(String),
    #[error("port {0} not found")]
    PortNotFound(String),
    #[error("line exceeds {0} bytes without a terminator")]
    LineTooLong(usize),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
