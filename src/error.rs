use crate::{
    codec::SignalError, control::ControlError, eeprom::EepromError, mcp2515::CanError,
    table::TableError,
};

/// Any failure the gauge can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    #[error("EEPROM access failed")]
    Storage(#[from] EepromError),
    #[error("CAN controller failed")]
    Can(#[from] CanError),
    #[error("Signal could not be extracted")]
    Signal(#[from] SignalError),
    #[error("Calibration table access failed")]
    Table(#[from] TableError),
    #[error("Malformed control frame")]
    Control(#[from] ControlError),
}

/// Coarse classes of [`Error`], for callers that only decide between
/// retrying, reporting and resetting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Category {
    /// Out-of-range slot, row, address or signal geometry
    InvalidArgument,
    /// The EEPROM did not finish a write cycle or latch a write enable
    StorageTimeout,
    /// The CAN controller did not change mode or send a frame
    BusTimeout,
    /// A frame did not have the expected shape
    Decode,
    /// The SPI peripheral itself reported a failure
    Link,
}

impl Error {
    pub fn category(&self) -> Category {
        match self {
            Self::Storage(e) | Self::Table(TableError::Storage(e)) => match e {
                EepromError::Spi(_) => Category::Link,
                EepromError::Busy | EepromError::WriteEnableNotLatched => {
                    Category::StorageTimeout
                }
                EepromError::OutOfRange { .. } => Category::InvalidArgument,
            },
            Self::Table(TableError::RowOutOfRange(_)) => Category::InvalidArgument,
            Self::Can(CanError::Spi(_)) => Category::Link,
            Self::Can(_) => Category::BusTimeout,
            Self::Signal(SignalError::OutsidePayload { .. }) => Category::Decode,
            Self::Signal(_) => Category::InvalidArgument,
            Self::Control(ControlError::SlotOutOfRange(_)) => Category::InvalidArgument,
            Self::Control(_) => Category::Decode,
        }
    }
}
