//! Control frames a host uses to read and rewrite calibration tables and
//! signal definitions over the bus.
//!
//! | Class          | Identifier (extended)           | Data payload                  |
//! |----------------|---------------------------------|-------------------------------|
//! | Table Control  | `base \| table << 5 \| row`      | key (i32 BE), value (u16 BE)  |
//! | Signal Control | `base \| slot`                   | first 7 bytes of a [`SigFmt`] record |
//!
//! A remote frame with either identifier asks the device to answer with the
//! data frame for that row or slot.

use embedded_can::{ExtendedId, Id};
use heapless::Vec;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    codec::{SigFmt, RECORD_SIZE},
    config::{Config, CONTROL_MASK, SIGNALS},
    table::{Row, ROW_SIZE},
    extended_id, Frame, IdExt, IdKind, MAX_DLC,
};

const TABLE_SHIFT: u32 = 5;
const TABLE_MASK: u32 = 0x07;
const ROW_MASK: u32 = 0x1F;
const SLOT_MASK: u32 = 0x0F;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ControlKind {
    Table = 0,
    Signal = 1,
}

impl ControlKind {
    /// Length of the data frame for this class, both ways.
    pub const fn payload_len(&self) -> usize {
        match self {
            Self::Table => ROW_SIZE as usize,
            Self::Signal => RECORD_SIZE - 1,
        }
    }

    fn base(&self, config: &Config) -> ExtendedId {
        match self {
            Self::Table => config.table_control,
            Self::Signal => config.signal_control,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Control {
    /// Request for a table row. Answered with a `WriteRow` frame.
    ReadRow { table: u8, row: u8 },
    WriteRow { table: u8, row: u8, entry: Row },
    /// Request for a signal definition. Answered with a `WriteSignal` frame.
    ReadSignal { slot: u8 },
    WriteSignal { slot: u8, sig: SigFmt },
}

/// Tells which control class `frame` belongs to, if any.
pub fn classify(config: &Config, frame: &Frame) -> Option<ControlKind> {
    let id = frame.id();
    if id.kind() != IdKind::Extended {
        return None;
    }

    [ControlKind::Table, ControlKind::Signal]
        .into_iter()
        .find(|kind| id.raw() & CONTROL_MASK == kind.base(config).as_raw())
}

impl Control {
    pub fn kind(&self) -> ControlKind {
        match self {
            Self::ReadRow { .. } | Self::WriteRow { .. } => ControlKind::Table,
            Self::ReadSignal { .. } | Self::WriteSignal { .. } => ControlKind::Signal,
        }
    }

    /// Parses a frame already known to be of class `kind`.
    pub fn from_frame(kind: ControlKind, frame: &Frame) -> Result<Self, ControlError> {
        let raw = frame.id().raw();
        let expected = kind.payload_len();

        if frame.is_remote() {
            // Hosts send requests with DLC 0; some mirror the reply length
            if frame.dlc() != 0 && frame.dlc() != expected {
                return Err(ControlError::RemoteLength(kind, frame.dlc()));
            }
        } else if frame.dlc() != expected {
            return Err(ControlError::WrongLength {
                kind,
                expected,
                actual: frame.dlc(),
            });
        }

        Ok(match kind {
            ControlKind::Table => {
                let table = ((raw >> TABLE_SHIFT) & TABLE_MASK) as u8;
                let row = (raw & ROW_MASK) as u8;

                if frame.is_remote() {
                    Self::ReadRow { table, row }
                } else {
                    let mut bytes = [0u8; ROW_SIZE as usize];
                    bytes.copy_from_slice(frame.data());
                    Self::WriteRow {
                        table,
                        row,
                        entry: Row::from_bytes(&bytes),
                    }
                }
            }
            ControlKind::Signal => {
                let slot = (raw & SLOT_MASK) as u8;
                if usize::from(slot) >= SIGNALS {
                    return Err(ControlError::SlotOutOfRange(slot));
                }

                if frame.is_remote() {
                    Self::ReadSignal { slot }
                } else {
                    let mut bytes = [0u8; RECORD_SIZE];
                    bytes[..expected].copy_from_slice(frame.data());
                    Self::WriteSignal {
                        slot,
                        sig: SigFmt::from_bytes(&bytes),
                    }
                }
            }
        })
    }

    fn id(&self, config: &Config) -> Id {
        let low = match *self {
            Self::ReadRow { table, row } | Self::WriteRow { table, row, .. } => {
                ((u32::from(table) & TABLE_MASK) << TABLE_SHIFT) | (u32::from(row) & ROW_MASK)
            }
            Self::ReadSignal { slot } | Self::WriteSignal { slot, .. } => {
                u32::from(slot) & SLOT_MASK
            }
        };

        Id::Extended(extended_id(self.kind().base(config).as_raw() | low))
    }

    /// Data bytes of the frame. Empty for requests.
    pub fn payload(&self) -> Vec<u8, MAX_DLC> {
        let mut result = Vec::new();

        match self {
            Self::ReadRow { .. } | Self::ReadSignal { .. } => {}
            Self::WriteRow { entry, .. } => {
                result.extend_from_slice(&entry.to_bytes()).unwrap();
            }
            Self::WriteSignal { sig, .. } => {
                let len = self.kind().payload_len();
                result.extend_from_slice(&sig.to_bytes()[..len]).unwrap();
            }
        }

        result
    }

    pub fn to_frame(&self, config: &Config) -> Frame {
        let id = self.id(config);

        match self {
            Self::ReadRow { .. } | Self::ReadSignal { .. } => {
                Frame::new_remote(id, 0).expect("DLC 0 is valid")
            }
            Self::WriteRow { .. } | Self::WriteSignal { .. } => {
                Frame::new_data(id, &self.payload()).expect("control payloads fit a frame")
            }
        }
    }
}

/// Reasons a control frame is rejected. Rejected frames get no reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlError {
    #[error("{kind:?} control frame carries {actual} bytes instead of {expected}")]
    WrongLength {
        kind: ControlKind,
        expected: usize,
        actual: usize,
    },
    #[error("{0:?} control request has an unexpected DLC ({1})")]
    RemoteLength(ControlKind, usize),
    #[error("Signal slot {0} does not exist")]
    SlotOutOfRange(u8),
}
