//! Build-time layout and run-time settings.
//!
//! EEPROM map (25LC160C, 2 KiB):
//!
//! | Range           | Contents                                   |
//! |-----------------|--------------------------------------------|
//! | `0x000..0x600`  | one calibration table per signal slot      |
//! | `0x600..0x640`  | one signal-format record per signal slot   |

use embedded_can::ExtendedId;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{codec::RECORD_SIZE, extended_id, table::Table, table::TABLE_SIZE};

/// Number of signal slots. Slot `n` owns calibration table `n` and drives
/// actuator channel `n`.
pub const SIGNALS: usize = 8;

/// EEPROM address of the first calibration table.
pub const TABLE_BASE: u16 = 0x000;

/// EEPROM address of the first signal-format record.
pub const SIGNAL_BASE: u16 = TABLE_BASE + SIGNALS as u16 * TABLE_SIZE;

/// Bits of a control frame's identifier that select the frame class. The
/// low byte carries the table/row or signal slot.
pub const CONTROL_MASK: u32 = 0x1FFF_FF00;

/// The calibration table belonging to signal `slot`.
pub const fn table(slot: u8) -> Table {
    Table::new(TABLE_BASE + slot as u16 * TABLE_SIZE)
}

/// EEPROM address of signal `slot`'s format record.
pub const fn signal_addr(slot: u8) -> u16 {
    SIGNAL_BASE + slot as u16 * RECORD_SIZE as u16
}

/// Nominal bit rates reachable from the controller's 12 MHz oscillator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Bitrate {
    /// Transmits and receives at 10 Kbit/s
    Rate10Kbit = 0,
    /// Transmits and receives at 20 Kbit/s
    Rate20Kbit = 1,
    /// Transmits and receives at 50 Kbit/s
    Rate50Kbit = 2,
    /// Transmits and receives at 100 Kbit/s
    Rate100Kbit = 3,
    /// Transmits and receives at 125 Kbit/s
    Rate125Kbit = 4,
    /// Transmits and receives at 250 Kbit/s
    Rate250Kbit = 5,
    /// Transmits and receives at 500 Kbit/s
    #[default]
    Rate500Kbit = 6,
}

impl Bitrate {
    /// CNF1, CNF2 and CNF3 for this rate with a 12 MHz oscillator.
    pub const fn cnf(self) -> [u8; 3] {
        match self {
            // BRP=30, PropSeg=6, PS1=6, PS2=7, SP=65%, SJW=4
            Self::Rate10Kbit => [0xDD, 0xAD, 0x06],
            // BRP=15, PropSeg=6, PS1=6, PS2=7, SP=65%, SJW=4
            Self::Rate20Kbit => [0xCE, 0xAD, 0x06],
            // BRP=6, PropSeg=6, PS1=6, PS2=7, SP=65%, SJW=4
            Self::Rate50Kbit => [0xC5, 0xAD, 0x06],
            // BRP=3, PropSeg=6, PS1=6, PS2=7, SP=65%, SJW=4
            Self::Rate100Kbit => [0xC2, 0xAD, 0x06],
            // BRP=4, PropSeg=3, PS1=4, PS2=4, SP=66.7%, SJW=4
            Self::Rate125Kbit => [0xC3, 0x9A, 0x03],
            // BRP=2, PropSeg=3, PS1=4, PS2=4, SP=66.7%, SJW=4
            Self::Rate250Kbit => [0xC1, 0x9A, 0x03],
            // BRP=1, PropSeg=3, PS1=4, PS2=4, SP=66.7%, SJW=4
            Self::Rate500Kbit => [0xC0, 0x9A, 0x03],
        }
    }
}

/// Run-time settings for a [`Gauge`](crate::Gauge).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub bitrate: Bitrate,
    /// Base identifier of Table Control frames: `base | table << 5 | row`.
    #[cfg_attr(feature = "defmt", defmt(Debug2Format))]
    pub table_control: ExtendedId,
    /// Base identifier of Signal Control frames: `base | slot`.
    #[cfg_attr(feature = "defmt", defmt(Debug2Format))]
    pub signal_control: ExtendedId,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bitrate: Bitrate::default(),
            table_control: extended_id(0x127_2000),
            signal_control: extended_id(0x127_2100),
        }
    }
}
