//! Calibration curves: fixed-length arrays of (key, value) rows in EEPROM,
//! sorted by key, mapping raw signal values to actuator values.

use crate::{
    codec::RECORD_ORDER,
    eeprom::{EepromError, Storage},
};

/// Rows in every table.
pub const ROWS: u8 = 32;

/// Key (4 bytes) followed by value (2 bytes).
pub const ROW_SIZE: u16 = 6;

/// EEPROM footprint of one table.
pub const TABLE_SIZE: u16 = ROWS as u16 * ROW_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Row {
    pub key: i32,
    pub value: u16,
}

impl Row {
    pub fn to_bytes(&self) -> [u8; ROW_SIZE as usize] {
        let [a, b, c, d] = RECORD_ORDER.u32_to_bytes(self.key as u32);
        let [e, f] = RECORD_ORDER.u16_to_bytes(self.value);
        [a, b, c, d, e, f]
    }

    pub fn from_bytes(bytes: &[u8; ROW_SIZE as usize]) -> Self {
        let [a, b, c, d, e, f] = *bytes;
        Self {
            key: RECORD_ORDER.u32_from_bytes([a, b, c, d]) as i32,
            value: RECORD_ORDER.u16_from_bytes([e, f]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TableError {
    #[error("Row {0} is past the end of the table")]
    RowOutOfRange(u8),
    #[error("Table storage failed")]
    Storage(#[from] EepromError),
}

/// A table located at a fixed EEPROM offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Table {
    base: u16,
}

impl Table {
    pub const fn new(base: u16) -> Self {
        Self { base }
    }

    pub const fn base(&self) -> u16 {
        self.base
    }

    fn row_addr(&self, index: u8) -> Result<u16, TableError> {
        if index >= ROWS {
            return Err(TableError::RowOutOfRange(index));
        }
        Ok(self.base + u16::from(index) * ROW_SIZE)
    }

    pub fn write_row<S: Storage>(&self, rom: &mut S, index: u8, row: Row) -> Result<(), TableError> {
        let addr = self.row_addr(index)?;
        rom.write(addr, &row.to_bytes())?;
        debug!("table {=u16:#x}: row {} = ({}, {})", self.base, index, row.key, row.value);
        Ok(())
    }

    pub fn read_row<S: Storage>(&self, rom: &mut S, index: u8) -> Result<Row, TableError> {
        let addr = self.row_addr(index)?;
        let mut bytes = [0u8; ROW_SIZE as usize];
        rom.read(addr, &mut bytes)?;
        Ok(Row::from_bytes(&bytes))
    }

    /// Maps `key` through the curve. Keys between two rows interpolate
    /// linearly (truncating toward zero); keys outside the table clamp to the
    /// first or last value.
    pub fn lookup<S: Storage>(&self, rom: &mut S, key: i64) -> Result<u16, TableError> {
        let mut lower = self.read_row(rom, 0)?;
        if key <= i64::from(lower.key) {
            return Ok(lower.value);
        }

        for index in 1..ROWS {
            let upper = self.read_row(rom, index)?;
            let k2 = i64::from(upper.key);

            if key == k2 {
                return Ok(upper.value);
            }
            if key < k2 {
                return Ok(interpolate(lower, upper, key));
            }
            lower = upper;
        }

        Ok(lower.value)
    }
}

/// Requires `lower.key < key < upper.key`.
fn interpolate(lower: Row, upper: Row, key: i64) -> u16 {
    let (k1, v1) = (i64::from(lower.key), i64::from(lower.value));
    let (k2, v2) = (i64::from(upper.key), i64::from(upper.value));

    // Stays between v1 and v2, so it fits a u16
    (v1 + (v2 - v1) * (key - k1) / (k2 - k1)) as u16
}
