//! Driver for the 25LC160C, a 2 KiB SPI EEPROM with 16-byte write pages.

use embedded_hal::{
    delay::DelayNs,
    spi::{ErrorKind, SpiDevice},
};
use num_enum::IntoPrimitive;

use crate::protocol::Interface;

/// Bytes per write page. A burst that runs past the end of a page wraps to
/// its start, so writes are split on these boundaries.
pub const PAGE_SIZE: usize = 16;

/// Size of the part in bytes.
pub const CAPACITY: usize = 2048;

/// Status polls before a write cycle is considered hung.
const BUSY_RETRIES: u16 = 100;

/// Pause between status polls. Worst-case write cycle is 5 ms.
const BUSY_POLL_US: u32 = 100;

// Status register
const WIP: u8 = 0x01;
const WEL: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Opcode {
    Read = 0x03,
    Write = 0x02,
    WriteDisable = 0x04,
    WriteEnable = 0x06,
    ReadStatus = 0x05,
    WriteStatus = 0x01,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EepromError {
    #[error("SPI transfer to the EEPROM failed ({0:?})")]
    Spi(#[cfg_attr(feature = "defmt", defmt(Debug2Format))] ErrorKind),
    #[error("EEPROM write cycle did not finish")]
    Busy,
    #[error("EEPROM did not latch the write enable")]
    WriteEnableNotLatched,
    #[error("Access of {len} bytes at {addr:#05x} runs past the end of the EEPROM")]
    OutOfRange { addr: u16, len: usize },
}

impl From<ErrorKind> for EepromError {
    fn from(kind: ErrorKind) -> Self {
        Self::Spi(kind)
    }
}

/// Byte-addressed non-volatile storage.
pub trait Storage {
    fn read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), EepromError>;

    /// Persists `data` at `addr`. Returns once the data is durable.
    fn write(&mut self, addr: u16, data: &[u8]) -> Result<(), EepromError>;
}

pub struct Eeprom<SPI, D> {
    iface: Interface<SPI>,
    delay: D,
}

impl<SPI, D> Eeprom<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    pub fn new(spi: SPI, delay: D) -> Self {
        Self {
            iface: Interface::new(spi),
            delay,
        }
    }

    pub fn release(self) -> (SPI, D) {
        (self.iface.release(), self.delay)
    }

    /// Leaves the write-enable latch clear so nothing but [`Storage::write`]
    /// can modify the array.
    pub fn init(&mut self) -> Result<(), EepromError> {
        self.write_disable()
    }

    pub fn write_disable(&mut self) -> Result<(), EepromError> {
        self.iface.command(&[Opcode::WriteDisable.into()])?;
        Ok(())
    }

    pub fn status(&mut self) -> Result<u8, EepromError> {
        let mut status = [0u8];
        self.iface
            .command_read(&[Opcode::ReadStatus.into()], &mut status)?;
        Ok(status[0])
    }

    /// Polls until no write cycle is in progress.
    pub fn wait_idle(&mut self) -> Result<(), EepromError> {
        for _ in 0..BUSY_RETRIES {
            if self.status()? & WIP == 0 {
                return Ok(());
            }
            self.delay.delay_us(BUSY_POLL_US);
        }

        warn!("eeprom: still busy after {} polls", BUSY_RETRIES);
        Err(EepromError::Busy)
    }

    /// Sets the write-enable latch and checks that it took.
    pub fn write_enable(&mut self) -> Result<(), EepromError> {
        self.iface.command(&[Opcode::WriteEnable.into()])?;

        if self.status()? & WEL == 0 {
            error!("eeprom: write enable not latched");
            return Err(EepromError::WriteEnableNotLatched);
        }
        Ok(())
    }

    /// Writes one burst that must not cross a page boundary.
    fn write_page(&mut self, addr: u16, data: &[u8]) -> Result<(), EepromError> {
        self.wait_idle()?;
        self.write_enable()?;

        let [hi, lo] = addr.to_be_bytes();
        self.iface
            .command_write(&[Opcode::Write.into(), hi, lo], data)?;
        Ok(())
    }

    fn check_range(addr: u16, len: usize) -> Result<(), EepromError> {
        if usize::from(addr) + len > CAPACITY {
            return Err(EepromError::OutOfRange { addr, len });
        }
        Ok(())
    }
}

impl<SPI, D> Storage for Eeprom<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    fn read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), EepromError> {
        Self::check_range(addr, buf.len())?;
        self.wait_idle()?;

        let [hi, lo] = addr.to_be_bytes();
        self.iface.command_read(&[Opcode::Read.into(), hi, lo], buf)?;
        Ok(())
    }

    fn write(&mut self, addr: u16, data: &[u8]) -> Result<(), EepromError> {
        Self::check_range(addr, data.len())?;

        let mut addr = usize::from(addr);
        let mut rest = data;

        while !rest.is_empty() {
            let room = PAGE_SIZE - addr % PAGE_SIZE;
            let (chunk, tail) = rest.split_at(rest.len().min(room));

            self.write_page(addr as u16, chunk)?;
            trace!("eeprom: wrote {} bytes at {:#x}", chunk.len(), addr);

            addr += chunk.len();
            rest = tail;
        }

        // The last cycle must finish before the data counts as persisted.
        self.wait_idle()
    }
}
