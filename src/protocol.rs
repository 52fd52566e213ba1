//! Chip-select framed command sequences on the shared SPI bus.
//!
//! Every method here is exactly one transaction on the underlying
//! [`SpiDevice`]: chip-select is asserted, the opcode and its operands are
//! clocked out, any response bytes are clocked in, and chip-select is
//! released. Nothing is retried and no status is interpreted at this level;
//! the only failure surfaced is the HAL's own bus error.

use embedded_hal::spi::{Error as _, ErrorKind, Operation, SpiDevice};
use num_enum::IntoPrimitive;

/// MCP2515 SPI instruction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Instruction {
    Reset = 0xC0,
    Read = 0x03,
    ReadRxBuffer = 0x90,
    Write = 0x02,
    LoadTxBuffer = 0x40,
    RequestToSend = 0x80,
    ReadStatus = 0xA0,
    RxStatus = 0xB0,
    BitModify = 0x05,
}

/// Register-level access to a device on the SPI bus.
pub struct Interface<SPI> {
    spi: SPI,
}

impl<SPI> Interface<SPI>
where
    SPI: SpiDevice,
{
    pub fn new(spi: SPI) -> Self {
        Self { spi }
    }

    /// Gives back the SPI device.
    pub fn release(self) -> SPI {
        self.spi
    }

    #[cfg(test)]
    pub(crate) fn spi_mut(&mut self) -> &mut SPI {
        &mut self.spi
    }

    /// Sends `bytes` in a single chip-select frame.
    pub fn command(&mut self, bytes: &[u8]) -> Result<(), ErrorKind> {
        self.spi.write(bytes).map_err(|e| e.kind())
    }

    /// Sends `header`, then clocks in `buf.len()` bytes, all in one
    /// chip-select frame.
    pub fn command_read(&mut self, header: &[u8], buf: &mut [u8]) -> Result<(), ErrorKind> {
        self.spi
            .transaction(&mut [Operation::Write(header), Operation::Read(buf)])
            .map_err(|e| e.kind())
    }

    /// Sends `header` followed by `payload` in one chip-select frame.
    pub fn command_write(&mut self, header: &[u8], payload: &[u8]) -> Result<(), ErrorKind> {
        self.spi
            .transaction(&mut [Operation::Write(header), Operation::Write(payload)])
            .map_err(|e| e.kind())
    }

    pub fn reset(&mut self) -> Result<(), ErrorKind> {
        self.command(&[Instruction::Reset.into()])
    }

    pub fn read_reg(&mut self, addr: u8) -> Result<u8, ErrorKind> {
        let mut value = [0u8];
        self.command_read(&[Instruction::Read.into(), addr], &mut value)?;
        Ok(value[0])
    }

    pub fn write_reg(&mut self, addr: u8, data: u8) -> Result<(), ErrorKind> {
        self.command(&[Instruction::Write.into(), addr, data])
    }

    /// Writes consecutive registers starting at `addr`.
    pub fn write_block(&mut self, addr: u8, data: &[u8]) -> Result<(), ErrorKind> {
        self.command_write(&[Instruction::Write.into(), addr], data)
    }

    /// Sets the bits of `addr` selected by `mask` to the matching bits of
    /// `data`, leaving the others untouched.
    pub fn bit_modify(&mut self, addr: u8, mask: u8, data: u8) -> Result<(), ErrorKind> {
        self.command(&[Instruction::BitModify.into(), addr, mask, data])
    }

    /// Reads consecutive registers starting at `addr`.
    pub fn read_block(&mut self, addr: u8, buf: &mut [u8]) -> Result<(), ErrorKind> {
        self.command_read(&[Instruction::Read.into(), addr], buf)
    }

    /// Quick poll of which filter matched and which buffer holds a frame.
    pub fn rx_status(&mut self) -> Result<u8, ErrorKind> {
        let mut status = [0u8];
        self.command_read(&[Instruction::RxStatus.into()], &mut status)?;
        Ok(status[0])
    }

    /// Reads receive buffer `n` starting at its SIDH register. Releasing
    /// chip-select afterwards clears the buffer's receive flag.
    pub fn read_rx_buffer(&mut self, n: u8, buf: &mut [u8]) -> Result<(), ErrorKind> {
        let instruction = u8::from(Instruction::ReadRxBuffer) | ((n & 1) << 2);
        self.command_read(&[instruction], buf)
    }
}
