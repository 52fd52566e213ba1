//! Driver for the Microchip MCP2515 stand-alone CAN controller.

use embedded_can::Id;
use embedded_hal::{
    delay::DelayNs,
    spi::{ErrorKind, SpiDevice},
};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{config::Bitrate, id_from_raw, protocol::Interface, Frame, IdExt, IdKind, MAX_DLC};

// Config and status registers
const BFPCTRL: u8 = 0x0C;
const CANSTAT: u8 = 0x0E;
const CANCTRL: u8 = 0x0F;
const CNF3: u8 = 0x28;
const CANINTE: u8 = 0x2B;
const CANINTF: u8 = 0x2C;
const TXB0CTRL: u8 = 0x30;
const TXB0SIDH: u8 = 0x31;
const RXB0CTRL: u8 = 0x60;
const RXB1CTRL: u8 = 0x70;

// CANCTRL / CANSTAT
const REQOP_MASK: u8 = 0xE0;
const OPMOD_SHIFT: u8 = 5;
const CANCTRL_LOW_MASK: u8 = 0x1F; // ABAT, OSM, CLKEN, CLKPRE

// CANINTE
const RX0IE: u8 = 0x01;
const RX1IE: u8 = 0x02;

// TXBnCTRL
const TXREQ: u8 = 0x08;
const TXERR: u8 = 0x10;

// xSIDL
const SRR: u8 = 0x10;
const EXIDE: u8 = 0x08;
const SIDL_SID_SHIFT: u32 = 5;
const SIDL_EID_HIGH_MASK: u8 = 0x03;

// Identifier bit positions, extended layout
const EID_SIDL_LOW_SHIFT: u32 = 16; // id[17:16] -> SIDL<1:0>
const EID_SIDL_HIGH_SHIFT: u32 = 18; // id[20:18] -> SIDL<7:5>
const EID_SIDH_SHIFT: u32 = 21; // id[28:21] -> SIDH

// Identifier bit positions, standard layout
const SID_SIDH_SHIFT: u32 = 3; // id[10:3] -> SIDH

// xDLC
const RTR: u8 = 0x40;
const DLC_MASK: u8 = 0x0F;

/// RXBnSIDH through RXBnD7.
const RX_BUFFER_LEN: usize = 5 + MAX_DLC;

/// Time for the oscillator to come up after power-on and after RESET.
const STARTUP_DELAY_US: u32 = 100;

/// Polls of TXB0CTRL after requesting a transmission.
const TX_RETRIES: u8 = 10;

/// Polls of CANSTAT after requesting a mode change.
const MODE_RETRIES: u16 = 1024;

/// First register of each {SIDH, SIDL, EID8, EID0} group.
const FILTER_REGS: [u8; 6] = [0x00, 0x04, 0x08, 0x10, 0x14, 0x18];
const MASK_REGS: [u8; 2] = [0x20, 0x24];

/// Operating modes, encoded as in REQOP/OPMOD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Mode {
    Normal = 0,
    Sleep = 1,
    Loopback = 2,
    ListenOnly = 3,
    Config = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum RxBuffer {
    Rxb0 = 0,
    Rxb1 = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mask {
    /// Applies to receive buffer 0 (filters 0 and 1).
    Rxm0,
    /// Applies to receive buffer 1 (filters 2 to 5).
    Rxm1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Filter {
    Rxf0 = 0,
    Rxf1 = 1,
    Rxf2 = 2,
    Rxf3 = 3,
    Rxf4 = 4,
    Rxf5 = 5,
}

/// Which acceptance filter let the most recent frame in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterHit {
    Filter(Filter),
    /// Filter 0 matched but the frame rolled over into buffer 1.
    Rxf0Rollover,
    /// Filter 1 matched but the frame rolled over into buffer 1.
    Rxf1Rollover,
}

/// Result of the RX STATUS instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxStatus(pub u8);

impl RxStatus {
    pub fn filter_hit(self) -> FilterHit {
        match self.0 & 0x07 {
            6 => FilterHit::Rxf0Rollover,
            7 => FilterHit::Rxf1Rollover,
            n => FilterHit::Filter(Filter::try_from(n).unwrap_or(Filter::Rxf0)),
        }
    }

    /// Whether `buffer` holds an unread frame.
    pub fn holds(self, buffer: RxBuffer) -> bool {
        self.0 & (0x40 << u8::from(buffer)) != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CanError {
    #[error("SPI transfer to the CAN controller failed ({0:?})")]
    Spi(#[cfg_attr(feature = "defmt", defmt(Debug2Format))] ErrorKind),
    #[error("CAN controller did not enter {0:?} mode")]
    ModeTimeout(Mode),
    #[error("Transmission aborted with an error")]
    TransmitFailed,
    #[error("Transmission still pending after {0} polls")]
    TransmitTimeout(u8),
}

impl From<ErrorKind> for CanError {
    fn from(kind: ErrorKind) -> Self {
        Self::Spi(kind)
    }
}

/// Packs an identifier into the {SIDH, SIDL, EID8, EID0} register layout.
pub(crate) fn pack_id(id: Id) -> [u8; 4] {
    let raw = id.raw();

    match id.kind() {
        IdKind::Standard => [
            (raw >> SID_SIDH_SHIFT) as u8,
            ((raw << SIDL_SID_SHIFT) & 0xE0) as u8,
            0,
            0,
        ],
        IdKind::Extended => [
            (raw >> EID_SIDH_SHIFT) as u8,
            (((raw >> EID_SIDL_HIGH_SHIFT) << SIDL_SID_SHIFT) & 0xE0) as u8
                | EXIDE
                | ((raw >> EID_SIDL_LOW_SHIFT) as u8 & SIDL_EID_HIGH_MASK),
            (raw >> 8) as u8,
            raw as u8,
        ],
    }
}

/// Inverse of [`pack_id`], branching on the EXIDE bit of SIDL.
pub(crate) fn unpack_id([sidh, sidl, eid8, eid0]: [u8; 4]) -> Id {
    let sidh = u32::from(sidh);
    let sid_low = u32::from(sidl) >> SIDL_SID_SHIFT;

    if sidl & EXIDE != 0 {
        let raw = (sidh << EID_SIDH_SHIFT)
            | (sid_low << EID_SIDL_HIGH_SHIFT)
            | (u32::from(sidl & SIDL_EID_HIGH_MASK) << EID_SIDL_LOW_SHIFT)
            | (u32::from(eid8) << 8)
            | u32::from(eid0);
        id_from_raw(IdKind::Extended, raw)
    } else {
        id_from_raw(IdKind::Standard, (sidh << SID_SIDH_SHIFT) | sid_low)
    }
}

pub struct Mcp2515<SPI> {
    iface: Interface<SPI>,
}

impl<SPI> Mcp2515<SPI>
where
    SPI: SpiDevice,
{
    pub fn new(spi: SPI) -> Self {
        Self {
            iface: Interface::new(spi),
        }
    }

    pub fn release(self) -> SPI {
        self.iface.release()
    }

    #[cfg(test)]
    pub(crate) fn spi_mut(&mut self) -> &mut SPI {
        self.iface.spi_mut()
    }

    /// Resets the controller and leaves it in Config mode with CLKOUT and
    /// one-shot mode off, the RXnBF pins disabled, and both receive buffers
    /// filtering without rollover.
    pub fn init(&mut self, delay: &mut impl DelayNs) -> Result<(), CanError> {
        delay.delay_us(STARTUP_DELAY_US);
        self.iface.reset()?;
        delay.delay_us(STARTUP_DELAY_US);

        self.set_mode(Mode::Config)?;
        self.iface.bit_modify(CANCTRL, CANCTRL_LOW_MASK, 0x00)?;
        self.iface.write_reg(BFPCTRL, 0x00)?;
        self.iface.write_reg(RXB0CTRL, 0x00)?;
        self.iface.write_reg(RXB1CTRL, 0x00)?;

        debug!("mcp2515: reset, in config mode");
        Ok(())
    }

    /// Requests `mode` and polls until the controller reports it.
    pub fn set_mode(&mut self, mode: Mode) -> Result<(), CanError> {
        let request = u8::from(mode) << OPMOD_SHIFT;

        for _ in 0..MODE_RETRIES {
            self.iface.bit_modify(CANCTRL, REQOP_MASK, request)?;
            if self.mode()? == Some(mode) {
                return Ok(());
            }
        }

        warn!("mcp2515: stuck switching to {}", mode);
        Err(CanError::ModeTimeout(mode))
    }

    /// The mode reported by CANSTAT, or `None` for a reserved encoding.
    pub fn mode(&mut self) -> Result<Option<Mode>, CanError> {
        let opmod = self.iface.read_reg(CANSTAT)? >> OPMOD_SHIFT;
        Ok(Mode::try_from(opmod).ok())
    }

    /// Writes the three bit-timing registers. Only takes effect in Config
    /// mode.
    pub fn set_bit_timing(&mut self, cnf1: u8, cnf2: u8, cnf3: u8) -> Result<(), CanError> {
        // CNF3, CNF2 and CNF1 are consecutive
        self.iface.write_block(CNF3, &[cnf3, cnf2, cnf1])?;
        Ok(())
    }

    pub fn set_bitrate(&mut self, bitrate: Bitrate) -> Result<(), CanError> {
        let [cnf1, cnf2, cnf3] = bitrate.cnf();
        self.set_bit_timing(cnf1, cnf2, cnf3)
    }

    /// Enables or disables the receive-buffer-full interrupts on the INT pin.
    /// Pending flags are cleared when enabling.
    pub fn set_interrupts(&mut self, enable: bool) -> Result<(), CanError> {
        if enable {
            self.iface.write_reg(CANINTF, 0x00)?;
            self.iface.write_reg(CANINTE, RX0IE | RX1IE)?;
        } else {
            self.iface.write_reg(CANINTE, 0x00)?;
        }
        Ok(())
    }

    /// Only takes effect in Config mode.
    pub fn set_mask(&mut self, mask: Mask, id: Id) -> Result<(), CanError> {
        let base = match mask {
            Mask::Rxm0 => MASK_REGS[0],
            Mask::Rxm1 => MASK_REGS[1],
        };
        self.write_id(base, id)
    }

    /// Only takes effect in Config mode.
    pub fn set_filter(&mut self, filter: Filter, id: Id) -> Result<(), CanError> {
        self.write_id(FILTER_REGS[usize::from(u8::from(filter))], id)
    }

    fn write_id(&mut self, sidh: u8, id: Id) -> Result<(), CanError> {
        self.iface.write_block(sidh, &pack_id(id))?;
        Ok(())
    }

    pub fn rx_status(&mut self) -> Result<RxStatus, CanError> {
        Ok(RxStatus(self.iface.rx_status()?))
    }

    /// Reads the frame held by `buffer`, which also releases the buffer.
    pub fn receive(&mut self, buffer: RxBuffer) -> Result<Frame, CanError> {
        let mut regs = [0u8; RX_BUFFER_LEN];
        self.iface.read_rx_buffer(buffer.into(), &mut regs)?;

        let [sidh, sidl, eid8, eid0, dlc, ..] = regs;
        let id = unpack_id([sidh, sidl, eid8, eid0]);
        let rtr = if sidl & EXIDE != 0 {
            dlc & RTR != 0
        } else {
            sidl & SRR != 0
        };

        let mut data = [0u8; MAX_DLC];
        data.copy_from_slice(&regs[5..]);

        let frame = Frame::from_parts(id, rtr, dlc & DLC_MASK, data);
        trace!("mcp2515: received {} byte frame from {}", frame.dlc(), buffer);
        Ok(frame)
    }

    /// Loads `frame` into transmit buffer 0, requests transmission and waits
    /// for it to leave. A transmit error cancels the request.
    pub fn transmit(&mut self, frame: &Frame) -> Result<(), CanError> {
        let data = frame.data();
        let mut regs = [0u8; RX_BUFFER_LEN];
        regs[..4].copy_from_slice(&pack_id(frame.id()));
        regs[4] = (frame.dlc() as u8 & DLC_MASK) | if frame.is_remote() { RTR } else { 0 };
        regs[5..5 + data.len()].copy_from_slice(data);

        self.iface.write_block(TXB0SIDH, &regs[..5 + data.len()])?;
        self.iface.bit_modify(TXB0CTRL, TXREQ, TXREQ)?;

        let mut polls = 0u8;
        loop {
            let ctrl = self.iface.read_reg(TXB0CTRL)?;
            if ctrl & TXERR != 0 {
                self.iface.bit_modify(TXB0CTRL, TXREQ, 0)?;
                warn!("mcp2515: transmit error, request cancelled");
                return Err(CanError::TransmitFailed);
            }
            if ctrl & TXREQ == 0 {
                return Ok(());
            }

            polls += 1;
            if polls > TX_RETRIES {
                warn!("mcp2515: transmit still pending after {} polls", polls);
                return Err(CanError::TransmitTimeout(polls));
            }
        }
    }
}
