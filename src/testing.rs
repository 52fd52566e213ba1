//! Bus fakes shared by the unit tests.

use std::{collections::VecDeque, convert::Infallible, vec::Vec};

use embedded_hal::{
    delay::DelayNs,
    spi::{ErrorKind, ErrorType, Operation, SpiDevice},
};

use crate::{
    dac::Actuator,
    mcp2515::{pack_id, unpack_id},
    Frame,
};

/// Splits a transaction into the bytes the host clocked out and fills every
/// read buffer from `respond`.
fn run<'a>(
    operations: &mut [Operation<'a, u8>],
    mut respond: impl FnMut(&[u8], usize) -> u8,
) -> Vec<u8> {
    let mut written = Vec::new();
    let mut read = 0;

    for op in operations.iter_mut() {
        match op {
            Operation::Write(bytes) => written.extend_from_slice(bytes),
            Operation::Read(buf) => {
                for byte in buf.iter_mut() {
                    *byte = respond(&written, read);
                    read += 1;
                }
            }
            Operation::Transfer(rx, tx) => {
                written.extend_from_slice(tx);
                for byte in rx.iter_mut() {
                    *byte = respond(&written, read);
                    read += 1;
                }
            }
            Operation::TransferInPlace(buf) => {
                written.extend_from_slice(buf);
                for byte in buf.iter_mut() {
                    *byte = respond(&written, read);
                    read += 1;
                }
            }
            Operation::DelayNs(_) => {}
        }
    }

    written
}

/// Logs every chip-select frame and answers reads from a queue.
#[derive(Default)]
pub struct Recorder {
    pub transactions: Vec<Vec<u8>>,
    responses: VecDeque<u8>,
}

impl Recorder {
    pub fn with_responses(responses: &[u8]) -> Self {
        Self {
            transactions: Vec::new(),
            responses: responses.iter().copied().collect(),
        }
    }
}

impl ErrorType for Recorder {
    type Error = Infallible;
}

impl SpiDevice for Recorder {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Infallible> {
        let responses = &mut self.responses;
        let written = run(operations, |_, _| responses.pop_front().unwrap_or(0));
        self.transactions.push(written);
        Ok(())
    }
}

/// A device whose every transfer fails.
pub struct Broken;

impl ErrorType for Broken {
    type Error = ErrorKind;
}

impl SpiDevice for Broken {
    fn transaction(&mut self, _: &mut [Operation<'_, u8>]) -> Result<(), ErrorKind> {
        Err(ErrorKind::Other)
    }
}

/// Counts delay calls instead of sleeping.
#[derive(Default, Clone)]
pub struct NoDelay {
    pub calls: usize,
}

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {
        self.calls += 1;
    }
}

/// What the modelled controller does with a transmit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Complete,
    Error,
    Stuck,
}

const CANSTAT: u8 = 0x0E;
const CANCTRL: u8 = 0x0F;
const CANINTF: u8 = 0x2C;
const TXB0CTRL: u8 = 0x30;
const TXB0SIDH: usize = 0x31;
const TXREQ: u8 = 0x08;
const TXERR: u8 = 0x10;
const RXB_SIDH: [usize; 2] = [0x61, 0x71];

/// Register-level model of an MCP2515.
pub struct Mcp2515Model {
    pub regs: [u8; 0x80],
    pub tx_outcome: TxOutcome,
    /// Message type and filter hit bits of the frame held by each receive
    /// buffer.
    pub rx_hits: [u8; 2],
    /// When set, CANSTAT ignores mode requests.
    pub frozen: bool,
    pub transactions: Vec<Vec<u8>>,
    /// Snapshots of TXB0SIDH..=TXB0D7 for each completed transmission.
    pub sent: Vec<[u8; 13]>,
}

impl Mcp2515Model {
    pub fn new() -> Self {
        let mut model = Self {
            regs: [0; 0x80],
            tx_outcome: TxOutcome::Complete,
            rx_hits: [0; 2],
            frozen: false,
            transactions: Vec::new(),
            sent: Vec::new(),
        };
        model.power_on();
        model
    }

    fn power_on(&mut self) {
        self.regs = [0; 0x80];
        self.regs[CANSTAT as usize] = 0x80;
        self.regs[CANCTRL as usize] = 0x87;
    }

    /// Places `frame` in receive buffer `n` and raises the matching flag.
    /// Only the low five bits of `rx_status` are kept; the buffer bits
    /// follow CANINTF.
    pub fn load_rx(&mut self, n: usize, frame: &Frame, rx_status: u8) {
        let base = RXB_SIDH[n];
        let [sidh, sidl, eid8, eid0] = pack_id(frame.id());
        let rtr_std = if frame.is_remote() && sidl & 0x08 == 0 { 0x10 } else { 0 };
        let rtr_ext = if frame.is_remote() && sidl & 0x08 != 0 { 0x40 } else { 0 };

        self.regs[base] = sidh;
        self.regs[base + 1] = sidl | rtr_std;
        self.regs[base + 2] = eid8;
        self.regs[base + 3] = eid0;
        self.regs[base + 4] = frame.dlc() as u8 | rtr_ext;
        self.regs[base + 5..base + 13].fill(0);
        self.regs[base + 5..base + 5 + frame.data().len()].copy_from_slice(frame.data());
        self.regs[CANINTF as usize] |= 1 << n;
        self.rx_hits[n] = rx_status & 0x1F;
    }

    /// RX STATUS as the chip reports it. While buffer 0 is full its filter
    /// hit is the one shown.
    pub fn rx_status(&self) -> u8 {
        let flags = self.regs[CANINTF as usize] & 0x03;
        let hit = match flags {
            0 => 0,
            0x02 => self.rx_hits[1],
            _ => self.rx_hits[0],
        };

        (flags << 6) | hit
    }

    /// Every completed transmission, decoded.
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.sent
            .iter()
            .map(|regs| {
                let id = unpack_id([regs[0], regs[1], regs[2], regs[3]]);
                let dlc = usize::from(regs[4] & 0x0F);
                if regs[4] & 0x40 != 0 {
                    Frame::new_remote(id, dlc).unwrap()
                } else {
                    Frame::new_data(id, &regs[5..5 + dlc]).unwrap()
                }
            })
            .collect()
    }

    fn store(&mut self, addr: u8, value: u8) {
        self.regs[addr as usize] = value;

        match addr {
            CANCTRL if !self.frozen => {
                self.regs[CANSTAT as usize] = (self.regs[CANSTAT as usize] & 0x1F) | (value & 0xE0);
            }
            TXB0CTRL if value & TXREQ != 0 => match self.tx_outcome {
                TxOutcome::Complete => {
                    self.regs[TXB0CTRL as usize] &= !TXREQ;
                    let mut snapshot = [0u8; 13];
                    snapshot.copy_from_slice(&self.regs[TXB0SIDH..TXB0SIDH + 13]);
                    self.sent.push(snapshot);
                }
                TxOutcome::Error => self.regs[TXB0CTRL as usize] |= TXERR,
                TxOutcome::Stuck => {}
            },
            _ => {}
        }
    }
}

impl ErrorType for Mcp2515Model {
    type Error = Infallible;
}

impl SpiDevice for Mcp2515Model {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Infallible> {
        // Every instruction the driver issues puts its writes before its
        // reads, so the written bytes are known before any read is served.
        let regs = self.regs;
        let rx_status = self.rx_status();
        let written = run(operations, |written, i| match written[0] {
            0x03 => regs[(written[1] as usize + i) & 0x7F],
            0xB0 => rx_status,
            op if op & 0xF9 == 0x90 => regs[RXB_SIDH[((op >> 2) & 1) as usize] + i],
            _ => 0,
        });

        match written[0] {
            0xC0 => self.power_on(),
            0x02 => {
                for (i, value) in written[2..].iter().enumerate() {
                    self.store(written[1] + i as u8, *value);
                }
            }
            0x05 => {
                let (addr, mask, data) = (written[1], written[2], written[3]);
                let value = (self.regs[addr as usize] & !mask) | (data & mask);
                self.store(addr, value);
            }
            op if op & 0xF9 == 0x90 => {
                self.regs[CANINTF as usize] &= !(1 << ((op >> 2) & 1));
            }
            _ => {}
        }

        self.transactions.push(written);
        Ok(())
    }
}

/// Model of a 25LC160C: 2 KiB, 16-byte pages, write-enable latch, and a write
/// cycle that stays busy for a configurable number of status polls.
pub struct EepromModel {
    pub mem: [u8; 2048],
    pub wel: bool,
    pub busy_polls: usize,
    /// Status polls each write cycle stays busy for.
    pub write_cycle: usize,
    pub stuck_busy: bool,
    pub ignore_write_enable: bool,
    /// Writes issued while the device was busy or without the latch set.
    pub violations: usize,
    pub transactions: Vec<Vec<u8>>,
}

impl EepromModel {
    pub fn new() -> Self {
        Self {
            mem: [0; 2048],
            wel: false,
            busy_polls: 0,
            write_cycle: 2,
            stuck_busy: false,
            ignore_write_enable: false,
            violations: 0,
            transactions: Vec::new(),
        }
    }

    fn status(&self) -> u8 {
        let wip = self.stuck_busy || self.busy_polls > 0;
        u8::from(wip) | (u8::from(self.wel) << 1)
    }

    /// The opcodes of every logged transaction, in order.
    pub fn opcodes(&self) -> Vec<u8> {
        self.transactions.iter().map(|t| t[0]).collect()
    }
}

impl ErrorType for EepromModel {
    type Error = Infallible;
}

impl SpiDevice for EepromModel {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Infallible> {
        let mem = self.mem;
        let status = self.status();
        let written = run(operations, |written, i| match written[0] {
            0x03 => {
                let addr = u16::from_be_bytes([written[1], written[2]]) as usize;
                mem[(addr + i) % mem.len()]
            }
            0x05 => status,
            _ => 0,
        });

        match written[0] {
            0x06 if !self.ignore_write_enable => self.wel = true,
            0x04 => self.wel = false,
            0x05 => self.busy_polls = self.busy_polls.saturating_sub(1),
            0x02 => {
                if !self.wel || self.busy_polls > 0 || self.stuck_busy {
                    self.violations += 1;
                } else {
                    let addr = u16::from_be_bytes([written[1], written[2]]) as usize;
                    let page = addr & !0x0F;
                    for (i, value) in written[3..].iter().enumerate() {
                        // Bursts wrap inside the page, as on the real part.
                        let offset = (addr + i - page) % 16;
                        self.mem[page + offset] = *value;
                    }
                    self.wel = false;
                    self.busy_polls = self.write_cycle;
                }
            }
            _ => {}
        }

        self.transactions.push(written);
        Ok(())
    }
}

/// Records every value handed to the actuator.
#[derive(Default)]
pub struct Outputs {
    pub set: Vec<(u8, u16)>,
}

impl Actuator for Outputs {
    fn set_channel(&mut self, channel: u8, value: u16) {
        self.set.push((channel, value));
    }
}
