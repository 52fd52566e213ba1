//! Analog outputs driven by calibrated signal values.

use embedded_hal::spi::{ErrorKind, SpiDevice};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::protocol::Interface;

/// Sink for calibrated values, one channel per signal slot. Setting a
/// channel never fails from the caller's point of view.
pub trait Actuator {
    fn set_channel(&mut self, channel: u8, value: u16);
}

/// Reference voltage in millivolts.
pub const VREF_MV: u16 = 5000;

/// Full-scale code of a 10-bit converter.
const MAX_LEVEL: u32 = 1023;

/// D0 sits at bit 2 of the command word.
const LEVEL_SHIFT: u32 = 2;
const LEVEL_MASK: u16 = 0x0FFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Output {
    A = 0,
    B = 1,
}

impl Output {
    /// Channel select plus buffered reference, 1x gain, active.
    const fn config_bits(self) -> u16 {
        match self {
            Self::A => 0x7000,
            Self::B => 0xF000,
        }
    }
}

/// The 16-bit command word setting `output` to `mv` millivolts.
pub fn command_word(output: Output, mv: u16) -> u16 {
    let mv = u32::from(mv.min(VREF_MV));
    let level = (mv * (MAX_LEVEL + 1) / u32::from(VREF_MV)).min(MAX_LEVEL);

    output.config_bits() | ((level << LEVEL_SHIFT) as u16 & LEVEL_MASK)
}

/// Microchip MCP4912 dual 10-bit DAC.
pub struct Mcp4912<SPI> {
    iface: Interface<SPI>,
}

impl<SPI> Mcp4912<SPI>
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

    pub fn set(&mut self, output: Output, mv: u16) -> Result<(), ErrorKind> {
        self.iface
            .command(&command_word(output, mv).to_be_bytes())
    }

    /// Drives both outputs to 0 V.
    pub fn init(&mut self) -> Result<(), ErrorKind> {
        self.set(Output::A, 0)?;
        self.set(Output::B, 0)
    }
}

/// Two MCP4912s exposed as channels 0 to 3: DAC1 A, DAC1 B, DAC2 A, DAC2 B.
pub struct Mcp4912Pair<SPI1, SPI2> {
    pub dac1: Mcp4912<SPI1>,
    pub dac2: Mcp4912<SPI2>,
}

impl<SPI1, SPI2> Mcp4912Pair<SPI1, SPI2>
where
    SPI1: SpiDevice,
    SPI2: SpiDevice,
{
    pub const CHANNELS: u8 = 4;

    pub fn new(dac1: SPI1, dac2: SPI2) -> Self {
        Self {
            dac1: Mcp4912::new(dac1),
            dac2: Mcp4912::new(dac2),
        }
    }

    pub fn init(&mut self) -> Result<(), ErrorKind> {
        self.dac1.init()?;
        self.dac2.init()
    }
}

impl<SPI1, SPI2> Actuator for Mcp4912Pair<SPI1, SPI2>
where
    SPI1: SpiDevice,
    SPI2: SpiDevice,
{
    fn set_channel(&mut self, channel: u8, value: u16) {
        let output = if channel % 2 == 0 { Output::A } else { Output::B };

        let result = match channel {
            0 | 1 => self.dac1.set(output, value),
            2 | 3 => self.dac2.set(output, value),
            _ => {
                warn!("dac: no output for channel {}", channel);
                return;
            }
        };

        if result.is_err() {
            error!("dac: channel {} not set", channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        dac::{command_word, Actuator, Mcp4912, Mcp4912Pair, Output},
        testing::Recorder,
    };

    #[test]
    fn command_words() {
        assert_eq!(command_word(Output::A, 0), 0x7000);
        assert_eq!(command_word(Output::A, 2500), 0x7800);
        assert_eq!(command_word(Output::B, 5000), 0xFFFC);
        assert_eq!(command_word(Output::B, u16::MAX), 0xFFFC);
        assert_eq!(command_word(Output::A, 1000), 0x7330);
    }

    #[test]
    fn single_dac() {
        let mut dac = Mcp4912::new(Recorder::default());
        dac.init().unwrap();
        dac.set(Output::A, 2500).unwrap();

        assert_eq!(
            dac.release().transactions,
            vec![vec![0x70, 0x00], vec![0xF0, 0x00], vec![0x78, 0x00]]
        );
    }

    #[test]
    fn channels_map_to_outputs() {
        let mut pair = Mcp4912Pair::new(Recorder::default(), Recorder::default());
        pair.set_channel(1, 5000);
        pair.set_channel(2, 1000);
        pair.set_channel(5, 1000);

        assert_eq!(pair.dac1.release().transactions, vec![vec![0xFF, 0xFC]]);
        assert_eq!(pair.dac2.release().transactions, vec![vec![0x73, 0x30]]);
    }
}
