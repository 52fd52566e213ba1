#![cfg_attr(not(test), no_std)]

// Must come first so the logging macros are visible to every module
#[macro_use]
mod fmt;

mod codec;
mod config;
mod control;
mod dac;
mod eeprom;
mod error;
mod frame;
mod gauge;
mod mcp2515;
mod protocol;
mod table;

#[cfg(test)]
mod testing;

pub use codec::*;
pub use config::*;
pub use control::*;
pub use dac::*;
pub use eeprom::*;
pub use error::*;
pub use frame::*;
pub use gauge::*;
pub use mcp2515::*;
pub use protocol::*;
pub use table::*;

pub use embedded_can::{ExtendedId, Id, StandardId};
