use embedded_can::{Id, StandardId};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{id_from_raw, Frame, IdExt, IdKind};

/// Widest signal the codec can extract.
pub const MAX_SIGNAL_BITS: u8 = 32;

/// Size of a serialized [`SigFmt`].
pub const RECORD_SIZE: usize = 8;

/// Byte order of multi-byte integers in EEPROM records and control frames.
pub const RECORD_ORDER: ByteOrder = ByteOrder::BigEndian;

/// Set in a serialized identifier when it is extended.
pub const ID_EXTENDED_FLAG: u32 = 1 << 31;

const FLAG_LITTLE_ENDIAN: u8 = 0x80;
const FLAG_SIGNED: u8 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ByteOrder {
    /// The first payload byte holds the most significant bits
    #[default]
    BigEndian = 0,
    /// The first payload byte holds the least significant bits
    LittleEndian = 1,
}

impl ByteOrder {
    pub fn u32_to_bytes(self, value: u32) -> [u8; 4] {
        match self {
            Self::BigEndian => value.to_be_bytes(),
            Self::LittleEndian => value.to_le_bytes(),
        }
    }

    pub fn u32_from_bytes(self, bytes: [u8; 4]) -> u32 {
        match self {
            Self::BigEndian => u32::from_be_bytes(bytes),
            Self::LittleEndian => u32::from_le_bytes(bytes),
        }
    }

    pub fn u16_to_bytes(self, value: u16) -> [u8; 2] {
        match self {
            Self::BigEndian => value.to_be_bytes(),
            Self::LittleEndian => value.to_le_bytes(),
        }
    }

    pub fn u16_from_bytes(self, bytes: [u8; 2]) -> u16 {
        match self {
            Self::BigEndian => u16::from_be_bytes(bytes),
            Self::LittleEndian => u16::from_le_bytes(bytes),
        }
    }
}

/// Describes where a signal lives inside the payload of the frame that
/// carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SigFmt {
    /// Identifier of the carrying frame
    #[cfg_attr(feature = "defmt", defmt(Debug2Format))]
    pub id: Id,
    /// Bit position of the signal, bit 0 being the LSB of the first byte
    pub start: u8,
    /// Width in bits
    pub size: u8,
    pub order: ByteOrder,
    pub signed: bool,
}

impl SigFmt {
    /// Contents of a slot that was never configured. It matches no frame.
    pub const UNDEFINED: Self = Self {
        id: Id::Standard(StandardId::ZERO),
        start: 0,
        size: 0,
        order: ByteOrder::BigEndian,
        signed: false,
    };

    /// Whether the slot describes an extractable signal. Erased EEPROM
    /// (0xFF) and zeroed EEPROM both read back as undefined.
    pub fn is_defined(&self) -> bool {
        (1..=MAX_SIGNAL_BITS).contains(&self.size)
    }

    /// `[id (4), start, size, flags, pad]`
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let [a, b, c, d] = RECORD_ORDER.u32_to_bytes(encode_id(self.id));

        let mut flags = 0;
        if self.order == ByteOrder::LittleEndian {
            flags |= FLAG_LITTLE_ENDIAN;
        }
        if self.signed {
            flags |= FLAG_SIGNED;
        }

        [a, b, c, d, self.start, self.size, flags, 0]
    }

    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Self {
        let [a, b, c, d, start, size, flags, _] = *bytes;

        Self {
            id: decode_id(RECORD_ORDER.u32_from_bytes([a, b, c, d])),
            start,
            size,
            order: if flags & FLAG_LITTLE_ENDIAN != 0 {
                ByteOrder::LittleEndian
            } else {
                ByteOrder::BigEndian
            },
            signed: flags & FLAG_SIGNED != 0,
        }
    }
}

impl Default for SigFmt {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

/* Identifier records */

/// The identifier as a 32-bit word with [`ID_EXTENDED_FLAG`] marking
/// extended identifiers.
pub fn encode_id(id: Id) -> u32 {
    match id.kind() {
        IdKind::Standard => id.raw(),
        IdKind::Extended => id.raw() | ID_EXTENDED_FLAG,
    }
}

/// Inverse of [`encode_id`]. Bits that do not fit the identifier kind are
/// dropped.
pub fn decode_id(word: u32) -> Id {
    let kind = if word & ID_EXTENDED_FLAG != 0 {
        IdKind::Extended
    } else {
        IdKind::Standard
    };

    id_from_raw(kind, word)
}

/* Extraction */

/// A raw signal value in the narrowest container that holds its width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Raw {
    U8(u8),
    U16(u16),
    U32(u32),
    I8(i8),
    I16(i16),
    I32(i32),
}

impl Raw {
    /// Narrows the low `size` bits of `raw`, sign-extending from bit
    /// `size - 1` when `signed`.
    pub fn narrow(raw: u32, size: u8, signed: bool) -> Self {
        let size = size.clamp(1, MAX_SIGNAL_BITS);
        let shift = u32::from(MAX_SIGNAL_BITS - size);

        if signed {
            let value = ((raw << shift) as i32) >> shift;
            match size {
                1..=8 => Self::I8(value as i8),
                9..=16 => Self::I16(value as i16),
                _ => Self::I32(value),
            }
        } else {
            let value = (raw << shift) >> shift;
            match size {
                1..=8 => Self::U8(value as u8),
                9..=16 => Self::U16(value as u16),
                _ => Self::U32(value),
            }
        }
    }

    pub fn widen(self) -> i64 {
        match self {
            Self::U8(v) => v.into(),
            Self::U16(v) => v.into(),
            Self::U32(v) => v.into(),
            Self::I8(v) => v.into(),
            Self::I16(v) => v.into(),
            Self::I32(v) => v.into(),
        }
    }

    /// The two's complement bit pattern, sign-extended to 32 bits.
    pub fn bits(self) -> u32 {
        self.widen() as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SignalError {
    #[error("Signal has zero width")]
    Empty,
    #[error("Signal is {0} bits wide but at most 32 are supported")]
    TooWide(u8),
    #[error("Signal at bit {start} of width {size} does not fit a {len} byte payload")]
    OutsidePayload { start: u8, size: u8, len: usize },
}

/// The share of a signal held by one payload byte: `width` bits starting at
/// bit `lo` of `data[byte]`, the first of them being signal bit `offset`
/// counted from the start bit.
struct Span {
    byte: usize,
    lo: u32,
    width: u32,
    offset: u32,
}

impl Span {
    fn mask(&self) -> u32 {
        (1 << self.width) - 1
    }
}

/// Walks the bytes touched by `[start, start + size)` from the start byte
/// upward.
fn spans(start: u8, size: u8) -> impl Iterator<Item = Span> {
    let start = u32::from(start);
    let end = start + u32::from(size);
    let mut i = start;

    core::iter::from_fn(move || {
        if i >= end {
            return None;
        }

        let lo = i % 8;
        let width = (8 - lo).min(end - i);
        let span = Span {
            byte: (i / 8) as usize,
            lo,
            width,
            offset: i - start,
        };
        i += width;
        Some(span)
    })
}

fn check(sig: &SigFmt, len: usize) -> Result<(), SignalError> {
    if sig.size == 0 {
        return Err(SignalError::Empty);
    }
    if sig.size > MAX_SIGNAL_BITS {
        return Err(SignalError::TooWide(sig.size));
    }
    if usize::from(sig.start) + usize::from(sig.size) > len * 8 {
        return Err(SignalError::OutsidePayload {
            start: sig.start,
            size: sig.size,
            len,
        });
    }
    Ok(())
}

/// Extracts the raw value of `sig` from the payload of `frame`. The caller
/// is expected to have matched the frame identifier already.
pub fn pluck(sig: &SigFmt, frame: &Frame) -> Result<Raw, SignalError> {
    let data = frame.data();
    check(sig, data.len())?;

    let mut raw = 0u32;
    for span in spans(sig.start, sig.size) {
        let bits = (u32::from(data[span.byte]) >> span.lo) & span.mask();
        raw = match sig.order {
            // Earlier bytes are less significant
            ByteOrder::LittleEndian => raw | (bits << span.offset),
            // Earlier bytes are more significant
            ByteOrder::BigEndian => (raw << span.width) | bits,
        };
    }

    Ok(Raw::narrow(raw, sig.size, sig.signed))
}

/// Writes the low `sig.size` bits of `raw` into `data` where [`pluck`]
/// would find them. Bits outside the signal are left untouched.
pub fn stuff(sig: &SigFmt, raw: u32, data: &mut [u8]) -> Result<(), SignalError> {
    check(sig, data.len())?;

    let size = u32::from(sig.size);
    for span in spans(sig.start, sig.size) {
        let shift = match sig.order {
            ByteOrder::LittleEndian => span.offset,
            // Bits of later bytes sit below this span
            ByteOrder::BigEndian => size - span.offset - span.width,
        };
        let bits = (raw >> shift) & span.mask();
        let mask = (span.mask() << span.lo) as u8;

        data[span.byte] = (data[span.byte] & !mask) | ((bits << span.lo) as u8);
    }

    Ok(())
}
