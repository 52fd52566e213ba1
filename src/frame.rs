use embedded_can::{ExtendedId, Id, StandardId};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Largest payload a classic CAN frame can carry.
pub const MAX_DLC: usize = 8;

/// A classic CAN 2.0 frame, laid out the way the controller buffers it.
///
/// The payload is always eight bytes wide internally; only the first `dlc`
/// bytes are meaningful. Remote frames carry a DLC but no data.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    #[cfg_attr(feature = "defmt", defmt(Debug2Format))]
    id: Id,
    rtr: bool,
    dlc: usize,
    data: [u8; MAX_DLC],
}

impl Frame {
    /// Data frame carrying a copy of `data`. Payloads longer than
    /// [`MAX_DLC`] have no frame.
    pub fn new_data(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_DLC {
            return None;
        }

        let mut copy = [0u8; MAX_DLC];
        copy[..data.len()].copy_from_slice(data);

        Some(Self {
            id: id.into(),
            rtr: false,
            dlc: data.len(),
            data: copy,
        })
    }

    /// Request for `dlc` bytes from whoever owns `id`. Refused past
    /// [`MAX_DLC`].
    pub fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > MAX_DLC {
            return None;
        }

        Some(Self {
            id: id.into(),
            rtr: true,
            dlc,
            data: [0; MAX_DLC],
        })
    }

    /// Builds a frame from register contents, clamping the DLC to 8 the way
    /// the controller does for larger codes.
    pub(crate) fn from_parts(id: Id, rtr: bool, dlc: u8, data: [u8; MAX_DLC]) -> Self {
        let dlc = usize::from(dlc).min(MAX_DLC);

        Self {
            id,
            rtr,
            dlc,
            data: if rtr { [0; MAX_DLC] } else { data },
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn dlc(&self) -> usize {
        self.dlc
    }

    /// The meaningful part of the payload. Empty for remote frames.
    pub fn data(&self) -> &[u8] {
        if self.rtr {
            &[]
        } else {
            &self.data[..self.dlc]
        }
    }

    pub fn is_remote(&self) -> bool {
        self.rtr
    }

    /// Length of the payload in bits, as seen by the signal codec.
    pub fn bit_len(&self) -> usize {
        self.data().len() * 8
    }
}

impl embedded_can::Frame for Frame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        Self::new_data(id, data)
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        Frame::new_remote(id, dlc)
    }

    fn is_extended(&self) -> bool {
        self.id.kind() == IdKind::Extended
    }

    fn is_remote_frame(&self) -> bool {
        self.rtr
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.dlc
    }

    fn data(&self) -> &[u8] {
        Frame::data(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum IdKind {
    #[default]
    Standard = 0,
    Extended = 1,
}

/// Helpers shared by everything that moves identifiers in and out of raw
/// integers.
pub trait IdExt {
    fn kind(self) -> IdKind;

    /// The identifier as a plain integer, without any kind flag.
    fn raw(self) -> u32;
}

impl IdExt for Id {
    fn kind(self) -> IdKind {
        match self {
            Id::Standard(_) => IdKind::Standard,
            Id::Extended(_) => IdKind::Extended,
        }
    }

    fn raw(self) -> u32 {
        match self {
            Id::Standard(id) => id.as_raw() as u32,
            Id::Extended(id) => id.as_raw(),
        }
    }
}

/// Mask of the 11 identifier bits of a standard frame.
pub const STANDARD_ID_MASK: u32 = 0x7FF;
/// Mask of the 29 identifier bits of an extended frame.
pub const EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;

/// Builds a standard identifier, discarding bits above bit 10.
pub fn standard_id(raw: u32) -> StandardId {
    StandardId::new((raw & STANDARD_ID_MASK) as u16).expect("masked to 11 bits")
}

/// Builds an extended identifier, discarding bits above bit 28.
pub fn extended_id(raw: u32) -> ExtendedId {
    ExtendedId::new(raw & EXTENDED_ID_MASK).expect("masked to 29 bits")
}

/// Builds an identifier of the given kind from a raw integer, masking
/// out-of-range bits.
pub fn id_from_raw(kind: IdKind, raw: u32) -> Id {
    match kind {
        IdKind::Standard => Id::Standard(standard_id(raw)),
        IdKind::Extended => Id::Extended(extended_id(raw)),
    }
}

#[cfg(test)]
mod tests {
    use embedded_can::{ExtendedId, Frame as _, Id, StandardId};

    use crate::{id_from_raw, Frame, IdExt, IdKind};

    #[test]
    fn data_frames() {
        let frame = Frame::new_data(StandardId::MAX, &[1, 2, 3]).unwrap();
        assert_eq!(frame.dlc(), 3);
        assert_eq!(frame.data(), &[1, 2, 3]);
        assert!(!frame.is_remote());
        assert!(!frame.is_extended());

        assert_eq!(Frame::new_data(StandardId::ZERO, &[0; 9]), None);
        assert_eq!(
            Frame::new_data(ExtendedId::MAX, &[]).unwrap().bit_len(),
            0
        );
    }

    #[test]
    fn remote_frames() {
        let frame = Frame::new_remote(ExtendedId::MAX, 6).unwrap();
        assert!(frame.is_remote());
        assert!(frame.is_extended());
        assert_eq!(frame.dlc(), 6);
        assert_eq!(frame.data(), &[] as &[u8]);

        assert_eq!(Frame::new_remote(ExtendedId::ZERO, 9), None);
    }

    #[test]
    fn register_dlc_is_clamped() {
        let frame = Frame::from_parts(Id::Standard(StandardId::ZERO), false, 15, [7; 8]);
        assert_eq!(frame.dlc(), 8);
        assert_eq!(frame.data(), &[7; 8]);
    }

    #[test]
    fn raw_ids_are_masked() {
        assert_eq!(
            id_from_raw(IdKind::Standard, 0xFFFF),
            Id::Standard(StandardId::MAX)
        );
        assert_eq!(
            id_from_raw(IdKind::Extended, 0xFFFF_FFFF),
            Id::Extended(ExtendedId::MAX)
        );
        assert_eq!(id_from_raw(IdKind::Extended, 0x123).raw(), 0x123);
        assert_eq!(id_from_raw(IdKind::Extended, 0x123).kind(), IdKind::Extended);
        assert_ne!(
            id_from_raw(IdKind::Standard, 0x123),
            id_from_raw(IdKind::Extended, 0x123)
        );
    }
}
