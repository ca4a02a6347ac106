//! Field mask value type.
//!
//! A mask is 7 bytes wide. Its integer value is little-endian by byte
//! (`bytes[0]` holds bits 0-7), but the wire form writes `bytes[0]` as the
//! *leftmost* hex pair:
//!
//! ```text
//! value 0x0000_0000_0080_8030  ->  "30808000000000"
//!          bytes[0] = 0x30 ----------^^
//!          bytes[1] = 0x80 ------------^^
//!          bytes[2] = 0x80 --------------^^
//! ```
//!
//! Fields are consumed in the same left-to-right order: byte 0 first, and
//! within a byte from 0x80 down to 0x01. The server never sees an eighth
//! byte, so it is always zero.

use crate::{MASK_BYTES, NARROW_MASK_BYTES};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

/// One bit of a mask, addressed the way the wire addresses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaskBit {
    /// Byte index, 0 is the leftmost pair in the hex form.
    pub byte: usize,
    /// Single-bit value inside the byte (0x80 ... 0x01).
    pub bit: u8,
}

impl MaskBit {
    pub const fn new(byte: usize, bit: u8) -> Self {
        Self { byte, bit }
    }
}

/// 56-bit field selector.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct FieldMask {
    bytes: [u8; MASK_BYTES],
}

impl FieldMask {
    /// The empty mask.
    pub const fn empty() -> Self {
        Self {
            bytes: [0; MASK_BYTES],
        }
    }

    /// Builds a mask from raw bytes in wire order.
    pub const fn from_bytes(bytes: [u8; MASK_BYTES]) -> Self {
        Self { bytes }
    }

    /// Builds a mask from its integer value. Bits 56-63 are discarded.
    pub fn from_value(value: u64) -> Self {
        let le = value.to_le_bytes();
        let mut bytes = [0u8; MASK_BYTES];
        bytes.copy_from_slice(&le[..MASK_BYTES]);
        Self { bytes }
    }

    /// Returns the integer value (bits 56-63 always zero).
    pub fn value(&self) -> u64 {
        let mut le = [0u8; 8];
        le[..MASK_BYTES].copy_from_slice(&self.bytes);
        u64::from_le_bytes(le)
    }

    /// Replaces the whole value.
    pub fn set_value(&mut self, value: u64) {
        *self = Self::from_value(value);
    }

    /// Parses the 14-character wire form.
    ///
    /// Shorter input is padded with `0` on the right, longer input is cut to
    /// 14 characters. Anything that is not hex yields the empty mask.
    pub fn from_hex(s: &str) -> Self {
        let mut padded: String = s.trim().chars().take(MASK_BYTES * 2).collect();
        while padded.len() < MASK_BYTES * 2 {
            padded.push('0');
        }

        let mut bytes = [0u8; MASK_BYTES];
        match hex::decode_to_slice(&padded, &mut bytes) {
            Ok(()) => Self { bytes },
            Err(_) => Self::empty(),
        }
    }

    /// Renders the 14-character uppercase wire form.
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.bytes)
    }

    /// Builds a narrow (32-bit) mask. The most significant byte of `value`
    /// lands in byte 0, bytes 4-6 stay zero.
    pub fn from_narrow(value: u32) -> Self {
        let mut bytes = [0u8; MASK_BYTES];
        bytes[..NARROW_MASK_BYTES].copy_from_slice(&value.to_be_bytes());
        Self { bytes }
    }

    /// Returns the 32-bit value of a narrow mask (bytes 0-3).
    pub fn narrow_value(&self) -> u32 {
        let mut be = [0u8; NARROW_MASK_BYTES];
        be.copy_from_slice(&self.bytes[..NARROW_MASK_BYTES]);
        u32::from_be_bytes(be)
    }

    /// Parses the 8-character narrow wire form, padding and failing closed
    /// the same way as [`FieldMask::from_hex`].
    pub fn from_narrow_hex(s: &str) -> Self {
        let mut padded: String = s.trim().chars().take(NARROW_MASK_BYTES * 2).collect();
        while padded.len() < NARROW_MASK_BYTES * 2 {
            padded.push('0');
        }

        let mut bytes = [0u8; MASK_BYTES];
        match hex::decode_to_slice(&padded, &mut bytes[..NARROW_MASK_BYTES]) {
            Ok(()) => Self { bytes },
            Err(_) => Self::empty(),
        }
    }

    /// Renders bytes 0-3 as 8 uppercase hex characters.
    pub fn to_narrow_hex(&self) -> String {
        hex::encode_upper(&self.bytes[..NARROW_MASK_BYTES])
    }

    /// Returns whether bytes 4-6 are all zero.
    pub fn is_narrow(&self) -> bool {
        self.bytes[NARROW_MASK_BYTES..].iter().all(|b| *b == 0)
    }

    /// Overwrites one byte. Indexes outside 0..7 are ignored.
    pub fn set_byte(&mut self, index: usize, value: u8) {
        if let Some(slot) = self.bytes.get_mut(index) {
            *slot = value;
        }
    }

    /// Returns one byte, or zero outside 0..7.
    pub fn byte(&self, index: usize) -> u8 {
        self.bytes.get(index).copied().unwrap_or(0)
    }

    /// Returns the raw bytes in wire order.
    pub fn bytes(&self) -> &[u8; MASK_BYTES] {
        &self.bytes
    }

    /// Returns a copy with `bit` set.
    pub fn with_bit(mut self, bit: MaskBit) -> Self {
        self.insert(bit);
        self
    }

    /// Sets a single bit.
    pub fn insert(&mut self, bit: MaskBit) {
        if let Some(slot) = self.bytes.get_mut(bit.byte) {
            *slot |= bit.bit;
        }
    }

    /// Returns whether `bit` is set.
    pub fn contains(&self, bit: MaskBit) -> bool {
        self.byte(bit.byte) & bit.bit != 0
    }

    /// Returns whether every bit of `other` is also set here.
    pub fn covers(&self, other: &FieldMask) -> bool {
        (*other & !*self).is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> u32 {
        self.bytes.iter().map(|b| b.count_ones()).sum()
    }

    /// Iterates set bits in wire order: byte 0 first, 0x80 down to 0x01.
    pub fn set_bits(&self) -> impl Iterator<Item = MaskBit> + '_ {
        self.bytes.iter().enumerate().flat_map(|(byte, value)| {
            (0..8u8)
                .rev()
                .map(move |shift| 1u8 << shift)
                .filter(move |bit| value & bit != 0)
                .map(move |bit| MaskBit::new(byte, bit))
        })
    }
}

impl BitOr for FieldMask {
    type Output = FieldMask;

    fn bitor(mut self, rhs: Self) -> Self::Output {
        self |= rhs;
        self
    }
}

impl BitOrAssign for FieldMask {
    fn bitor_assign(&mut self, rhs: Self) {
        for (a, b) in self.bytes.iter_mut().zip(rhs.bytes) {
            *a |= b;
        }
    }
}

impl BitAnd for FieldMask {
    type Output = FieldMask;

    fn bitand(mut self, rhs: Self) -> Self::Output {
        self &= rhs;
        self
    }
}

impl BitAndAssign for FieldMask {
    fn bitand_assign(&mut self, rhs: Self) {
        for (a, b) in self.bytes.iter_mut().zip(rhs.bytes) {
            *a &= b;
        }
    }
}

impl Not for FieldMask {
    type Output = FieldMask;

    /// Inverts the 7 mask bytes; the implicit eighth byte stays zero.
    fn not(mut self) -> Self::Output {
        for b in self.bytes.iter_mut() {
            *b = !*b;
        }
        self
    }
}

impl fmt::Display for FieldMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FieldMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldMask({})", self.to_hex())
    }
}

impl From<String> for FieldMask {
    fn from(s: String) -> Self {
        FieldMask::from_hex(&s)
    }
}

impl From<FieldMask> for String {
    fn from(mask: FieldMask) -> Self {
        mask.to_hex()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_value_to_hex_byte_order() {
        assert_eq!(FieldMask::from_value(0x30).to_hex(), "30000000000000");
        assert_eq!(FieldMask::from_value(0x80_8030).to_hex(), "30808000000000");
        assert_eq!(
            FieldMask::from_value(0x0007_0605_0403_0201).to_hex(),
            "01020304050607"
        );
    }

    #[test]
    fn test_eighth_byte_is_dropped() {
        let mask = FieldMask::from_value(0xFF00_0000_0000_0001);
        assert_eq!(mask.value(), 1);
        assert_eq!(mask.to_hex(), "01000000000000");
    }

    #[test]
    fn test_set_byte() {
        let mut mask = FieldMask::empty();
        mask.set_byte(0, 0xAA);
        assert_eq!(mask.to_hex(), "AA000000000000");
        mask.set_byte(1, 0xBB);
        assert_eq!(mask.to_hex(), "AABB0000000000");
        mask.set_byte(6, 0xFF);
        assert_eq!(mask.to_hex(), "AABB00000000FF");

        // Out of range writes are ignored.
        mask.set_byte(7, 0x11);
        assert_eq!(mask.to_hex(), "AABB00000000FF");
        assert_eq!(mask.byte(7), 0);
    }

    #[test]
    fn test_from_hex_padding_and_truncation() {
        assert_eq!(FieldMask::from_hex("30").to_hex(), "30000000000000");
        assert_eq!(FieldMask::from_hex("ab").to_hex(), "AB000000000000");
        assert_eq!(
            FieldMask::from_hex("0102030405060799").to_hex(),
            "01020304050607"
        );
        assert_eq!(FieldMask::from_hex("").to_hex(), "00000000000000");
    }

    #[test]
    fn test_from_hex_fails_closed() {
        assert!(FieldMask::from_hex("zz808000000000").is_empty());
        assert!(FieldMask::from_hex("30 80").is_empty());
    }

    #[test]
    fn test_not_keeps_width() {
        let inverted = !FieldMask::empty();
        assert_eq!(inverted.to_hex(), "FFFFFFFFFFFFFF");
        assert_eq!(inverted.value(), 0x00FF_FFFF_FFFF_FFFF);
    }

    #[test]
    fn test_operators() {
        let a = FieldMask::from_hex("F0000000000000");
        let b = FieldMask::from_hex("30800000000000");
        assert_eq!((a | b).to_hex(), "F0800000000000");
        assert_eq!((a & b).to_hex(), "30000000000000");
        assert_eq!((b & !a).to_hex(), "00800000000000");

        let mut c = a;
        c |= b;
        c &= FieldMask::from_hex("0F800000000000");
        assert_eq!(c.to_hex(), "00800000000000");
    }

    #[test]
    fn test_set_bits_wire_order() {
        let mask = FieldMask::from_hex("30808000000000");
        let bits: Vec<MaskBit> = mask.set_bits().collect();
        assert_eq!(
            bits,
            vec![
                MaskBit::new(0, 0x20),
                MaskBit::new(0, 0x10),
                MaskBit::new(1, 0x80),
                MaskBit::new(2, 0x80),
            ]
        );
        assert_eq!(mask.count_ones(), 4);
    }

    #[test]
    fn test_narrow_masks() {
        let mask = FieldMask::from_narrow(0x7ff8_fef9);
        assert_eq!(mask.to_narrow_hex(), "7FF8FEF9");
        assert_eq!(mask.to_hex(), "7FF8FEF9000000");
        assert_eq!(mask.narrow_value(), 0x7ff8_fef9);
        assert!(mask.is_narrow());
        assert_eq!(FieldMask::from_narrow_hex("7ff8fef9"), mask);
        assert!(FieldMask::from_narrow_hex("nothex!!").is_empty());
        assert!(!FieldMask::from_hex("00000000000001").is_narrow());
    }

    #[test]
    fn test_covers() {
        let requested = FieldMask::from_hex("F0000000000000");
        assert!(requested.covers(&FieldMask::from_hex("30000000000000")));
        assert!(!requested.covers(&FieldMask::from_hex("30800000000000")));
    }

    #[test]
    fn test_serde_uses_wire_form() {
        // serde(from/into String) keeps the stored form readable.
        let mask = FieldMask::from_hex("30808000000000");
        let s: String = mask.into();
        assert_eq!(s, "30808000000000");
        assert_eq!(FieldMask::from(s), mask);
    }

    proptest! {
        #[test]
        fn prop_hex_round_trip(bytes in proptest::array::uniform7(any::<u8>())) {
            let mask = FieldMask::from_bytes(bytes);
            let hex = mask.to_hex();
            prop_assert_eq!(hex.len(), 14);
            prop_assert_eq!(FieldMask::from_hex(&hex), mask);
        }

        #[test]
        fn prop_value_round_trip(value in 0u64..(1u64 << 56)) {
            prop_assert_eq!(FieldMask::from_value(value).value(), value);
        }

        #[test]
        fn prop_set_bits_matches_popcount(bytes in proptest::array::uniform7(any::<u8>())) {
            let mask = FieldMask::from_bytes(bytes);
            prop_assert_eq!(mask.set_bits().count() as u32, mask.count_ones());
        }
    }
}
