//! Mask codec: encodes requested field sets and maps reply tokens onto them.

use crate::error::ProtocolError;
use crate::fields::FieldLayout;
use crate::mask::FieldMask;
use std::collections::BTreeMap;

/// Decoded field values keyed by field name.
pub type FieldBag = BTreeMap<String, String>;

/// Result of walking a mask over a token list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeOutcome {
    /// Values of the defined fields that received a token.
    pub fields: FieldBag,
    /// Every mask bit that consumed a token, retired bits included.
    pub consumed: FieldMask,
    /// Index of the first token not consumed.
    pub next_index: usize,
    /// The tokens ran out before the last set bit.
    pub truncated: bool,
}

/// Stateless encoder/decoder for mask-selected replies.
pub struct MaskCodec;

impl MaskCodec {
    /// Encodes a requested field set into a mask for `layout`.
    pub fn encode<S: AsRef<str>>(
        layout: &FieldLayout,
        fields: &[S],
    ) -> Result<FieldMask, ProtocolError> {
        layout.mask_for(fields)
    }

    /// Walks every set bit of `mask` in wire order, taking one token per bit
    /// starting at `start`.
    ///
    /// Retired bits take a token too and the token is dropped; skipping them
    /// would shift every later field by one. When the tokens run out the
    /// walk stops and `consumed` holds exactly the bits that got a token.
    pub fn decode<S: AsRef<str>>(
        layout: &FieldLayout,
        tokens: &[S],
        mask: &FieldMask,
        start: usize,
    ) -> DecodeOutcome {
        let mut outcome = DecodeOutcome {
            next_index: start,
            ..DecodeOutcome::default()
        };

        for bit in mask.set_bits() {
            let Some(token) = tokens.get(outcome.next_index) else {
                outcome.truncated = true;
                break;
            };
            outcome.next_index += 1;
            outcome.consumed.insert(bit);

            if let Some(name) = layout.field_at(bit) {
                outcome
                    .fields
                    .insert(name.to_string(), token.as_ref().to_string());
            }
        }

        outcome
    }

    /// Fields that were requested but never delivered.
    pub fn reduced_mask(requested: &FieldMask, consumed: &FieldMask) -> FieldMask {
        *requested & !*consumed
    }
}
