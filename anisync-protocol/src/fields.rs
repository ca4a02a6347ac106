//! Field layouts: which named field sits behind which mask bit.
//!
//! A layout is a 7 x 8 table in wire order. Slot `[byte][0]` is bit 0x80 of
//! that byte, slot `[byte][7]` is bit 0x01. `None` marks a retired or unused
//! bit: the server may still send a token for it, so the codec consumes it.

use crate::error::ProtocolError;
use crate::mask::{FieldMask, MaskBit};
use crate::{MASK_BYTES, NARROW_MASK_BYTES};

type Slots = [[Option<&'static str>; 8]; MASK_BYTES];

/// Named mapping from mask bits to fields.
#[derive(Debug)]
pub struct FieldLayout {
    name: &'static str,
    width: usize,
    slots: Slots,
}

impl FieldLayout {
    pub const fn new(name: &'static str, width: usize, slots: Slots) -> Self {
        Self { name, width, slots }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Mask width in bytes (7, or 4 for narrow layouts).
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn is_narrow(&self) -> bool {
        self.width == NARROW_MASK_BYTES
    }

    /// Returns the field behind `bit`, or `None` for a retired bit.
    pub fn field_at(&self, bit: MaskBit) -> Option<&'static str> {
        let index = bit.bit.leading_zeros() as usize;
        self.slots
            .get(bit.byte)
            .and_then(|row| row.get(index))
            .copied()
            .flatten()
    }

    /// Returns the bit carrying `field`.
    pub fn bit_of(&self, field: &str) -> Option<MaskBit> {
        self.slots.iter().enumerate().find_map(|(byte, row)| {
            row.iter()
                .position(|slot| *slot == Some(field))
                .map(|index| MaskBit::new(byte, 0x80 >> index))
        })
    }

    /// Encodes a requested field set into a mask.
    pub fn mask_for<S: AsRef<str>>(&self, fields: &[S]) -> Result<FieldMask, ProtocolError> {
        let mut mask = FieldMask::empty();
        for field in fields {
            let field = field.as_ref();
            let bit = self.bit_of(field).ok_or_else(|| ProtocolError::UnknownField {
                layout: self.name,
                field: field.to_string(),
            })?;
            mask.insert(bit);
        }
        Ok(mask)
    }

    /// Mask with every defined (non-retired) field set.
    pub fn all_fields(&self) -> FieldMask {
        let mut mask = FieldMask::empty();
        for (byte, row) in self.slots.iter().enumerate() {
            for (index, slot) in row.iter().enumerate() {
                if slot.is_some() {
                    mask.insert(MaskBit::new(byte, 0x80 >> index));
                }
            }
        }
        mask
    }

    /// Field names in wire order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.slots.iter().flat_map(|row| row.iter().filter_map(|s| *s))
    }

    /// Names of the fields selected by `mask`, in wire order.
    pub fn fields_in(&self, mask: &FieldMask) -> Vec<&'static str> {
        mask.set_bits().filter_map(|bit| self.field_at(bit)).collect()
    }

    /// Renders a mask in this layout's wire width.
    pub fn render(&self, mask: &FieldMask) -> String {
        if self.is_narrow() {
            mask.to_narrow_hex()
        } else {
            mask.to_hex()
        }
    }

    /// Parses a mask in this layout's wire width.
    pub fn parse(&self, s: &str) -> FieldMask {
        if self.is_narrow() {
            FieldMask::from_narrow_hex(s)
        } else {
            FieldMask::from_hex(s)
        }
    }
}

const NONE8: [Option<&str>; 8] = [None; 8];

/// ANIME command `amask`.
pub static ANIME_AMASK: FieldLayout = FieldLayout::new(
    "anime",
    MASK_BYTES,
    [
        [
            Some("aid"),
            Some("dateflags"),
            Some("year"),
            Some("type"),
            Some("related_aid_list"),
            Some("related_aid_type"),
            None,
            None,
        ],
        [
            Some("romaji_name"),
            Some("kanji_name"),
            Some("english_name"),
            Some("other_name"),
            Some("short_name_list"),
            Some("synonym_list"),
            None,
            None,
        ],
        [
            Some("episodes"),
            Some("highest_episode_number"),
            Some("special_ep_count"),
            Some("air_date"),
            Some("end_date"),
            Some("url"),
            Some("picname"),
            None,
        ],
        [
            Some("rating"),
            Some("vote_count"),
            Some("temp_rating"),
            Some("temp_vote_count"),
            Some("average_review_rating"),
            Some("review_count"),
            Some("award_list"),
            Some("is_18_restricted"),
        ],
        [
            None,
            Some("ann_id"),
            Some("allcinema_id"),
            Some("animenfo_id"),
            Some("tag_name_list"),
            Some("tag_id_list"),
            Some("tag_weight_list"),
            Some("date_record_updated"),
        ],
        [
            Some("character_id_list"),
            None,
            None,
            None,
            None,
            None,
            None,
            None,
        ],
        [
            Some("specials_count"),
            Some("credits_count"),
            Some("other_count"),
            Some("trailer_count"),
            Some("parody_count"),
            None,
            None,
            None,
        ],
    ],
);

/// FILE command `fmask` (narrow).
pub static FILE_FMASK: FieldLayout = FieldLayout::new(
    "file",
    NARROW_MASK_BYTES,
    [
        [
            None,
            Some("aid"),
            Some("eid"),
            Some("gid"),
            Some("mylist_id"),
            Some("other_episodes"),
            Some("is_deprecated"),
            Some("state"),
        ],
        [
            Some("size"),
            Some("ed2k"),
            Some("md5"),
            Some("sha1"),
            Some("crc32"),
            None,
            None,
            None,
        ],
        [
            Some("quality"),
            Some("source"),
            Some("audio_codec"),
            Some("audio_bitrate"),
            Some("video_codec"),
            Some("video_bitrate"),
            Some("video_resolution"),
            Some("file_type"),
        ],
        [
            Some("dub_language"),
            Some("sub_language"),
            Some("length_in_seconds"),
            Some("description"),
            Some("aired_date"),
            None,
            None,
            Some("anidb_file_name"),
        ],
        NONE8,
        NONE8,
        NONE8,
    ],
);

/// FILE command `amask` (narrow): anime, episode and group fields that ride
/// along with a file reply.
pub static FILE_AMASK: FieldLayout = FieldLayout::new(
    "file-anime",
    NARROW_MASK_BYTES,
    [
        [
            Some("anime_total_episodes"),
            Some("highest_episode_number"),
            Some("year"),
            Some("type"),
            Some("related_aid_list"),
            Some("related_aid_type"),
            Some("category_list"),
            None,
        ],
        [
            Some("romaji_name"),
            Some("kanji_name"),
            Some("english_name"),
            Some("other_name"),
            Some("short_name_list"),
            Some("synonym_list"),
            None,
            None,
        ],
        [
            Some("epno"),
            Some("ep_name"),
            Some("ep_romaji_name"),
            Some("ep_kanji_name"),
            Some("episode_rating"),
            Some("episode_vote_count"),
            None,
            None,
        ],
        [
            Some("group_name"),
            Some("group_short_name"),
            None,
            None,
            None,
            None,
            None,
            Some("date_aid_record_updated"),
        ],
        NONE8,
        NONE8,
        NONE8,
    ],
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anime_field_positions() {
        assert_eq!(ANIME_AMASK.bit_of("aid"), Some(MaskBit::new(0, 0x80)));
        assert_eq!(ANIME_AMASK.bit_of("year"), Some(MaskBit::new(0, 0x20)));
        assert_eq!(ANIME_AMASK.bit_of("type"), Some(MaskBit::new(0, 0x10)));
        assert_eq!(ANIME_AMASK.bit_of("episodes"), Some(MaskBit::new(2, 0x80)));
        assert_eq!(
            ANIME_AMASK.bit_of("is_18_restricted"),
            Some(MaskBit::new(3, 0x01))
        );
        assert_eq!(
            ANIME_AMASK.bit_of("parody_count"),
            Some(MaskBit::new(6, 0x08))
        );
        assert_eq!(ANIME_AMASK.bit_of("nope"), None);
    }

    #[test]
    fn test_retired_bits_have_no_field() {
        assert_eq!(ANIME_AMASK.field_at(MaskBit::new(0, 0x02)), None);
        assert_eq!(ANIME_AMASK.field_at(MaskBit::new(4, 0x80)), None);
        assert_eq!(ANIME_AMASK.field_at(MaskBit::new(5, 0x40)), None);
        assert_eq!(FILE_FMASK.field_at(MaskBit::new(0, 0x80)), None);
    }

    #[test]
    fn test_mask_for() {
        let mask = ANIME_AMASK
            .mask_for(&["year", "type", "romaji_name", "episodes"])
            .unwrap();
        assert_eq!(mask.to_hex(), "30808000000000");

        let err = ANIME_AMASK.mask_for(&["year", "bogus"]).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownField { .. }));
    }

    #[test]
    fn test_file_fmask_matches_narrow_values() {
        // aid, eid, gid, lid in the top byte
        let mask = FILE_FMASK.mask_for(&["aid", "eid", "gid", "mylist_id"]).unwrap();
        assert_eq!(mask.narrow_value(), 0x7800_0000);
        let mask = FILE_FMASK.mask_for(&["anidb_file_name"]).unwrap();
        assert_eq!(mask.narrow_value(), 0x0000_0001);
        assert_eq!(FILE_FMASK.render(&mask), "00000001");
    }

    #[test]
    fn test_file_amask_values() {
        let mask = FILE_AMASK
            .mask_for(&["anime_total_episodes", "group_short_name"])
            .unwrap();
        assert_eq!(mask.narrow_value(), 0x8000_0040);
    }

    #[test]
    fn test_all_fields_skip_retired() {
        let all = ANIME_AMASK.all_fields();
        assert_eq!(all.count_ones() as usize, ANIME_AMASK.names().count());
        assert_eq!(all.byte(0), 0xFC);
        assert_eq!(all.byte(5), 0x80);
        assert_eq!(all.byte(6), 0xF8);
        assert!(FILE_FMASK.all_fields().is_narrow());
    }

    #[test]
    fn test_fields_in_wire_order() {
        let mask = FieldMask::from_hex("30808000000000");
        assert_eq!(
            ANIME_AMASK.fields_in(&mask),
            vec!["year", "type", "romaji_name", "episodes"]
        );
    }

    #[test]
    fn test_parse_uses_layout_width() {
        assert_eq!(FILE_FMASK.parse("7ff8fef9").narrow_value(), 0x7ff8_fef9);
        assert_eq!(ANIME_AMASK.parse("30").to_hex(), "30000000000000");
    }
}
