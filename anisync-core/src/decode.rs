//! Reply decoders: turn a reply and the command it answers into records.
//!
//! Mask-driven replies need the request's masks to know which token is which,
//! so every decoder gets the original command. When a reply arrived truncated
//! the decoder also builds the follow-up command asking for what is missing.

use crate::error::CoreError;
use crate::record::{
    AnimeInfo, EpisodeInfo, Fields, FileInfo, GroupInfo, MylistEntry, Notification,
};
use anisync_protocol::{
    Command, FieldMask, MaskCodec, Reply, ANIME_AMASK, FILE_AMASK, FILE_FMASK,
};
use tracing::debug;

/// A decoded record plus the request for its missing fields, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
    pub record: T,
    pub followup: Option<Command>,
}

impl<T> Decoded<T> {
    fn complete(record: T) -> Self {
        Self {
            record,
            followup: None,
        }
    }

    pub fn is_partial(&self) -> bool {
        self.followup.is_some()
    }
}

fn missing(verb: &str, key: &'static str) -> CoreError {
    CoreError::MissingParam {
        verb: verb.to_string(),
        key,
    }
}

fn malformed(kind: &'static str, reason: impl Into<String>) -> CoreError {
    CoreError::MalformedRecord {
        kind,
        reason: reason.into(),
    }
}

/// 230 ANIME. The aid comes from the request.
pub fn anime(reply: &Reply, command: &Command) -> Result<Decoded<AnimeInfo>, CoreError> {
    let aid = command.get_id("aid").ok_or_else(|| missing("ANIME", "aid"))?;
    let mask = command
        .get_mask("amask", &ANIME_AMASK)
        .ok_or_else(|| missing("ANIME", "amask"))?;

    let tokens = reply.first_fields();
    let outcome = MaskCodec::decode(&ANIME_AMASK, &tokens, &mask, 0);
    let record = AnimeInfo::new(aid, outcome.fields);

    if !reply.truncated {
        return Ok(Decoded::complete(record));
    }

    let reduced = MaskCodec::reduced_mask(&mask, &outcome.consumed);
    if reduced.is_empty() {
        return Ok(Decoded::complete(record));
    }
    debug!(
        "ANIME {} truncated after {} fields, requesting {}",
        aid,
        outcome.consumed.count_ones(),
        reduced
    );
    Ok(Decoded {
        record,
        followup: Some(Command::anime(aid, &reduced)),
    })
}

/// 220 FILE: `fid`, then the fmask fields, then the amask fields.
pub fn file(reply: &Reply, command: &Command) -> Result<Decoded<FileInfo>, CoreError> {
    let tokens = reply.first_fields();
    let fid: u64 = tokens
        .first()
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| malformed("file", "missing fid"))?;

    let fmask = command
        .get_mask("fmask", &FILE_FMASK)
        .unwrap_or_else(FieldMask::empty);
    let amask = command
        .get_mask("amask", &FILE_AMASK)
        .unwrap_or_else(FieldMask::empty);

    let f = MaskCodec::decode(&FILE_FMASK, &tokens, &fmask, 1);
    let a = MaskCodec::decode(&FILE_AMASK, &tokens, &amask, f.next_index);
    let record = FileInfo::new(fid, f.fields, a.fields);

    if !reply.truncated {
        return Ok(Decoded::complete(record));
    }

    let reduced_f = MaskCodec::reduced_mask(&fmask, &f.consumed);
    let reduced_a = MaskCodec::reduced_mask(&amask, &a.consumed);
    if reduced_f.is_empty() && reduced_a.is_empty() {
        return Ok(Decoded::complete(record));
    }
    debug!(
        "FILE {} truncated, requesting fmask {} amask {}",
        fid,
        FILE_FMASK.render(&reduced_f),
        FILE_AMASK.render(&reduced_a)
    );
    Ok(Decoded {
        record,
        followup: Some(Command::file_by_id(fid, &reduced_f, &reduced_a)),
    })
}

/// 240 EPISODE.
pub fn episode(reply: &Reply) -> Result<EpisodeInfo, CoreError> {
    let tokens = reply.first_fields();
    EpisodeInfo::from_fields(&Fields(&tokens)).ok_or_else(|| malformed("episode", "missing eid"))
}

/// 250 GROUP.
pub fn group(reply: &Reply) -> Result<GroupInfo, CoreError> {
    let tokens = reply.first_fields();
    GroupInfo::from_fields(&Fields(&tokens)).ok_or_else(|| malformed("group", "missing gid"))
}

/// 221 MYLIST. The lid comes from the request.
pub fn mylist(reply: &Reply, command: &Command) -> Result<MylistEntry, CoreError> {
    let lid = command.get_id("lid").ok_or_else(|| missing("MYLIST", "lid"))?;
    let tokens = reply.first_fields();
    Ok(MylistEntry::from_fields(lid, &Fields(&tokens)))
}

/// 210 / 311: the lid of the added or edited entry.
pub fn mylist_lid(reply: &Reply) -> Option<u64> {
    reply.lines.first().and_then(|l| l.trim().parse().ok())
}

/// 270 pushed notification.
pub fn push_notification(reply: &Reply) -> Result<Notification, CoreError> {
    let tokens = reply.first_fields();
    Notification::from_push(&Fields(&tokens)).ok_or_else(|| malformed("notification", "missing nid"))
}

/// 292 fetched message.
pub fn fetched_notification(reply: &Reply) -> Result<Notification, CoreError> {
    let tokens = reply.first_fields();
    Notification::from_fetched(&Fields(&tokens))
        .ok_or_else(|| malformed("notification", "missing id"))
}

/// 290/291 NOTIFYLIST: ids of the `M|id` (message) lines. `N|aid` lines
/// are new-file notifications and are skipped.
pub fn notify_list_messages(reply: &Reply) -> Vec<u64> {
    (0..reply.lines.len())
        .filter_map(|i| {
            let fields = reply.fields(i);
            match fields.as_slice() {
                [kind, id, ..] if kind == "M" => id.parse().ok(),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(text: &str, truncated: bool) -> Reply {
        Reply::parse(text, truncated).unwrap()
    }

    #[test]
    fn test_anime_decode_assigns_by_mask() {
        // dateflags, year, episodes
        let cmd = Command::anime(7, &FieldMask::from_hex("60008000000000"));
        let decoded = anime(&reply("1 230 ANIME\n0|2004|26", false), &cmd).unwrap();
        assert!(!decoded.is_partial());
        assert_eq!(decoded.record.aid, 7);
        assert_eq!(decoded.record.year(), Some("2004"));
        assert_eq!(decoded.record.episodes(), Some(26));
    }

    #[test]
    fn test_anime_truncation_follow_up() {
        // year, type, romaji_name, episodes
        let requested = FieldMask::from_hex("30808000000000");
        let cmd = Command::anime(9, &requested);
        let r = reply("1 230 ANIME\n2001|TV Series|Long Romaji Na", true);

        let decoded = anime(&r, &cmd).unwrap();
        assert_eq!(decoded.record.year(), Some("2001"));
        assert_eq!(decoded.record.kind(), Some("TV Series"));
        assert_eq!(decoded.record.romaji_name(), None);

        let followup = decoded.followup.unwrap();
        assert_eq!(followup.render(), "ANIME aid=9&amask=00808000000000");
    }

    #[test]
    fn test_anime_requires_aid() {
        let cmd = Command::parse("ANIME amask=30000000000000").unwrap();
        let err = anime(&reply("1 230 ANIME\n1|2", false), &cmd).unwrap_err();
        assert!(matches!(err, CoreError::MissingParam { key: "aid", .. }));
    }

    #[test]
    fn test_file_decode_splits_masks() {
        // fmask: aid, eid; amask: epno
        let fmask = FILE_FMASK.mask_for(&["aid", "eid"]).unwrap();
        let amask = FILE_AMASK.mask_for(&["epno"]).unwrap();
        let cmd = Command::file_by_hash(1024, "ABCDEF", &fmask, &amask);

        let decoded = file(&reply("4 220 FILE\n555|10|20|05", false), &cmd).unwrap();
        assert_eq!(decoded.record.fid, 555);
        assert_eq!(decoded.record.aid(), Some(10));
        assert_eq!(decoded.record.eid(), Some(20));
        assert_eq!(decoded.record.episode_number(), Some("05"));
    }

    #[test]
    fn test_file_truncation_follow_up_by_fid() {
        let fmask = FILE_FMASK.mask_for(&["aid", "eid"]).unwrap();
        let amask = FILE_AMASK.mask_for(&["romaji_name", "epno"]).unwrap();
        let cmd = Command::file_by_hash(1024, "abc", &fmask, &amask);

        let decoded = file(&reply("4 220 FILE\n555|10|20|Cowboy Beb", true), &cmd).unwrap();
        assert_eq!(decoded.record.eid(), Some(20));
        assert_eq!(decoded.record.anime_name(), None);

        let followup = decoded.followup.unwrap();
        assert_eq!(followup.get("fid"), Some("555"));
        assert_eq!(followup.get("fmask"), Some("00000000"));
        assert_eq!(
            followup.get("amask"),
            Some(FILE_AMASK.render(&amask).as_str())
        );
    }

    #[test]
    fn test_file_without_fid() {
        let cmd = Command::file_by_id(1, &FieldMask::empty(), &FieldMask::empty());
        assert!(matches!(
            file(&reply("4 220 FILE\n", false), &cmd),
            Err(CoreError::MalformedRecord { kind: "file", .. })
        ));
    }

    #[test]
    fn test_mylist_uses_request_lid() {
        let cmd = Command::mylist(12345);
        let entry = mylist(
            &reply("6 221 MYLIST\n200|100|300|400|1234567890|1|0|HDD|dl|note|0", false),
            &cmd,
        )
        .unwrap();
        assert_eq!(entry.lid, 12345);
        assert_eq!(entry.fid, Some(200));
        assert_eq!(entry.storage.as_deref(), Some("HDD"));
        assert!(!entry.is_watched());
    }

    #[test]
    fn test_notify_list_message_ids() {
        let r = reply("8 290 NOTIFYLIST\nM|11\nN|4521\nM|12", false);
        assert_eq!(notify_list_messages(&r), vec![11, 12]);

        // The cut-off last line loses its id.
        let r = reply("8 291 NOTIFYLIST\nM|11\nM|1", true);
        assert_eq!(notify_list_messages(&r), vec![11]);
    }

    #[test]
    fn test_mylist_lid() {
        assert_eq!(mylist_lid(&reply("3 210 MYLIST ENTRY ADDED\n987", false)), Some(987));
        assert_eq!(mylist_lid(&reply("3 210 MYLIST ENTRY ADDED", false)), None);
    }
}
