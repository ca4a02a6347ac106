//! Typed catalog records.
//!
//! Mask-driven replies (anime, file) keep their decoded values as a field
//! bag with typed accessors on top, so a follow-up reply for the missing
//! fields merges straight in. Fixed-layout replies (episode, group, mylist,
//! notification) decode into plain structs.

use anisync_protocol::{FieldBag, FieldMask, ANIME_AMASK, FILE_AMASK, FILE_FMASK};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of catalog entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Anime,
    File,
    Episode,
    Group,
    Mylist,
    Notification,
}

impl RecordKind {
    pub const ALL: [RecordKind; 6] = [
        RecordKind::Anime,
        RecordKind::File,
        RecordKind::Episode,
        RecordKind::Group,
        RecordKind::Mylist,
        RecordKind::Notification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Anime => "anime",
            RecordKind::File => "file",
            RecordKind::Episode => "episode",
            RecordKind::Group => "group",
            RecordKind::Mylist => "mylist",
            RecordKind::Notification => "notification",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A catalog entity addressed by kind and numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
    pub kind: RecordKind,
    pub id: u64,
}

impl Subject {
    pub fn new(kind: RecordKind, id: u64) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

// =============================================================================
// Value helpers
// =============================================================================

fn text(s: Option<&String>) -> Option<&str> {
    s.map(String::as_str).filter(|v| !v.is_empty())
}

fn number<T: FromStr>(s: Option<&str>) -> Option<T> {
    s.and_then(|v| v.trim().parse().ok())
}

/// Unix seconds to a timestamp; zero means "unknown".
pub(crate) fn timestamp(s: Option<&str>) -> Option<DateTime<Utc>> {
    number::<i64>(s)
        .filter(|secs| *secs > 0)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

fn list(s: Option<&str>, sep: char) -> Vec<&str> {
    s.map(|v| v.split(sep).filter(|x| !x.is_empty()).collect())
        .unwrap_or_default()
}

fn mask_of(bag: &FieldBag, layout: &anisync_protocol::FieldLayout) -> FieldMask {
    let mut mask = FieldMask::empty();
    for name in bag.keys() {
        if let Some(bit) = layout.bit_of(name) {
            mask.insert(bit);
        }
    }
    mask
}

// =============================================================================
// Anime
// =============================================================================

/// Anime record built from an ANIME reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimeInfo {
    pub aid: u64,
    pub fields: FieldBag,
}

impl AnimeInfo {
    pub fn new(aid: u64, fields: FieldBag) -> Self {
        Self { aid, fields }
    }

    /// Raw value of a field; empty values read as missing.
    pub fn field(&self, name: &str) -> Option<&str> {
        text(self.fields.get(name))
    }

    pub fn year(&self) -> Option<&str> {
        self.field("year")
    }

    pub fn kind(&self) -> Option<&str> {
        self.field("type")
    }

    pub fn romaji_name(&self) -> Option<&str> {
        self.field("romaji_name")
    }

    pub fn kanji_name(&self) -> Option<&str> {
        self.field("kanji_name")
    }

    pub fn english_name(&self) -> Option<&str> {
        self.field("english_name")
    }

    /// Best display title: English, then romaji, then kanji.
    pub fn title(&self) -> Option<&str> {
        self.english_name()
            .or_else(|| self.romaji_name())
            .or_else(|| self.kanji_name())
    }

    pub fn episodes(&self) -> Option<u32> {
        number(self.field("episodes"))
    }

    pub fn highest_episode(&self) -> Option<u32> {
        number(self.field("highest_episode_number"))
    }

    /// Rating on a 0-10 scale (the wire carries it multiplied by 100).
    pub fn rating(&self) -> Option<f32> {
        number::<f32>(self.field("rating")).map(|r| r / 100.0)
    }

    pub fn vote_count(&self) -> Option<u32> {
        number(self.field("vote_count"))
    }

    pub fn air_date(&self) -> Option<DateTime<Utc>> {
        timestamp(self.field("air_date"))
    }

    pub fn end_date(&self) -> Option<DateTime<Utc>> {
        timestamp(self.field("end_date"))
    }

    pub fn picname(&self) -> Option<&str> {
        self.field("picname")
    }

    pub fn tag_names(&self) -> Vec<&str> {
        list(self.field("tag_name_list"), ',')
    }

    pub fn related_aids(&self) -> Vec<u64> {
        list(self.field("related_aid_list"), '\'')
            .into_iter()
            .filter_map(|v| v.parse().ok())
            .collect()
    }

    pub fn is_18_restricted(&self) -> Option<bool> {
        self.field("is_18_restricted").map(|v| v == "1")
    }

    /// Mask of the fields this record already holds.
    pub fn known_mask(&self) -> FieldMask {
        mask_of(&self.fields, &ANIME_AMASK)
    }
}

// =============================================================================
// File
// =============================================================================

/// File record built from a FILE reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub fid: u64,
    /// Fields selected by `fmask`.
    pub fields: FieldBag,
    /// Anime, episode and group fields selected by the file `amask`.
    pub anime_fields: FieldBag,
}

impl FileInfo {
    pub fn new(fid: u64, fields: FieldBag, anime_fields: FieldBag) -> Self {
        Self {
            fid,
            fields,
            anime_fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        text(self.fields.get(name))
    }

    pub fn anime_field(&self, name: &str) -> Option<&str> {
        text(self.anime_fields.get(name))
    }

    pub fn aid(&self) -> Option<u64> {
        number(self.field("aid"))
    }

    pub fn eid(&self) -> Option<u64> {
        number(self.field("eid"))
    }

    pub fn gid(&self) -> Option<u64> {
        number(self.field("gid"))
    }

    pub fn mylist_id(&self) -> Option<u64> {
        number(self.field("mylist_id")).filter(|lid| *lid != 0)
    }

    pub fn size(&self) -> Option<u64> {
        number(self.field("size"))
    }

    pub fn ed2k(&self) -> Option<&str> {
        self.field("ed2k")
    }

    pub fn crc32(&self) -> Option<&str> {
        self.field("crc32")
    }

    pub fn state(&self) -> Option<u16> {
        number(self.field("state"))
    }

    /// Release version encoded in the state flags (1-5).
    pub fn version(&self) -> u8 {
        match self.state() {
            Some(s) if s & 0x20 != 0 => 5,
            Some(s) if s & 0x10 != 0 => 4,
            Some(s) if s & 0x08 != 0 => 3,
            Some(s) if s & 0x04 != 0 => 2,
            _ => 1,
        }
    }

    pub fn is_deprecated(&self) -> bool {
        self.field("is_deprecated") == Some("1")
    }

    pub fn dub_languages(&self) -> Vec<&str> {
        list(self.field("dub_language"), '\'')
    }

    pub fn sub_languages(&self) -> Vec<&str> {
        list(self.field("sub_language"), '\'')
    }

    pub fn length_secs(&self) -> Option<u32> {
        number(self.field("length_in_seconds"))
    }

    pub fn file_name(&self) -> Option<&str> {
        self.field("anidb_file_name")
    }

    pub fn anime_name(&self) -> Option<&str> {
        self.anime_field("romaji_name")
    }

    pub fn episode_number(&self) -> Option<&str> {
        self.anime_field("epno")
    }

    pub fn group_name(&self) -> Option<&str> {
        self.anime_field("group_name")
    }

    pub fn known_fmask(&self) -> FieldMask {
        mask_of(&self.fields, &FILE_FMASK)
    }

    pub fn known_amask(&self) -> FieldMask {
        mask_of(&self.anime_fields, &FILE_AMASK)
    }
}

// =============================================================================
// Fixed layouts
// =============================================================================

/// Reads positional fields of a fixed-layout reply line.
pub(crate) struct Fields<'a>(pub(crate) &'a [String]);

impl<'a> Fields<'a> {
    pub(crate) fn text(&self, index: usize) -> Option<String> {
        text(self.0.get(index)).map(str::to_string)
    }

    pub(crate) fn number<T: FromStr>(&self, index: usize) -> Option<T> {
        number(self.0.get(index).map(String::as_str))
    }

    pub(crate) fn timestamp(&self, index: usize) -> Option<DateTime<Utc>> {
        timestamp(self.0.get(index).map(String::as_str))
    }
}

/// EPISODE reply:
/// `eid|aid|length|rating|votes|epno|eng|romaji|kanji|aired|type`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeInfo {
    pub eid: u64,
    pub aid: Option<u64>,
    pub length_minutes: Option<u32>,
    pub rating: Option<u32>,
    pub votes: Option<u32>,
    pub epno: Option<String>,
    pub name: Option<String>,
    pub name_romaji: Option<String>,
    pub name_kanji: Option<String>,
    pub aired: Option<DateTime<Utc>>,
    pub episode_type: Option<u8>,
}

impl EpisodeInfo {
    pub(crate) fn from_fields(f: &Fields<'_>) -> Option<Self> {
        Some(Self {
            eid: f.number(0)?,
            aid: f.number(1),
            length_minutes: f.number(2),
            rating: f.number(3),
            votes: f.number(4),
            epno: f.text(5),
            name: f.text(6),
            name_romaji: f.text(7),
            name_kanji: f.text(8),
            aired: f.timestamp(9),
            episode_type: f.number(10),
        })
    }
}

/// GROUP reply:
/// `gid|rating|votes|acount|fcount|name|short|irc channel|irc server|url|picname|...`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub gid: u64,
    pub rating: Option<u32>,
    pub votes: Option<u32>,
    pub anime_count: Option<u32>,
    pub file_count: Option<u32>,
    pub name: Option<String>,
    pub short_name: Option<String>,
    pub irc_channel: Option<String>,
    pub irc_server: Option<String>,
    pub url: Option<String>,
    pub picname: Option<String>,
}

impl GroupInfo {
    pub(crate) fn from_fields(f: &Fields<'_>) -> Option<Self> {
        Some(Self {
            gid: f.number(0)?,
            rating: f.number(1),
            votes: f.number(2),
            anime_count: f.number(3),
            file_count: f.number(4),
            name: f.text(5),
            short_name: f.text(6),
            irc_channel: f.text(7),
            irc_server: f.text(8),
            url: f.text(9),
            picname: f.text(10),
        })
    }
}

/// MYLIST reply:
/// `fid|eid|aid|gid|date|state|viewdate|storage|source|other|filestate`.
/// The lid comes from the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MylistEntry {
    pub lid: u64,
    pub fid: Option<u64>,
    pub eid: Option<u64>,
    pub aid: Option<u64>,
    pub gid: Option<u64>,
    pub added: Option<DateTime<Utc>>,
    pub state: Option<u8>,
    pub viewed: Option<DateTime<Utc>>,
    pub storage: Option<String>,
    pub source: Option<String>,
    pub other: Option<String>,
    pub file_state: Option<u8>,
}

impl MylistEntry {
    pub(crate) fn from_fields(lid: u64, f: &Fields<'_>) -> Self {
        Self {
            lid,
            fid: f.number(0),
            eid: f.number(1),
            aid: f.number(2),
            gid: f.number(3),
            added: f.timestamp(4),
            state: f.number(5),
            viewed: f.timestamp(6),
            storage: f.text(7),
            source: f.text(8),
            other: f.text(9),
            file_state: f.number(10),
        }
    }

    pub fn is_watched(&self) -> bool {
        self.viewed.is_some()
    }
}

/// Where a notification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationSource {
    /// Pushed by the server (270), must be acknowledged.
    Push,
    /// Fetched with NOTIFYGET (292).
    Fetched,
}

/// A user notification or message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub nid: u64,
    pub source: NotificationSource,
    pub from_user_id: Option<u64>,
    pub from_user_name: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub message_type: Option<u8>,
    pub title: String,
    pub body: String,
}

impl Notification {
    /// Pushed form: `nid|type|fromuid|date|title|body`.
    pub(crate) fn from_push(f: &Fields<'_>) -> Option<Self> {
        Some(Self {
            nid: f.number(0)?,
            source: NotificationSource::Push,
            message_type: f.number(1),
            from_user_id: f.number(2),
            from_user_name: None,
            date: f.timestamp(3),
            title: f.text(4).unwrap_or_default(),
            body: f.text(5).unwrap_or_default(),
        })
    }

    /// Fetched form: `id|from_user_id|from_user_name|date|type|title|body`.
    pub(crate) fn from_fetched(f: &Fields<'_>) -> Option<Self> {
        Some(Self {
            nid: f.number(0)?,
            source: NotificationSource::Fetched,
            from_user_id: f.number(1),
            from_user_name: f.text(2),
            date: f.timestamp(3),
            message_type: f.number(4),
            title: f.text(5).unwrap_or_default(),
            body: f.text(6).unwrap_or_default(),
        })
    }

    /// Returns whether the body links a finished mylist export archive.
    pub fn is_export_ready(&self) -> bool {
        self.body.to_ascii_lowercase().contains(".tgz")
    }
}

// =============================================================================
// CatalogRecord
// =============================================================================

/// Any record the engine hands to the catalog store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CatalogRecord {
    Anime(AnimeInfo),
    File(FileInfo),
    Episode(EpisodeInfo),
    Group(GroupInfo),
    Mylist(MylistEntry),
    Notification(Notification),
}

impl CatalogRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            CatalogRecord::Anime(_) => RecordKind::Anime,
            CatalogRecord::File(_) => RecordKind::File,
            CatalogRecord::Episode(_) => RecordKind::Episode,
            CatalogRecord::Group(_) => RecordKind::Group,
            CatalogRecord::Mylist(_) => RecordKind::Mylist,
            CatalogRecord::Notification(_) => RecordKind::Notification,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            CatalogRecord::Anime(r) => r.aid,
            CatalogRecord::File(r) => r.fid,
            CatalogRecord::Episode(r) => r.eid,
            CatalogRecord::Group(r) => r.gid,
            CatalogRecord::Mylist(r) => r.lid,
            CatalogRecord::Notification(r) => r.nid,
        }
    }

    pub fn subject(&self) -> Subject {
        Subject::new(self.kind(), self.id())
    }

    /// Folds `newer` into this record.
    ///
    /// Field bags merge key by key with `newer` winning, so a truncation
    /// follow-up completes the earlier partial record. Fixed-layout records
    /// are replaced.
    pub fn merge(&mut self, newer: CatalogRecord) {
        match (self, newer) {
            (CatalogRecord::Anime(old), CatalogRecord::Anime(new)) => {
                old.fields.extend(new.fields);
            }
            (CatalogRecord::File(old), CatalogRecord::File(new)) => {
                old.fields.extend(new.fields);
                old.anime_fields.extend(new.anime_fields);
            }
            (slot, new) => *slot = new,
        }
    }

    /// Mask of already-known fields, for mask-driven kinds.
    pub fn known_mask(&self) -> Option<FieldMask> {
        match self {
            CatalogRecord::Anime(r) => Some(r.known_mask()),
            CatalogRecord::File(r) => Some(r.known_fmask()),
            _ => None,
        }
    }
}
