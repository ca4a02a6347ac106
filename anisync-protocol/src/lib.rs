//! # anisync-protocol
//!
//! Wire protocol implementation for the anisync catalog client.
//!
//! This crate provides:
//! - `FieldMask`, the 7-byte field selector with its left-to-right byte order
//! - Field layouts and the `MaskCodec` that maps reply tokens onto mask bits
//! - Command rendering (`VERB k=v&...&s=SID&tag=T`) and parsing
//! - Reply parsing with the tagless-reply fallback
//! - Datagram decompression and truncation detection

pub mod code;
pub mod codec;
pub mod command;
pub mod datagram;
pub mod error;
pub mod fields;
pub mod mask;
pub mod reply;

pub use code::ReplyCode;
pub use codec::{DecodeOutcome, FieldBag, MaskCodec};
pub use command::{Command, Verb};
pub use datagram::{decompress, Datagram};
pub use error::ProtocolError;
pub use fields::{FieldLayout, ANIME_AMASK, FILE_AMASK, FILE_FMASK};
pub use mask::FieldMask;
pub use reply::{Reply, ReplyHeader};

use std::time::Duration;

/// Protocol version announced in AUTH.
pub const PROTOCOL_VERSION: &str = "3";

/// Default catalog server host.
pub const DEFAULT_SERVER: &str = "api.anidb.net";

/// Default catalog server UDP port.
pub const DEFAULT_PORT: u16 = 9000;

/// Minimum spacing between two outgoing datagrams (anti-flood rule).
pub const SEND_INTERVAL: Duration = Duration::from_millis(2100);

/// How long a sent packet may wait for its reply before it is retried.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of resends before a packet is given up as `TIMEOUT`.
pub const MAX_RETRIES: u32 = 3;

/// Raw datagram size at which a reply is considered cut off.
pub const TRUNCATION_THRESHOLD: usize = 1400;

/// Largest datagram the client expects to read.
pub const MAX_DATAGRAM_SIZE: usize = 8 * 1024;

/// Width of a full field mask in bytes.
pub const MASK_BYTES: usize = 7;

/// Width of the narrow (32-bit) field mask in bytes.
pub const NARROW_MASK_BYTES: usize = 4;

/// Reply code recorded for a packet that exhausted its retries.
pub const TIMEOUT_CODE: &str = "TIMEOUT";
