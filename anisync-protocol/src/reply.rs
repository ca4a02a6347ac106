//! Reply tokenizer.
//!
//! ```text
//! TAG CODE [text...]\n
//! field|field|field\n
//! ...
//! ```
//!
//! Some malformed replies arrive without the tag: `CODE TEXT...`. A first
//! token that is numeric followed by a non-numeric second token is read as
//! tag `"0"` and code = first token.

use crate::code::ReplyCode;
use crate::error::ProtocolError;

/// Tag assigned to replies that arrived without one.
pub const TAGLESS: &str = "0";

/// First line of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyHeader {
    pub tag: String,
    pub code: u16,
    /// Everything after the code on the first line.
    pub text: String,
}

impl ReplyHeader {
    /// Returns the numeric tag, if the tag is a number other than zero.
    pub fn tag_number(&self) -> Option<u64> {
        self.tag.parse().ok().filter(|t| *t != 0)
    }

    pub fn is_tagless(&self) -> bool {
        self.tag == TAGLESS
    }

    pub fn reply_code(&self) -> ReplyCode {
        ReplyCode::from_code(self.code)
    }

    /// Returns the n-th whitespace separated token of the header text.
    pub fn text_token(&self, n: usize) -> Option<&str> {
        self.text.split_whitespace().nth(n)
    }
}

/// A parsed reply datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub header: ReplyHeader,
    /// Data lines following the header.
    pub lines: Vec<String>,
    /// The raw datagram hit the size ceiling.
    pub truncated: bool,
}

impl Reply {
    /// Parses decompressed reply text.
    pub fn parse(text: &str, truncated: bool) -> Result<Self, ProtocolError> {
        let mut lines = text.split('\n').map(|l| l.trim_end_matches('\r'));
        let first = lines.next().map(str::trim).unwrap_or_default();
        if first.is_empty() {
            return Err(ProtocolError::EmptyReply);
        }

        let header = parse_header(first)?;

        let mut data: Vec<String> = lines.map(str::to_string).collect();
        while data.last().map(|l| l.is_empty()).unwrap_or(false) {
            data.pop();
        }

        Ok(Self {
            header,
            lines: data,
            truncated,
        })
    }

    pub fn code(&self) -> u16 {
        self.header.code
    }

    pub fn reply_code(&self) -> ReplyCode {
        self.header.reply_code()
    }

    /// Pipe separated fields of data line `index`.
    ///
    /// On a truncated reply the last line is cut mid-field, so its last
    /// field is dropped.
    pub fn fields(&self, index: usize) -> Vec<String> {
        let Some(line) = self.lines.get(index) else {
            return Vec::new();
        };
        let mut fields: Vec<String> = line.split('|').map(str::to_string).collect();
        if self.truncated && index + 1 == self.lines.len() {
            fields.pop();
        }
        fields
    }

    /// Fields of the first data line.
    pub fn first_fields(&self) -> Vec<String> {
        self.fields(0)
    }
}

fn is_numeric(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

fn parse_code(token: &str, line: &str) -> Result<u16, ProtocolError> {
    if token.len() != 3 || !is_numeric(token) {
        return Err(ProtocolError::MalformedReply(line.to_string()));
    }
    token
        .parse()
        .map_err(|_| ProtocolError::MalformedReply(line.to_string()))
}

fn parse_header(line: &str) -> Result<ReplyHeader, ProtocolError> {
    let (first, rest) = split_token(line);
    let (second, tail) = split_token(rest);

    if is_numeric(first) && !second.is_empty() && !is_numeric(second) {
        return Ok(ReplyHeader {
            tag: TAGLESS.to_string(),
            code: parse_code(first, line)?,
            text: rest.to_string(),
        });
    }

    if second.is_empty() {
        return Err(ProtocolError::MalformedReply(line.to_string()));
    }

    Ok(ReplyHeader {
        tag: first.to_string(),
        code: parse_code(second, line)?,
        text: tail.to_string(),
    })
}

fn split_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim_start()),
        None => (s, ""),
    }
}
