//! Outgoing command grammar.
//!
//! ```text
//! VERB key1=val1&key2=val2[&s=SESSION]&tag=T
//! ```
//!
//! Commands are stored without `s` and `tag`; both are appended per send so a
//! replayed command always carries the live session.

use crate::error::ProtocolError;
use crate::fields::{FieldLayout, ANIME_AMASK, FILE_AMASK, FILE_FMASK};
use crate::mask::FieldMask;
use crate::PROTOCOL_VERSION;
use std::fmt;

/// Command verb.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Verb {
    Auth,
    Logout,
    Ping,
    Anime,
    File,
    Episode,
    Group,
    MylistAdd,
    Mylist,
    MylistStats,
    MylistExport,
    PushAck,
    NotifyList,
    NotifyGet,
    Other(String),
}

impl Verb {
    pub fn as_str(&self) -> &str {
        match self {
            Verb::Auth => "AUTH",
            Verb::Logout => "LOGOUT",
            Verb::Ping => "PING",
            Verb::Anime => "ANIME",
            Verb::File => "FILE",
            Verb::Episode => "EPISODE",
            Verb::Group => "GROUP",
            Verb::MylistAdd => "MYLISTADD",
            Verb::Mylist => "MYLIST",
            Verb::MylistStats => "MYLISTSTATS",
            Verb::MylistExport => "MYLISTEXPORT",
            Verb::PushAck => "PUSHACK",
            Verb::NotifyList => "NOTIFYLIST",
            Verb::NotifyGet => "NOTIFYGET",
            Verb::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "AUTH" => Verb::Auth,
            "LOGOUT" => Verb::Logout,
            "PING" => Verb::Ping,
            "ANIME" => Verb::Anime,
            "FILE" => Verb::File,
            "EPISODE" => Verb::Episode,
            "GROUP" => Verb::Group,
            "MYLISTADD" => Verb::MylistAdd,
            "MYLIST" => Verb::Mylist,
            "MYLISTSTATS" => Verb::MylistStats,
            "MYLISTEXPORT" => Verb::MylistExport,
            "PUSHACK" => Verb::PushAck,
            "NOTIFYLIST" => Verb::NotifyList,
            "NOTIFYGET" => Verb::NotifyGet,
            other => Verb::Other(other.to_string()),
        }
    }

    /// Returns whether the server accepts this verb without a session.
    pub fn requires_session(&self) -> bool {
        !matches!(self, Verb::Auth | Verb::Ping)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command with ordered parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    verb: Verb,
    params: Vec<(String, String)>,
}

impl Command {
    pub fn new(verb: Verb) -> Self {
        Self {
            verb,
            params: Vec::new(),
        }
    }

    /// Appends a parameter, or replaces it if the key is already present.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        let value = value.to_string();
        match self.params.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.params.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.params.iter().position(|(k, _)| k == key)?;
        Some(self.params.remove(index).1)
    }

    pub fn verb(&self) -> &Verb {
        &self.verb
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Parses a numeric id parameter.
    pub fn get_id(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    /// Parses a mask parameter in the width of `layout`.
    pub fn get_mask(&self, key: &str, layout: &FieldLayout) -> Option<FieldMask> {
        self.get(key).map(|v| layout.parse(v))
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn requires_session(&self) -> bool {
        self.verb.requires_session()
    }

    /// Renders the stored form: no session, no tag.
    pub fn render(&self) -> String {
        if self.params.is_empty() {
            return self.verb.to_string();
        }
        format!(
            "{} {}",
            self.verb,
            join_params(self.params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        )
    }

    /// Renders the datagram form with the live session and the tag.
    pub fn to_wire(&self, session: Option<&str>, tag: u64) -> String {
        let tag = tag.to_string();
        let mut params: Vec<(&str, &str)> = self
            .params
            .iter()
            .filter(|(k, _)| k != "s" && k != "tag")
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        if let Some(sid) = session {
            params.push(("s", sid));
        }
        params.push(("tag", tag.as_str()));

        format!("{} {}", self.verb, join_params(params.iter().copied()))
    }

    /// Parses either the stored or the wire form. `s` and `tag` are dropped.
    pub fn parse(input: &str) -> Result<Self, ProtocolError> {
        let input = input.trim_end_matches(['\r', '\n']);
        let (verb, rest) = match input.split_once(' ') {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (input, ""),
        };
        if verb.is_empty() || !verb.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ProtocolError::MalformedCommand(input.to_string()));
        }

        let mut params: Vec<(String, String)> = Vec::new();
        if !rest.is_empty() {
            for piece in rest.split('&') {
                // An escaped `&amp;` inside a value was split apart above.
                if let Some(tail) = piece.strip_prefix("amp;") {
                    if let Some(last) = params.last_mut() {
                        last.1.push('&');
                        last.1.push_str(tail);
                        continue;
                    }
                }
                let (key, value) = piece
                    .split_once('=')
                    .ok_or_else(|| ProtocolError::MalformedCommand(input.to_string()))?;
                params.push((key.to_string(), value.to_string()));
            }
        }

        params.retain(|(k, _)| k != "s" && k != "tag");
        for (_, value) in params.iter_mut() {
            *value = value.replace("<br />", "\n");
        }
        Ok(Self {
            verb: Verb::parse(verb),
            params,
        })
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    pub fn auth(user: &str, password: &str, client: &str, client_version: u32) -> Self {
        Command::new(Verb::Auth)
            .with("user", user)
            .with("pass", password)
            .with("protover", PROTOCOL_VERSION)
            .with("client", client)
            .with("clientver", client_version)
            .with("enc", "UTF8")
            .with("comp", 1)
    }

    pub fn logout() -> Self {
        Command::new(Verb::Logout)
    }

    pub fn ping() -> Self {
        Command::new(Verb::Ping)
    }

    pub fn anime(aid: u64, amask: &FieldMask) -> Self {
        Command::new(Verb::Anime)
            .with("aid", aid)
            .with("amask", ANIME_AMASK.render(amask))
    }

    pub fn file_by_hash(size: u64, ed2k: &str, fmask: &FieldMask, amask: &FieldMask) -> Self {
        Command::new(Verb::File)
            .with("size", size)
            .with("ed2k", ed2k.to_ascii_lowercase())
            .with("fmask", FILE_FMASK.render(fmask))
            .with("amask", FILE_AMASK.render(amask))
    }

    pub fn file_by_id(fid: u64, fmask: &FieldMask, amask: &FieldMask) -> Self {
        Command::new(Verb::File)
            .with("fid", fid)
            .with("fmask", FILE_FMASK.render(fmask))
            .with("amask", FILE_AMASK.render(amask))
    }

    pub fn episode(eid: u64) -> Self {
        Command::new(Verb::Episode).with("eid", eid)
    }

    pub fn group(gid: u64) -> Self {
        Command::new(Verb::Group).with("gid", gid)
    }

    pub fn mylist_add(size: u64, ed2k: &str) -> Self {
        Command::new(Verb::MylistAdd)
            .with("size", size)
            .with("ed2k", ed2k.to_ascii_lowercase())
    }

    pub fn mylist(lid: u64) -> Self {
        Command::new(Verb::Mylist).with("lid", lid)
    }

    pub fn mylist_stats() -> Self {
        Command::new(Verb::MylistStats)
    }

    pub fn mylist_export(template: &str) -> Self {
        Command::new(Verb::MylistExport).with("template", template)
    }

    pub fn push_ack(nid: u64) -> Self {
        Command::new(Verb::PushAck).with("nid", nid)
    }

    pub fn notify_list() -> Self {
        Command::new(Verb::NotifyList)
    }

    pub fn notify_get(kind: char, id: u64) -> Self {
        Command::new(Verb::NotifyGet)
            .with("type", kind)
            .with("id", id)
    }
}

impl fmt::Display for Command {
    /// Displays the stored form with the password masked.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.verb == Verb::Auth {
            let masked: Vec<(&str, &str)> = self
                .params
                .iter()
                .map(|(k, v)| {
                    if k == "pass" {
                        (k.as_str(), "***")
                    } else {
                        (k.as_str(), v.as_str())
                    }
                })
                .collect();
            return write!(f, "{} {}", self.verb, join_params(masked.iter().copied()));
        }
        f.write_str(&self.render())
    }
}

fn escape_value(value: &str) -> String {
    value.replace('&', "&amp;").replace('\n', "<br />")
}

fn join_params<'a>(params: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    params
        .map(|(k, v)| format!("{}={}", k, escape_value(v)))
        .collect::<Vec<_>>()
        .join("&")
}
