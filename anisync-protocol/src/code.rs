//! Reply status codes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Known three-digit reply codes.
///
/// These codes are part of the server contract; unknown codes are kept as
/// `Other` so the caller can still log them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplyCode {
    LoginAccepted,
    LoginAcceptedNewVersion,
    LoggedOut,
    MylistEntryAdded,
    ExportQueued,
    ExportCancelled,
    File,
    Mylist,
    MylistStats,
    Anime,
    Episode,
    Group,
    Notification,
    NotificationAcknowledged,
    NoSuchNotification,
    NotifyList,
    NotifyListMore,
    NotifyGetMessage,
    NotifyGetNew,
    Pong,
    FileAlreadyInMylist,
    MylistEntryEdited,
    NoSuchMylistEntry,
    NoSuchExportTemplate,
    ExportAlreadyInQueue,
    ExportNoSuchExport,
    NoSuchFile,
    NoSuchAnime,
    NoSuchEpisode,
    NoSuchGroup,
    LoginFirst,
    AccessDenied,
    LoginFailed,
    ClientVersionOutdated,
    ClientBanned,
    IllegalInput,
    InvalidSession,
    Banned,
    UnknownCommand,
    InternalServerError,
    OutOfService,
    ServerBusy,
    Timeout,
    Other(u16),
}

impl ReplyCode {
    pub fn from_code(code: u16) -> Self {
        match code {
            200 => ReplyCode::LoginAccepted,
            201 => ReplyCode::LoginAcceptedNewVersion,
            203 => ReplyCode::LoggedOut,
            210 => ReplyCode::MylistEntryAdded,
            217 => ReplyCode::ExportQueued,
            218 => ReplyCode::ExportCancelled,
            220 => ReplyCode::File,
            221 => ReplyCode::Mylist,
            222 => ReplyCode::MylistStats,
            230 => ReplyCode::Anime,
            240 => ReplyCode::Episode,
            250 => ReplyCode::Group,
            270 => ReplyCode::Notification,
            271 => ReplyCode::NotificationAcknowledged,
            272 => ReplyCode::NoSuchNotification,
            290 => ReplyCode::NotifyList,
            291 => ReplyCode::NotifyListMore,
            292 => ReplyCode::NotifyGetMessage,
            293 => ReplyCode::NotifyGetNew,
            300 => ReplyCode::Pong,
            310 => ReplyCode::FileAlreadyInMylist,
            311 => ReplyCode::MylistEntryEdited,
            312 => ReplyCode::NoSuchMylistEntry,
            317 => ReplyCode::NoSuchExportTemplate,
            318 => ReplyCode::ExportAlreadyInQueue,
            319 => ReplyCode::ExportNoSuchExport,
            320 => ReplyCode::NoSuchFile,
            330 => ReplyCode::NoSuchAnime,
            340 => ReplyCode::NoSuchEpisode,
            350 => ReplyCode::NoSuchGroup,
            403 => ReplyCode::AccessDenied,
            500 => ReplyCode::LoginFailed,
            501 => ReplyCode::LoginFirst,
            503 => ReplyCode::ClientVersionOutdated,
            504 => ReplyCode::ClientBanned,
            505 => ReplyCode::IllegalInput,
            506 => ReplyCode::InvalidSession,
            555 => ReplyCode::Banned,
            598 => ReplyCode::UnknownCommand,
            600 => ReplyCode::InternalServerError,
            601 => ReplyCode::OutOfService,
            602 => ReplyCode::ServerBusy,
            604 => ReplyCode::Timeout,
            other => ReplyCode::Other(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            ReplyCode::LoginAccepted => 200,
            ReplyCode::LoginAcceptedNewVersion => 201,
            ReplyCode::LoggedOut => 203,
            ReplyCode::MylistEntryAdded => 210,
            ReplyCode::ExportQueued => 217,
            ReplyCode::ExportCancelled => 218,
            ReplyCode::File => 220,
            ReplyCode::Mylist => 221,
            ReplyCode::MylistStats => 222,
            ReplyCode::Anime => 230,
            ReplyCode::Episode => 240,
            ReplyCode::Group => 250,
            ReplyCode::Notification => 270,
            ReplyCode::NotificationAcknowledged => 271,
            ReplyCode::NoSuchNotification => 272,
            ReplyCode::NotifyList => 290,
            ReplyCode::NotifyListMore => 291,
            ReplyCode::NotifyGetMessage => 292,
            ReplyCode::NotifyGetNew => 293,
            ReplyCode::Pong => 300,
            ReplyCode::FileAlreadyInMylist => 310,
            ReplyCode::MylistEntryEdited => 311,
            ReplyCode::NoSuchMylistEntry => 312,
            ReplyCode::NoSuchExportTemplate => 317,
            ReplyCode::ExportAlreadyInQueue => 318,
            ReplyCode::ExportNoSuchExport => 319,
            ReplyCode::NoSuchFile => 320,
            ReplyCode::NoSuchAnime => 330,
            ReplyCode::NoSuchEpisode => 340,
            ReplyCode::NoSuchGroup => 350,
            ReplyCode::AccessDenied => 403,
            ReplyCode::LoginFailed => 500,
            ReplyCode::LoginFirst => 501,
            ReplyCode::ClientVersionOutdated => 503,
            ReplyCode::ClientBanned => 504,
            ReplyCode::IllegalInput => 505,
            ReplyCode::InvalidSession => 506,
            ReplyCode::Banned => 555,
            ReplyCode::UnknownCommand => 598,
            ReplyCode::InternalServerError => 600,
            ReplyCode::OutOfService => 601,
            ReplyCode::ServerBusy => 602,
            ReplyCode::Timeout => 604,
            ReplyCode::Other(code) => *code,
        }
    }

    /// Codes after which the original command should be sent again once
    /// a fresh session exists.
    pub fn needs_reauth(&self) -> bool {
        matches!(self, ReplyCode::AccessDenied | ReplyCode::InvalidSession)
    }

    /// Server-side trouble that should count as a failed attempt.
    pub fn is_server_unavailable(&self) -> bool {
        matches!(
            self,
            ReplyCode::InternalServerError
                | ReplyCode::OutOfService
                | ReplyCode::ServerBusy
                | ReplyCode::Timeout
        )
    }

    /// Codes that end the client's ability to talk to the server.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReplyCode::Banned | ReplyCode::ClientBanned | ReplyCode::ClientVersionOutdated
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ReplyCode::NoSuchMylistEntry
                | ReplyCode::NoSuchFile
                | ReplyCode::NoSuchAnime
                | ReplyCode::NoSuchEpisode
                | ReplyCode::NoSuchGroup
        )
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
