//! Maps a reply code to what the engine has to do about it.
//!
//! Routing is a pure function of the reply and the command it answers; the
//! engine applies the result to the queue, the session and the catalog.

use crate::decode;
use crate::record::{CatalogRecord, Notification};
use anisync_protocol::{Command, Reply, ReplyCode, Verb};

/// Outcome of routing one reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// 200/201: session id is the first token after the code.
    LoggedIn {
        session_id: String,
        new_version: bool,
    },
    /// 203.
    LoggedOut,
    /// 500: credentials rejected.
    LoginFailed,
    /// 501: authenticate; the request itself is complete.
    LoginFirst,
    /// 403/506: session gone, re-authenticate and replay the request.
    Reauthenticate,
    /// 503/504/555: the client may not talk to the server any more.
    Fatal { code: ReplyCode, reason: String },
    /// A decoded record, with the request for its missing fields when the
    /// reply was truncated.
    Record {
        record: CatalogRecord,
        followup: Option<Command>,
    },
    /// 210/311.
    MylistAdded { lid: Option<u64>, edited: bool },
    /// 310: send the request again in edit mode.
    Resend(Command),
    /// 312/320/330/340/350.
    NotFound(ReplyCode),
    /// 217.
    ExportQueued,
    /// 218/317/318/319.
    Export(ReplyCode),
    /// 290/291: unseen message ids still have to be fetched.
    NotifyList { message_ids: Vec<u64> },
    /// 270/292. Pushed notifications carry the acknowledgement to send.
    Notification {
        notification: Notification,
        ack: Option<Command>,
    },
    /// 600/601/602/604: counts as a failed attempt.
    ServerUnavailable(ReplyCode),
    /// 505/598: the request was malformed; nothing to recover.
    Diagnostic { code: ReplyCode, text: String },
    /// Known code that needs no further action (222, 271, 272, 300, ...).
    Acknowledged(ReplyCode),
    /// Reply could not be decoded.
    Malformed(String),
    Unhandled(u16),
}

impl Route {
    /// A server push. It answers no request, so it never settles a packet.
    pub fn is_push(&self) -> bool {
        matches!(self, Route::Notification { .. })
    }

    /// Whether a tagless reply with this route answers the packet in flight.
    ///
    /// The server leaves the tag off when it cannot read the request at all,
    /// so such an error belongs to whatever was sent last.
    pub fn settles_in_flight(&self) -> bool {
        matches!(
            self,
            Route::Fatal { .. }
                | Route::Diagnostic { .. }
                | Route::ServerUnavailable(_)
                | Route::LoginFirst
                | Route::Unhandled(_)
        )
    }
}

/// Reply router.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseDispatcher;

impl ResponseDispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Routes `reply`. `command` is the request it answers, if known.
    pub fn route(&self, reply: &Reply, command: Option<&Command>) -> Route {
        let code = reply.reply_code();
        match code {
            ReplyCode::LoginAccepted | ReplyCode::LoginAcceptedNewVersion => {
                match reply.header.text_token(0) {
                    Some(sid) => Route::LoggedIn {
                        session_id: sid.to_string(),
                        new_version: code == ReplyCode::LoginAcceptedNewVersion,
                    },
                    None => Route::Malformed("login reply without session id".into()),
                }
            }
            ReplyCode::LoggedOut => Route::LoggedOut,
            ReplyCode::LoginFailed => Route::LoginFailed,
            ReplyCode::LoginFirst => Route::LoginFirst,
            ReplyCode::AccessDenied | ReplyCode::InvalidSession => match command {
                Some(c) if *c.verb() == Verb::Logout => Route::LoggedOut,
                _ => Route::Reauthenticate,
            },
            ReplyCode::ClientVersionOutdated => Route::Fatal {
                code,
                reason: "client version outdated".into(),
            },
            ReplyCode::ClientBanned => Route::Fatal {
                code,
                reason: ban_reason_after_dash(&reply.header.text),
            },
            ReplyCode::Banned => Route::Fatal {
                code,
                reason: reply
                    .lines
                    .first()
                    .filter(|l| !l.trim().is_empty())
                    .cloned()
                    .unwrap_or_else(|| reply.header.text.clone()),
            },

            ReplyCode::Anime => with_command(command, |c| {
                decode::anime(reply, c).map(|d| Route::Record {
                    record: CatalogRecord::Anime(d.record),
                    followup: d.followup,
                })
            }),
            ReplyCode::File => with_command(command, |c| {
                decode::file(reply, c).map(|d| Route::Record {
                    record: CatalogRecord::File(d.record),
                    followup: d.followup,
                })
            }),
            ReplyCode::Mylist => with_command(command, |c| {
                decode::mylist(reply, c).map(|r| Route::Record {
                    record: CatalogRecord::Mylist(r),
                    followup: None,
                })
            }),
            ReplyCode::Episode => match decode::episode(reply) {
                Ok(r) => Route::Record {
                    record: CatalogRecord::Episode(r),
                    followup: None,
                },
                Err(e) => Route::Malformed(e.to_string()),
            },
            ReplyCode::Group => match decode::group(reply) {
                Ok(r) => Route::Record {
                    record: CatalogRecord::Group(r),
                    followup: None,
                },
                Err(e) => Route::Malformed(e.to_string()),
            },

            ReplyCode::MylistEntryAdded => Route::MylistAdded {
                lid: decode::mylist_lid(reply),
                edited: false,
            },
            ReplyCode::MylistEntryEdited => Route::MylistAdded {
                lid: decode::mylist_lid(reply),
                edited: true,
            },
            ReplyCode::FileAlreadyInMylist => match command {
                Some(c) if *c.verb() == Verb::MylistAdd => Route::Resend(c.clone().with("edit", 1)),
                _ => Route::Malformed("310 without a MYLISTADD request".into()),
            },

            ReplyCode::ExportQueued => Route::ExportQueued,
            ReplyCode::ExportCancelled
            | ReplyCode::NoSuchExportTemplate
            | ReplyCode::ExportAlreadyInQueue
            | ReplyCode::ExportNoSuchExport => Route::Export(code),

            ReplyCode::Notification => match decode::push_notification(reply) {
                Ok(n) => Route::Notification {
                    ack: Some(Command::push_ack(n.nid)),
                    notification: n,
                },
                Err(e) => Route::Malformed(e.to_string()),
            },
            ReplyCode::NotifyGetMessage => match decode::fetched_notification(reply) {
                Ok(n) => Route::Notification {
                    notification: n,
                    ack: None,
                },
                Err(e) => Route::Malformed(e.to_string()),
            },
            ReplyCode::NotifyList | ReplyCode::NotifyListMore => Route::NotifyList {
                message_ids: decode::notify_list_messages(reply),
            },

            ReplyCode::IllegalInput | ReplyCode::UnknownCommand => Route::Diagnostic {
                code,
                text: reply.header.text.clone(),
            },

            c if c.is_not_found() => Route::NotFound(c),
            c if c.is_server_unavailable() => Route::ServerUnavailable(c),

            ReplyCode::MylistStats
            | ReplyCode::NotificationAcknowledged
            | ReplyCode::NoSuchNotification
            | ReplyCode::NotifyGetNew
            | ReplyCode::Pong => Route::Acknowledged(code),

            other => Route::Unhandled(other.code()),
        }
    }
}

fn with_command<F>(command: Option<&Command>, f: F) -> Route
where
    F: FnOnce(&Command) -> Result<Route, crate::error::CoreError>,
{
    match command {
        Some(c) => f(c).unwrap_or_else(|e| Route::Malformed(e.to_string())),
        None => Route::Malformed("data reply without a request".into()),
    }
}

/// `CLIENT BANNED - reason` → `reason`.
fn ban_reason_after_dash(text: &str) -> String {
    match text.split_once('-') {
        Some((_, reason)) if !reason.trim().is_empty() => reason.trim().to_string(),
        _ => text.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anisync_protocol::FieldMask;

    fn route(text: &str, command: Option<&Command>) -> Route {
        let reply = Reply::parse(text, false).unwrap();
        ResponseDispatcher::new().route(&reply, command)
    }

    #[test]
    fn test_login_routes() {
        assert_eq!(
            route("1 200 sIdX LOGIN ACCEPTED", None),
            Route::LoggedIn {
                session_id: "sIdX".into(),
                new_version: false
            }
        );
        assert_eq!(
            route("1 201 sIdX LOGIN ACCEPTED - NEW VERSION AVAILABLE", None),
            Route::LoggedIn {
                session_id: "sIdX".into(),
                new_version: true
            }
        );
        assert_eq!(route("1 500 LOGIN FAILED", None), Route::LoginFailed);
        assert_eq!(route("1 501 LOGIN FIRST", None), Route::LoginFirst);
    }

    #[test]
    fn test_session_recovery_routes() {
        let cmd = Command::episode(1);
        assert_eq!(route("4 506 INVALID SESSION", Some(&cmd)), Route::Reauthenticate);
        assert_eq!(route("4 403 ACCESS DENIED", Some(&cmd)), Route::Reauthenticate);
        assert_eq!(
            route("4 506 INVALID SESSION", Some(&Command::logout())),
            Route::LoggedOut
        );
    }

    #[test]
    fn test_fatal_routes() {
        assert_eq!(
            route("504 CLIENT BANNED - outdated build", None),
            Route::Fatal {
                code: ReplyCode::ClientBanned,
                reason: "outdated build".into()
            }
        );
        assert_eq!(
            route("555 BANNED\nflooding", None),
            Route::Fatal {
                code: ReplyCode::Banned,
                reason: "flooding".into()
            }
        );
        let r = route("3 503 CLIENT VERSION OUTDATED", None);
        assert!(matches!(r, Route::Fatal { code: ReplyCode::ClientVersionOutdated, .. }));
        assert!(r.settles_in_flight());
        assert!(!r.is_push());
    }

    #[test]
    fn test_tagless_errors_settle_in_flight() {
        assert!(route("598 UNKNOWN COMMAND", None).settles_in_flight());
        assert!(route("505 ILLEGAL INPUT OR ACCESS DENIED", None).settles_in_flight());
        assert!(route("604 TIMEOUT - DELAY AND RESUBMIT", None).settles_in_flight());
        assert!(route("399 SOMETHING NEW", None).settles_in_flight());
        assert!(!route("300 PONG", None).settles_in_flight());
    }

    #[test]
    fn test_already_in_mylist_resends_in_edit_mode() {
        let cmd = Command::mylist_add(100, "abc").with("viewed", 1);
        match route("2 310 FILE ALREADY IN MYLIST\n1|2", Some(&cmd)) {
            Route::Resend(c) => {
                assert_eq!(c.render(), "MYLISTADD size=100&ed2k=abc&viewed=1&edit=1")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_anime_record_route() {
        let cmd = Command::anime(3, &FieldMask::from_hex("20000000000000"));
        match route("5 230 ANIME\n1998", Some(&cmd)) {
            Route::Record { record, followup } => {
                assert_eq!(record.id(), 3);
                assert!(followup.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(route("5 230 ANIME\n1998", None), Route::Malformed(_)));
    }

    #[test]
    fn test_push_notification_carries_ack() {
        match route("0 270 NOTIFICATION\n42|0|1|1700000000|Hi|There", None) {
            Route::Notification { notification, ack } => {
                assert_eq!(notification.nid, 42);
                assert_eq!(ack.unwrap().render(), "PUSHACK nid=42");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_misc_routes() {
        assert_eq!(
            route("6 330 NO SUCH ANIME", None),
            Route::NotFound(ReplyCode::NoSuchAnime)
        );
        assert_eq!(
            route("6 602 SERVER BUSY", None),
            Route::ServerUnavailable(ReplyCode::ServerBusy)
        );
        assert_eq!(route("6 300 PONG", None), Route::Acknowledged(ReplyCode::Pong));
        assert_eq!(route("6 217 EXPORT QUEUED", None), Route::ExportQueued);
        assert_eq!(
            route("6 210 MYLIST ENTRY ADDED\n77", None),
            Route::MylistAdded {
                lid: Some(77),
                edited: false
            }
        );
        assert_eq!(route("6 299 WHATEVER", None), Route::Unhandled(299));
        assert!(matches!(
            route("6 598 UNKNOWN COMMAND", None),
            Route::Diagnostic { code: ReplyCode::UnknownCommand, .. }
        ));
    }
}
