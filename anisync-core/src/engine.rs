//! Tick-driven protocol engine.
//!
//! The engine owns the queue, the session and the transport. Every call to
//! [`ProtocolEngine::tick`] runs one cycle:
//!
//! ```text
//! retry check -> receive + dispatch -> export poll -> at most one send
//! ```
//!
//! Nothing happens between ticks, so a caller (or a test) controls time
//! completely.

use crate::dispatcher::{ResponseDispatcher, Route};
use crate::error::CoreError;
use crate::event::EngineEvent;
use crate::guard::{InFlightRequestGuard, RequestKey, DEFAULT_GUARD_EXPIRY_SECS};
use crate::notify::{ExportPoller, PollAction};
use crate::queue::{PacketQueue, TickEffect};
use crate::record::{CatalogRecord, RecordKind, Subject};
use crate::session::SessionState;
use crate::store::{CatalogStore, OutgoingPacket, PacketStore};
use crate::transport::{DatagramSocket, Transport};
use anisync_protocol::{Command, Datagram, FieldMask, Reply, ReplyCode, Verb, SEND_INTERVAL};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity of the event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Code recorded for a packet the engine closed without sending.
const LOCAL_CODE: &str = "LOCAL";

/// Account credentials.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Client name registered with the server.
    pub client_name: String,
    pub client_version: u32,
    /// How long a duplicate request stays blocked, in seconds.
    pub guard_expiry_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            client_name: "anisync".to_string(),
            client_version: 1,
            guard_expiry_secs: DEFAULT_GUARD_EXPIRY_SECS,
        }
    }
}

/// Outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    Queued(u64),
    /// The same subject already has a request outstanding.
    Duplicate,
    /// The catalog already holds every requested field.
    AlreadyKnown,
    /// The client is banned; nothing was queued.
    Banned,
}

impl EnqueueResult {
    pub fn tag(&self) -> Option<u64> {
        match self {
            EnqueueResult::Queued(tag) => Some(*tag),
            _ => None,
        }
    }
}

/// Parameters of a MYLISTADD request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MylistAdd {
    pub size: u64,
    pub ed2k: String,
    pub viewed: Option<bool>,
    pub state: Option<u8>,
    pub storage: Option<String>,
}

impl MylistAdd {
    pub fn new(size: u64, ed2k: impl Into<String>) -> Self {
        Self {
            size,
            ed2k: ed2k.into(),
            ..Default::default()
        }
    }

    pub fn with_viewed(mut self, viewed: bool) -> Self {
        self.viewed = Some(viewed);
        self
    }

    pub fn with_state(mut self, state: u8) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_storage(mut self, storage: impl Into<String>) -> Self {
        self.storage = Some(storage.into());
        self
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::mylist_add(self.size, &self.ed2k);
        if let Some(viewed) = self.viewed {
            cmd.set("viewed", u8::from(viewed));
        }
        if let Some(state) = self.state {
            cmd.set("state", state);
        }
        if let Some(storage) = &self.storage {
            cmd.set("storage", storage);
        }
        cmd
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Tag of the packet sent this tick.
    pub sent: Option<u64>,
    pub received: usize,
    pub retried: usize,
    pub timed_out: usize,
}

/// The client engine.
pub struct ProtocolEngine<S: DatagramSocket, Q: PacketStore, C: CatalogStore> {
    config: EngineConfig,
    credentials: Option<Credentials>,
    transport: Transport<S>,
    queue: PacketQueue<Q>,
    catalog: Arc<C>,
    session: SessionState,
    guard: Arc<InFlightRequestGuard<RequestKey>>,
    dispatcher: ResponseDispatcher,
    poller: ExportPoller,
    events: broadcast::Sender<EngineEvent>,
    /// Request key of each outstanding tag, with the time it was claimed.
    keys: HashMap<u64, (RequestKey, DateTime<Utc>)>,
    auth_tag: Option<u64>,
    last_send: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
}

impl<S: DatagramSocket, Q: PacketStore, C: CatalogStore> ProtocolEngine<S, Q, C> {
    pub fn new(config: EngineConfig, transport: Transport<S>, store: Q, catalog: Arc<C>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let guard = Arc::new(InFlightRequestGuard::new(Duration::seconds(
            config.guard_expiry_secs,
        )));
        Self {
            config,
            credentials: None,
            transport,
            queue: PacketQueue::new(store),
            catalog,
            session: SessionState::new(),
            guard,
            dispatcher: ResponseDispatcher::new(),
            poller: ExportPoller::new(),
            events,
            keys: HashMap::new(),
            auth_tag: None,
            last_send: None,
            now: Utc::now(),
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn queue(&self) -> &PacketQueue<Q> {
        &self.queue
    }

    /// The packet store, for syncing or compacting it between ticks.
    pub fn packet_store_mut(&mut self) -> &mut Q {
        self.queue.store_mut()
    }

    pub fn catalog(&self) -> &Arc<C> {
        &self.catalog
    }

    pub fn guard(&self) -> &Arc<InFlightRequestGuard<RequestKey>> {
        &self.guard
    }

    pub fn poller(&self) -> &ExportPoller {
        &self.poller
    }

    pub fn transport(&self) -> &Transport<S> {
        &self.transport
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_banned(&self) -> bool {
        self.session.is_banned()
    }

    pub fn ban_reason(&self) -> Option<&str> {
        self.session.ban_reason()
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Queues a raw command.
    pub fn enqueue(&mut self, command: &Command) -> Result<EnqueueResult, CoreError> {
        if self.session.is_banned() {
            debug!("Rejecting {}: client is banned", command.verb());
            return Ok(EnqueueResult::Banned);
        }
        Ok(EnqueueResult::Queued(self.queue.enqueue(command)?))
    }

    /// Stores new credentials and starts authenticating.
    pub fn login(&mut self, credentials: Credentials) -> Result<EnqueueResult, CoreError> {
        if self.session.is_banned() {
            return Ok(EnqueueResult::Banned);
        }
        self.credentials = Some(credentials);
        self.session.reset_credentials();
        if self.session.is_logged_in() || self.auth_tag.is_some() {
            return Ok(EnqueueResult::Duplicate);
        }
        match self.queue_auth()? {
            Some(tag) => Ok(EnqueueResult::Queued(tag)),
            None => Ok(EnqueueResult::Duplicate),
        }
    }

    pub fn logout(&mut self) -> Result<EnqueueResult, CoreError> {
        self.enqueue(&Command::logout())
    }

    pub fn ping(&mut self) -> Result<EnqueueResult, CoreError> {
        self.enqueue(&Command::ping())
    }

    /// Requests anime fields, skipping the ones the catalog already has.
    pub fn request_anime(
        &mut self,
        aid: u64,
        mask: &FieldMask,
    ) -> Result<EnqueueResult, CoreError> {
        let mask = match self.catalog.known_fields(RecordKind::Anime, aid) {
            Some(known) => *mask & !known,
            None => *mask,
        };
        if mask.is_empty() {
            debug!("Anime {} already known", aid);
            return Ok(EnqueueResult::AlreadyKnown);
        }
        let key = Subject::new(RecordKind::Anime, aid).into();
        self.request(key, Command::anime(aid, &mask))
    }

    /// Looks a file up by size and ed2k hash.
    pub fn request_file(
        &mut self,
        size: u64,
        ed2k: &str,
        fmask: &FieldMask,
        amask: &FieldMask,
    ) -> Result<EnqueueResult, CoreError> {
        let key = RequestKey::FileHash {
            size,
            ed2k: ed2k.to_ascii_lowercase(),
        };
        self.request(key, Command::file_by_hash(size, ed2k, fmask, amask))
    }

    pub fn request_file_by_id(
        &mut self,
        fid: u64,
        fmask: &FieldMask,
        amask: &FieldMask,
    ) -> Result<EnqueueResult, CoreError> {
        let key = Subject::new(RecordKind::File, fid).into();
        self.request(key, Command::file_by_id(fid, fmask, amask))
    }

    pub fn request_episode(&mut self, eid: u64) -> Result<EnqueueResult, CoreError> {
        let key = Subject::new(RecordKind::Episode, eid).into();
        self.request(key, Command::episode(eid))
    }

    pub fn request_group(&mut self, gid: u64) -> Result<EnqueueResult, CoreError> {
        let key = Subject::new(RecordKind::Group, gid).into();
        self.request(key, Command::group(gid))
    }

    pub fn mylist_add(&mut self, add: &MylistAdd) -> Result<EnqueueResult, CoreError> {
        self.enqueue(&add.to_command())
    }

    pub fn mylist(&mut self, lid: u64) -> Result<EnqueueResult, CoreError> {
        let key = Subject::new(RecordKind::Mylist, lid).into();
        self.request(key, Command::mylist(lid))
    }

    pub fn mylist_stats(&mut self) -> Result<EnqueueResult, CoreError> {
        self.enqueue(&Command::mylist_stats())
    }

    pub fn notify_list(&mut self) -> Result<EnqueueResult, CoreError> {
        self.enqueue(&Command::notify_list())
    }

    pub fn mylist_export(&mut self, template: &str) -> Result<EnqueueResult, CoreError> {
        self.enqueue(&Command::mylist_export(template))
    }

    fn request(&mut self, key: RequestKey, command: Command) -> Result<EnqueueResult, CoreError> {
        if self.session.is_banned() {
            return Ok(EnqueueResult::Banned);
        }
        if !self.guard.try_acquire(key.clone(), self.now) {
            debug!("Request for {} already in flight", key);
            return Ok(EnqueueResult::Duplicate);
        }
        match self.enqueue(&command) {
            Ok(EnqueueResult::Queued(tag)) => {
                self.keys.insert(tag, (key, self.now));
                Ok(EnqueueResult::Queued(tag))
            }
            other => {
                self.guard.release(&key);
                other
            }
        }
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// Runs one engine cycle at `now`.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<TickSummary, CoreError> {
        self.now = now;
        let mut summary = TickSummary::default();

        for effect in self.queue.on_tick(now)? {
            self.apply_tick_effect(effect, &mut summary);
        }

        let datagrams = self.transport.receive()?;
        summary.received = datagrams.len();
        for datagram in datagrams {
            self.handle_datagram(&datagram, &mut summary)?;
        }

        match self.poller.poll(now) {
            PollAction::Check => {
                self.enqueue(&Command::notify_list())?;
            }
            PollAction::Expired => self.emit(EngineEvent::ExportPollExpired),
            PollAction::Idle => {}
        }

        if self.can_send(now) {
            if let Some(packet) = self.next_packet()? {
                self.send_packet(&packet, now)?;
                summary.sent = Some(packet.tag);
            }
        }

        Ok(summary)
    }

    fn apply_tick_effect(&mut self, effect: TickEffect, summary: &mut TickSummary) {
        match effect {
            TickEffect::Retried { tag, retry_count } => {
                summary.retried += 1;
                self.emit(EngineEvent::Retrying { tag, retry_count });
            }
            TickEffect::TimedOut { tag, command } => {
                summary.timed_out += 1;
                self.timed_out(tag, command);
            }
        }
    }

    fn timed_out(&mut self, tag: u64, command: String) {
        if self.auth_tag == Some(tag) {
            self.auth_tag = None;
            self.session.invalidate();
        }
        self.release_key(tag);
        self.emit(EngineEvent::TimedOut { tag, command });
    }

    fn can_send(&self, now: DateTime<Utc>) -> bool {
        if self.session.is_banned() {
            return false;
        }
        match self.last_send {
            Some(last) => {
                (now - last).to_std().unwrap_or_default() >= SEND_INTERVAL
            }
            None => true,
        }
    }

    /// Picks the packet to send, queueing an AUTH first when the next one
    /// needs a session that does not exist.
    fn next_packet(&mut self) -> Result<Option<OutgoingPacket>, CoreError> {
        if self.queue.in_flight().is_some() {
            return Ok(None);
        }

        if let Some(tag) = self.auth_tag {
            match self.queue.get(tag) {
                Some(p) if p.is_sendable() => return Ok(Some(p)),
                Some(p) if !p.got_reply => {}
                _ => self.auth_tag = None,
            }
        }

        let Some(packet) = self.queue.next_sendable() else {
            return Ok(None);
        };
        let verb = Command::parse(&packet.command)
            .map(|c| c.verb().clone())
            .unwrap_or_else(|_| Verb::Other(String::new()));

        if !verb.requires_session() || self.session.session_id().is_some() {
            return Ok(Some(packet));
        }

        if verb == Verb::Logout {
            debug!("Dropping LOGOUT tag {}: no session", packet.tag);
            self.queue.complete(packet.tag, LOCAL_CODE)?;
            return Ok(None);
        }

        if self.auth_tag.is_some() {
            return Ok(None);
        }
        match self.queue_auth()? {
            Some(tag) => Ok(self.queue.get(tag)),
            None => Ok(None),
        }
    }

    /// Queues an AUTH packet if credentials are usable.
    ///
    /// The stored command carries no password; it is filled in at send time.
    fn queue_auth(&mut self) -> Result<Option<u64>, CoreError> {
        let Some(credentials) = &self.credentials else {
            debug!("Session required but no credentials configured");
            return Ok(None);
        };
        if self.session.credentials_rejected() {
            debug!("Session required but credentials were rejected");
            return Ok(None);
        }

        let mut auth = Command::auth(
            &credentials.user,
            "",
            &self.config.client_name,
            self.config.client_version,
        );
        auth.remove("pass");
        let tag = self.queue.enqueue(&auth)?;
        self.auth_tag = Some(tag);
        self.session.begin_auth();
        info!("Authenticating as {}", credentials.user);
        Ok(Some(tag))
    }

    fn send_packet(&mut self, packet: &OutgoingPacket, now: DateTime<Utc>) -> Result<(), CoreError> {
        let command = match Command::parse(&packet.command) {
            Ok(c) => c,
            Err(e) => {
                warn!("Dropping unparseable packet {}: {}", packet.tag, e);
                self.queue.complete(packet.tag, LOCAL_CODE)?;
                return Ok(());
            }
        };

        let is_auth = *command.verb() == Verb::Auth;
        let command = match &self.credentials {
            Some(c) if is_auth => Command::auth(
                &c.user,
                &c.password,
                &self.config.client_name,
                self.config.client_version,
            ),
            _ => command,
        };

        match self
            .transport
            .send(&command, self.session.session_id(), packet.tag)
        {
            Ok(()) => {}
            // The reply timeout takes care of a datagram that never left.
            Err(CoreError::Io(e)) => warn!("Send of tag {} failed: {}", packet.tag, e),
            Err(e) => return Err(e),
        }

        self.queue.mark_sent(packet.tag, now)?;
        self.last_send = Some(now);
        Ok(())
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    fn handle_datagram(
        &mut self,
        datagram: &Datagram,
        summary: &mut TickSummary,
    ) -> Result<(), CoreError> {
        let reply = match datagram.to_reply() {
            Ok(r) => r,
            Err(e) => {
                warn!("Dropping malformed reply: {}", e);
                return Ok(());
            }
        };
        debug!(
            "<- tag={} code={} {}",
            reply.header.tag, reply.header.code, reply.header.text
        );

        let Some(tag) = reply.header.tag_number() else {
            return self.handle_untagged(&reply, summary);
        };

        let Some(packet) = self.queue.get(tag) else {
            warn!("Dropping reply {} for unknown tag {}", reply.code(), tag);
            return Ok(());
        };
        if packet.got_reply {
            warn!("Dropping reply {} for completed tag {}", reply.code(), tag);
            return Ok(());
        }

        let command = Command::parse(&packet.command).ok();
        let route = self.dispatcher.route(&reply, command.as_ref());
        self.apply(Some(tag), reply.reply_code(), route, summary)
    }

    fn handle_untagged(
        &mut self,
        reply: &Reply,
        summary: &mut TickSummary,
    ) -> Result<(), CoreError> {
        let route = self.dispatcher.route(reply, None);
        if route.is_push() {
            return self.apply(None, reply.reply_code(), route, summary);
        }
        if !route.settles_in_flight() {
            warn!(
                "Dropping tagless reply {} {}",
                reply.code(),
                reply.header.text
            );
            return Ok(());
        }

        let tag = self.queue.in_flight().map(|packet| packet.tag);
        if let Some(tag) = tag {
            debug!("Tagless reply {} answers tag {}", reply.code(), tag);
        }
        self.apply(tag, reply.reply_code(), route, summary)
    }

    fn apply(
        &mut self,
        tag: Option<u64>,
        code: ReplyCode,
        route: Route,
        summary: &mut TickSummary,
    ) -> Result<(), CoreError> {
        match route {
            Route::LoggedIn {
                session_id,
                new_version,
            } => {
                if new_version {
                    info!("A newer client version is available");
                }
                self.session.on_login(session_id);
                self.auth_tag = None;
                self.emit(EngineEvent::LoggedIn { new_version });
            }
            Route::LoggedOut => {
                self.session.on_logout();
                self.emit(EngineEvent::LoggedOut);
            }
            Route::LoginFailed => {
                self.session.on_login_failed();
                self.auth_tag = None;
                self.emit(EngineEvent::LoginFailed);
            }
            Route::LoginFirst => {
                self.session.invalidate();
                if self.auth_tag.is_none() {
                    self.queue_auth()?;
                }
            }
            Route::Reauthenticate => {
                self.session.invalidate();
                if let Some(tag) = tag {
                    // Replayed after login; not a failed attempt.
                    self.queue.requeue(tag)?;
                    self.emit(EngineEvent::SessionExpired { tag });
                }
                return Ok(());
            }
            Route::Fatal { code: _, reason } => {
                self.session.ban(reason.clone());
                self.poller.stop();
                self.emit(EngineEvent::Banned { reason });
            }
            Route::Record { record, followup } => {
                if let Some(tag) = tag {
                    self.store_record(tag, record, followup)?;
                }
            }
            Route::MylistAdded { lid, edited } => {
                if let Some(tag) = tag {
                    self.emit(EngineEvent::MylistAdded { tag, lid, edited });
                }
            }
            Route::Resend(command) => {
                let new_tag = self.queue.enqueue(&command)?;
                debug!("Resending as tag {}: {}", new_tag, command);
                if let Some(tag) = tag {
                    self.emit(EngineEvent::FollowUpQueued {
                        tag,
                        followup: new_tag,
                    });
                }
            }
            Route::NotFound(_) => {
                if let Some(tag) = tag {
                    let key = self.release_key(tag);
                    self.emit(EngineEvent::NotFound { tag, key });
                }
            }
            Route::ExportQueued => {
                self.poller.start(self.now);
                self.emit(EngineEvent::ExportQueued);
            }
            Route::Export(code) => {
                debug!("Export reply {}", code);
            }
            Route::NotifyList { message_ids } => {
                for id in message_ids {
                    if !self.catalog.exists(RecordKind::Notification, id) {
                        self.queue.enqueue(&Command::notify_get('M', id))?;
                    }
                }
            }
            Route::Notification { notification, ack } => {
                let nid = notification.nid;
                let ready = notification.is_export_ready();
                self.catalog
                    .upsert(CatalogRecord::Notification(notification))?;
                if let Some(ack) = ack {
                    self.queue.enqueue(&ack)?;
                }
                if ready {
                    self.poller.stop();
                    self.emit(EngineEvent::ExportReady { nid });
                }
                self.emit(EngineEvent::Notification { nid });
            }
            Route::ServerUnavailable(code) => {
                warn!("Server unavailable ({})", code);
                if let Some(tag) = tag {
                    let effect = self.queue.fail_attempt(tag)?;
                    self.apply_tick_effect(effect, summary);
                }
                return Ok(());
            }
            Route::Diagnostic { code, text } => {
                warn!("Server rejected request ({} {})", code, text);
                self.emit(EngineEvent::Diagnostic { tag, code, text });
            }
            Route::Acknowledged(_) => {}
            Route::Malformed(reason) => {
                warn!("Malformed reply {}: {}", code, reason);
                if let Some(tag) = tag {
                    self.release_key(tag);
                }
            }
            Route::Unhandled(c) => {
                warn!("Unhandled reply code {}", c);
                if let Some(tag) = tag {
                    self.release_key(tag);
                }
            }
        }

        if let Some(tag) = tag {
            self.queue.complete(tag, &code.to_string())?;
            self.emit(EngineEvent::Replied { tag, code });
        }
        Ok(())
    }

    fn store_record(
        &mut self,
        tag: u64,
        record: CatalogRecord,
        followup: Option<Command>,
    ) -> Result<(), CoreError> {
        self.catalog.upsert(record.clone())?;
        let partial = followup.is_some();
        self.emit(EngineEvent::Record {
            tag,
            record,
            partial,
        });

        match followup {
            Some(followup) => {
                let new_tag = self.queue.enqueue(&followup)?;
                // The subject stays claimed until the follow-up answers.
                if let Some(claim) = self.keys.remove(&tag) {
                    self.keys.insert(new_tag, claim);
                }
                self.emit(EngineEvent::FollowUpQueued {
                    tag,
                    followup: new_tag,
                });
            }
            None => {
                self.release_key(tag);
            }
        }
        Ok(())
    }

    fn release_key(&mut self, tag: u64) -> Option<RequestKey> {
        let (key, acquired_at) = self.keys.remove(&tag)?;
        if !self.guard.release_claim(&key, acquired_at) {
            debug!("Claim on {} already expired", key);
        }
        Some(key)
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
