//! Sync loop.
//!
//! `SyncClient` owns a `ProtocolEngine` over a UDP socket and calls
//! `tick(now)` on a fixed interval until it is shut down or banned.

use crate::connection::ConnectionConfig;
use crate::error::ClientError;
use crate::socket::UdpSocketAdapter;
use anisync_core::{
    CatalogStore, DatagramSocket, EngineEvent, PacketStore, ProtocolEngine, TickSummary,
    Transport,
};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Stops a running `SyncClient` from another task.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
}

/// Drives a `ProtocolEngine` on the send cadence.
pub struct SyncClient<S: DatagramSocket, Q: PacketStore, C: CatalogStore> {
    engine: ProtocolEngine<S, Q, C>,
    tick_interval: Duration,
    events: broadcast::Receiver<EngineEvent>,
    shutdown: broadcast::Sender<()>,
}

impl<Q: PacketStore, C: CatalogStore> SyncClient<UdpSocketAdapter, Q, C> {
    /// Resolves the server, binds the local port and builds the engine.
    pub async fn connect(
        config: &ConnectionConfig,
        store: Q,
        catalog: Arc<C>,
    ) -> Result<Self, ClientError> {
        let server = tokio::net::lookup_host(&config.server)
            .await?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| ClientError::Resolve(config.server.clone()))?;
        let local = SocketAddr::from(([0, 0, 0, 0], config.local_port));
        let socket = UdpSocketAdapter::connect(local, server).await?;
        info!("Connected to {} ({})", config.server, server);

        Ok(Self::new(config, socket, store, catalog))
    }
}

impl<S: DatagramSocket, Q: PacketStore, C: CatalogStore> SyncClient<S, Q, C> {
    /// Builds a client over an already connected socket.
    pub fn new(config: &ConnectionConfig, socket: S, store: Q, catalog: Arc<C>) -> Self {
        let mut engine =
            ProtocolEngine::new(config.engine.clone(), Transport::new(socket), store, catalog);
        if let Some(credentials) = &config.credentials {
            engine = engine.with_credentials(credentials.clone());
        }
        let events = engine.subscribe();
        let (shutdown, _) = broadcast::channel(1);
        Self {
            engine,
            tick_interval: config.tick_interval,
            events,
            shutdown,
        }
    }

    pub fn engine(&self) -> &ProtocolEngine<S, Q, C> {
        &self.engine
    }

    /// For queueing requests between runs.
    pub fn engine_mut(&mut self) -> &mut ProtocolEngine<S, Q, C> {
        &mut self.engine
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.engine.subscribe()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown.clone(),
        }
    }

    /// Ticks until shut down.
    ///
    /// Returns `ClientError::Banned` if the server bans the client, and the
    /// first error that cannot be retried.
    pub async fn run(&mut self) -> Result<(), ClientError> {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Sync loop started (tick every {:?})", self.tick_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick_once()?;
                    self.drain_events(|_| false);
                }
                _ = shutdown_rx.recv() => {
                    info!("Sync loop stopping");
                    return Ok(());
                }
            }
        }
    }

    /// Ticks until `done` accepts an event or `timeout` passes.
    ///
    /// Returns the accepted event. Used by one-shot callers that queue a
    /// request and wait for its outcome.
    pub async fn run_until<F>(
        &mut self,
        timeout: Duration,
        mut done: F,
    ) -> Result<EngineEvent, ClientError>
    where
        F: FnMut(&EngineEvent) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick_once()?;
                    if let Some(event) = self.drain_events(&mut done) {
                        return Ok(event);
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(ClientError::Timeout);
                }
            }
        }
    }

    fn tick_once(&mut self) -> Result<TickSummary, ClientError> {
        let summary = match self.engine.tick(Utc::now()) {
            Ok(summary) => summary,
            Err(e) if e.is_retryable() => {
                warn!("Tick failed: {}", e);
                TickSummary::default()
            }
            Err(e) => return Err(e.into()),
        };

        if self.engine.is_banned() {
            let reason = self.engine.ban_reason().unwrap_or_default().to_string();
            error!("Stopping sync loop: banned ({})", reason);
            return Err(ClientError::Banned(reason));
        }
        Ok(summary)
    }

    /// Logs every pending event and returns the first one `done` accepts.
    fn drain_events<F>(&mut self, mut done: F) -> Option<EngineEvent>
    where
        F: FnMut(&EngineEvent) -> bool,
    {
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    log_event(&event);
                    if done(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Missed {} engine events", n);
                }
                Err(_) => return None,
            }
        }
    }
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::TimedOut { tag, command } => {
            warn!("Request {} timed out, outcome unknown: {}", tag, command)
        }
        EngineEvent::Record { tag, record, partial } => {
            debug!(
                "Stored {} (tag {}{})",
                record.subject(),
                tag,
                if *partial { ", partial" } else { "" }
            )
        }
        EngineEvent::ExportReady { nid } => info!("Mylist export ready (notification {})", nid),
        EngineEvent::ExportPollExpired => warn!("Mylist export never arrived"),
        other => debug!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anisync_core::{Credentials, EnqueueResult, MemoryCatalog, MemoryPacketStore};
    use anisync_protocol::FieldMask;
    use tokio::net::UdpSocket;

    async fn client_and_server() -> (
        SyncClient<UdpSocketAdapter, MemoryPacketStore, MemoryCatalog>,
        UdpSocket,
    ) {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket =
            UdpSocketAdapter::connect("127.0.0.1:0".parse().unwrap(), server.local_addr().unwrap())
                .await
                .unwrap();
        let config = ConnectionConfig::new(server.local_addr().unwrap().to_string())
            .with_tick_interval(Duration::from_millis(10))
            .with_credentials(Credentials::new("alice", "pw"));
        let client = SyncClient::new(
            &config,
            socket,
            MemoryPacketStore::new(),
            Arc::new(MemoryCatalog::new()),
        );
        (client, server)
    }

    /// Answers each request with the reply `respond` builds for it.
    fn spawn_server<F>(server: UdpSocket, respond: F)
    where
        F: Fn(&str, &str) -> String + Send + 'static,
    {
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            while let Ok((n, from)) = server.recv_from(&mut buf).await {
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let tag = request
                    .rsplit("tag=")
                    .next()
                    .unwrap_or("0")
                    .to_string();
                let reply = respond(&request, &tag);
                if server.send_to(reply.as_bytes(), from).await.is_err() {
                    break;
                }
            }
        });
    }

    #[tokio::test]
    async fn test_login_then_lookup() {
        let (mut client, server) = client_and_server().await;
        spawn_server(server, |request, tag| {
            if request.starts_with("AUTH") {
                format!("{} 200 sess1 LOGIN ACCEPTED", tag)
            } else if request.starts_with("EPISODE") {
                assert!(request.contains("s=sess1"));
                format!("{} 240 EPISODE\n77|5|24|850|12|03|Title|||0|1", tag)
            } else {
                format!("{} 598 UNKNOWN COMMAND", tag)
            }
        });

        let queued = client.engine_mut().request_episode(77).unwrap();
        assert!(matches!(queued, EnqueueResult::Queued(_)));

        let event = client
            .run_until(Duration::from_secs(5), |e| {
                matches!(e, EngineEvent::Record { .. })
            })
            .await
            .unwrap();
        match event {
            EngineEvent::Record { record, .. } => assert_eq!(record.id(), 77),
            other => panic!("unexpected {:?}", other),
        }
        assert!(client.engine().session().is_logged_in());
    }

    #[tokio::test]
    async fn test_ban_stops_the_loop() {
        let (mut client, server) = client_and_server().await;
        spawn_server(server, |_, _| "555 BANNED\nflooding".to_string());

        client
            .engine_mut()
            .request_anime(1, &FieldMask::from_hex("80000000000000"))
            .unwrap();
        let err = client.run().await.unwrap_err();
        match err {
            ClientError::Banned(reason) => assert_eq!(reason, "flooding"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_handle() {
        let (mut client, _server) = client_and_server().await;
        let handle = client.shutdown_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.shutdown();
        });
        tokio_test::assert_ok!(client.run().await);
    }

    #[tokio::test]
    async fn test_run_until_times_out() {
        let (mut client, _server) = client_and_server().await;
        let err = client
            .run_until(Duration::from_millis(50), |_| false)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout));
    }
}
