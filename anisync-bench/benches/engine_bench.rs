//! Protocol engine benchmarks over an in-memory responder.

use anisync_core::{
    Credentials, DatagramSocket, EngineConfig, MemoryCatalog, MemoryPacketStore, ProtocolEngine,
    Transport,
};
use anisync_protocol::ANIME_AMASK;
use chrono::{DateTime, Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

/// Answers every request on the next read.
#[derive(Default)]
struct Responder {
    inbox: VecDeque<Vec<u8>>,
    anime_line: String,
}

impl DatagramSocket for Responder {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        let request = String::from_utf8_lossy(datagram);
        let tag = request.rsplit("tag=").next().unwrap_or("0");
        let reply = if request.starts_with("AUTH") {
            format!("{} 200 bench LOGIN ACCEPTED", tag)
        } else if request.starts_with("ANIME") {
            format!("{} 230 ANIME\n{}", tag, self.anime_line)
        } else {
            format!("{} 300 PONG", tag)
        };
        self.inbox.push_back(reply.into_bytes());
        Ok(())
    }

    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let Some(datagram) = self.inbox.pop_front() else {
            return Ok(None);
        };
        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        Ok(Some(len))
    }
}

type BenchEngine = ProtocolEngine<Responder, MemoryPacketStore, MemoryCatalog>;

fn create_engine() -> BenchEngine {
    let mask = ANIME_AMASK.all_fields();
    let values: Vec<String> = (0..mask.count_ones()).map(|i| i.to_string()).collect();
    let socket = Responder {
        anime_line: values.join("|"),
        ..Default::default()
    };
    ProtocolEngine::new(
        EngineConfig::default(),
        Transport::new(socket),
        MemoryPacketStore::new(),
        Arc::new(MemoryCatalog::new()),
    )
    .with_credentials(Credentials::new("bench", "bench"))
}

/// Ticks with a synthetic clock until nothing is queued or in flight.
fn drain(engine: &mut BenchEngine, now: &mut DateTime<Utc>) {
    for _ in 0..8 {
        engine.tick(*now).unwrap();
        *now += Duration::seconds(3);
        if engine.queue().pending_len() == 0 && engine.queue().in_flight().is_none() {
            return;
        }
    }
}

fn bench_anime_round_trip(c: &mut Criterion) {
    let mut engine = create_engine();
    let mut now = Utc::now();
    let mask = ANIME_AMASK.all_fields();
    let mut aid = 0u64;

    // Log in once up front
    engine.login(Credentials::new("bench", "bench")).unwrap();
    drain(&mut engine, &mut now);

    let mut group = c.benchmark_group("engine");
    group.throughput(Throughput::Elements(1));
    group.bench_function("anime_request_to_record", |b| {
        b.iter(|| {
            aid += 1;
            black_box(engine.request_anime(aid, &mask).unwrap());
            drain(&mut engine, &mut now);
        });
    });
    group.finish();
}

fn bench_already_known(c: &mut Criterion) {
    let mut engine = create_engine();
    let mut now = Utc::now();
    let mask = ANIME_AMASK.all_fields();
    engine.request_anime(1, &mask).unwrap();
    drain(&mut engine, &mut now);

    c.bench_function("engine_already_known", |b| {
        b.iter(|| black_box(engine.request_anime(1, &mask).unwrap()));
    });
}

criterion_group!(benches, bench_anime_round_trip, bench_already_known);
criterion_main!(benches);
