//! Protocol encoding/decoding benchmarks.

use anisync_protocol::{Command, Datagram, FieldMask, MaskCodec, Reply, ANIME_AMASK};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;

fn anime_reply(fields: usize) -> (FieldMask, String) {
    let mask = ANIME_AMASK.all_fields();
    let values: Vec<String> = (0..mask.count_ones() as usize)
        .take(fields)
        .map(|i| format!("value{}", i))
        .collect();
    (mask, format!("1 230 ANIME\n{}", values.join("|")))
}

fn compressed(text: &str) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    let mut raw = vec![0, 0];
    raw.extend(encoder.finish().unwrap());
    raw
}

fn bench_mask_encode(c: &mut Criterion) {
    let names: Vec<&str> = ANIME_AMASK.names().collect();
    let mut group = c.benchmark_group("mask_encode");

    for count in [4, 16, names.len()] {
        let fields = &names[..count];
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), fields, |b, fields| {
            b.iter(|| black_box(MaskCodec::encode(&ANIME_AMASK, fields).unwrap()));
        });
    }

    group.finish();
}

fn bench_mask_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("mask_decode");
    let mask = ANIME_AMASK.all_fields();

    // Full line, and a line cut off halfway
    for (name, take) in [("complete", usize::MAX), ("truncated", 20)] {
        let tokens: Vec<String> = (0..mask.count_ones() as usize)
            .take(take)
            .map(|i| format!("value{}", i))
            .collect();
        group.throughput(Throughput::Elements(tokens.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &tokens, |b, tokens| {
            b.iter(|| black_box(MaskCodec::decode(&ANIME_AMASK, tokens, &mask, 0)));
        });
    }

    group.finish();
}

fn bench_command_wire(c: &mut Criterion) {
    let command = Command::anime(1, &ANIME_AMASK.all_fields());
    c.bench_function("command_to_wire", |b| {
        b.iter(|| black_box(command.to_wire(Some("sess1"), 42)));
    });

    let wire = command.to_wire(Some("sess1"), 42);
    c.bench_function("command_parse", |b| {
        b.iter(|| black_box(Command::parse(&wire).unwrap()));
    });
}

fn bench_reply_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("reply_parse");

    for fields in [8, 32] {
        let (_, text) = anime_reply(fields);
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(fields), &text, |b, text| {
            b.iter(|| black_box(Reply::parse(text, false).unwrap()));
        });
    }

    group.finish();
}

fn bench_datagram(c: &mut Criterion) {
    let mut group = c.benchmark_group("datagram_from_raw");
    let (_, text) = anime_reply(32);

    let plain = text.clone().into_bytes();
    let packed = compressed(&text);
    for (name, raw) in [("plain", plain), ("compressed", packed)] {
        group.throughput(Throughput::Bytes(raw.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &raw, |b, raw| {
            b.iter(|| black_box(Datagram::from_raw(raw).unwrap().to_reply().unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_mask_encode,
    bench_mask_decode,
    bench_command_wire,
    bench_reply_parse,
    bench_datagram,
);
criterion_main!(benches);
