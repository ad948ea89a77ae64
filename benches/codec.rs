//! Benchmarks for the layout codec and snapshot formatters.
//!
//! Runs without an async runtime so decode, generate and format costs are
//! measured in isolation.

use beacon_listener::{
    Beacon, DEFAULT_LAYOUTS, Field, JsonFormatter, Layout, LayoutSet, SnapshotFormatter,
    TextFormatter, altbeacon, compress_url, eddystone,
};
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

/// AltBeacon advertisement, uuid e858fc8a-372b-4bef-a053-93f98cd4e177, major 1, minor 1.
fn altbeacon_ad() -> Vec<u8> {
    Field::from_hex("BEACBEACE858FC8A372B4BEFA05393F98CD4E177000100014020")
        .unwrap()
        .as_bytes()
        .to_vec()
}

/// Eddystone-TLM frame, the last default layout to be tried but one.
fn tlm_ad() -> Vec<u8> {
    vec![
        0xaa, 0xfe, 0x20, 0x00, 0x0b, 0xb8, 0x15, 0x80, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x03,
        0xe8,
    ]
}

fn bench_layout_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("layout_parse");
    group.throughput(Throughput::Elements(DEFAULT_LAYOUTS.len() as u64));
    group.bench_function("defaults", |b| {
        b.iter(|| {
            for (name, text) in DEFAULT_LAYOUTS {
                black_box(Layout::parse(*name, black_box(text)).unwrap());
            }
        })
    });
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let layouts = LayoutSet::defaults();
    let altbeacon = altbeacon_ad();
    let tlm = tlm_ad();
    let noise = vec![0x4c, 0x00, 0x02, 0x15, 0x00, 0x01, 0x02];

    group.throughput(Throughput::Elements(1));
    group.bench_function("altbeacon_first_layout", |b| {
        b.iter(|| black_box(layouts.parse(black_box(&altbeacon))))
    });
    group.bench_function("eddystone_tlm", |b| {
        b.iter(|| black_box(layouts.parse(black_box(&tlm))))
    });
    group.bench_function("no_match", |b| {
        b.iter(|| black_box(layouts.parse(black_box(&noise))))
    });
    group.finish();
}

fn bench_generate(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate");
    let layouts = LayoutSet::defaults();
    let alt = altbeacon::new(
        "e858fc8a-372b-4bef-a053-93f98cd4e177".parse().unwrap(),
        1,
        1,
        -59,
    );
    let url = eddystone::url("https://www.radiusnetworks.com", -20).unwrap();

    group.throughput(Throughput::Elements(1));
    group.bench_function("altbeacon", |b| {
        b.iter(|| black_box(layouts.generate(black_box(&alt)).unwrap()))
    });
    group.bench_function("eddystone_url", |b| {
        b.iter(|| black_box(layouts.generate(black_box(&url)).unwrap()))
    });
    group.bench_function("compress_url", |b| {
        b.iter(|| black_box(compress_url(black_box("https://www.radiusnetworks.com")).unwrap()))
    });
    group.finish();
}

fn snapshot(size: usize) -> Vec<Beacon> {
    let layouts = LayoutSet::defaults();
    (0..size)
        .map(|i| {
            let mut beacon = layouts.parse(&altbeacon_ad()).unwrap();
            beacon.device = format!("00:00:00:00:00:{:02x}", i % 256);
            beacon.add_rssi_sample(-60);
            beacon.add_rssi_sample(-64);
            beacon
        })
        .collect()
}

fn bench_format(c: &mut Criterion) {
    let mut group = c.benchmark_group("format");

    for size in [1, 10, 100] {
        let beacons = snapshot(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(format!("text_{size}"), |b| {
            b.iter(|| black_box(TextFormatter.format(black_box(&beacons))))
        });
        group.bench_function(format!("json_{size}"), |b| {
            b.iter(|| black_box(JsonFormatter.format(black_box(&beacons))))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_layout_parse,
    bench_decode,
    bench_generate,
    bench_format
);
criterion_main!(benches);
