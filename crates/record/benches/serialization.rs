//! Benchmarks for record serialization
//!
//! Measures encoding/decoding cost of the two cache formats for a realistic
//! host topology (hubs, HID devices, mass storage).

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use record::{
    ConfigRecord, DeviceRecord, EndpointRecord, InterfaceRecord, decode_json, decode_snapshot,
    encode_json, encode_snapshot,
};

fn create_device(address: u8) -> DeviceRecord {
    let endpoints = vec![
        EndpointRecord {
            address: 0x81,
            attributes: 0x02,
            interval: 0,
            max_packet_size: 512,
            interface_id: 0,
        },
        EndpointRecord {
            address: 0x02,
            attributes: 0x02,
            interval: 0,
            max_packet_size: 512,
            interface_id: 0,
        },
    ];

    DeviceRecord {
        name: format!("001-{:03}", address),
        serial: format!("SN{:08}", address),
        manufacturer_name: "Test Manufacturer".to_string(),
        product_name: format!("Test Device {}", address),
        version: "1.00".to_string(),
        vendor_id: 0x1234,
        product_id: 0x5678 + address as u16,
        clazz: 0x08,
        sub_class: 0x06,
        protocol: 0x50,
        dev_address: address,
        bus_num: 1,
        configs: vec![ConfigRecord {
            id: 1,
            attributes: 0x80,
            max_power: 200,
            name: String::new(),
            interfaces: vec![InterfaceRecord {
                id: 0,
                protocol: 0x50,
                clazz: 0x08,
                sub_class: 0x06,
                alternate_setting: 0,
                name: String::new(),
                endpoints,
            }],
            alt_settings: Vec::new(),
        }],
    }
}

fn benchmark_topology(c: &mut Criterion) {
    let mut group = c.benchmark_group("topology");

    for count in [1usize, 16, 128] {
        let devices: Vec<DeviceRecord> = (1..=count).map(|i| create_device(i as u8)).collect();
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("encode_json", count), &devices, |b, d| {
            b.iter(|| encode_json(black_box(d)))
        });

        let json = encode_json(&devices).unwrap();
        group.bench_with_input(BenchmarkId::new("decode_json", count), &json, |b, j| {
            b.iter(|| decode_json(black_box(j)))
        });

        group.bench_with_input(
            BenchmarkId::new("encode_snapshot", count),
            &devices,
            |b, d| b.iter(|| encode_snapshot(black_box(d))),
        );

        let frame = encode_snapshot(&devices).unwrap();
        group.bench_with_input(
            BenchmarkId::new("decode_snapshot", count),
            &frame,
            |b, f| b.iter(|| decode_snapshot(black_box(f))),
        );
    }

    group.finish();
}

criterion_group!(benches, benchmark_topology);
criterion_main!(benches);
