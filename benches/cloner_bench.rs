//! Performance benchmarks for pooled packet cloning

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sift::dns::cloner::PacketCloner;
use sift::dns::protocol::{DnsPacket, DnsQuestion, DnsRecord, QueryType, SvcParam};
use std::net::{Ipv4Addr, Ipv6Addr};

fn typical_response(answers: usize) -> DnsPacket {
    let mut packet = DnsPacket::new();
    packet.header.id = 1234;
    packet.header.response = true;
    packet
        .questions
        .push(DnsQuestion::new("www.example.com".to_string(), QueryType::A));

    packet.answers.push(DnsRecord::Cname {
        domain: "www.example.com".to_string(),
        host: "cdn.example.net".to_string(),
        ttl: 300,
    });
    for i in 0..answers {
        packet.answers.push(DnsRecord::A {
            domain: "cdn.example.net".to_string(),
            addr: Ipv4Addr::new(192, 0, 2, i as u8),
            ttl: 300,
        });
    }
    packet
}

fn https_response() -> DnsPacket {
    let mut packet = DnsPacket::new();
    packet.header.id = 1234;
    packet.header.response = true;
    packet.questions.push(DnsQuestion::new(
        "svc.example.com".to_string(),
        QueryType::Https,
    ));
    packet.answers.push(DnsRecord::Https {
        domain: "svc.example.com".to_string(),
        priority: 1,
        target: String::new(),
        params: vec![
            SvcParam::Alpn {
                protocols: vec!["h3".to_string(), "h2".to_string()],
            },
            SvcParam::Ipv4Hint {
                addrs: vec![Ipv4Addr::new(192, 0, 2, 1)],
            },
            SvcParam::Ipv6Hint {
                addrs: vec![Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1)],
            },
        ],
        ttl: 7200,
    });
    packet
}

fn bench_clone_dispose(c: &mut Criterion) {
    let cloner = PacketCloner::new();
    let mut group = c.benchmark_group("clone_dispose");

    for answers in [1usize, 4, 16] {
        let packet = typical_response(answers);
        group.bench_with_input(
            BenchmarkId::new("a_records", answers),
            &packet,
            |b, packet| {
                b.iter(|| {
                    let (cloned, full) = cloner.clone_packet(black_box(packet));
                    black_box(full);
                    cloner.dispose(cloned);
                });
            },
        );
    }

    let packet = https_response();
    group.bench_function("https_with_hints", |b| {
        b.iter(|| {
            let (cloned, full) = cloner.clone_packet(black_box(&packet));
            black_box(full);
            cloner.dispose(cloned);
        });
    });

    group.finish();
}

fn bench_plain_clone(c: &mut Criterion) {
    let packet = typical_response(4);
    c.bench_function("derive_clone_baseline", |b| {
        b.iter(|| black_box(black_box(&packet).clone()));
    });
}

criterion_group!(benches, bench_clone_dispose, bench_plain_clone);
criterion_main!(benches);
