//! Performance benchmarks for the fanoutd session core

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fanoutd_core::*;
use std::net::IpAddr;

fn addr(n: u32) -> IpAddr {
    IpAddr::from([10, (n >> 16) as u8, (n >> 8) as u8, n as u8])
}

/// A server with `members` registered sessions spread over `groups` groups,
/// each session joining every group.
fn populated(members: u32, groups: u32) -> (Server, Uid) {
    let mut server = Server::new(Config::default()).unwrap();
    let now = Utc::now();
    let mut uids = Vec::new();

    for n in 0..members {
        let uid = server.accept(addr(n), None, None, now).unwrap();
        server.change_nick(&uid, &format!("user{}", n));
        server.full_connect(&uid, now).unwrap();
        server.take_output(&uid);
        uids.push(uid);
    }
    for g in 0..groups {
        let name = format!("#group{}", g);
        for uid in &uids {
            server.groups_mut().join(&name, uid);
        }
    }

    let origin = uids[0].clone();
    (server, origin)
}

fn benchmark_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");

    for members in [10u32, 100, 1000] {
        let (mut server, origin) = populated(members, 4);
        let locals = server.directory().local_uids().to_vec();

        group.bench_with_input(BenchmarkId::from_parameter(members), &members, |b, _| {
            b.iter(|| {
                let sent = server.write_common(&origin, black_box("PRIVMSG #group0 :hello"));
                for uid in &locals {
                    server.take_output(uid);
                }
                sent
            })
        });
    }

    group.finish();
}

fn benchmark_classification(c: &mut Criterion) {
    let mut group = c.benchmark_group("classification");

    let mut config = Config::default();
    for n in 0..50 {
        config.classes.insert(
            0,
            ClassConfig {
                name: format!("net{}", n),
                kind: ClassKind::Allow,
                host: Some(format!("192.168.{}.0/24", n)),
                ..ClassConfig::default()
            },
        );
    }
    let server = Server::new(config).unwrap();
    let ip: IpAddr = "172.16.0.1".parse().unwrap();
    let host = ip.to_string();

    group.bench_function("first_match_scan", |b| {
        b.iter(|| {
            let candidate = Candidate::new(ip, &host, Some(6667));
            select(server.classes(), black_box(&candidate), None, None)
        })
    });

    group.finish();
}

fn benchmark_recvq(c: &mut Criterion) {
    let mut group = c.benchmark_group("recvq");
    let input = "PRIVMSG #channel :Hello world\r\n".repeat(64);

    group.bench_function("extract_lines", |b| {
        b.iter(|| {
            let mut queue = RecvQueue::new();
            queue.append(black_box(input.as_bytes()));
            let mut count = 0;
            while queue.extract_line().is_some() {
                count += 1;
            }
            count
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_fanout,
    benchmark_classification,
    benchmark_recvq
);
criterion_main!(benches);
