//! Benchmarks for the filter rules and decision engine.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::net::{IpAddr, Ipv4Addr};

use dnsgate::dns::wire::{Header, Message, Name, Question, TYPE_A};
use dnsgate::dns::{Action, FilterRule, FilterType, MatchType, decide};
use dnsgate::server::QueryHandler;

fn generate_rules(size: usize) -> Vec<FilterRule> {
    (0..size)
        .map(|i| match i % 3 {
            0 => FilterRule::new(
                format!("blocked{i}.com"),
                FilterType::Any,
                MatchType::Exact,
                Action::NotFound,
            ),
            1 => FilterRule::new(
                format!("ads{i}"),
                FilterType::Any,
                MatchType::Contains,
                Action::Refuse,
            ),
            _ => FilterRule::new(
                format!("track{i}.net"),
                FilterType::Ipv4,
                MatchType::Exact,
                Action::Redirect(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            ),
        })
        .collect()
}

fn create_query(domain: &str) -> Message {
    let mut header = Header::new(1234);
    header.set_recursion_desired(true);
    header.qdcount = 1;
    Message {
        header,
        questions: vec![Question::new(Name::parse(domain).unwrap(), TYPE_A)],
        answers: Vec::new(),
    }
}

fn bench_decide(c: &mut Criterion) {
    let mut group = c.benchmark_group("decide");

    for size in &[10, 100, 1000, 10000] {
        let rules = generate_rules(*size);

        // First rule in the list
        let hit = create_query("blocked0.com");
        group.bench_with_input(BenchmarkId::new("first_hit", size), &hit, |b, query| {
            b.iter(|| decide(black_box(query), &rules));
        });

        // Redirect near the end of the list
        let last = (0..*size).rev().find(|i| i % 3 == 2).unwrap();
        let redirect = create_query(&format!("track{last}.net"));
        group.bench_with_input(BenchmarkId::new("redirect", size), &redirect, |b, query| {
            b.iter(|| decide(black_box(query), &rules));
        });

        // Not matched (worst case - must check all rules)
        let miss = create_query("www.example.com");
        group.bench_with_input(BenchmarkId::new("miss", size), &miss, |b, query| {
            b.iter(|| decide(black_box(query), &rules));
        });
    }

    group.finish();
}

fn bench_handle_datagram(c: &mut Criterion) {
    let mut group = c.benchmark_group("handle_datagram");

    let handler = QueryHandler::new(generate_rules(100));
    let blocked = create_query("blocked0.com").encode().unwrap();
    let forwarded = create_query("www.example.com").encode().unwrap();

    group.bench_function("blocked", |b| {
        b.iter(|| handler.handle(black_box(&blocked)));
    });
    group.bench_function("forwarded", |b| {
        b.iter(|| handler.handle(black_box(&forwarded)));
    });

    group.finish();
}

criterion_group!(benches, bench_decide, bench_handle_datagram);
criterion_main!(benches);
