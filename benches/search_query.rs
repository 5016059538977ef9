//! Benchmarks for search request construction.
//!
//! Every search call builds a JSON body before touching the network; these
//! benchmarks keep that cost visible as filters and field lists grow.

// Criterion macros generate items without docs - this is expected for benchmarks
#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use deskstore::search::{IndexFamily, SearchQuery, SortOrder, global_fields};
use deskstore::security::statement_preview;
use serde_json::json;
use std::hint::black_box;

fn ticket_query(filters: usize) -> SearchQuery {
    let mut query = SearchQuery::new("printer jam floor 3")
        .with_sort(SortOrder::Priority)
        .with_page(40, 20)
        .with_date_range(
            "created_at",
            Some("2026-01-01".to_string()),
            Some("2026-10-01".to_string()),
        );
    for i in 0..filters {
        query = query.with_filter(format!("field_{i}"), json!(["open", "pending"]));
    }
    query
}

fn bench_family_body(c: &mut Criterion) {
    let mut group = c.benchmark_group("search_body");
    for filters in [0, 4, 16] {
        let query = ticket_query(filters);
        let fields = IndexFamily::Tickets.boosted_fields();
        group.bench_with_input(BenchmarkId::new("tickets", filters), &query, |b, query| {
            b.iter(|| black_box(query.to_body(&fields, Some(IndexFamily::Tickets))));
        });
    }
    group.finish();
}

fn bench_global_fields(c: &mut Criterion) {
    c.bench_function("global_fields", |b| {
        b.iter(|| black_box(global_fields(&IndexFamily::GLOBAL)));
    });
}

fn bench_statement_preview(c: &mut Criterion) {
    let statement = "INSERT INTO tickets (title, requester_email, priority_level) \
                     VALUES ('Printer jam', 'alice@example.com', 3) RETURNING id";
    c.bench_function("statement_preview", |b| {
        b.iter(|| black_box(statement_preview(black_box(statement))));
    });
}

criterion_group!(
    benches,
    bench_family_body,
    bench_global_fields,
    bench_statement_preview
);
criterion_main!(benches);
