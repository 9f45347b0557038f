//! Benchmarks for the attribute generation pipeline.
//!
//! Benchmarks cover:
//! - attribute definitions → modeling steps
//! - modeling steps → SQL template contexts
//! - model rendering
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use signals::autogen::{
    build_dbt_config, compile_attributes, ModelTemplate, RenderContext, SqlModelRenderer,
    TemplateRenderer,
};
use signals::definitions::{
    Aggregation, AttributeDefinition, Criteria, Criterion as Filter, EventRef, Period,
};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

fn attributes(count: usize) -> Vec<AttributeDefinition> {
    let events = [
        EventRef::new("com.acme", "page_view", "1-0-0"),
        EventRef::new("com.acme", "add_to_cart", "1-0-0"),
        EventRef::new("com.acme", "purchase", "1-0-0"),
    ];
    (0..count)
        .map(|i| {
            let event = events[i % events.len()].clone();
            let name = format!("attr_{}", i);
            match i % 5 {
                0 => AttributeDefinition::new(name, Aggregation::Counter, vec![event]),
                1 => AttributeDefinition::new(name, Aggregation::Sum, vec![event])
                    .with_property(format!("unstruct_event_com_acme_{}_1:value{}", i % 3, i % 7))
                    .with_period(Period::days(7)),
                2 => AttributeDefinition::new(name, Aggregation::Last, vec![event])
                    .with_property("contexts_nl_basjes_yauaa_context_1[0]:deviceClass"),
                3 => AttributeDefinition::new(name, Aggregation::UniqueList, vec![event])
                    .with_property("page_urlpath"),
                _ => AttributeDefinition::new(name, Aggregation::Counter, vec![event])
                    .with_criteria(Criteria::any(vec![
                        Filter::eq("geo.country", "US"),
                        Filter::eq("geo.country", "GB"),
                    ])),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Benchmark groups
// ---------------------------------------------------------------------------

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile_attributes");
    for count in [10, 100, 500] {
        let attrs = attributes(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &attrs, |b, attrs| {
            b.iter(|| compile_attributes(black_box(attrs), "domain_userid"))
        });
    }
    group.finish();
}

fn bench_context(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_dbt_config");
    for count in [10, 100, 500] {
        let base = compile_attributes(&attributes(count), "domain_userid").unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(count), &base, |b, base| {
            b.iter(|| build_dbt_config(black_box(base)))
        });
    }
    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render");
    let base = compile_attributes(&attributes(100), "domain_userid").unwrap();
    let dbt = build_dbt_config(&base).unwrap();
    let ctx = RenderContext {
        project_name: "bench_1",
        base: &base,
        dbt: Some(&dbt),
    };
    let renderer = SqlModelRenderer::default();
    for template in ModelTemplate::MODELS {
        group.bench_function(template.name(), |b| {
            b.iter(|| renderer.render(black_box(template), black_box(&ctx)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compile, bench_context, bench_render);
criterion_main!(benches);
