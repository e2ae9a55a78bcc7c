use std::collections::BTreeSet;
use std::path::Path;

use criterion::{criterion_group, criterion_main, Criterion};

use mailview::render::projection::Renderer;

fn fixture(name: &str) -> Vec<u8> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    std::fs::read(path).unwrap()
}

fn bench_project(c: &mut Criterion) {
    let renderer = Renderer::default();

    for name in ["three-attachments.eml", "invite-berlin.eml", "tracking.eml"] {
        let raw = fixture(name);
        c.bench_function(&format!("render_{name}"), |b| {
            b.iter(|| renderer.render(&raw, BTreeSet::new(), false).unwrap())
        });
    }
}

fn bench_parse_only(c: &mut Criterion) {
    let renderer = Renderer::default();
    let raw = fixture("three-attachments.eml");

    c.bench_function("parse_three_attachments", |b| {
        b.iter(|| renderer.parse(&raw).unwrap().len())
    });
}

criterion_group!(benches, bench_project, bench_parse_only);
criterion_main!(benches);
