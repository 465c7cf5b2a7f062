use criterion::{Criterion, criterion_group, criterion_main};
use octofhir_templates::{Environment, MapLoader, Namespace, Value};
use std::hint::black_box;

const PAGE: &str = r#"{% extends "base.html" %}
{% block title %}{{ title|title }}{% endblock %}
{% block body %}
<ul>
{% for item in items %}
  <li class="{{ 'odd' if loop.index is odd else 'even' }}">{{ loop.index }}. {{ item.name|upper }} ({{ item.price|round(2) }})</li>
{% else %}
  <li>none</li>
{% endfor %}
</ul>
{% endblock %}"#;

const BASE: &str = r#"<html><head><title>{% block title %}{% endblock %}</title></head>
<body>{% block body %}{% endblock %}</body></html>"#;

fn items(n: usize) -> Value {
    let items: Vec<Value> = (0..n)
        .map(|i| {
            Value::from(serde_json::json!({
                "name": format!("item {i}"),
                "price": i as f64 * 1.25,
            }))
        })
        .collect();
    Value::from(items)
}

fn environment() -> std::sync::Arc<Environment> {
    let env = Environment::new();
    env.set_loader(
        MapLoader::new()
            .with("base.html", BASE)
            .with("page.html", PAGE),
    )
    .unwrap();
    env
}

fn benchmark_compile(c: &mut Criterion) {
    let env = Environment::new();
    c.bench_function("compile_page", |b| {
        b.iter(|| black_box(env.compile(black_box(PAGE), Some("page.html"), None)))
    });
}

fn benchmark_render(c: &mut Criterion) {
    let env = environment();
    let template = env.get_template("page.html", None, None).unwrap();

    for n in [10, 100, 1000] {
        let vars = Namespace::new()
            .with("title", "product list")
            .with("items", items(n));
        c.bench_function(&format!("render_{n}_items"), |b| {
            b.iter(|| black_box(template.render(vars.clone())))
        });
    }
}

fn benchmark_cached_lookup(c: &mut Criterion) {
    let env = environment();
    env.get_template("page.html", None, None).unwrap();
    c.bench_function("get_template_cached", |b| {
        b.iter(|| black_box(env.get_template(black_box("page.html"), None, None)))
    });
}

fn benchmark_stream_buffered(c: &mut Criterion) {
    let env = environment();
    let template = env.get_template("page.html", None, None).unwrap();
    let vars = Namespace::new().with("title", "t").with("items", items(100));
    c.bench_function("stream_buffered_100_items", |b| {
        b.iter(|| {
            let mut stream = template.stream(vars.clone());
            stream.enable_buffering(16).unwrap();
            black_box(stream.count())
        })
    });
}

criterion_group!(
    benches,
    benchmark_compile,
    benchmark_render,
    benchmark_cached_lookup,
    benchmark_stream_buffered
);
criterion_main!(benches);
