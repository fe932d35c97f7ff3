use criterion::{Criterion, criterion_group, criterion_main};
use gatherd::config::Fragment;
use gatherd::core::parser::{JsonParser, NginxParser, Parser, TextSimpleParser};
use std::hint::black_box;

fn text_simple_payload() -> Vec<u8> {
    let mut payload = String::new();
    for i in 0..500 {
        payload.push_str(&format!("metric_{i}={i}.5\n"));
    }
    payload.into_bytes()
}

fn bench_text_simple(c: &mut Criterion) {
    let mut frag = Fragment::from_text("t", "driver = text_simple\n").unwrap();
    let parser = TextSimpleParser::from_fragment(&mut frag).unwrap();
    let payload = text_simple_payload();
    c.bench_function("text_simple_500_pairs", |b| {
        b.iter(|| parser.parse(black_box(&payload)).unwrap())
    });
}

fn bench_nginx(c: &mut Criterion) {
    let mut frag = Fragment::from_text("n", "driver = nginx\n").unwrap();
    let parser = NginxParser::from_fragment(&mut frag).unwrap();
    let payload = b"Active connections: 7 \nserver accepts handled requests\n 10 10 15 \nReading: 1 Writing: 2 Waiting: 4 \n";
    c.bench_function("nginx_stub_status", |b| {
        b.iter(|| parser.parse(black_box(payload)).unwrap())
    });
}

fn bench_json(c: &mut Criterion) {
    let mut frag = Fragment::from_text("j", "driver = json\n").unwrap();
    let parser = JsonParser::from_fragment(&mut frag).unwrap();
    let mut doc = String::from("{");
    for i in 0..200 {
        if i > 0 {
            doc.push(',');
        }
        doc.push_str(&format!("\"group{}\":{{\"value\":{}.25}}", i / 10, i));
    }
    doc.push('}');
    let payload = doc.into_bytes();
    c.bench_function("json_flatten_200_keys", |b| {
        b.iter(|| parser.parse(black_box(&payload)).unwrap())
    });
}

criterion_group!(benches, bench_text_simple, bench_nginx, bench_json);
criterion_main!(benches);
