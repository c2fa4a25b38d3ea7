use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sitefind_core::{BuildSession, Extractor, NewDocument, SessionConfig, Tokenizer};

const PAGE: &str = include_str!("../tests/fixtures/getting-started.html");

fn bench_tokenize(c: &mut Criterion) {
    let config = SessionConfig::default();
    let extracted = Extractor::new(&config).unwrap().extract(PAGE.as_bytes(), "bench.html", None).unwrap();
    let text = extracted.body_text.repeat(50);
    let tokenizer = Tokenizer::new();
    c.bench_function("tokenize_body", |b| b.iter(|| tokenizer.tokenize(black_box(&text)).count()));

    let stemming = SessionConfig::builder().language("en").build();
    let stemmer = Tokenizer::with_algorithm(stemming.stemming_algorithm().unwrap(), true);
    c.bench_function("tokenize_body_stemmed", |b| b.iter(|| stemmer.tokenize(black_box(&text)).count()));
}

fn bench_build(c: &mut Criterion) {
    let docs: Vec<NewDocument> =
        (0..200).map(|i| NewDocument::new(format!("page-{i}.html"), None, PAGE)).collect();
    c.bench_function("build_200_pages", |b| {
        b.iter(|| {
            let session = BuildSession::new(SessionConfig::default()).unwrap();
            session.add_many(docs.clone());
            session.finalize().unwrap()
        })
    });
}

criterion_group!(benches, bench_tokenize, bench_build);
criterion_main!(benches);
