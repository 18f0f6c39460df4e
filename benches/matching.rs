//! Benchmarks for streaming pair extraction
//!
//! Covers the literal (KMP) and regex (NFA) sub-matchers over chunked and
//! unchunked input, with and without a match present.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use bookend::{Matcher, Pair, RegexMode};

fn build_corpus() -> Vec<u8> {
    let mut corpus = Vec::new();
    for i in 0..200 {
        corpus.extend_from_slice(b"some leading noise ");
        corpus.extend_from_slice(b"prologue");
        corpus.extend_from_slice(format!("payload number {} with some body text", i).as_bytes());
        corpus.extend_from_slice(b"epilogue");
        corpus.extend_from_slice(b" trailing noise\n");
    }
    corpus
}

fn drive(pair: &Pair, input: &[u8], chunk_size: usize) -> usize {
    let mut matcher = Matcher::new(pair).unwrap();
    let mut segments = 0;
    for chunk in input.chunks(chunk_size) {
        segments += matcher.matches(chunk).count();
    }
    let _ = matcher.drain();
    matcher.close().unwrap();
    segments
}

fn bench_literal_pair(c: &mut Criterion) {
    let pair = Pair::new("prologue", "epilogue");
    let corpus = build_corpus();

    c.bench_function("literal_pair_one_chunk", |b| {
        b.iter(|| drive(&pair, black_box(&corpus), corpus.len()))
    });

    c.bench_function("literal_pair_64b_chunks", |b| {
        b.iter(|| drive(&pair, black_box(&corpus), 64))
    });
}

fn bench_literal_no_match(c: &mut Criterion) {
    let pair = Pair::new("prologue", "epilogue");
    let corpus = vec![b'x'; 64 * 1024];

    c.bench_function("literal_no_match_64k", |b| {
        b.iter(|| drive(&pair, black_box(&corpus), 1024))
    });
}

fn bench_regex_pair(c: &mut Criterion) {
    let pair = Pair::new("<[a-z]+>", "</[a-z]+>")
        .regex_head(RegexMode::Perl)
        .regex_tail(RegexMode::Perl);
    let mut corpus = Vec::new();
    for _ in 0..200 {
        corpus.extend_from_slice(b"noise before <tag>tag body content</tag> noise after\n");
    }

    c.bench_function("regex_pair_one_chunk", |b| {
        b.iter(|| drive(&pair, black_box(&corpus), corpus.len()))
    });

    c.bench_function("regex_pair_64b_chunks", |b| {
        b.iter(|| drive(&pair, black_box(&corpus), 64))
    });
}

fn bench_regex_alternation(c: &mut Criterion) {
    let pair = Pair::new("error|warn|info", "\n").regex_head(RegexMode::Perl);
    let mut corpus = Vec::new();
    for i in 0..500 {
        corpus.extend_from_slice(format!("line {} with nothing of note here\n", i).as_bytes());
        if i % 10 == 0 {
            corpus.extend_from_slice(b"an error occurred somewhere in here\n");
        }
    }

    c.bench_function("regex_alternation_log_scan", |b| {
        b.iter(|| drive(&pair, black_box(&corpus), 4096))
    });
}

criterion_group!(
    benches,
    bench_literal_pair,
    bench_literal_no_match,
    bench_regex_pair,
    bench_regex_alternation
);
criterion_main!(benches);
