use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use speakbridge_core::tokenizer::{queueable_commands, split_at_flush};
use speakbridge_core::{CommandQueue, Tokenizer};

fn screen_review_buffer(len: usize) -> Vec<u8> {
    let chunk: &[u8] = b"The quick brown fox\x01+1p jumps over\x015s the lazy dog.\n\x0112i";
    chunk.iter().copied().cycle().take(len).collect()
}

fn bench_tokenize(c: &mut Criterion) {
    let mut group = c.benchmark_group("tokenize");

    for size in [64, 1024, 16 * 1024] {
        let buf = screen_review_buffer(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("all_tokens", size), &buf, |b, buf| {
            b.iter(|| black_box(Tokenizer::new(black_box(buf)).count()));
        });
        group.bench_with_input(BenchmarkId::new("queueable", size), &buf, |b, buf| {
            b.iter(|| black_box(queueable_commands(black_box(buf)).count()));
        });
    }

    group.finish();
}

fn bench_flush_and_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush_and_enqueue");

    let mut buf = screen_review_buffer(1024);
    buf.insert(512, speakbridge_core::FLUSH_BYTE);

    group.bench_function("split_at_flush", |b| {
        b.iter(|| black_box(split_at_flush(black_box(&buf))));
    });

    group.bench_function("tokenize_into_queue", |b| {
        b.iter(|| {
            let mut queue = CommandQueue::new();
            let (_, rest) = split_at_flush(&buf);
            queue.extend(queueable_commands(rest));
            black_box(queue.len())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_tokenize, bench_flush_and_enqueue);
criterion_main!(benches);
