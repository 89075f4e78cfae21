#![allow(
    clippy::unwrap_used,
    clippy::default_numeric_fallback,
    reason = "benchmark"
)]

use {
    blobcrypt_sdk::crypto::{Cipher, CipherKind, encrypt_stream},
    criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main},
    std::io,
};

fn criterion_benchmark(c: &mut Criterion) {
    for kind in CipherKind::ALL {
        let cipher = Cipher::new(kind, &rand::random()).unwrap();
        let mut group = c.benchmark_group(format!("encrypt_stream/{kind}"));
        for size in [1024, 1024 * 1024, 4 * 1024 * 1024] {
            group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
                b.iter_batched(
                    || (0..size).map(|_| rand::random::<u8>()).collect::<Vec<u8>>(),
                    |input| encrypt_stream(input.as_slice(), io::sink(), &cipher).unwrap(),
                    BatchSize::LargeInput,
                );
            });
        }
        group.finish();
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
