use bovw_core::{build_index, quantize_document, query, HardQuantizer, Metric, Vocabulary};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_rows(rng: &mut StdRng, rows: usize, dim: usize) -> Vec<Vec<f32>> {
    (0..rows)
        .map(|_| (0..dim).map(|_| rng.random_range(0.0f32..1.0)).collect())
        .collect()
}

fn bench_quantize(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);
    let vocab = Vocabulary::new(random_rows(&mut rng, 1000, 64)).unwrap();
    let features = random_rows(&mut rng, 500, 64);
    let quantizer = HardQuantizer::new(Metric::SquaredEuclidean);
    c.bench_function("quantize_500_features_k1000", |b| {
        b.iter(|| quantize_document(black_box(&features), &vocab, &quantizer).unwrap())
    });
}

fn bench_query(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let hists: Vec<Vec<f32>> = (0..5000)
        .map(|_| {
            (0..1000)
                .map(|_| if rng.random::<f32>() < 0.05 { rng.random_range(1..5) as f32 } else { 0.0 })
                .collect()
        })
        .collect();
    let index = build_index(&hists).unwrap();
    let q = hists[123].clone();
    c.bench_function("query_5000_docs_top25", |b| b.iter(|| query(&index, black_box(&q), 25).unwrap()));
}

criterion_group!(benches, bench_quantize, bench_query);
criterion_main!(benches);
