use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use mosdac_rag::embeddings::chunking::{ChunkingConfig, split};
use std::hint::black_box;

const PARAGRAPH: &str = "The Meteorological and Oceanographic Satellite Data Archival Centre \
distributes data from INSAT-3D, INSAT-3DR, Oceansat-2, Megha-Tropiques and SARAL. \
Products include rainfall estimates, sea surface temperature, outgoing longwave radiation \
and cloud motion vectors. Each product is described in an algorithm theoretical basis \
document and is available at several processing levels.";

fn sample_text(paragraphs: usize) -> String {
    (0..paragraphs)
        .map(|i| format!("Section {}.\n{}", i, PARAGRAPH))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let config = ChunkingConfig::default();
    let mut group = c.benchmark_group("chunking");

    for paragraphs in [1, 20, 200] {
        let text = sample_text(paragraphs);
        group.bench_with_input(BenchmarkId::from_parameter(paragraphs), &text, |b, text| {
            b.iter(|| split(black_box(text), config.chunk_size, config.chunk_overlap));
        });
    }

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
