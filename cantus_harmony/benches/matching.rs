// Benchmarks for the analysis pipeline over the bundled library.
//
// The token sequence cycles through a small functional progression so every
// cadence pattern fires many times and the cover solver and aggregator see
// realistic candidate counts.

use cantus_harmony::cache::MatchCache;
use cantus_harmony::config::AnalysisConfig;
use cantus_harmony::engine::Engine;
use cantus_harmony::token::{Role, Token};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

const PROGRESSION: [(&str, Role, i8); 8] = [
    ("I", Role::Tonic, 0),
    ("vi", Role::Tonic, -3),
    ("ii6", Role::Predominant, -4),
    ("V7", Role::Dominant, 2),
    ("I", Role::Tonic, -7),
    ("IV", Role::Predominant, 5),
    ("V", Role::Dominant, 2),
    ("I", Role::Tonic, -7),
];

fn sequence(len: usize) -> Vec<Token> {
    (0..len)
        .map(|i| {
            let (label, role, motion) = PROGRESSION[i % PROGRESSION.len()];
            let token = Token::new(label, role).with_soprano(if role == Role::Tonic { 1 } else { 2 });
            if i == 0 { token } else { token.with_bass_motion(motion) }
        })
        .collect()
}

fn bench_analyze(c: &mut Criterion) {
    let mut group = c.benchmark_group("analyze");
    for parallel in [false, true] {
        let mut config = AnalysisConfig::default();
        config.matcher.parallel = parallel;
        let engine = Engine::builtin()
            .expect("bundled library loads")
            .with_config(config);
        for &len in &[16usize, 128] {
            let tokens = sequence(len);
            let id = BenchmarkId::new(if parallel { "parallel" } else { "serial" }, len);
            group.bench_with_input(id, &tokens, |b, tokens| {
                b.iter(|| engine.analyze(black_box(tokens), "classical", None, None))
            });
        }
    }
    group.finish();
}

fn bench_cached(c: &mut Criterion) {
    let engine = Engine::builtin().expect("bundled library loads");
    let tokens = sequence(128);
    let mut cache = MatchCache::new();
    engine.analyze(&tokens, "classical", None, Some(&mut cache));
    c.bench_function("analyze_cached_128", |b| {
        b.iter(|| engine.analyze(black_box(&tokens), "classical", None, Some(&mut cache)))
    });
}

criterion_group!(benches, bench_analyze, bench_cached);
criterion_main!(benches);
