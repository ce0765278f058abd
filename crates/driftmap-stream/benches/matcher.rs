use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use driftmap_core::{Label, MatchingScheme, StreamSettings};
use driftmap_stream::StreamMatcher;
use ndarray::Array2;

fn bench_match_by_timestamp(c: &mut Criterion) {
    let mut group = c.benchmark_group("match_by_timestamp");

    for rows in [256usize, 2048] {
        let features = Array2::<f64>::zeros((rows, 8));
        let feature_ts: Vec<f64> = (0..rows).map(|i| i as f64 * 0.004).collect();
        let aux_ts: Vec<f64> = (0..rows / 16).map(|i| i as f64 * 0.064 + 0.001).collect();
        let labels: Vec<Label> = (0..aux_ts.len()).map(|i| Label::Code(i as i64 % 3)).collect();

        for scheme in [MatchingScheme::MatchSamples, MatchingScheme::UntilNext] {
            let settings = StreamSettings::new("eeg").with_matching(scheme, false);
            group.bench_with_input(
                BenchmarkId::new(scheme.to_string(), rows),
                &rows,
                |b, _| {
                    b.iter(|| {
                        let mut matcher = StreamMatcher::new(&settings);
                        black_box(
                            matcher
                                .match_by_timestamp(features.view(), &feature_ts, &labels, &aux_ts)
                                .unwrap(),
                        )
                    })
                },
            );
        }
    }

    group.finish();
}

fn bench_match_by_id(c: &mut Criterion) {
    let rows = 1024usize;
    let features = Array2::<f64>::zeros((rows, 8));
    let feature_ts = vec![0.0; rows];
    let feature_ids: Vec<i64> = (0..rows as i64).collect();
    let aux_ids: Vec<i64> = (0..rows as i64).step_by(4).collect();
    let labels: Vec<Label> = aux_ids.iter().map(|id| Label::Code(id % 3)).collect();
    let settings = StreamSettings::new("eeg").with_matching(MatchingScheme::UntilNext, true);

    c.bench_function("match_by_id_until_next", |b| {
        b.iter(|| {
            let mut matcher = StreamMatcher::new(&settings);
            black_box(
                matcher
                    .match_by_id(features.view(), &feature_ts, &labels, &feature_ids, &aux_ids)
                    .unwrap(),
            )
        })
    });
}

criterion_group!(benches, bench_match_by_timestamp, bench_match_by_id);
criterion_main!(benches);
