use chrono::{DateTime, Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use psd_core::Weight;
use psd_sizer::{BinGeometry, DiameterUnits, ParticleSizer, ScanTable, SizerConfig};

/// A day of one-minute scans over 27 log-spaced bins, shaped like a
/// single-mode distribution with slow drift across rows.
fn day_of_scans() -> ParticleSizer {
    let n_bins = 27;
    let lo: f64 = 0.3;
    let hi: f64 = 10.0;
    let step = (hi.log10() - lo.log10()) / n_bins as f64;
    let boundaries: Vec<f64> = (0..=n_bins)
        .map(|i| 10f64.powf(lo.log10() + i as f64 * step))
        .collect();
    let bins = BinGeometry::from_boundaries(&boundaries, DiameterUnits::Micrometers).unwrap();

    let n_rows = 1440;
    let start = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
    let timestamps: Vec<DateTime<Utc>> =
        (0..n_rows).map(|i| start + Duration::seconds(60 * i as i64)).collect();
    let labels: Vec<String> = (0..bins.len()).map(|i| format!("bin{i}")).collect();
    let rows: Vec<Vec<f64>> = (0..n_rows)
        .map(|r| {
            let drift = 1.0 + 0.1 * (r as f64 / n_rows as f64);
            bins.midpoints()
                .iter()
                .map(|&mid| {
                    let z = (mid.ln() - (0.8f64).ln()) / (1.8f64).ln();
                    1e4 * drift * (-0.5 * z * z).exp()
                })
                .collect()
        })
        .collect();
    let table = ScanTable::from_rows(timestamps, labels, rows).unwrap();
    ParticleSizer::new(SizerConfig::new(bins), table).unwrap()
}

fn bench_stats(c: &mut Criterion) {
    let sizer = day_of_scans();

    let mut group = c.benchmark_group("stats");
    group.bench_function("number_1440x27", |b| {
        b.iter(|| black_box(sizer.stats(black_box(Weight::Number)).unwrap()))
    });
    group.bench_function("volume_1440x27", |b| {
        b.iter(|| black_box(sizer.stats(black_box(Weight::Volume)).unwrap()))
    });
    group.finish();
}

fn bench_integrate(c: &mut Criterion) {
    let sizer = day_of_scans();

    let mut group = c.benchmark_group("integrate");
    group.bench_function("pm25_1440x27", |b| {
        b.iter(|| black_box(sizer.pm(black_box(2.5)).unwrap()))
    });
    group.bench_function("number_partial_range", |b| {
        b.iter(|| {
            black_box(
                sizer
                    .integrate(Weight::Number, black_box(0.5), black_box(4.0))
                    .unwrap(),
            )
        })
    });
    group.finish();
}

fn bench_resample(c: &mut Criterion) {
    let sizer = day_of_scans();

    c.bench_function("resample_1min_to_15min", |b| {
        b.iter(|| black_box(sizer.resample(Duration::minutes(15)).unwrap()))
    });
}

criterion_group!(benches, bench_stats, bench_integrate, bench_resample);
criterion_main!(benches);
