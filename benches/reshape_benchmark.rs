use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ndarray::Array3;
use pebmatrix::reshape::{FlatPosterior, reshape_posterior};
use pebmatrix::transform::{apply_threshold, derive_change_covariates};
use rand::distributions::Standard;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Region counts covering small hand-built models up to whole-brain parcellations.
const REGION_COUNTS: [usize; 3] = [8, 32, 116];
const COVARIATES: usize = 2;

fn random_vector(len: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.sample(Standard)).collect()
}

fn constrained_names(roi_n: usize) -> Vec<String> {
    // Every other off-diagonal connection plus the self-connections.
    let mut names = Vec::new();
    for col in 1..=roi_n {
        for row in 1..=roi_n {
            if row == col || (row + col) % 2 == 1 {
                names.push(format!("A({row},{col})"));
            }
        }
    }
    names
}

fn benchmark_reshape(c: &mut Criterion) {
    let mut group = c.benchmark_group("reshape_posterior");
    for &roi_n in &REGION_COUNTS {
        let dense_len = roi_n * roi_n * COVARIATES;
        let dense_ep = random_vector(dense_len, 0xDE45E + roi_n as u64);
        let dense_pp = random_vector(dense_len, 0xB0B + roi_n as u64);

        let names = constrained_names(roi_n);
        let constrained_len = names.len() * COVARIATES;
        let constrained_ep = random_vector(constrained_len, 0xC0FFEE + roi_n as u64);
        let constrained_pp = random_vector(constrained_len, 0xFACE + roi_n as u64);

        group.throughput(Throughput::Elements(dense_len as u64));
        group.bench_with_input(BenchmarkId::new("dense", roi_n), &roi_n, |b, &n| {
            let flat = FlatPosterior {
                ep: &dense_ep,
                pp: &dense_pp,
                pnames: None,
                design_columns: Some(COVARIATES),
            };
            b.iter(|| black_box(reshape_posterior(black_box(&flat), n, true)));
        });

        group.throughput(Throughput::Elements(constrained_len as u64));
        group.bench_with_input(BenchmarkId::new("constrained", roi_n), &roi_n, |b, &n| {
            let flat = FlatPosterior {
                ep: &constrained_ep,
                pp: &constrained_pp,
                pnames: Some(&names),
                design_columns: Some(COVARIATES),
            };
            b.iter(|| black_box(reshape_posterior(black_box(&flat), n, true)));
        });
    }
    group.finish();
}

fn benchmark_post_processing(c: &mut Criterion) {
    let mut group = c.benchmark_group("post_processing");
    for &roi_n in &REGION_COUNTS {
        let len = roi_n * roi_n * COVARIATES;
        let ep = Array3::from_shape_vec((roi_n, roi_n, COVARIATES), random_vector(len, 7))
            .expect("shape matches generated length");
        let pp = Array3::from_shape_vec((roi_n, roi_n, COVARIATES), random_vector(len, 11))
            .expect("shape matches generated length");

        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::new("threshold", roi_n), &ep, |b, input| {
            b.iter(|| {
                let mut work = input.clone();
                black_box(apply_threshold(&mut work, &pp, 0.5));
            });
        });
        group.bench_with_input(BenchmarkId::new("derive_change", roi_n), &ep, |b, input| {
            b.iter(|| black_box(derive_change_covariates(black_box(input))));
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_reshape, benchmark_post_processing);
criterion_main!(benches);
