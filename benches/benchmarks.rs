use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::Array2;
use std::hint::black_box;
use pca_engine::{fit, fit_with_config, DataMatrix, PcaConfig, Solver};
use rand::distributions::Uniform;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Generates random data of shape (n_samples x n_features) with values 0, 1, or 2 (as f64), seeded for reproducibility.
fn generate_random_data(n_samples: usize, n_features: usize, seed: u64) -> DataMatrix {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let distribution = Uniform::new_inclusive(0, 2);
    let values = Array2::from_shape_fn((n_samples, n_features), |_| rng.sample(distribution) as f64);
    DataMatrix::new(values).expect("generated data is finite and non-empty")
}

/// Fewer samples for the scenarios where one fit takes seconds.
fn determine_appropriate_sample_size(n_samples: usize, n_features: usize) -> usize {
    match n_samples * n_features {
        cells if cells >= 2_000_000 => 10,
        cells if cells >= 200_000 => 20,
        _ => 100,
    }
}

fn solvers_for(n_samples: usize, n_features: usize) -> Vec<(&'static str, Solver)> {
    let mut solvers = vec![("svd", Solver::Svd), ("randomized", Solver::randomized(1234))];
    // Each eigen path is only benchmarked where it is the natural choice.
    if n_features <= n_samples {
        solvers.insert(0, ("covariance", Solver::Covariance));
    } else {
        solvers.insert(0, ("gram", Solver::Gram));
    }
    solvers
}

fn criterion_benchmark_runner(c: &mut Criterion) {
    let scenarios = vec![
        ("Small", 100, 50, Some(10)),
        ("Medium", 1000, 500, Some(10)),
        ("Tall", 10000, 200, Some(20)),
        ("Square", 1000, 1000, Some(20)),
        ("Wide", 200, 10000, Some(10)),
        ("Wide-L", 88, 50000, Some(10)),
    ];

    for (name, n_samples, n_features, n_components) in scenarios {
        let data = generate_random_data(n_samples, n_features, 1234);
        let input_size_bytes = (n_samples * n_features * std::mem::size_of::<f64>()) as u64;

        // --- FIT Benchmark ---
        let mut fit_group = c.benchmark_group(format!("fit/{}", name));
        fit_group.sample_size(determine_appropriate_sample_size(n_samples, n_features));
        fit_group.throughput(Throughput::Bytes(input_size_bytes));
        for (solver_name, solver) in solvers_for(n_samples, n_features) {
            let config = PcaConfig {
                n_components,
                solver,
            };
            let id = BenchmarkId::new(
                solver_name,
                format!("{}_s{}_f{}_c{:?}", name, n_samples, n_features, n_components),
            );
            fit_group.bench_with_input(id, &data, |b, data| {
                b.iter(|| fit_with_config(black_box(data), &config).expect("fit failed"))
            });
        }
        fit_group.finish();

        // --- TRANSFORM / RECONSTRUCT Benchmark ---
        let model = fit(&data, n_components).expect("fit failed");
        let scores = model.transform(&data).expect("transform failed");
        let mut project_group = c.benchmark_group(format!("project/{}", name));
        project_group.sample_size(determine_appropriate_sample_size(n_samples, n_features));
        project_group.throughput(Throughput::Bytes(input_size_bytes));
        project_group.bench_function("transform", |b| {
            b.iter(|| model.transform(black_box(&data)).expect("transform failed"))
        });
        project_group.bench_function("reconstruct", |b| {
            b.iter(|| model.reconstruct(black_box(&scores)).expect("reconstruct failed"))
        });
        project_group.finish();
    }
}

criterion_group!(benches, criterion_benchmark_runner);
criterion_main!(benches);
