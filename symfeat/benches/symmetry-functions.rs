#![allow(clippy::needless_return)]
use symfeat::{FeaturePipeline, ParameterSet, PipelineOptions, Structure, UnitCell, Matrix3, Vector3D};

use criterion::{BenchmarkGroup, Criterion, measurement::WallTime, SamplingMode};
use criterion::{criterion_group, criterion_main};

const PARAMETERS: &str = "
Si C
2 1 0 5.0 0.05 0.0
2 1 0 5.0 0.5 2.0
2 2 0 5.0 0.05 0.0
2 2 0 5.0 0.5 2.0
4 1 1 5.0 0.01 1.0 1.0
4 1 2 5.0 0.01 2.0 -1.0
4 2 2 5.0 0.01 1.0 1.0
5 1 2 5.0 0.01 1.0 1.0
6 1 2 5.0 0.1 4.0 1.8 90.0
";

/// Zinc-blende SiC with `n_cells^3` conventional cells and slightly displaced
/// atoms
fn silicon_carbide(n_cells: usize) -> Structure {
    let a = 4.36;
    let size = a * n_cells as f64;
    let cell = UnitCell::new(Matrix3::new([[size, 0.0, 0.0], [0.0, size, 0.0], [0.0, 0.0, size]]))
        .expect("invalid cell");

    let fcc = [[0.0, 0.0, 0.0], [0.0, 0.5, 0.5], [0.5, 0.0, 0.5], [0.5, 0.5, 0.0]];
    let mut structure = Structure::new(cell);
    for i in 0..n_cells {
        for j in 0..n_cells {
            for k in 0..n_cells {
                for site in &fcc {
                    for (symbol, shift) in [("Si", 0.0), ("C", 0.25)] {
                        let atom = structure.size() as f64;
                        let position = Vector3D::new(
                            (i as f64 + site[0] + shift) * a + 0.05 * f64::sin(1.3 * atom),
                            (j as f64 + site[1] + shift) * a + 0.05 * f64::cos(2.1 * atom),
                            (k as f64 + site[2] + shift) * a + 0.05 * f64::sin(0.7 * atom),
                        );
                        structure.add_atom(symbol, position);
                    }
                }
            }
        }
    }
    return structure;
}

fn run_pipeline(mut group: BenchmarkGroup<WallTime>, n_cells: usize, test_mode: bool) {
    let parameters = ParameterSet::parse(PARAMETERS).expect("invalid parameters");
    let structure = silicon_carbide(if test_mode { 1 } else { n_cells });
    let n_atoms = structure.size();

    for workers in [1, 2, 4, 8] {
        let options = PipelineOptions { workers: workers, ..Default::default() };
        let pipeline = FeaturePipeline::new(parameters.clone(), options).expect("invalid options");

        group.bench_function(&format!("{} atoms, {} workers", n_atoms, workers), |b| b.iter_custom(|repeat| {
            let start = std::time::Instant::now();
            for _ in 0..repeat {
                pipeline.compute(&structure).expect("failed to compute features");
            }
            start.elapsed() / n_atoms as u32
        }));
    }
}

fn symmetry_functions(c: &mut Criterion) {
    let test_mode = std::env::args().any(|arg| arg == "--test");

    let mut group = c.benchmark_group("Symmetry functions (per atom)/SiC 2x2x2");
    group.noise_threshold(0.05);
    group.sampling_mode(SamplingMode::Flat);
    group.sample_size(10);

    run_pipeline(group, 2, test_mode);

    let mut group = c.benchmark_group("Symmetry functions (per atom)/SiC 3x3x3");
    group.noise_threshold(0.05);
    group.sampling_mode(SamplingMode::Flat);
    group.sample_size(10);

    run_pipeline(group, 3, test_mode);
}

criterion_group!(all, symmetry_functions);
criterion_main!(all);
