//! Benchmark: dispatch overhead of the cached-reuse path vs forced
//! re-derivation, measured against the fake backend.

use std::time::Instant;

use sable_backend::fake::FakeBackend;
use sable_backend::ConvDescriptor;
use sable_conv::{ConvConfig, ConvExecutor, DerivationMethod, ReuseGranularity, ShapeState};

fn bench_reuse(exec: &ConvExecutor<'_>, backend: &FakeBackend, iters: usize) -> f64 {
    let input = backend.tensor(&[1, 3, 8, 8], &vec![0.5; 3 * 64]);
    let kernel = backend.tensor(&[4, 3, 3, 3], &vec![0.5; 4 * 27]);
    let acc = backend.alloc(&[1, 4, 6, 6]);
    let desc = ConvDescriptor::default_2d();
    let cfg = ConvConfig::dynamic(ReuseGranularity::PerShapeChange, DerivationMethod::Heuristic);
    let mut state = ShapeState::new();

    // Prime the cache, then measure the steady-state reuse path.
    exec.forward(&input, &kernel, &acc, &desc, 1.0, 0.0, &cfg, &mut state)
        .unwrap();
    let start = Instant::now();
    for _ in 0..iters {
        exec.forward(&input, &kernel, &acc, &desc, 1.0, 0.0, &cfg, &mut state)
            .unwrap();
    }
    start.elapsed().as_secs_f64() / iters as f64
}

fn bench_rederive(exec: &ConvExecutor<'_>, backend: &FakeBackend, iters: usize) -> f64 {
    let kernel = backend.tensor(&[4, 3, 3, 3], &vec![0.5; 4 * 27]);
    let desc = ConvDescriptor::default_2d();
    let cfg = ConvConfig::dynamic(ReuseGranularity::PerShapeChange, DerivationMethod::Heuristic);
    let mut state = ShapeState::new();

    // Alternate between two shapes so every call re-derives.
    let small = backend.tensor(&[1, 3, 8, 8], &vec![0.5; 3 * 64]);
    let small_acc = backend.alloc(&[1, 4, 6, 6]);
    let large = backend.tensor(&[2, 3, 8, 8], &vec![0.5; 2 * 3 * 64]);
    let large_acc = backend.alloc(&[2, 4, 6, 6]);

    let start = Instant::now();
    for i in 0..iters {
        if i % 2 == 0 {
            exec.forward(&small, &kernel, &small_acc, &desc, 1.0, 0.0, &cfg, &mut state)
                .unwrap();
        } else {
            exec.forward(&large, &kernel, &large_acc, &desc, 1.0, 0.0, &cfg, &mut state)
                .unwrap();
        }
    }
    start.elapsed().as_secs_f64() / iters as f64
}

fn main() {
    let backend = FakeBackend::new();
    let pool = backend.pool();
    let exec = ConvExecutor::new(&backend, &pool);

    let iters = 1000;
    let reuse = bench_reuse(&exec, &backend, iters);
    let rederive = bench_rederive(&exec, &backend, iters);

    println!("reuse path:     {:>10.2} ns/call", reuse * 1e9);
    println!("re-derive path: {:>10.2} ns/call", rederive * 1e9);
    println!("overhead:       {:>10.2}x", rederive / reuse);
}
