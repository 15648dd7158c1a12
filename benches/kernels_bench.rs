use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mixq::config::ModelConfig;
use mixq::kernels::dot::{dot_i16_2x2, dot_u8_strided_x4};
use mixq::workload::LayerRunner;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

fn bench_dot(c: &mut Criterion) {
    let mut rng = SmallRng::seed_from_u64(3);
    let n = 288;
    let mut lanes = || -> Vec<i16> { (0..n).map(|_| rng.gen_range(-255..256)).collect() };
    let (a0, a1, b0, b1) = (lanes(), lanes(), lanes(), lanes());
    c.bench_function("dot_i16_2x2_288", |ben| {
        ben.iter(|| black_box(dot_i16_2x2([&a0[..], &a1[..]], [&b0[..], &b1[..]], black_box([0; 4]))))
    });

    let ch = 32;
    let taps = 9;
    let wt: Vec<u8> = (0..ch * taps).map(|_| rng.gen()).collect();
    let col: Vec<u8> = (0..ch * taps).map(|_| rng.gen()).collect();
    c.bench_function("dot_u8_strided_x4_3x3x32", |ben| {
        ben.iter(|| black_box(dot_u8_strided_x4(&wt, &col, ch, taps, 128, 3, black_box([0; 4]))))
    });
}

fn bench_layers(c: &mut Criterion) {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/configs/mobilenet_block.json");
    let cfg = match ModelConfig::load(path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("skipping layer benches: {:#}", e);
            return;
        }
    };
    for layer in &cfg.layers {
        let mut runner = LayerRunner::seeded(layer, 0);
        c.bench_function(&format!("layer_{}", layer.name), |ben| {
            ben.iter(|| black_box(runner.run()))
        });
    }
}

criterion_group!(benches, bench_dot, bench_layers);
criterion_main!(benches);
