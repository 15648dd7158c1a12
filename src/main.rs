use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use mixq::config::{LayerConfig, ModelConfig};
use mixq::workload::{verify_layer, LayerRunner};
use rayon::prelude::*;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "mixq", version, about = "Run and verify mixed-precision quantized kernels")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compare every layer against the scalar reference on random data
    Verify {
        /// Layer description (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Base RNG seed
        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// Random instances per layer
        #[arg(long, default_value_t = 4)]
        trials: u64,
    },
    /// Time each layer
    Bench {
        /// Layer description (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Invocations per thread
        #[arg(long, default_value_t = 100)]
        iters: u64,

        /// Independent invocations run in parallel, each with its own buffers
        #[arg(long, default_value_t = 1)]
        threads: usize,
    },
}

fn progress(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}") {
        pb.set_style(style);
    }
    pb
}

fn verify(cfg: &ModelConfig, seed: u64, trials: u64) -> Result<()> {
    let pb = progress(cfg.layers.len() as u64);
    let mut failed = Vec::new();
    for layer in &cfg.layers {
        pb.set_message(layer.name.clone());
        let bad = verify_layer(layer, seed, trials)?;
        if bad > 0 {
            failed.push((layer.name.clone(), bad));
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
    for (name, bad) in &failed {
        println!("FAIL {}: {} mismatching codes", name, bad);
    }
    if !failed.is_empty() {
        bail!("{} of {} layers disagree with the reference", failed.len(), cfg.layers.len());
    }
    println!("ok: {} layers x {} trials", cfg.layers.len(), trials);
    Ok(())
}

fn bench_layer(layer: &LayerConfig, iters: u64, threads: usize) -> Result<f64> {
    let t0 = Instant::now();
    let calls: u64 = if threads > 1 {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build().context("build thread pool")?;
        pool.install(|| {
            (0..threads as u64)
                .into_par_iter()
                .map(|wid| -> Result<u64> {
                    let mut runner = LayerRunner::seeded(layer, wid);
                    for _ in 0..iters {
                        runner.run()?;
                    }
                    Ok(iters)
                })
                .sum::<Result<u64>>()
        })?
    } else {
        let mut runner = LayerRunner::seeded(layer, 0);
        for _ in 0..iters {
            runner.run()?;
        }
        iters
    };
    let dt = t0.elapsed().as_secs_f64();
    Ok(if dt > 0.0 { calls as f64 / dt } else { 0.0 })
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    match args.cmd {
        Command::Verify { config, seed, trials } => {
            let cfg = ModelConfig::load(&config)?;
            info!("verifying {} layers from {}", cfg.layers.len(), config.display());
            verify(&cfg, seed, trials)
        }
        Command::Bench { config, iters, threads } => {
            let cfg = ModelConfig::load(&config)?;
            let threads = threads.max(1);
            let pb = progress(cfg.layers.len() as u64);
            let mut rows = Vec::with_capacity(cfg.layers.len());
            for layer in &cfg.layers {
                pb.set_message(layer.name.clone());
                let rate = bench_layer(layer, iters, threads).with_context(|| format!("bench layer {}", layer.name))?;
                rows.push((layer.name.clone(), rate));
                pb.inc(1);
            }
            pb.finish_and_clear();
            for (name, rate) in rows {
                println!("{:<16} threads={} calls/s={:.1}", name, threads, rate);
            }
            Ok(())
        }
    }
}
