// Examples are allowed to use expect/unwrap for simplicity
#![allow(clippy::expect_used, clippy::unwrap_used)]

//! Ramp Search Example
//!
//! Searches for the highest concurrency (or throughput) an in-process
//! simulated service sustains before it starts failing.
//!
//! # Usage
//!
//! ```bash
//! # Binary concurrency search against a service that breaks above 40
//! cargo run --example ramp
//!
//! # Throughput search instead
//! cargo run --example ramp -- --tps
//!
//! # Load search parameters from a TOML file
//! cargo run --example ramp -- --config cumbre.toml
//!
//! # More detail
//! RUST_LOG=cumbre_ramp=debug cargo run --example ramp
//! ```

use std::time::Duration;

use cumbre::prelude::*;
use cumbre_test::SimulatedTarget;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }
    let tps = args.iter().any(|a| a == "--tps");

    let config = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args
                .get(i + 1)
                .ok_or_else(|| anyhow::anyhow!("--config needs a path"))?;
            EngineConfig::load(path)?.ramp
        }
        None => RampConfig::new(1, 100, Strategy::Binary)
            .with_duration(Duration::from_secs(3))
            .with_cooldown(Duration::from_millis(500))
            .with_thresholds(0.05, Duration::from_millis(500))
            .with_paths(["/search", "/item", "/checkout"])
            .with_path_weight("/search", 6)
            .with_path_weight("/item", 3)
            .with_path_weight("/checkout", 1),
    };

    let service = SimulatedTarget::builder()
        .capacity(40)
        .latency(Duration::from_millis(20))
        .path_latency("/checkout", Duration::from_millis(60))
        .build()?;
    let engine = RampSearchEngine::new(service.clone());

    let stop = engine.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Ctrl+C received, stopping search");
            stop.stop();
        }
    });

    println!("=== cumbre ramp search ===");
    println!(
        "strategy={} range={}..={} per-level={:?}",
        config.strategy, config.start, config.max, config.duration_per_step
    );

    let report = if tps {
        engine.find_max_tps(&config).await?
    } else {
        engine.find_max_concurrency(&config).await?
    };

    println!();
    println!("{:>6} {:>8} {:>10} {:>10} {:>10}", "level", "tps", "errors", "avg ms", "p95 ms");
    for trial in &report.trials {
        println!(
            "{:>6} {:>8.1} {:>9.1}% {:>10.1} {:>10.1}",
            trial.level,
            trial.tps,
            trial.error_rate * 100.0,
            trial.avg_latency_ms,
            trial.p95_latency_ms
        );
    }
    println!();
    println!("termination: {}", report.termination_reason);
    match &report.best {
        Some(best) => println!("best level: {} ({:.1} TPS)", best.level, best.tps),
        None => println!("best level: none passed"),
    }
    if let Some(fallback) = report.fallback_level {
        println!("fallback level: {fallback}");
    }
    println!("service peak in-flight: {}", service.peak_in_flight());

    if args.iter().any(|a| a == "--json") {
        println!("{}", report.to_json()?);
    }
    Ok(())
}

fn print_help() {
    println!("cumbre ramp search example");
    println!();
    println!("USAGE: cargo run --example ramp -- [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  --tps            Ramp permitted requests per second instead of workers");
    println!("  --config <PATH>  Read the [ramp] table from a TOML file");
    println!("  --json           Print the full report as JSON");
    println!("  -h, --help       Show this help");
}
