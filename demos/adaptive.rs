// Examples are allowed to use expect/unwrap for simplicity
#![allow(clippy::expect_used, clippy::unwrap_used)]

//! Adaptive Concurrency Example
//!
//! Feeds a rate-limited, adaptive worker pool with requests against a flaky
//! in-process service and prints each resize the controller makes.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example adaptive
//!
//! # Watch every controller decision
//! RUST_LOG=cumbre_pool=debug cargo run --example adaptive
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cumbre::prelude::*;
use tokio::time::Instant;

const RUN_FOR: Duration = Duration::from_secs(20);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let limiter = Arc::new(RateLimiter::new(
        &RateLimiterConfig::token_bucket(200, Duration::from_secs(1)).with_burst(50),
    )?);
    let pool = WorkerPool::builder(PoolConfig {
        rate_wait_timeout: Some(Duration::from_millis(250)),
        task_timeout: Some(Duration::from_secs(2)),
        collect_records: false,
        ..PoolConfig::with_workers(32)
    })
    .limiter(Arc::clone(&limiter))
    .build()?;
    pool.set_workers(16)?;
    pool.enable_adaptive(
        &AdaptiveConfig::targeting(120.0, 2, 32)
            .with_error_threshold(0.05)
            .with_interval(Duration::from_secs(2))
            .with_growth_cooldown(Duration::from_secs(4)),
    )?;

    // Fails more often the more requests are in flight.
    let in_flight = Arc::new(AtomicU64::new(0));
    let service = {
        let in_flight = Arc::clone(&in_flight);
        work_fn(move || {
            let in_flight = Arc::clone(&in_flight);
            async move {
                let load = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(40 + load * 5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                if load > 10 && load % 4 == 0 {
                    Outcome::task_failure("Overloaded", format!("{load} in flight"))
                } else {
                    Outcome::Success
                }
            }
        })
    };

    println!("=== cumbre adaptive pool ===");
    let deadline = Instant::now() + RUN_FOR;
    let mut report = tokio::time::interval(Duration::from_secs(2));
    loop {
        tokio::select! {
            () = tokio::time::sleep_until(deadline) => break,
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Ctrl+C received, stopping");
                break;
            }
            _ = report.tick() => {
                let stats = pool.stats();
                println!(
                    "workers={:>2} pending={:>3} tps={:>6.1} errors={:>5.1}% limiter_tps={:>6.1}",
                    stats.current_workers,
                    stats.pending,
                    stats.metrics.tps,
                    stats.metrics.error_rate * 100.0,
                    limiter.current_tps(),
                );
            }
            () = pool.wait_below(64) => {
                pool.submit(Arc::clone(&service))?;
            }
        }
    }

    pool.shutdown(false).await;
    pool.wait_completion().await;

    let stats = pool.stats();
    println!();
    println!("adjustments:");
    for adjustment in &stats.adjustments {
        println!(
            "  {:>2} -> {:>2} ({}) error_rate={:.3} tps={:.1}",
            adjustment.from, adjustment.to, adjustment.reason, adjustment.error_rate, adjustment.tps
        );
    }
    let limits = limiter.stats();
    println!(
        "limiter: {} requests, {} rejected, avg wait {:.1} ms",
        limits.total_requests, limits.rejected, limits.avg_wait_ms
    );
    println!("completed: {}", stats.metrics.total_requests);
    Ok(())
}
