//! Spot Rebalancer - Main Entry Point
//!
//! Runs the rebalancing cycle on a schedule, once, or reports status.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal_macros::dec;
use spot_rebalancer::config::Config;
use spot_rebalancer::exchange::BinanceClient;
use spot_rebalancer::signal::StaticSignal;
use spot_rebalancer::strategy::{CycleReport, RebalanceCycle, StatusReport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Spot Rebalancer CLI
#[derive(Parser)]
#[command(name = "spot-rebalancer")]
#[command(version, about = "Target-allocation rebalancing for a Binance spot account")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebalance every `schedule.interval_minutes` until Ctrl-C (default)
    Run,

    /// Run a single rebalancing cycle and exit
    Once,

    /// Show holdings, budget and allocation gaps without trading
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load()?;
    config.validate().context("Invalid configuration")?;
    config.require_credentials()?;
    log_config(&config);

    let client = Arc::new(BinanceClient::new(&config.binance)?);
    let signal = Arc::new(StaticSignal::from_config(
        &config.signal,
        &config.portfolio.trade_pair,
    ));
    let mut cycle = RebalanceCycle::new(client, signal, &config);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Status => {
            let status = cycle.status().await?;
            print_status(&status, &config);
            Ok(())
        }
        Commands::Once => {
            let report = cycle.run_cycle().await?;
            log_report(&report);
            Ok(())
        }
        Commands::Run => run_scheduled(&mut cycle, &config).await,
    }
}

/// Run cycles on a fixed interval; a running cycle always completes.
async fn run_scheduled(cycle: &mut RebalanceCycle, config: &Config) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║          Spot Rebalancer v{} - Scheduled Mode             ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    if config.execution.dry_run {
        info!("📝 DRY RUN - orders are logged, not submitted");
    } else {
        warn!("⚠️  LIVE TRADING MODE - Real money at risk!");
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Shutdown signal received, finishing current cycle");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    let mut interval = tokio::time::interval(Duration::from_secs(
        config.schedule.interval_minutes * 60,
    ));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "🚀 Rebalancing every {} minutes",
        config.schedule.interval_minutes
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut cycles: u64 = 0;
    while !shutdown.load(Ordering::SeqCst) {
        tokio::select! {
            _ = interval.tick() => {}
            _ = wait_for_shutdown(&shutdown) => break,
        }

        cycles += 1;
        info!("🔁 Cycle #{}", cycles);
        match cycle.run_cycle().await {
            Ok(report) => log_report(&report),
            Err(e) => error!("❌ Cycle #{} aborted: {}", cycles, e),
        }
    }

    info!("👋 Spot Rebalancer shutdown complete after {} cycles", cycles);
    Ok(())
}

async fn wait_for_shutdown(shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

/// Initialize comprehensive logging with file output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "spot-rebalancer.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("spot_rebalancer=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    let portfolio = &config.portfolio;
    info!("📋 Configuration:");
    info!(
        "   Trade Pair: {}  Valuation: {}  Anchor: {}",
        portfolio.trade_pair, portfolio.valuation_currency, portfolio.anchor_asset
    );
    for target in &portfolio.allocation {
        info!("   {:<6} {:>5.1}%", target.asset, target.fraction * dec!(100));
    }
    info!("   Substitutes: {}", portfolio.substitutes.join(", "));
    info!("   Min Trade: ${}", config.trading.min_trade_value);
    info!(
        "   Max Substitute: {:.1}%",
        config.trading.max_substitute_fraction * dec!(100)
    );
    info!("   Take Profit: {}", config.trading.take_profit);
    if portfolio.fee_floor_enabled() {
        info!(
            "   Min {} Holding: {}",
            portfolio.fee_asset, portfolio.fee_asset_min_holding
        );
    }
}

fn log_report(report: &CycleReport) {
    let duration = report
        .finished_at
        .map(|end| (end - report.started_at).num_milliseconds())
        .unwrap_or_default();

    if report.underfunded {
        info!("💤 Cycle skipped, account below minimum trade size");
        return;
    }

    info!(
        "📊 Cycle finished in {}ms: {} orders ({} placed), {} cancelled, {} failures",
        duration,
        report.orders.len(),
        report.placed_count(),
        report.cancelled_orders,
        report.failures.len()
    );
    for failure in &report.failures {
        warn!("   ├─ {}: {}", failure.asset, failure.error);
    }
}

fn print_status(status: &StatusReport, config: &Config) {
    let currency = &config.portfolio.valuation_currency;

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              SPOT REBALANCER STATUS                        ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    println!("\n💰 Budget");
    println!(
        "   ├─ {}:  {:.8}",
        config.portfolio.anchor_asset, status.budget.base_total
    );
    println!(
        "   └─ {}: {:.2}",
        currency, status.budget.valuation_total
    );

    println!("\n📦 Holdings");
    for holding in status.snapshot.holdings() {
        println!(
            "   ├─ {:<6} {:>18} (locked {}) ≈ {:.2} {}",
            holding.asset, holding.total, holding.locked, holding.valuation_value, currency
        );
    }

    println!("\n🎯 Allocation Gaps");
    for gap in &status.gaps {
        println!(
            "   ├─ {:<6} target {:>10.2}  current {:>10.2}  delta {:>+10.2}",
            gap.asset, gap.target_value, gap.current_value, gap.valuation_delta
        );
    }
}
