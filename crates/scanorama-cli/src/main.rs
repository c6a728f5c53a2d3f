//! `scanorama` — operator CLI for the scan execution daemon.
//!
//! Wires the core boundary interfaces (scanorama-scanner's `Daemon`)
//! together with a SQLite-backed `PersistenceGateway` and a
//! `TcpConnectEngine`, and exposes them as subcommands. HTTP routing,
//! API-key auth, and the XML import/export layer are not implemented
//! here.

mod args;
mod banner;
mod output;

use anyhow::{bail, Context, Result};
use args::{Cli, Command, TargetAction};
use banner::Banner;
use clap::Parser;
use colored::Colorize;
use scanorama_core::{Config, PortSpec, ScanTarget, ScanType};
use scanorama_engine::TcpConnectEngine;
use scanorama_persistence::PersistenceGateway;
use scanorama_scanner::Daemon;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if !cli.no_banner {
        Banner::new(env!("CARGO_PKG_VERSION")).print();
    }

    let config = match &cli.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("failed to load config from {path:?}"))?,
        None => Config::default(),
    };

    match cli.command {
        Command::Run => run(config, &cli.db).await,
        Command::Submit(args) => submit(config, &cli.db, args).await,
        Command::Target { action } => target(&cli.db, action).await,
        Command::Stats => stats(config, &cli.db).await,
        Command::InitConfig { path } => {
            Config::default().save_to_file(&path)?;
            println!("wrote default config to {}", path.display());
            Ok(())
        }
    }
}

async fn run(config: Config, db: &std::path::Path) -> Result<()> {
    let gateway = PersistenceGateway::open(db).await?;
    let daemon = Daemon::start(config, gateway, Arc::new(TcpConnectEngine::new()));
    daemon.scheduler.refresh_targets().await?;

    info!("daemon running, press Ctrl-C to stop");
    println!("{}", "daemon running — press Ctrl-C to stop".bright_white());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    println!("{}", "shutting down...".bright_black());
    daemon.stop().await;
    Ok(())
}

async fn submit(config: Config, db: &std::path::Path, args: args::SubmitArgs) -> Result<()> {
    let network = ScanTarget::parse_network(&args.network)
        .with_context(|| format!("invalid network: {}", args.network))?;
    let ports = PortSpec::parse(&args.ports).with_context(|| format!("invalid ports: {}", args.ports))?;
    let scan_type =
        ScanType::from_str(&args.scan_type).with_context(|| format!("invalid scan type: {}", args.scan_type))?;

    let target = ScanTarget {
        id: Uuid::new_v4(),
        name: args.name,
        network,
        ports,
        scan_type,
        scan_interval_seconds: 0,
        enabled: true,
    };

    let gateway = PersistenceGateway::open(db).await?;
    let daemon = Daemon::start(config, gateway.clone(), Arc::new(TcpConnectEngine::new()));

    let job = daemon.submit_ad_hoc(target).await?;
    println!("submitted job {}", job.id.to_string().bright_white());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.wait_secs);
    let row = loop {
        if let Some(row) = gateway.get_scan_job(job.id).await? {
            if matches!(
                row.status,
                scanorama_core::JobStatus::Completed | scanorama_core::JobStatus::Failed
            ) {
                break row;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            daemon.stop().await;
            bail!("timed out waiting for job {} to finish", job.id);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    };

    output::print_job(&row);
    daemon.stop().await;
    Ok(())
}

async fn target(db: &std::path::Path, action: TargetAction) -> Result<()> {
    let gateway = PersistenceGateway::open(db).await?;
    match action {
        TargetAction::Add(args) => {
            let network = ScanTarget::parse_network(&args.network)
                .with_context(|| format!("invalid network: {}", args.network))?;
            let ports =
                PortSpec::parse(&args.ports).with_context(|| format!("invalid ports: {}", args.ports))?;
            let scan_type = ScanType::from_str(&args.scan_type)
                .with_context(|| format!("invalid scan type: {}", args.scan_type))?;

            let target = ScanTarget {
                id: Uuid::new_v4(),
                name: args.name,
                network,
                ports,
                scan_type,
                scan_interval_seconds: args.interval_seconds,
                enabled: !args.disabled,
            };
            target.validate()?;
            gateway.create_scan_target(&target).await?;
            println!("created target {}", target.id.to_string().bright_white());
            Ok(())
        }
        TargetAction::List => {
            let targets = gateway.get_all_scan_targets().await?;
            output::print_targets(&targets);
            Ok(())
        }
    }
}

async fn stats(config: Config, db: &std::path::Path) -> Result<()> {
    let gateway = PersistenceGateway::open(db).await?;
    let daemon = Daemon::start(config, gateway, Arc::new(TcpConnectEngine::new()));
    daemon.scheduler.refresh_targets().await?;

    // Give the tick loop a brief window; this is a one-shot snapshot,
    // not a live view of a long-running daemon (see Command::Stats).
    tokio::time::sleep(Duration::from_millis(50)).await;

    let pool_stats = daemon.pool.get_stats();
    let scheduler_stats = daemon.scheduler.get_stats();

    println!(
        "pool: queued={} completed={} failed={} retried={} workers_active={} workers_idle={}",
        pool_stats.queued,
        pool_stats.completed,
        pool_stats.failed,
        pool_stats.retried,
        pool_stats.workers_active,
        pool_stats.workers_idle
    );
    println!(
        "scheduler: targets_total={} targets_enabled={} jobs_scheduled={} jobs_submitted={}",
        scheduler_stats.targets_total,
        scheduler_stats.targets_enabled,
        scheduler_stats.jobs_scheduled,
        scheduler_stats.jobs_submitted
    );

    daemon.stop().await;
    Ok(())
}
