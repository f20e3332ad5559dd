/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use polyfedi_core::command::{CommandData, TimelineType};
use polyfedi_core::command_queue::QueueStore;
use polyfedi_core::config::{default_config_path, ServiceConfig};
use polyfedi_core::connection::new_connection;
use polyfedi_core::events::ServiceEvent;
use polyfedi_core::executor::CommandExecutor;
use polyfedi_core::http::ReqwestExecutor;
use polyfedi_core::local_store::SqliteStore;
use polyfedi_core::scheduler::Scheduler;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

struct Args {
    config: Option<PathBuf>,
    /// Queue a home and notifications sync for every account on start.
    sync: bool,
}

fn parse_args() -> Result<Args> {
    let mut out = Args {
        config: None,
        sync: false,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context("--config requires a path")?;
                out.config = Some(PathBuf::from(path));
            }
            "--sync" => out.sync = true,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(out)
}

fn log_events(scheduler: &Scheduler) {
    let mut rx = scheduler.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ServiceEvent::AfterExecuting(cmd)) => {
                    if cmd.result.has_error() {
                        warn!(command = %cmd, "{}", cmd.result.message);
                    } else {
                        info!(
                            command = %cmd,
                            downloaded = cmd.result.downloaded_count,
                            new = cmd.result.new_count,
                            "done"
                        );
                    }
                }
                Ok(ServiceEvent::QueueProgress(counts)) => {
                    info!(main = counts.main, retry = counts.retry, error = counts.error, "queues");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!("event log lagged by {n}"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let args = parse_args()?;
    let cfg_path = match args.config {
        Some(p) => p,
        None => default_config_path()?,
    };
    info!("polyfedi service starting");
    info!("config: {}", cfg_path.display());
    let cfg = ServiceConfig::load(&cfg_path)?;
    let data_dir = cfg.data_dir()?;
    std::fs::create_dir_all(&data_dir).with_context(|| format!("create data dir: {}", data_dir.display()))?;

    let origins = cfg.build_origins()?;
    let accounts = cfg.build_accounts(&origins)?;
    let http = Arc::new(ReqwestExecutor::new(&cfg.http)?);
    let store = Arc::new(SqliteStore::open(data_dir.join("store.db"))?);

    let mut executor = CommandExecutor::new(store, cfg.scheduler.clone(), &data_dir);
    for account in &accounts {
        info!(account = %account.name, origin = ?account.origin.origin_type, "account ready");
        executor.add_connection(new_connection(Arc::clone(account), http.clone(), cfg.http.clone()));
    }
    executor.load_origin_preferences().await?;

    let queue_store = QueueStore::open(data_dir.join("queues.db"))?;
    let scheduler = Scheduler::start(cfg.scheduler.clone(), queue_store, Arc::new(executor)).await?;
    log_events(&scheduler);

    if args.sync {
        for account in &accounts {
            for tt in [TimelineType::Home, TimelineType::Notifications] {
                scheduler.submit(CommandData::fetch_timeline(account.name.as_str(), tt, 0));
            }
        }
    }

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("shutdown requested");
    scheduler.stop(false).await?;
    Ok(())
}
