use std::path::PathBuf;

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use tokio::sync::oneshot::channel;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use api::root::RootSettings;
use common::config::read_config;

mod db;
mod detect;
mod enrich;
mod service;
mod task;
mod watch;

use crate::db::msg::DbMsg;
use crate::service::{CatalogizerService, CsmRegistry, ServiceType};
use crate::task::msg::TaskMsg;
use crate::watch::msg::WatchMsg;

#[derive(Debug, Parser)]
#[command(name = "catalogizer", about = "storage-to-catalog media indexer")]
struct Cli {
    // toml file with a [config] table
    #[arg(short, long, default_value = "/etc/catalogizer/config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = read_config(cli.config).await;

    let registry = CsmRegistry::new();

    // create() wires every sender into the registry before anything
    // starts, so services can look each other up regardless of order
    let db_svc = db::svc::MariaDBService::create(config.clone(), &registry);
    let detect_svc = detect::svc::DetectService::create(config.clone(), &registry);
    let enrich_svc = enrich::svc::EnrichService::create(config.clone(), &registry);
    let task_svc = task::svc::TaskService::create(config.clone(), &registry);
    let watch_svc = watch::svc::WatchService::create(config.clone(), &registry);

    db_svc.start(&registry).await?;
    detect_svc.start(&registry).await?;
    enrich_svc.start(&registry).await?;
    task_svc.start(&registry).await?;
    watch_svc.start(&registry).await?;

    let db_sender = registry.get(&ServiceType::Db)?;

    // a scan left running by a dead process will never finish
    let (tx, rx) = channel();

    db_sender
        .send(
            DbMsg::FailOrphanedScans {
                resp: tx,
                now: Local::now().timestamp(),
            }
            .into(),
        )
        .await?;

    let orphaned = rx.await??;

    if orphaned > 0 {
        warn!({ orphaned = orphaned }, "failed scans orphaned by a previous run");
    }

    // install watchers for every enabled root that is reachable through a
    // kernel-visible path; ftp and webdav roots rely on scans alone
    let (tx, rx) = channel();

    db_sender.send(DbMsg::ListStorageRoots { resp: tx }.into()).await?;

    let roots = rx.await??;

    let watch_sender = registry.get(&ServiceType::Watch)?;

    for (root_uuid, root) in &roots {
        if !root.enabled {
            continue;
        }

        let mount_path = match &root.settings {
            RootSettings::Local(local) => local.base_path.clone(),
            RootSettings::Nfs(nfs) => nfs.mount_point.clone(),
            RootSettings::Smb(smb) => smb.mount_point.clone(),
            RootSettings::Ftp(_) | RootSettings::Webdav(_) => continue,
        };

        let (tx, rx) = channel();

        watch_sender
            .send(
                WatchMsg::WatchRoot {
                    resp: tx,
                    root_uuid: *root_uuid,
                    mount_path: mount_path.clone(),
                }
                .into(),
            )
            .await?;

        match rx.await? {
            Ok(()) => {}
            Err(err) => warn!({ root_name = root.name }, "cannot watch root: {err}"),
        }
    }

    info!({ roots = roots.len() }, "catalogizer is up");

    shutdown_signal().await;

    info!("shutting down");

    // stop the watcher first so no new mutations arrive, then cancel any
    // running scans; their history rows are finalized as failed
    let (tx, rx) = channel();

    watch_sender.send(WatchMsg::Stop { resp: tx }.into()).await?;
    let _ = rx.await;

    let task_sender = registry.get(&ServiceType::Task)?;

    for (root_uuid, _) in &roots {
        let (tx, rx) = channel();

        task_sender
            .send(
                TaskMsg::StopTask {
                    resp: tx,
                    root_uuid: *root_uuid,
                }
                .into(),
            )
            .await?;

        // roots without a running task answer with an error; that is fine
        let _ = rx.await;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
