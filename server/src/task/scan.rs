use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use tokio::{sync::oneshot::channel, task::JoinSet};
use tracing::{debug, info, instrument, warn};

use api::file::FileUuid;
use api::root::RootUuid;
use api::scan::{ScanMode, ScanStatus, ScanUuid};
use common::config::CSConfig;
use common::db::UpsertOp;
use common::storage::{FileEntry, StorageError, StorageTuning, create_client};

use crate::db::msg::DbMsg;
use crate::service::{CsmRegistry, ServiceType};
use crate::task::RunningScanState;
use crate::task::scan_utils::{ScanContext, build_glob_set, process_file, upsert_for_entry};

// catalog scan
//
// a breadth-first walk of one storage root that reconciles the files table
// against the live tree.  directory listings happen on the walk loop;
// per-file work (hashing, duplicate grouping, metadata) fans out to a
// bounded worker pool.  the deletion sweep at the end relies on every
// visited row getting its last_scan touched, so it only runs for full
// scans.

struct WalkItem {
    path: String,
    depth: u32,
    parent: Option<FileUuid>,
}

#[instrument(skip(config, registry, state))]
pub async fn scan_root(
    config: Arc<CSConfig>,
    registry: CsmRegistry,
    root_uuid: RootUuid,
    mode: ScanMode,
    state: Arc<RunningScanState>,
) -> Result<()> {
    let db_svc_sender = registry.get(&ServiceType::Db)?;
    let detect_svc_sender = registry.get(&ServiceType::Detect)?;

    // root verification
    let (tx, rx) = channel();

    db_svc_sender
        .send(DbMsg::GetStorageRoot { resp: tx, root_uuid }.into())
        .await?;

    let root = rx
        .await??
        .ok_or_else(|| anyhow::Error::msg("storage root does not exist"))?;

    if !root.enabled {
        return Err(anyhow::Error::msg("storage root is disabled"));
    }

    let tuning = StorageTuning::from_config(&config);
    let client = create_client(&root.settings, &tuning)?;

    client.connect().await.map_err(|err| {
        anyhow::Error::msg(format!("cannot connect to {}: {err}", root.name))
    })?;

    let scan_start = Local::now().timestamp();

    let (tx, rx) = channel();

    db_svc_sender
        .send(
            DbMsg::CreateScan {
                resp: tx,
                root_uuid,
                mode,
                started: scan_start,
            }
            .into(),
        )
        .await?;

    let scan_uuid = rx.await??;

    state.set_scan_uuid(scan_uuid).await;

    let context = Arc::new(ScanContext {
        include: build_glob_set(&root.include_globs)?,
        exclude: build_glob_set(&root.exclude_globs)?,
        config: config.clone(),
        root_uuid,
        root,
        client,
        db_svc_sender: db_svc_sender.clone(),
        detect_svc_sender,
        counters: state.counters.clone(),
        scan_start,
    });

    info!({ root_uuid = root_uuid, mode = mode.as_str() }, "scan starting");

    let walk_result = run_walk(context.clone(), mode, scan_start).await;

    let status = match &walk_result {
        Ok(()) => {
            if mode == ScanMode::Full {
                if let Err(err) = run_sweep(context.clone(), scan_start).await {
                    context.error(format!("deletion sweep failed: {err}"));
                }
            }

            ScanStatus::Completed
        }
        Err(err) => {
            warn!({ root_uuid = root_uuid }, "scan failed: {err}");
            ScanStatus::Failed
        }
    };

    finalize(&context, scan_uuid, status).await?;

    info!({ root_uuid = root_uuid, status = status.as_str() }, "scan finished");

    walk_result
}

async fn run_walk(
    context: Arc<ScanContext>,
    mode: ScanMode,
    scan_start: i64,
) -> Result<()> {
    let scan_threads = context.config.scan_threads.max(1);
    let max_depth = context.root.max_depth;

    let mut queue: VecDeque<WalkItem> = VecDeque::new();

    queue.push_back(WalkItem {
        path: "/".to_owned(),
        depth: 0,
        parent: None,
    });

    let mut tasks: JoinSet<()> = JoinSet::new();

    while let Some(item) = queue.pop_front() {
        let listing = match list_with_backoff(&context, &item.path).await? {
            Some(listing) => listing,
            None => continue,
        };

        let changed_before = context
            .counters
            .added
            .load(std::sync::atomic::Ordering::Relaxed)
            + context
                .counters
                .updated
                .load(std::sync::atomic::Ordering::Relaxed);

        for entry in listing {
            if !context.admits(&entry.path) {
                continue;
            }

            context
                .counters
                .processed
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

            let now = Local::now().timestamp();

            let (file_uuid, op) = match context
                .upsert(upsert_for_entry(&entry, item.parent), now)
                .await
            {
                Ok(outcome) => outcome,
                Err(err) => {
                    context.error(format!("{}: {err}", entry.path));
                    continue;
                }
            };

            match op {
                UpsertOp::Inserted => {
                    context
                        .counters
                        .added
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
                UpsertOp::Updated => {
                    context
                        .counters
                        .updated
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
                UpsertOp::Unchanged => {
                    context
                        .counters
                        .unchanged
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
            }

            if entry.is_dir {
                let entry_depth = item.depth + 1;

                // a directory at max_depth is scanned but not descended
                if max_depth != 0 && entry_depth >= max_depth {
                    continue;
                }

                // incremental pruning: an unchanged directory keeps its
                // subtree; the listing call is what we are saving
                if mode == ScanMode::Incremental && op == UpsertOp::Unchanged {
                    continue;
                }

                if queue.len() >= context.config.scan_queue_depth {
                    warn!(
                        { frontier = queue.len() },
                        "bfs frontier exceeds the configured bound"
                    );
                }

                queue.push_back(WalkItem {
                    path: entry.path.clone(),
                    depth: entry_depth,
                    parent: Some(file_uuid),
                });
            } else {
                while tasks.len() >= scan_threads {
                    tasks.join_next().await;
                }

                tasks.spawn(process_file(
                    context.clone(),
                    entry,
                    file_uuid,
                    op,
                    now,
                ));
            }
        }

        // a directory whose listing produced changes is a detection
        // candidate once its files have settled
        let changed_after = context
            .counters
            .added
            .load(std::sync::atomic::Ordering::Relaxed)
            + context
                .counters
                .updated
                .load(std::sync::atomic::Ordering::Relaxed);

        if changed_after > changed_before && item.path != "/" {
            if let Err(err) = context.request_detection(item.path.clone()).await {
                context.error(format!("detection enqueue failed: {err}"));
            }
        }
    }

    // all per-file work must land before the sweep reads last_scan
    while tasks.join_next().await.is_some() {}

    debug!({ root_uuid = context.root_uuid, scan_start = scan_start }, "walk complete");

    Ok(())
}

// list one directory, absorbing transient trouble
//
// per-entry failures skip the directory and count an error; a circuit-open
// backend pauses the whole walk with exponential backoff until the retry
// budget is spent, at which point the scan fails
async fn list_with_backoff(
    context: &Arc<ScanContext>,
    path: &str,
) -> Result<Option<Vec<FileEntry>>> {
    let mut round: u32 = 0;

    loop {
        match context.client.list_directory(path).await {
            Ok(fetched) => {
                if fetched.stale {
                    debug!({ path = path }, "scanning from stale listing");
                }

                return Ok(Some(fetched.value));
            }

            Err(StorageError::CircuitOpen) => {
                round += 1;

                if round > context.config.scan_retry_budget {
                    return Err(anyhow::Error::msg(
                        "storage backend circuit stayed open past the retry budget",
                    ));
                }

                let backoff = Duration::from_millis(context.config.retry_base_ms)
                    * 2u32.saturating_pow(round - 1);

                warn!({ path = path, round = round }, "circuit open, pausing scan");

                tokio::time::sleep(backoff).await;
            }

            Err(err) => {
                context.error(format!("listing {path}: {err}"));
                return Ok(None);
            }
        }
    }
}

async fn run_sweep(context: Arc<ScanContext>, scan_start: i64) -> Result<()> {
    let now = Local::now().timestamp();

    let (tx, rx) = channel();

    context
        .db_svc_sender
        .send(
            DbMsg::SweepDeletions {
                resp: tx,
                root_uuid: context.root_uuid,
                scan_start,
                now,
            }
            .into(),
        )
        .await?;

    let swept = rx.await??;

    context
        .counters
        .deleted
        .fetch_add(swept.len() as i64, std::sync::atomic::Ordering::Relaxed);

    // groups that lost members to the sweep may no longer be groups
    let (tx, rx) = channel();

    context
        .db_svc_sender
        .send(DbMsg::PruneDuplicateGroups { resp: tx, now }.into())
        .await?;

    let dissolved = rx.await??;

    if dissolved > 0 {
        debug!({ dissolved = dissolved }, "dissolved degenerate duplicate groups");
    }

    Ok(())
}

async fn finalize(
    context: &Arc<ScanContext>,
    scan_uuid: ScanUuid,
    status: ScanStatus,
) -> Result<()> {
    let now = Local::now().timestamp();

    let (tx, rx) = channel();

    context
        .db_svc_sender
        .send(
            DbMsg::FinalizeScan {
                resp: tx,
                scan_uuid,
                status,
                counters: context.counters.snapshot(),
                finished: now,
            }
            .into(),
        )
        .await?;

    rx.await??;

    let (tx, rx) = channel();

    context
        .db_svc_sender
        .send(
            DbMsg::SetRootLastScan {
                resp: tx,
                root_uuid: context.root_uuid,
                last_scan: now,
            }
            .into(),
        )
        .await?;

    rx.await??;

    Ok(())
}
