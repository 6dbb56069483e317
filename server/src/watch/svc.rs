use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::Result;
use async_cell::sync::AsyncCell;
use async_trait::async_trait;
use chrono::Local;
use dashmap::DashMap;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::io::AsyncReadExt;
use tokio::sync::oneshot::channel;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{Level, debug, error, info, instrument, warn};

use api::file::FileUuid;
use api::root::RootUuid;
use common::config::CSConfig;
use common::media::{QUICK_HASH_LEN, file_type_for_extension, in_hash_window, quick_hash_bytes};
use common::storage::path::{canonicalize, parent};

use crate::db::msg::DbMsg;
use crate::detect::msg::DetectMsg;
use crate::service::{
    CSM, CatalogizerService, CsInner, CsmReceiver, CsmRegistry, CsmSender, ServiceType,
};
use crate::task::scan_utils::upsert_for_entry;
use crate::watch::{
    ChangeEvent, ChangeKind, CsWatchService, WatchStatus, debounce::Debouncer, msg::WatchMsg,
    rename::{PendingMove, RenameTracker},
};

// detection priorities for watcher-driven analysis; a freshly created
// directory is the hottest signal we have
const PRIORITY_DIR_CREATED: i64 = 7;
const PRIORITY_FILE_CREATED: i64 = 6;
const PRIORITY_FILE_MODIFIED: i64 = 5;

// every handler runs under this deadline
const HANDLER_DEADLINE: Duration = Duration::from_secs(30);

// watch service
//
// turns raw os file events into catalog mutations: classify, enrich with a
// stat and quick hash, debounce per (root, path), then hand to a bounded
// worker pool.  deletes detour through the rename tracker so that a
// delete/create pair with identical content becomes a move that preserves
// the file uuid.
pub struct WatchService {
    config: Arc<CSConfig>,
    receiver: Arc<Mutex<CsmReceiver>>,
    handle: AsyncCell<tokio::task::JoinHandle<Result<()>>>,
}

#[async_trait]
impl CatalogizerService for WatchService {
    type Inner = WatchState;

    fn create(config: Arc<CSConfig>, registry: &CsmRegistry) -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel::<CSM>(1024);

        registry
            .insert(ServiceType::Watch, tx)
            .expect("failed to add watch sender to registry");

        WatchService {
            config: config.clone(),
            receiver: Arc::new(Mutex::new(rx)),
            handle: AsyncCell::new(),
        }
    }

    #[instrument(level=Level::DEBUG, skip(self, registry))]
    async fn start(&self, registry: &CsmRegistry) -> Result<()> {
        info!("starting watch service");

        let receiver = Arc::clone(&self.receiver);
        let state = Arc::new(WatchState::new(self.config.clone(), registry.clone())?);

        state.start_pipeline();

        let serve = {
            let state = state.clone();

            async move {
                let mut receiver = receiver.lock().await;

                while let Some(msg) = receiver.recv().await {
                    let state = Arc::clone(&state);
                    tokio::task::spawn(async move {
                        match state.message_handler(msg).await {
                            Ok(()) => (),
                            Err(err) => {
                                error!({service = "watch", channel = "csm", error = %err})
                            }
                        }
                    });
                }

                Err(anyhow::Error::msg("watch service csm channel disconnected"))
            }
        };

        self.handle.set(tokio::task::spawn(serve));

        debug!("started watch service");
        Ok(())
    }
}

// a raw event as it leaves the notify callback thread
#[derive(Debug)]
struct RawEvent {
    root_uuid: RootUuid,
    mount: PathBuf,
    event: notify::Event,
}

struct RootWatch {
    // kept alive for the lifetime of the watch; dropping it tears the
    // inotify registration down
    _watcher: StdMutex<RecommendedWatcher>,
    mount: PathBuf,
}

pub struct WatchState {
    config: Arc<CSConfig>,
    registry: CsmRegistry,

    watchers: DashMap<RootUuid, RootWatch>,

    debouncer: Arc<Debouncer>,
    tracker: Arc<RenameTracker>,

    raw_tx: mpsc::UnboundedSender<RawEvent>,
    raw_rx: StdMutex<Option<mpsc::UnboundedReceiver<RawEvent>>>,

    event_tx: mpsc::Sender<ChangeEvent>,
    event_rx: StdMutex<Option<mpsc::Receiver<ChangeEvent>>>,

    processed: Arc<AtomicI64>,

    pipeline: StdMutex<Vec<JoinHandle<()>>>,
}

#[async_trait]
impl CsInner for WatchState {
    fn new(config: Arc<CSConfig>, registry: CsmRegistry) -> Result<Self> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.watch_queue_depth.max(1));

        Ok(WatchState {
            debouncer: Arc::new(Debouncer::new(Duration::from_millis(
                config.watch_debounce_ms,
            ))),
            tracker: Arc::new(RenameTracker::new(Duration::from_millis(
                config.move_window_ms,
            ))),
            config,
            registry,
            watchers: DashMap::new(),
            raw_tx,
            raw_rx: StdMutex::new(Some(raw_rx)),
            event_tx,
            event_rx: StdMutex::new(Some(event_rx)),
            processed: Arc::new(AtomicI64::new(0)),
            pipeline: StdMutex::new(Vec::new()),
        })
    }

    fn registry(&self) -> CsmRegistry {
        self.registry.clone()
    }

    async fn message_handler(&self, csm: CSM) -> Result<()> {
        match csm {
            CSM::Watch(message) => match message {
                WatchMsg::WatchRoot {
                    resp,
                    root_uuid,
                    mount_path,
                } => {
                    self.respond(resp, self.watch_root(root_uuid, mount_path))
                        .await
                }
                WatchMsg::UnwatchRoot { resp, root_uuid } => {
                    self.respond(resp, self.unwatch_root(root_uuid)).await
                }
                WatchMsg::Status { resp } => self.respond(resp, self.status()).await,
                WatchMsg::Stop { resp } => self.respond(resp, self.stop()).await,
            },
            _ => Err(anyhow::Error::msg("not implemented")),
        }
    }
}

impl WatchState {
    // spawn the classifier, the worker dispatcher, and the move sweeper
    fn start_pipeline(self: &Arc<Self>) {
        let mut pipeline = self.pipeline.lock().unwrap();

        let raw_rx = self
            .raw_rx
            .lock()
            .unwrap()
            .take()
            .expect("watch pipeline started twice");

        let event_rx = self
            .event_rx
            .lock()
            .unwrap()
            .take()
            .expect("watch pipeline started twice");

        pipeline.push(tokio::spawn(classifier(self.clone(), raw_rx)));
        pipeline.push(tokio::spawn(dispatcher(self.clone(), event_rx)));
        pipeline.push(tokio::spawn(sweeper(self.clone())));
    }

    fn db_sender(&self) -> Result<CsmSender> {
        self.registry.get(&ServiceType::Db)
    }

    fn detect_sender(&self) -> Result<CsmSender> {
        self.registry.get(&ServiceType::Detect)
    }
}

#[async_trait]
impl CsWatchService for WatchState {
    #[instrument(level=Level::DEBUG, skip(self))]
    async fn watch_root(&self, root_uuid: RootUuid, mount_path: String) -> Result<()> {
        if self.watchers.contains_key(&root_uuid) {
            return Err(anyhow::Error::msg("root is already being watched"));
        }

        let mount = PathBuf::from(&mount_path);

        if !mount.is_dir() {
            return Err(anyhow::Error::msg(format!(
                "mount path {mount_path} is not a directory"
            )));
        }

        let raw_tx = self.raw_tx.clone();
        let callback_mount = mount.clone();

        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    let _ = raw_tx.send(RawEvent {
                        root_uuid,
                        mount: callback_mount.clone(),
                        event,
                    });
                }
                Err(err) => {
                    warn!({ root_uuid = root_uuid }, "watcher error: {err}");
                }
            })?;

        // recursive registration covers directories created later as well
        watcher.watch(&mount, RecursiveMode::Recursive)?;

        self.watchers.insert(
            root_uuid,
            RootWatch {
                _watcher: StdMutex::new(watcher),
                mount,
            },
        );

        info!({ root_uuid = root_uuid, mount = mount_path }, "watching root");

        Ok(())
    }

    #[instrument(level=Level::DEBUG, skip(self))]
    async fn unwatch_root(&self, root_uuid: RootUuid) -> Result<()> {
        match self.watchers.remove(&root_uuid) {
            Some(_) => {
                info!({ root_uuid = root_uuid }, "unwatched root");
                Ok(())
            }
            None => Err(anyhow::Error::msg("root is not being watched")),
        }
    }

    async fn status(&self) -> Result<WatchStatus> {
        Ok(WatchStatus {
            watched_roots: self.watchers.iter().map(|e| *e.key()).collect(),
            processed_events: self.processed.load(Ordering::Relaxed),
            dropped_events: self.debouncer.dropped.load(Ordering::Relaxed),
            pending_debounce: self.debouncer.pending(),
            pending_moves: self.tracker.len(),
        })
    }

    async fn stop(&self) -> Result<()> {
        info!("stopping watch service");

        self.watchers.clear();
        self.debouncer.clear();

        // pending timers die with their tasks; in-flight handlers are
        // detached and run to their deadline
        for handle in self.pipeline.lock().unwrap().drain(..) {
            handle.abort();
        }

        Ok(())
    }
}

// pipeline stage 1: classification and enrichment
//
// raw os events arrive here from the notify callback threads.  unknown ops
// are dropped; survivors get a stat and (for hashable files) a quick hash
// before entering the debounce map.
async fn classifier(state: Arc<WatchState>, mut raw_rx: mpsc::UnboundedReceiver<RawEvent>) {
    while let Some(raw) = raw_rx.recv().await {
        if let Err(err) = classify_one(&state, raw).await {
            debug!("event classification failed: {err}");
        }
    }
}

async fn classify_one(state: &Arc<WatchState>, raw: RawEvent) -> Result<()> {
    use notify::EventKind;
    use notify::event::{ModifyKind, RenameMode};

    let kind = match raw.event.kind {
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Remove(_) => ChangeKind::Deleted,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => ChangeKind::Deleted,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => ChangeKind::Created,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => ChangeKind::Moved,
        EventKind::Modify(_) => ChangeKind::Modified,
        // access and catch-all events carry no catalog signal
        _ => return Ok(()),
    };

    if kind == ChangeKind::Moved {
        // both ends in one event: paths[0] is the source, paths[1] the
        // destination
        if raw.event.paths.len() < 2 {
            return Ok(());
        }

        let Some(old_path) = canonical_for(&raw.mount, &raw.event.paths[0]) else {
            return Ok(());
        };
        let Some(new_path) = canonical_for(&raw.mount, &raw.event.paths[1]) else {
            return Ok(());
        };

        let Some((file_uuid, record)) = lookup_prior(state, raw.root_uuid, &old_path).await? else {
            // no catalog row for the source; treat the destination as new
            return enrich_and_submit(state, raw.root_uuid, &raw.mount, new_path, ChangeKind::Created)
                .await;
        };

        let event = ChangeEvent {
            root_uuid: raw.root_uuid,
            path: new_path,
            kind: ChangeKind::Moved,
            is_dir: record.is_directory,
            size: record.size,
            quick_hash: record.quick_hash.clone(),
            prior: Some((file_uuid, record)),
        };

        state.debouncer.submit(event, state.event_tx.clone());

        return Ok(());
    }

    for abs in &raw.event.paths {
        let Some(path) = canonical_for(&raw.mount, abs) else {
            continue;
        };

        match kind {
            ChangeKind::Deleted => {
                let Some(prior) = lookup_prior(state, raw.root_uuid, &path).await? else {
                    // nothing cataloged at this path; nothing to delete
                    continue;
                };

                let (file_uuid, record) = prior;

                // directories have no content hash; their pending-move key
                // uses the cataloged subtree size instead
                let size = if record.is_directory {
                    subtree_size(state, raw.root_uuid, &path).await?
                } else {
                    record.size
                };

                let event = ChangeEvent {
                    root_uuid: raw.root_uuid,
                    path: path.clone(),
                    kind: ChangeKind::Deleted,
                    is_dir: record.is_directory,
                    size,
                    quick_hash: record.quick_hash.clone(),
                    prior: Some((file_uuid, record)),
                };

                state.debouncer.submit(event, state.event_tx.clone());
            }

            _ => {
                enrich_and_submit(state, raw.root_uuid, &raw.mount, path, kind).await?;
            }
        }
    }

    Ok(())
}

async fn enrich_and_submit(
    state: &Arc<WatchState>,
    root_uuid: RootUuid,
    mount: &Path,
    path: String,
    kind: ChangeKind,
) -> Result<()> {
    let full = common::storage::path::join_base(mount, &path);

    // the file may be gone again by the time we stat it; the delete event
    // that follows will handle that
    let Ok(meta) = tokio::fs::symlink_metadata(&full).await else {
        return Ok(());
    };

    let is_dir = meta.is_dir();
    let size = if is_dir { 0 } else { meta.len() as i64 };

    let quick_hash = if !is_dir
        && in_hash_window(
            meta.len(),
            state.config.hash_min_size,
            state.config.hash_max_size,
            false,
        ) {
        read_quick_hash(&full).await.ok()
    } else {
        None
    };

    let event = ChangeEvent {
        root_uuid,
        path,
        kind,
        is_dir,
        size,
        quick_hash,
        prior: None,
    };

    state.debouncer.submit(event, state.event_tx.clone());

    Ok(())
}

async fn read_quick_hash(full: &Path) -> Result<String> {
    let file = tokio::fs::File::open(full).await?;

    let mut buf = Vec::with_capacity(QUICK_HASH_LEN as usize);
    file.take(QUICK_HASH_LEN).read_to_end(&mut buf).await?;

    Ok(quick_hash_bytes(&buf))
}

fn canonical_for(mount: &Path, abs: &Path) -> Option<String> {
    let rel = abs.strip_prefix(mount).ok()?;

    canonicalize(&rel.to_string_lossy()).ok()
}

async fn lookup_prior(
    state: &Arc<WatchState>,
    root_uuid: RootUuid,
    path: &str,
) -> Result<Option<(FileUuid, api::file::FileRecord)>> {
    let (tx, rx) = channel();

    state
        .db_sender()?
        .send(
            DbMsg::GetFile {
                resp: tx,
                root_uuid,
                path: path.to_owned(),
            }
            .into(),
        )
        .await?;

    let row = rx.await??;

    // a tombstoned row is fair game for undelete-by-event, but a delete of
    // an already-deleted row is a no-op
    Ok(row.filter(|(_, record)| !record.deleted))
}

async fn subtree_size(
    state: &Arc<WatchState>,
    root_uuid: RootUuid,
    dir_path: &str,
) -> Result<i64> {
    let (tx, rx) = channel();

    state
        .db_sender()?
        .send(
            DbMsg::SumSubtreeSize {
                resp: tx,
                root_uuid,
                dir_path: dir_path.to_owned(),
            }
            .into(),
        )
        .await?;

    rx.await?
}

// pipeline stage 2: worker dispatch
//
// debounced events land on the bounded queue; the semaphore keeps at most
// watch_threads handlers in flight
async fn dispatcher(state: Arc<WatchState>, mut event_rx: mpsc::Receiver<ChangeEvent>) {
    let permits = Arc::new(Semaphore::new(state.config.watch_threads.max(1)));

    while let Some(event) = event_rx.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };

        let state = state.clone();

        tokio::spawn(async move {
            let _permit = permit;

            let outcome = tokio::time::timeout(HANDLER_DEADLINE, handle_event(&state, event)).await;

            match outcome {
                Ok(Ok(())) => {
                    state.processed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(err)) => warn!("event handler failed: {err}"),
                Err(_) => warn!("event handler hit its deadline"),
            }
        });
    }
}

#[instrument(skip(state, event), fields(path = %event.path, kind = ?event.kind))]
async fn handle_event(state: &Arc<WatchState>, event: ChangeEvent) -> Result<()> {
    let now = Local::now().timestamp();

    match event.kind {
        ChangeKind::Created if event.is_dir => {
            // a freshly appeared directory might be the other half of a
            // recent directory delete; the key degrades to the on-disk
            // subtree size plus a name match
            let mount = state
                .watchers
                .get(&event.root_uuid)
                .map(|watch| watch.mount.clone());

            if let Some(mount) = mount {
                let sum = on_disk_subtree_size(mount, event.path.clone()).await;

                if let Some(pending) = state.tracker.detect_create(
                    &event.path,
                    event.root_uuid,
                    sum,
                    None,
                    true,
                ) {
                    match apply_move(state, &pending, &event.path, now).await {
                        Ok(()) => return Ok(()),
                        Err(err) => {
                            warn!("directory move rewrite failed, falling back: {err}");

                            finalize_delete(state, pending.file_uuid, now).await?;
                        }
                    }
                }
            }

            // the recursive mount watch already covers the new subtree;
            // catalog the row and let detection look at it
            upsert_from_event(state, &event, now).await?;

            request_detection(state, event.root_uuid, event.path.clone(), PRIORITY_DIR_CREATED)
                .await?;
        }

        ChangeKind::Created => {
            // a create whose content matches a recent delete is a move
            let pending = state.tracker.detect_create(
                &event.path,
                event.root_uuid,
                event.size,
                event.quick_hash.as_deref(),
                event.is_dir,
            );

            if let Some(pending) = pending {
                match apply_move(state, &pending, &event.path, now).await {
                    Ok(()) => return Ok(()),
                    Err(err) => {
                        // conflict fallback: the delete becomes real and the
                        // create is handled fresh
                        warn!("move rewrite failed, falling back to delete+create: {err}");

                        finalize_delete(state, pending.file_uuid, now).await?;
                    }
                }
            }

            let file_uuid = upsert_from_event(state, &event, now).await?;

            if let Some(hash) = &event.quick_hash {
                set_quick_hash(state, file_uuid, hash.clone()).await?;
            }

            if let Some(dir) = parent(&event.path) {
                request_detection(state, event.root_uuid, dir, PRIORITY_FILE_CREATED).await?;
            }
        }

        ChangeKind::Modified => {
            let file_uuid = upsert_from_event(state, &event, now).await?;

            if let Some(hash) = &event.quick_hash {
                set_quick_hash(state, file_uuid, hash.clone()).await?;
            }

            let media_like = file_type_for_extension(
                event.path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or(""),
            )
            .is_media();

            if media_like {
                if let Some(dir) = parent(&event.path) {
                    request_detection(state, event.root_uuid, dir, PRIORITY_FILE_MODIFIED).await?;
                }
            }
        }

        ChangeKind::Deleted => {
            let Some((file_uuid, _)) = event.prior else {
                return Ok(());
            };

            // not final yet: the matching create may still arrive inside
            // the move window
            state.tracker.track_delete(
                file_uuid,
                event.path.clone(),
                event.root_uuid,
                event.size,
                event.quick_hash.clone(),
                event.is_dir,
                now,
            );
        }

        ChangeKind::Moved => {
            let Some((file_uuid, record)) = &event.prior else {
                return Ok(());
            };

            let result = process_move_via_db(
                state,
                *file_uuid,
                event.root_uuid,
                record.path.clone(),
                event.path.clone(),
                record.is_directory,
                now,
            )
            .await;

            if let Err(err) = result {
                warn!("native move rewrite failed, falling back: {err}");

                finalize_delete(state, *file_uuid, now).await?;
                upsert_from_event(state, &event, now).await?;
            }
        }
    }

    Ok(())
}

async fn apply_move(
    state: &Arc<WatchState>,
    pending: &PendingMove,
    new_path: &str,
    now: i64,
) -> Result<()> {
    process_move_via_db(
        state,
        pending.file_uuid,
        pending.root_uuid,
        pending.old_path.clone(),
        new_path.to_owned(),
        pending.is_dir,
        now,
    )
    .await
}

async fn process_move_via_db(
    state: &Arc<WatchState>,
    file_uuid: FileUuid,
    root_uuid: RootUuid,
    old_path: String,
    new_path: String,
    is_directory: bool,
    now: i64,
) -> Result<()> {
    let (tx, rx) = channel();

    state
        .db_sender()?
        .send(
            DbMsg::ProcessMove {
                resp: tx,
                file_uuid,
                root_uuid,
                old_path,
                new_path,
                is_directory,
                now,
            }
            .into(),
        )
        .await?;

    rx.await?
}

async fn upsert_from_event(
    state: &Arc<WatchState>,
    event: &ChangeEvent,
    now: i64,
) -> Result<FileUuid> {
    // resolve the parent row so the hierarchy stays connected
    let parent_uuid = match parent(&event.path) {
        Some(dir) if dir != "/" => lookup_prior(state, event.root_uuid, &dir)
            .await?
            .map(|(uuid, _)| uuid),
        _ => None,
    };

    let entry = common::storage::FileEntry {
        name: common::storage::path::file_name(&event.path).to_owned(),
        path: event.path.clone(),
        size: event.size.max(0) as u64,
        modified: Some(now),
        created: None,
        is_dir: event.is_dir,
        permissions: None,
        mime_hint: None,
    };

    let (tx, rx) = channel();

    state
        .db_sender()?
        .send(
            DbMsg::UpsertFile {
                resp: tx,
                root_uuid: event.root_uuid,
                upsert: upsert_for_entry(&entry, parent_uuid),
                now,
            }
            .into(),
        )
        .await?;

    let (file_uuid, _) = rx.await??;

    Ok(file_uuid)
}

async fn set_quick_hash(
    state: &Arc<WatchState>,
    file_uuid: FileUuid,
    quick_hash: String,
) -> Result<()> {
    let (tx, rx) = channel();

    state
        .db_sender()?
        .send(
            DbMsg::SetQuickHash {
                resp: tx,
                file_uuid,
                quick_hash: Some(quick_hash),
            }
            .into(),
        )
        .await?;

    rx.await?
}

async fn request_detection(
    state: &Arc<WatchState>,
    root_uuid: RootUuid,
    dir_path: String,
    priority: i64,
) -> Result<()> {
    state
        .detect_sender()?
        .send(
            DetectMsg::AnalyzeDirectory {
                root_uuid,
                dir_path,
                priority,
            }
            .into(),
        )
        .await?;

    Ok(())
}

async fn finalize_delete(state: &Arc<WatchState>, file_uuid: FileUuid, now: i64) -> Result<()> {
    let (tx, rx) = channel();

    state
        .db_sender()?
        .send(DbMsg::MarkDeleted { resp: tx, file_uuid, now }.into())
        .await?;

    let group = rx.await??;

    // losing a member may leave its group degenerate
    if group.is_some() {
        let (tx, rx) = channel();

        state
            .db_sender()?
            .send(DbMsg::PruneDuplicateGroups { resp: tx, now }.into())
            .await?;

        rx.await??;
    }

    Ok(())
}

// recursive on-disk size of a directory, used to key directory moves; this
// agrees with the cataloged subtree sum on the delete side whenever the
// catalog is current, and a mismatch just expires into delete + create
async fn on_disk_subtree_size(mount: PathBuf, path: String) -> i64 {
    tokio::task::spawn_blocking(move || {
        let full = common::storage::path::join_base(&mount, &path);

        let mut total: i64 = 0;

        for entry in walkdir::WalkDir::new(full).into_iter().flatten() {
            if entry.file_type().is_file() {
                if let Ok(meta) = entry.metadata() {
                    total += meta.len() as i64;
                }
            }
        }

        total
    })
    .await
    .unwrap_or(0)
}

// pipeline stage 3: the move sweeper
//
// pending moves that never met their create expire into genuine deletes;
// the tick keeps the worst-case overstay of an expired entry under a
// second
async fn sweeper(state: Arc<WatchState>) {
    let period = Duration::from_millis(state.config.move_window_ms.min(1_000) / 2);

    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(100)));

    loop {
        ticker.tick().await;

        for pending in state.tracker.expired() {
            let now = Local::now().timestamp();

            debug!(
                { file_uuid = pending.file_uuid, path = %pending.old_path },
                "pending move expired, finalizing delete"
            );

            if let Err(err) = finalize_delete(&state, pending.file_uuid, now).await {
                warn!("failed to finalize expired delete: {err}");
            }
        }
    }
}
