use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::Result;
use async_cell::sync::AsyncCell;
use async_trait::async_trait;
use chrono::Local;
use tokio::sync::oneshot::channel;
use tokio::sync::{Mutex, Notify};
use tracing::{Level, debug, error, info, instrument, warn};

use api::file::{FileRecord, FileUuid};
use api::media::{DirectoryAnalysis, MediaFile, MediaItem, MediaItemStatus, MediaUuid};
use api::root::RootUuid;
use common::config::CSConfig;

use crate::db::msg::DbMsg;
use crate::detect::{
    CsDetectService, DetectStatus,
    msg::DetectMsg,
    rules::{AnalyzedEntry, evaluate},
    title::{extract_title_year, language_hint, quality_string},
};
use crate::enrich::msg::EnrichMsg;
use crate::service::{
    CSM, CatalogizerService, CsInner, CsmReceiver, CsmRegistry, CsmSender, ServiceType,
};

// how deep below the analyzed directory the engine looks; season folders
// put the episodes one level down from the show
const ANALYSIS_DEPTH: u32 = 2;

// confidence deltas smaller than this rewrite nothing
const SCORE_EPSILON: f64 = 1e-6;

// detection service
//
// a priority-queued consumer of "look at this directory" nudges from the
// scanner and the watcher.  analysis itself is pure (rules.rs); this
// service feeds it the cataloged subtree and applies the verdict: a
// directory_analysis row, possibly a media item with linked files, and an
// enrichment nudge for new items.
pub struct DetectService {
    config: Arc<CSConfig>,
    receiver: Arc<Mutex<CsmReceiver>>,
    handle: AsyncCell<tokio::task::JoinHandle<Result<()>>>,
}

#[async_trait]
impl CatalogizerService for DetectService {
    type Inner = DetectState;

    fn create(config: Arc<CSConfig>, registry: &CsmRegistry) -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel::<CSM>(1024);

        registry
            .insert(ServiceType::Detect, tx)
            .expect("failed to add detect sender to registry");

        DetectService {
            config: config.clone(),
            receiver: Arc::new(Mutex::new(rx)),
            handle: AsyncCell::new(),
        }
    }

    #[instrument(level=Level::DEBUG, skip(self, registry))]
    async fn start(&self, registry: &CsmRegistry) -> Result<()> {
        info!("starting detect service");

        let receiver = Arc::clone(&self.receiver);
        let state = Arc::new(DetectState::new(self.config.clone(), registry.clone())?);

        tokio::spawn(worker(state.clone()));

        let serve = {
            async move {
                let mut receiver = receiver.lock().await;

                while let Some(msg) = receiver.recv().await {
                    let state = Arc::clone(&state);

                    match state.message_handler(msg).await {
                        Ok(()) => (),
                        Err(err) => {
                            error!({service = "detect", channel = "csm", error = %err})
                        }
                    }
                }

                Err(anyhow::Error::msg("detect service csm channel disconnected"))
            }
        };

        self.handle.set(tokio::task::spawn(serve));

        debug!("started detect service");
        Ok(())
    }
}

#[derive(Debug, Eq, PartialEq)]
struct QueuedAnalysis {
    priority: i64,
    seq: u64,
    root_uuid: RootUuid,
    dir_path: String,
}

impl Ord for QueuedAnalysis {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // max-heap: higher priority first, then fifo within a priority
        self.priority
            .cmp(&other.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedAnalysis {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

pub struct DetectState {
    config: Arc<CSConfig>,
    registry: CsmRegistry,

    queue: StdMutex<BinaryHeap<QueuedAnalysis>>,
    queued_keys: StdMutex<HashSet<(RootUuid, String)>>,
    seq: AtomicU64,
    notify: Notify,

    analyzed: AtomicI64,
    promoted: AtomicI64,
}

#[async_trait]
impl CsInner for DetectState {
    fn new(config: Arc<CSConfig>, registry: CsmRegistry) -> Result<Self> {
        Ok(DetectState {
            config,
            registry,
            queue: StdMutex::new(BinaryHeap::new()),
            queued_keys: StdMutex::new(HashSet::new()),
            seq: AtomicU64::new(0),
            notify: Notify::new(),
            analyzed: AtomicI64::new(0),
            promoted: AtomicI64::new(0),
        })
    }

    fn registry(&self) -> CsmRegistry {
        self.registry.clone()
    }

    async fn message_handler(&self, csm: CSM) -> Result<()> {
        match csm {
            CSM::Detect(message) => match message {
                DetectMsg::AnalyzeDirectory {
                    root_uuid,
                    dir_path,
                    priority,
                } => self.enqueue_analysis(root_uuid, dir_path, priority).await,
                DetectMsg::Status { resp } => self.respond(resp, self.status()).await,
            },
            _ => Err(anyhow::Error::msg("not implemented")),
        }
    }
}

#[async_trait]
impl CsDetectService for DetectState {
    async fn enqueue_analysis(
        &self,
        root_uuid: RootUuid,
        dir_path: String,
        priority: i64,
    ) -> Result<()> {
        {
            let mut keys = self.queued_keys.lock().unwrap();

            // one pending analysis per directory is plenty
            if !keys.insert((root_uuid, dir_path.clone())) {
                return Ok(());
            }

            self.queue.lock().unwrap().push(QueuedAnalysis {
                priority,
                seq: self.seq.fetch_add(1, Ordering::Relaxed),
                root_uuid,
                dir_path,
            });
        }

        self.notify.notify_one();

        Ok(())
    }

    async fn status(&self) -> Result<DetectStatus> {
        Ok(DetectStatus {
            queued: self.queue.lock().unwrap().len(),
            analyzed: self.analyzed.load(Ordering::Relaxed),
            promoted: self.promoted.load(Ordering::Relaxed),
        })
    }
}

impl DetectState {
    fn db_sender(&self) -> Result<CsmSender> {
        self.registry.get(&ServiceType::Db)
    }

    fn pop(&self) -> Option<QueuedAnalysis> {
        let item = self.queue.lock().unwrap().pop()?;

        self.queued_keys
            .lock()
            .unwrap()
            .remove(&(item.root_uuid, item.dir_path.clone()));

        Some(item)
    }
}

async fn worker(state: Arc<DetectState>) {
    loop {
        let item = loop {
            match state.pop() {
                Some(item) => break item,
                None => state.notified().await,
            }
        };

        match analyze_directory(&state, &item).await {
            Ok(()) => {
                state.analyzed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                warn!({ dir_path = %item.dir_path }, "analysis failed: {err}");
            }
        }
    }
}

impl DetectState {
    async fn notified(&self) {
        self.notify.notified().await
    }
}

// the verdict application: analysis row, media item resolution, file
// linking, enrichment nudge
#[instrument(skip(state, item), fields(dir = %item.dir_path))]
async fn analyze_directory(state: &Arc<DetectState>, item: &QueuedAnalysis) -> Result<()> {
    let db = state.db_sender()?;

    // the cataloged subtree is the engine's input; live rows only
    let (tx, rx) = channel();

    db.send(
        DbMsg::ListSubtree {
            resp: tx,
            root_uuid: item.root_uuid,
            dir_path: item.dir_path.clone(),
        }
        .into(),
    )
    .await?;

    let subtree: Vec<(FileUuid, FileRecord)> = rx.await??;

    let prefix_len = if item.dir_path == "/" {
        1
    } else {
        item.dir_path.len() + 1
    };

    let entries: Vec<(FileUuid, FileRecord, u32)> = subtree
        .into_iter()
        .filter_map(|(uuid, record)| {
            let rel = record.path.get(prefix_len..)?;
            let depth = rel.matches('/').count() as u32 + 1;

            (depth <= ANALYSIS_DEPTH).then_some((uuid, record, depth))
        })
        .collect();

    if entries.is_empty() {
        return Ok(());
    }

    let analyzed: Vec<AnalyzedEntry> = entries
        .iter()
        .map(|(_, record, depth)| AnalyzedEntry {
            name: record.name.clone(),
            size: record.size,
            is_dir: record.is_directory,
            depth: *depth,
        })
        .collect();

    let (tx, rx) = channel();

    db.send(DbMsg::GetDetectionRules { resp: tx }.into()).await?;

    let rules = rx.await??;

    let Some(result) = evaluate(&rules, &analyzed) else {
        return Ok(());
    };

    if result.confidence < state.config.detect_analysis_threshold {
        return Ok(());
    }

    let files_count = analyzed.iter().filter(|e| !e.is_dir).count() as i64;
    let total_size: i64 = analyzed.iter().filter(|e| !e.is_dir).map(|e| e.size).sum();

    // keep an existing binding rather than minting a second media item for
    // the same directory
    let (tx, rx) = channel();

    db.send(
        DbMsg::GetDirectoryAnalysis {
            resp: tx,
            directory_path: item.dir_path.clone(),
        }
        .into(),
    )
    .await?;

    let existing = rx.await??;

    let mut media_uuid: Option<MediaUuid> = existing.and_then(|analysis| analysis.media_uuid);

    if result.confidence >= state.config.detect_promote_threshold && media_uuid.is_none() {
        // a directory inside an already-promoted tree belongs to that
        // item: season folders link their episodes to the show instead of
        // minting a second media item
        let inherited = match common::storage::path::parent(&item.dir_path) {
            Some(parent_path) => {
                let (tx, rx) = channel();

                db.send(
                    DbMsg::GetDirectoryAnalysis {
                        resp: tx,
                        directory_path: parent_path,
                    }
                    .into(),
                )
                .await?;

                rx.await??.and_then(|analysis| analysis.media_uuid)
            }
            None => None,
        };

        let resolved = match inherited {
            Some(uuid) => {
                link_media_files(state, uuid, &item.dir_path, &entries).await?;
                uuid
            }
            None => {
                let uuid = promote(state, item, &result.media_type_uuid, &entries).await?;

                state.promoted.fetch_add(1, Ordering::Relaxed);

                uuid
            }
        };

        media_uuid = Some(resolved);
    }

    let analysis = DirectoryAnalysis {
        directory_path: item.dir_path.clone(),
        root_uuid: item.root_uuid,
        media_uuid,
        confidence_score: result.confidence.clamp(0.0, 1.0),
        detection_method: result.method,
        files_count,
        total_size,
    };

    let (tx, rx) = channel();

    db.send(
        DbMsg::UpsertDirectoryAnalysis {
            resp: tx,
            analysis,
            epsilon: SCORE_EPSILON,
            now: Local::now().timestamp(),
        }
        .into(),
    )
    .await?;

    let (_, changed) = rx.await??;

    if changed {
        debug!(
            { dir = %item.dir_path, confidence = result.confidence },
            "directory analysis committed"
        );
    }

    Ok(())
}

// media item resolution and file linking
async fn promote(
    state: &Arc<DetectState>,
    item: &QueuedAnalysis,
    media_type_uuid: &api::media::MediaTypeUuid,
    entries: &[(FileUuid, FileRecord, u32)],
) -> Result<MediaUuid> {
    let db = state.db_sender()?;

    let dir_name = common::storage::path::file_name(&item.dir_path);

    let (title, year) = extract_title_year(dir_name);

    let (tx, rx) = channel();

    db.send(
        DbMsg::FindMediaItem {
            resp: tx,
            media_type_uuid: *media_type_uuid,
            title: title.clone(),
            year,
        }
        .into(),
    )
    .await?;

    let (media_uuid, is_new) = match rx.await?? {
        Some(existing) => (existing, false),
        None => {
            let (tx, rx) = channel();

            db.send(
                DbMsg::AddMediaItem {
                    resp: tx,
                    item: MediaItem {
                        media_type_uuid: *media_type_uuid,
                        title: title.clone(),
                        original_title: None,
                        year,
                        genre: None,
                        director: None,
                        rating: None,
                        runtime: None,
                        status: MediaItemStatus::New,
                    },
                }
                .into(),
            )
            .await?;

            (rx.await??, true)
        }
    };

    info!(
        { media_uuid = media_uuid, title = %title, is_new = is_new },
        "directory promoted to media item"
    );

    link_media_files(state, media_uuid, &item.dir_path, entries).await?;

    // fresh items are worth asking the providers about
    if is_new {
        let enrich = state.registry.get(&ServiceType::Enrich)?;

        enrich
            .send(EnrichMsg::Enrich { media_uuid }.into())
            .await?;
    }

    Ok(media_uuid)
}

// attach the media-bearing files under a directory to an item
async fn link_media_files(
    state: &Arc<DetectState>,
    media_uuid: MediaUuid,
    dir_path: &str,
    entries: &[(FileUuid, FileRecord, u32)],
) -> Result<()> {
    let db = state.db_sender()?;

    let dir_name = common::storage::path::file_name(dir_path);

    for (file_uuid, record, _) in entries {
        if record.is_directory || !record.file_type.is_media() {
            continue;
        }

        let decorated = format!("{} {}", dir_name, record.name);

        let (tx, rx) = channel();

        db.send(
            DbMsg::UpsertMediaFile {
                resp: tx,
                media_file: MediaFile {
                    media_uuid,
                    file_uuid: Some(*file_uuid),
                    file_path: record.path.clone(),
                    quality: quality_string(&decorated),
                    language: language_hint(&record.name),
                },
            }
            .into(),
        )
        .await?;

        rx.await??;
    }

    Ok(())
}
