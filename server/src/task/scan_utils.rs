use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tokio::sync::oneshot::channel;
use tracing::{debug, instrument, warn};

use api::file::{FileUuid, MetadataValueType};
use api::root::{RootUuid, StorageRoot};
use api::scan::ScanCounters;
use common::config::CSConfig;
use common::db::{FileUpsert, UpsertOp};
use common::media::{
    QUICK_HASH_LEN, extract_metadata_entries, file_type_for_extension, in_hash_window, mime_hint,
    quick_hash_bytes,
};
use common::storage::{FileEntry, StorageClient};

use crate::db::msg::DbMsg;
use crate::detect::msg::DetectMsg;
use crate::service::CsmSender;

// scan_utils
//
// tooling for running catalog scans: the per-run context, live counters,
// glob filtering, and the per-entry pipeline (upsert, quick hash, duplicate
// grouping, metadata sidecar).

// priority the scanner uses when nudging the detection engine; the watcher
// runs hotter (5..7) since its directories are actively changing
pub const SCAN_DETECT_PRIORITY: i64 = 4;

#[derive(Debug, Default)]
pub struct ScanCountersAtomic {
    pub processed: AtomicI64,
    pub added: AtomicI64,
    pub updated: AtomicI64,
    pub unchanged: AtomicI64,
    pub deleted: AtomicI64,
    pub errors: AtomicI64,
}

impl ScanCountersAtomic {
    pub fn snapshot(&self) -> ScanCounters {
        ScanCounters {
            processed: self.processed.load(Ordering::Relaxed),
            added: self.added.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

pub fn build_glob_set(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();

    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }

    Ok(Some(builder.build()?))
}

// per-scan global context, shared by the walk loop and its workers
pub struct ScanContext {
    pub config: Arc<CSConfig>,
    pub root_uuid: RootUuid,
    pub root: StorageRoot,
    pub client: Arc<dyn StorageClient>,
    pub db_svc_sender: CsmSender,
    pub detect_svc_sender: CsmSender,
    pub counters: Arc<ScanCountersAtomic>,
    pub include: Option<GlobSet>,
    pub exclude: Option<GlobSet>,
    pub scan_start: i64,
}

impl ScanContext {
    pub fn error(&self, msg: impl std::fmt::Display) {
        warn!({ root_uuid = self.root_uuid }, "scan error: {msg}");

        self.counters.errors.fetch_add(1, Ordering::Relaxed);
    }

    // include/exclude filtering over canonical paths; an empty include list
    // admits everything
    pub fn admits(&self, path: &str) -> bool {
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(path) {
                return false;
            }
        }

        match &self.include {
            Some(include) => include.is_match(path),
            None => true,
        }
    }

    pub async fn upsert(
        &self,
        upsert: FileUpsert,
        now: i64,
    ) -> Result<(FileUuid, UpsertOp)> {
        let (tx, rx) = channel();

        self.db_svc_sender
            .send(
                DbMsg::UpsertFile {
                    resp: tx,
                    root_uuid: self.root_uuid,
                    upsert,
                    now,
                }
                .into(),
            )
            .await?;

        rx.await?
    }

    pub async fn request_detection(&self, dir_path: String) -> Result<()> {
        self.detect_svc_sender
            .send(
                DetectMsg::AnalyzeDirectory {
                    root_uuid: self.root_uuid,
                    dir_path,
                    priority: SCAN_DETECT_PRIORITY,
                }
                .into(),
            )
            .await?;

        Ok(())
    }
}

pub fn upsert_for_entry(entry: &FileEntry, parent: Option<FileUuid>) -> FileUpsert {
    let extension = if entry.is_dir {
        None
    } else {
        entry.name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase())
    };

    let file_type = if entry.is_dir {
        api::file::FileType::Directory
    } else {
        extension
            .as_deref()
            .map(file_type_for_extension)
            .unwrap_or(api::file::FileType::Other)
    };

    FileUpsert {
        path: entry.path.clone(),
        name: entry.name.clone(),
        mime_type: entry.mime_hint.clone().or_else(|| mime_hint(&entry.name)),
        extension,
        file_type,
        size: entry.size as i64,
        is_directory: entry.is_dir,
        created: entry.created,
        modified: entry.modified.unwrap_or(0),
        parent,
    }
}

// per-file processing after the row exists: quick hash, duplicate
// grouping, and the metadata sidecar.  every failure is recorded and
// swallowed so one bad file never stops the walk.
#[instrument(skip(context, entry), fields(path = %entry.path))]
pub async fn process_file(
    context: Arc<ScanContext>,
    entry: FileEntry,
    file_uuid: FileUuid,
    op: UpsertOp,
    now: i64,
) {
    match process_file_inner(context.clone(), &entry, file_uuid, op, now).await {
        Ok(()) => {}
        Err(err) => context.error(format!("{}: {err}", entry.path)),
    }
}

async fn process_file_inner(
    context: Arc<ScanContext>,
    entry: &FileEntry,
    file_uuid: FileUuid,
    op: UpsertOp,
    now: i64,
) -> Result<()> {
    // nothing below applies to rows the scan merely witnessed
    if op == UpsertOp::Unchanged {
        return Ok(());
    }

    let config = &context.config;

    let wants_hash = context.root.detect_duplicates
        && in_hash_window(
            entry.size,
            config.hash_min_size,
            config.hash_max_size,
            config.hash_large_files,
        );

    let file_type = file_type_for_extension(
        entry.name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or(""),
    );

    let wants_metadata = context.root.extract_metadata && file_type.is_media();

    if !wants_hash && !wants_metadata {
        return Ok(());
    }

    let head = context
        .client
        .read_partial(&entry.path, 0, QUICK_HASH_LEN)
        .await?;

    if wants_hash {
        let quick_hash = quick_hash_bytes(&head);

        let (tx, rx) = channel();

        context
            .db_svc_sender
            .send(
                DbMsg::SetQuickHash {
                    resp: tx,
                    file_uuid,
                    quick_hash: Some(quick_hash.clone()),
                }
                .into(),
            )
            .await?;

        rx.await??;

        // duplicate grouping is cross-root: the same bytes on two shares
        // are still the same bytes
        let (tx, rx) = channel();

        context
            .db_svc_sender
            .send(
                DbMsg::FindByHash {
                    resp: tx,
                    root_uuid: None,
                    quick_hash,
                    size: entry.size as i64,
                }
                .into(),
            )
            .await?;

        let peers = rx.await??;

        if peers.len() >= 2 {
            let (tx, rx) = channel();

            context
                .db_svc_sender
                .send(
                    DbMsg::MergeDuplicateGroup {
                        resp: tx,
                        file_uuids: peers,
                        now,
                    }
                    .into(),
                )
                .await?;

            let group_uuid = rx.await??;

            debug!({ file_uuid = file_uuid, group_uuid = group_uuid }, "joined duplicate group");
        }
    }

    if wants_metadata {
        let entries: Vec<(String, String, MetadataValueType)> =
            extract_metadata_entries(&entry.name, &head);

        if !entries.is_empty() {
            let (tx, rx) = channel();

            context
                .db_svc_sender
                .send(
                    DbMsg::UpsertFileMetadata {
                        resp: tx,
                        file_uuid,
                        entries,
                    }
                    .into(),
                )
                .await?;

            rx.await??;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, size: u64, is_dir: bool) -> FileEntry {
        FileEntry {
            name: common::storage::path::file_name(path).to_owned(),
            path: path.to_owned(),
            size,
            modified: Some(1_700_000_000),
            created: None,
            is_dir,
            permissions: None,
            mime_hint: None,
        }
    }

    #[test]
    fn globs_admit_and_exclude() {
        let include = build_glob_set(&["*.mkv".to_owned(), "*.mp4".to_owned()])
            .unwrap()
            .unwrap();
        let exclude = build_glob_set(&["*/.hidden/*".to_owned()]).unwrap().unwrap();

        assert!(include.is_match("/media/movie.mkv"));
        assert!(!include.is_match("/media/notes.txt"));
        assert!(exclude.is_match("/media/.hidden/movie.mkv"));
    }

    #[test]
    fn empty_globs_are_none() {
        assert!(build_glob_set(&[]).unwrap().is_none());
    }

    #[test]
    fn bad_glob_is_an_error() {
        assert!(build_glob_set(&["[".to_owned()]).is_err());
    }

    #[test]
    fn upsert_shapes() {
        let file = upsert_for_entry(&entry("/tv/show/S01E01.MKV", 1024, false), Some(7));
        assert_eq!(file.extension.as_deref(), Some("mkv"));
        assert_eq!(file.file_type, api::file::FileType::Video);
        assert_eq!(file.parent, Some(7));
        assert!(!file.is_directory);

        let dir = upsert_for_entry(&entry("/tv/show", 0, true), None);
        assert_eq!(dir.file_type, api::file::FileType::Directory);
        assert!(dir.extension.is_none());
    }

    #[test]
    fn counters_snapshot() {
        let counters = ScanCountersAtomic::default();

        counters.processed.fetch_add(10, Ordering::Relaxed);
        counters.added.fetch_add(3, Ordering::Relaxed);
        counters.errors.fetch_add(1, Ordering::Relaxed);

        let snap = counters.snapshot();
        assert_eq!(snap.processed, 10);
        assert_eq!(snap.added, 3);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.deleted, 0);
    }
}
