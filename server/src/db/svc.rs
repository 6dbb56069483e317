use std::sync::Arc;

use anyhow::Result;
use async_cell::sync::AsyncCell;
use async_trait::async_trait;
use mysql_async::Pool;
use tokio::sync::Mutex;
use tracing::{Level, debug, error, info, instrument};

use api::changelog::{ChangeLogEntry, ChangeLogUuid};
use api::file::{DuplicateGroup, FileRecord, FileUuid, GroupUuid, MetadataValueType};
use api::media::{
    AnalysisUuid, DirectoryAnalysis, ExternalMetadata, MediaFile, MediaItem, MediaItemStatus,
    MediaType, MediaTypeUuid, MediaUuid,
};
use api::root::{RootUuid, StorageRoot, StorageRootUpdate};
use api::rule::{DetectionRule, RuleUuid};
use api::scan::{ScanCounters, ScanHistory, ScanMode, ScanStatus, ScanUuid};
use common::config::CSConfig;
use common::db::{FileUpsert, UpsertOp, mariadb};

use crate::db::{CsDbService, msg::DbMsg};
use crate::service::{
    CSM, CatalogizerService, CsInner, CsmReceiver, CsmRegistry, ServiceType,
};

// mariadb database service
//
// the single receive loop is the write-serializing actor: scan workers and
// watch workers all talk to the catalog through this channel, so row-level
// write ordering follows message ordering.  the queries themselves live in
// common so that tools can reuse them.
pub struct MariaDBService {
    config: Arc<CSConfig>,
    receiver: Arc<Mutex<CsmReceiver>>,
    handle: AsyncCell<tokio::task::JoinHandle<Result<()>>>,
}

#[async_trait]
impl CatalogizerService for MariaDBService {
    type Inner = MariaDBState;

    fn create(config: Arc<CSConfig>, registry: &CsmRegistry) -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel::<CSM>(1024);

        registry
            .insert(ServiceType::Db, tx)
            .expect("failed to add db sender to registry");

        MariaDBService {
            config: config.clone(),
            receiver: Arc::new(Mutex::new(rx)),
            handle: AsyncCell::new(),
        }
    }

    #[instrument(level=Level::DEBUG, skip(self, registry))]
    async fn start(&self, registry: &CsmRegistry) -> Result<()> {
        info!("starting db service");

        let receiver = Arc::clone(&self.receiver);
        let state = Arc::new(MariaDBState::new(self.config.clone(), registry.clone())?);

        mariadb::init_schema(state.pool.clone()).await?;

        let serve = {
            async move {
                let mut receiver = receiver.lock().await;

                while let Some(msg) = receiver.recv().await {
                    let state = Arc::clone(&state);

                    match state.message_handler(msg).await {
                        Ok(()) => (),
                        Err(err) => {
                            error!({service = "db", channel = "csm", error = %err})
                        }
                    }
                }

                Err(anyhow::Error::msg("db service csm channel disconnected"))
            }
        };

        self.handle.set(tokio::task::spawn(serve));

        debug!("started db service");
        Ok(())
    }
}

pub struct MariaDBState {
    registry: CsmRegistry,
    pool: Pool,
}

#[async_trait]
impl CsInner for MariaDBState {
    fn new(config: Arc<CSConfig>, registry: CsmRegistry) -> Result<Self> {
        Ok(MariaDBState {
            registry: registry.clone(),
            pool: Pool::new(config.mariadb_url.as_str()),
        })
    }

    fn registry(&self) -> CsmRegistry {
        self.registry.clone()
    }

    async fn message_handler(&self, csm: CSM) -> Result<()> {
        match csm {
            CSM::Db(message) => match message {
                // storage root messages
                DbMsg::AddStorageRoot { resp, root } => {
                    self.respond(resp, self.add_storage_root(root)).await
                }
                DbMsg::GetStorageRoot { resp, root_uuid } => {
                    self.respond(resp, self.get_storage_root(root_uuid)).await
                }
                DbMsg::ListStorageRoots { resp } => {
                    self.respond(resp, self.list_storage_roots()).await
                }
                DbMsg::UpdateStorageRoot {
                    resp,
                    root_uuid,
                    update,
                } => {
                    self.respond(resp, self.update_storage_root(root_uuid, update))
                        .await
                }
                DbMsg::SetRootLastScan {
                    resp,
                    root_uuid,
                    last_scan,
                } => {
                    self.respond(resp, self.set_root_last_scan(root_uuid, last_scan))
                        .await
                }

                // file messages
                DbMsg::UpsertFile {
                    resp,
                    root_uuid,
                    upsert,
                    now,
                } => {
                    self.respond(resp, self.upsert_file(root_uuid, upsert, now))
                        .await
                }
                DbMsg::SetQuickHash {
                    resp,
                    file_uuid,
                    quick_hash,
                } => {
                    self.respond(resp, self.set_quick_hash(file_uuid, quick_hash))
                        .await
                }
                DbMsg::GetFile {
                    resp,
                    root_uuid,
                    path,
                } => self.respond(resp, self.get_file(root_uuid, path)).await,
                DbMsg::GetFileByUuid { resp, file_uuid } => {
                    self.respond(resp, self.get_file_by_uuid(file_uuid)).await
                }
                DbMsg::ListChildren { resp, parent_uuid } => {
                    self.respond(resp, self.list_children(parent_uuid)).await
                }
                DbMsg::ListSubtree {
                    resp,
                    root_uuid,
                    dir_path,
                } => {
                    self.respond(resp, self.list_subtree(root_uuid, dir_path))
                        .await
                }
                DbMsg::FindByHash {
                    resp,
                    root_uuid,
                    quick_hash,
                    size,
                } => {
                    self.respond(resp, self.find_by_hash(root_uuid, quick_hash, size))
                        .await
                }
                DbMsg::SumSubtreeSize {
                    resp,
                    root_uuid,
                    dir_path,
                } => {
                    self.respond(resp, self.sum_subtree_size(root_uuid, dir_path))
                        .await
                }
                DbMsg::MarkDeleted {
                    resp,
                    file_uuid,
                    now,
                } => self.respond(resp, self.mark_deleted(file_uuid, now)).await,
                DbMsg::MarkUndeleted {
                    resp,
                    file_uuid,
                    now,
                } => {
                    self.respond(resp, self.mark_undeleted(file_uuid, now))
                        .await
                }
                DbMsg::SweepDeletions {
                    resp,
                    root_uuid,
                    scan_start,
                    now,
                } => {
                    self.respond(resp, self.sweep_deletions(root_uuid, scan_start, now))
                        .await
                }

                // duplicate group messages
                DbMsg::MergeDuplicateGroup {
                    resp,
                    file_uuids,
                    now,
                } => {
                    self.respond(resp, self.merge_duplicate_group(file_uuids, now))
                        .await
                }
                DbMsg::PruneDuplicateGroups { resp, now } => {
                    self.respond(resp, self.prune_duplicate_groups(now)).await
                }
                DbMsg::GetDuplicateGroup { resp, group_uuid } => {
                    self.respond(resp, self.get_duplicate_group(group_uuid))
                        .await
                }

                // move messages
                DbMsg::ProcessMove {
                    resp,
                    file_uuid,
                    root_uuid,
                    old_path,
                    new_path,
                    is_directory,
                    now,
                } => {
                    self.respond(
                        resp,
                        self.process_move(file_uuid, root_uuid, old_path, new_path, is_directory, now),
                    )
                    .await
                }

                // file metadata messages
                DbMsg::UpsertFileMetadata {
                    resp,
                    file_uuid,
                    entries,
                } => {
                    self.respond(resp, self.upsert_file_metadata(file_uuid, entries))
                        .await
                }

                // scan history messages
                DbMsg::CreateScan {
                    resp,
                    root_uuid,
                    mode,
                    started,
                } => {
                    self.respond(resp, self.create_scan(root_uuid, mode, started))
                        .await
                }
                DbMsg::FinalizeScan {
                    resp,
                    scan_uuid,
                    status,
                    counters,
                    finished,
                } => {
                    self.respond(
                        resp,
                        self.finalize_scan(scan_uuid, status, counters, finished),
                    )
                    .await
                }
                DbMsg::FailOrphanedScans { resp, now } => {
                    self.respond(resp, self.fail_orphaned_scans(now)).await
                }
                DbMsg::LatestScan { resp, root_uuid } => {
                    self.respond(resp, self.latest_scan(root_uuid)).await
                }

                // change log messages
                DbMsg::AppendChangeLog { resp, entry } => {
                    self.respond(resp, self.append_change_log(entry)).await
                }
                DbMsg::PendingChangeLog { resp, limit } => {
                    self.respond(resp, self.pending_change_log(limit)).await
                }
                DbMsg::MarkChangeLogProcessed { resp, uuids } => {
                    self.respond(resp, self.mark_change_log_processed(uuids))
                        .await
                }

                // media type and rule messages
                DbMsg::GetMediaTypes { resp } => self.respond(resp, self.get_media_types()).await,
                DbMsg::GetDetectionRules { resp } => {
                    self.respond(resp, self.get_detection_rules()).await
                }

                // directory analysis and media item messages
                DbMsg::UpsertDirectoryAnalysis {
                    resp,
                    analysis,
                    epsilon,
                    now,
                } => {
                    self.respond(
                        resp,
                        self.upsert_directory_analysis(analysis, epsilon, now),
                    )
                    .await
                }
                DbMsg::GetDirectoryAnalysis {
                    resp,
                    directory_path,
                } => {
                    self.respond(resp, self.get_directory_analysis(directory_path))
                        .await
                }
                DbMsg::FindMediaItem {
                    resp,
                    media_type_uuid,
                    title,
                    year,
                } => {
                    self.respond(resp, self.find_media_item(media_type_uuid, title, year))
                        .await
                }
                DbMsg::AddMediaItem { resp, item } => {
                    self.respond(resp, self.add_media_item(item)).await
                }
                DbMsg::GetMediaItem { resp, media_uuid } => {
                    self.respond(resp, self.get_media_item(media_uuid)).await
                }
                DbMsg::SetMediaItemStatus {
                    resp,
                    media_uuid,
                    status,
                } => {
                    self.respond(resp, self.set_media_item_status(media_uuid, status))
                        .await
                }
                DbMsg::FillMediaItemFields {
                    resp,
                    media_uuid,
                    genre,
                    director,
                    rating,
                    runtime,
                    original_title,
                } => {
                    self.respond(
                        resp,
                        self.fill_media_item_fields(
                            media_uuid,
                            genre,
                            director,
                            rating,
                            runtime,
                            original_title,
                        ),
                    )
                    .await
                }
                DbMsg::UpsertMediaFile { resp, media_file } => {
                    self.respond(resp, self.upsert_media_file(media_file)).await
                }
                DbMsg::UpsertExternalMetadata { resp, metadata } => {
                    self.respond(resp, self.upsert_external_metadata(metadata))
                        .await
                }
            },
            _ => Err(anyhow::Error::msg("not implemented")),
        }
    }
}

// database rpc handler functions
#[async_trait]
impl CsDbService for MariaDBState {
    // storage roots
    async fn add_storage_root(&self, root: StorageRoot) -> Result<RootUuid> {
        mariadb::add_storage_root(self.pool.clone(), &root).await
    }

    async fn get_storage_root(&self, root_uuid: RootUuid) -> Result<Option<StorageRoot>> {
        mariadb::get_storage_root(self.pool.clone(), root_uuid).await
    }

    async fn list_storage_roots(&self) -> Result<Vec<(RootUuid, StorageRoot)>> {
        mariadb::list_storage_roots(self.pool.clone()).await
    }

    async fn update_storage_root(
        &self,
        root_uuid: RootUuid,
        update: StorageRootUpdate,
    ) -> Result<()> {
        mariadb::update_storage_root(self.pool.clone(), root_uuid, &update).await
    }

    async fn set_root_last_scan(&self, root_uuid: RootUuid, last_scan: i64) -> Result<()> {
        mariadb::set_root_last_scan(self.pool.clone(), root_uuid, last_scan).await
    }

    // files
    async fn upsert_file(
        &self,
        root_uuid: RootUuid,
        upsert: FileUpsert,
        now: i64,
    ) -> Result<(FileUuid, UpsertOp)> {
        mariadb::upsert_file(self.pool.clone(), root_uuid, &upsert, now).await
    }

    async fn set_quick_hash(&self, file_uuid: FileUuid, quick_hash: Option<String>) -> Result<()> {
        mariadb::set_quick_hash(self.pool.clone(), file_uuid, quick_hash.as_deref()).await
    }

    async fn get_file(
        &self,
        root_uuid: RootUuid,
        path: String,
    ) -> Result<Option<(FileUuid, FileRecord)>> {
        mariadb::get_file(self.pool.clone(), root_uuid, &path).await
    }

    async fn get_file_by_uuid(&self, file_uuid: FileUuid) -> Result<Option<FileRecord>> {
        mariadb::get_file_by_uuid(self.pool.clone(), file_uuid).await
    }

    async fn list_children(&self, parent_uuid: FileUuid) -> Result<Vec<(FileUuid, FileRecord)>> {
        mariadb::list_children(self.pool.clone(), parent_uuid).await
    }

    async fn list_subtree(
        &self,
        root_uuid: RootUuid,
        dir_path: String,
    ) -> Result<Vec<(FileUuid, FileRecord)>> {
        mariadb::list_subtree(self.pool.clone(), root_uuid, &dir_path).await
    }

    async fn find_by_hash(
        &self,
        root_uuid: Option<RootUuid>,
        quick_hash: String,
        size: i64,
    ) -> Result<Vec<FileUuid>> {
        mariadb::find_by_hash(self.pool.clone(), root_uuid, &quick_hash, size).await
    }

    async fn sum_subtree_size(&self, root_uuid: RootUuid, dir_path: String) -> Result<i64> {
        mariadb::sum_subtree_size(self.pool.clone(), root_uuid, &dir_path).await
    }

    async fn mark_deleted(&self, file_uuid: FileUuid, now: i64) -> Result<Option<GroupUuid>> {
        mariadb::mark_deleted(self.pool.clone(), file_uuid, now).await
    }

    async fn mark_undeleted(&self, file_uuid: FileUuid, now: i64) -> Result<()> {
        mariadb::mark_undeleted(self.pool.clone(), file_uuid, now).await
    }

    async fn sweep_deletions(
        &self,
        root_uuid: RootUuid,
        scan_start: i64,
        now: i64,
    ) -> Result<Vec<FileUuid>> {
        mariadb::sweep_deletions(self.pool.clone(), root_uuid, scan_start, now).await
    }

    // duplicate groups
    async fn merge_duplicate_group(
        &self,
        file_uuids: Vec<FileUuid>,
        now: i64,
    ) -> Result<GroupUuid> {
        mariadb::merge_into_duplicate_group(self.pool.clone(), &file_uuids, now).await
    }

    async fn prune_duplicate_groups(&self, now: i64) -> Result<u64> {
        mariadb::prune_duplicate_groups(self.pool.clone(), now).await
    }

    async fn get_duplicate_group(&self, group_uuid: GroupUuid) -> Result<Option<DuplicateGroup>> {
        mariadb::get_duplicate_group(self.pool.clone(), group_uuid).await
    }

    // moves
    async fn process_move(
        &self,
        file_uuid: FileUuid,
        root_uuid: RootUuid,
        old_path: String,
        new_path: String,
        is_directory: bool,
        now: i64,
    ) -> Result<()> {
        mariadb::process_move(
            self.pool.clone(),
            file_uuid,
            root_uuid,
            &old_path,
            &new_path,
            is_directory,
            now,
        )
        .await
    }

    // file metadata sidecar
    async fn upsert_file_metadata(
        &self,
        file_uuid: FileUuid,
        entries: Vec<(String, String, MetadataValueType)>,
    ) -> Result<()> {
        mariadb::upsert_file_metadata(self.pool.clone(), file_uuid, &entries).await
    }

    // scan history
    async fn create_scan(
        &self,
        root_uuid: RootUuid,
        mode: ScanMode,
        started: i64,
    ) -> Result<ScanUuid> {
        mariadb::create_scan(self.pool.clone(), root_uuid, mode, started).await
    }

    async fn finalize_scan(
        &self,
        scan_uuid: ScanUuid,
        status: ScanStatus,
        counters: ScanCounters,
        finished: i64,
    ) -> Result<()> {
        mariadb::finalize_scan(self.pool.clone(), scan_uuid, status, &counters, finished).await
    }

    async fn fail_orphaned_scans(&self, now: i64) -> Result<u64> {
        mariadb::fail_orphaned_scans(self.pool.clone(), now).await
    }

    async fn latest_scan(&self, root_uuid: RootUuid) -> Result<Option<ScanHistory>> {
        mariadb::latest_scan(self.pool.clone(), root_uuid).await
    }

    // change log
    async fn append_change_log(&self, entry: ChangeLogEntry) -> Result<()> {
        mariadb::append_change_log(self.pool.clone(), &entry).await
    }

    async fn pending_change_log(
        &self,
        limit: u32,
    ) -> Result<Vec<(ChangeLogUuid, ChangeLogEntry)>> {
        mariadb::pending_change_log(self.pool.clone(), limit).await
    }

    async fn mark_change_log_processed(&self, uuids: Vec<ChangeLogUuid>) -> Result<()> {
        mariadb::mark_change_log_processed(self.pool.clone(), &uuids).await
    }

    // media types and rules
    async fn get_media_types(&self) -> Result<Vec<(MediaTypeUuid, MediaType)>> {
        mariadb::get_media_types(self.pool.clone()).await
    }

    async fn get_detection_rules(&self) -> Result<Vec<(RuleUuid, DetectionRule)>> {
        mariadb::get_detection_rules(self.pool.clone()).await
    }

    // directory analysis and media items
    async fn upsert_directory_analysis(
        &self,
        analysis: DirectoryAnalysis,
        epsilon: f64,
        now: i64,
    ) -> Result<(AnalysisUuid, bool)> {
        mariadb::upsert_directory_analysis(self.pool.clone(), &analysis, epsilon, now).await
    }

    async fn get_directory_analysis(
        &self,
        directory_path: String,
    ) -> Result<Option<DirectoryAnalysis>> {
        mariadb::get_directory_analysis(self.pool.clone(), &directory_path).await
    }

    async fn find_media_item(
        &self,
        media_type_uuid: MediaTypeUuid,
        title: String,
        year: Option<i32>,
    ) -> Result<Option<MediaUuid>> {
        mariadb::find_media_item(self.pool.clone(), media_type_uuid, &title, year).await
    }

    async fn add_media_item(&self, item: MediaItem) -> Result<MediaUuid> {
        mariadb::add_media_item(self.pool.clone(), &item).await
    }

    async fn get_media_item(&self, media_uuid: MediaUuid) -> Result<Option<MediaItem>> {
        mariadb::get_media_item(self.pool.clone(), media_uuid).await
    }

    async fn set_media_item_status(
        &self,
        media_uuid: MediaUuid,
        status: MediaItemStatus,
    ) -> Result<()> {
        mariadb::set_media_item_status(self.pool.clone(), media_uuid, status).await
    }

    async fn fill_media_item_fields(
        &self,
        media_uuid: MediaUuid,
        genre: Option<String>,
        director: Option<String>,
        rating: Option<f64>,
        runtime: Option<i64>,
        original_title: Option<String>,
    ) -> Result<()> {
        mariadb::fill_media_item_fields(
            self.pool.clone(),
            media_uuid,
            genre.as_deref(),
            director.as_deref(),
            rating,
            runtime,
            original_title.as_deref(),
        )
        .await
    }

    async fn upsert_media_file(&self, media_file: MediaFile) -> Result<()> {
        mariadb::upsert_media_file(self.pool.clone(), &media_file).await
    }

    async fn upsert_external_metadata(&self, metadata: ExternalMetadata) -> Result<()> {
        mariadb::upsert_external_metadata(self.pool.clone(), &metadata).await
    }
}
