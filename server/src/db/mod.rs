use anyhow::Result;
use async_trait::async_trait;

use api::changelog::{ChangeLogEntry, ChangeLogUuid};
use api::file::{DuplicateGroup, FileRecord, FileUuid, GroupUuid, MetadataValueType};
use api::media::{
    AnalysisUuid, DirectoryAnalysis, ExternalMetadata, MediaFile, MediaItem, MediaItemStatus,
    MediaType, MediaTypeUuid, MediaUuid,
};
use api::root::{RootUuid, StorageRoot, StorageRootUpdate};
use api::rule::{DetectionRule, RuleUuid};
use api::scan::{ScanCounters, ScanHistory, ScanMode, ScanStatus, ScanUuid};
use common::db::{FileUpsert, UpsertOp};

use crate::service::CsInner;

pub mod msg;
pub mod svc;

// these are the database rpc calls that any backend must be able to
// process; the single receive loop behind them is what serializes catalog
// writes during scans
#[async_trait]
pub trait CsDbService: CsInner {
    // storage roots
    async fn add_storage_root(&self, root: StorageRoot) -> Result<RootUuid>;

    async fn get_storage_root(&self, root_uuid: RootUuid) -> Result<Option<StorageRoot>>;

    async fn list_storage_roots(&self) -> Result<Vec<(RootUuid, StorageRoot)>>;

    async fn update_storage_root(
        &self,
        root_uuid: RootUuid,
        update: StorageRootUpdate,
    ) -> Result<()>;

    async fn set_root_last_scan(&self, root_uuid: RootUuid, last_scan: i64) -> Result<()>;

    // files
    async fn upsert_file(
        &self,
        root_uuid: RootUuid,
        upsert: FileUpsert,
        now: i64,
    ) -> Result<(FileUuid, UpsertOp)>;

    async fn set_quick_hash(&self, file_uuid: FileUuid, quick_hash: Option<String>) -> Result<()>;

    async fn get_file(
        &self,
        root_uuid: RootUuid,
        path: String,
    ) -> Result<Option<(FileUuid, FileRecord)>>;

    async fn get_file_by_uuid(&self, file_uuid: FileUuid) -> Result<Option<FileRecord>>;

    async fn list_children(&self, parent_uuid: FileUuid) -> Result<Vec<(FileUuid, FileRecord)>>;

    async fn list_subtree(
        &self,
        root_uuid: RootUuid,
        dir_path: String,
    ) -> Result<Vec<(FileUuid, FileRecord)>>;

    async fn find_by_hash(
        &self,
        root_uuid: Option<RootUuid>,
        quick_hash: String,
        size: i64,
    ) -> Result<Vec<FileUuid>>;

    async fn sum_subtree_size(&self, root_uuid: RootUuid, dir_path: String) -> Result<i64>;

    async fn mark_deleted(&self, file_uuid: FileUuid, now: i64) -> Result<Option<GroupUuid>>;

    async fn mark_undeleted(&self, file_uuid: FileUuid, now: i64) -> Result<()>;

    async fn sweep_deletions(
        &self,
        root_uuid: RootUuid,
        scan_start: i64,
        now: i64,
    ) -> Result<Vec<FileUuid>>;

    // duplicate groups
    async fn merge_duplicate_group(
        &self,
        file_uuids: Vec<FileUuid>,
        now: i64,
    ) -> Result<GroupUuid>;

    async fn prune_duplicate_groups(&self, now: i64) -> Result<u64>;

    async fn get_duplicate_group(&self, group_uuid: GroupUuid) -> Result<Option<DuplicateGroup>>;

    // moves
    async fn process_move(
        &self,
        file_uuid: FileUuid,
        root_uuid: RootUuid,
        old_path: String,
        new_path: String,
        is_directory: bool,
        now: i64,
    ) -> Result<()>;

    // file metadata sidecar
    async fn upsert_file_metadata(
        &self,
        file_uuid: FileUuid,
        entries: Vec<(String, String, MetadataValueType)>,
    ) -> Result<()>;

    // scan history
    async fn create_scan(
        &self,
        root_uuid: RootUuid,
        mode: ScanMode,
        started: i64,
    ) -> Result<ScanUuid>;

    async fn finalize_scan(
        &self,
        scan_uuid: ScanUuid,
        status: ScanStatus,
        counters: ScanCounters,
        finished: i64,
    ) -> Result<()>;

    async fn fail_orphaned_scans(&self, now: i64) -> Result<u64>;

    async fn latest_scan(&self, root_uuid: RootUuid) -> Result<Option<ScanHistory>>;

    // change log
    async fn append_change_log(&self, entry: ChangeLogEntry) -> Result<()>;

    async fn pending_change_log(
        &self,
        limit: u32,
    ) -> Result<Vec<(ChangeLogUuid, ChangeLogEntry)>>;

    async fn mark_change_log_processed(&self, uuids: Vec<ChangeLogUuid>) -> Result<()>;

    // media types and rules
    async fn get_media_types(&self) -> Result<Vec<(MediaTypeUuid, MediaType)>>;

    async fn get_detection_rules(&self) -> Result<Vec<(RuleUuid, DetectionRule)>>;

    // directory analysis and media items
    async fn upsert_directory_analysis(
        &self,
        analysis: DirectoryAnalysis,
        epsilon: f64,
        now: i64,
    ) -> Result<(AnalysisUuid, bool)>;

    async fn get_directory_analysis(
        &self,
        directory_path: String,
    ) -> Result<Option<DirectoryAnalysis>>;

    async fn find_media_item(
        &self,
        media_type_uuid: MediaTypeUuid,
        title: String,
        year: Option<i32>,
    ) -> Result<Option<MediaUuid>>;

    async fn add_media_item(&self, item: MediaItem) -> Result<MediaUuid>;

    async fn get_media_item(&self, media_uuid: MediaUuid) -> Result<Option<MediaItem>>;

    async fn set_media_item_status(
        &self,
        media_uuid: MediaUuid,
        status: MediaItemStatus,
    ) -> Result<()>;

    async fn fill_media_item_fields(
        &self,
        media_uuid: MediaUuid,
        genre: Option<String>,
        director: Option<String>,
        rating: Option<f64>,
        runtime: Option<i64>,
        original_title: Option<String>,
    ) -> Result<()>;

    async fn upsert_media_file(&self, media_file: MediaFile) -> Result<()>;

    async fn upsert_external_metadata(&self, metadata: ExternalMetadata) -> Result<()>;
}
