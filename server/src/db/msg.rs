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

use crate::service::{CSM, CsmResp};

#[derive(Debug)]
pub enum DbMsg {
    // storage root messages
    AddStorageRoot {
        resp: CsmResp<RootUuid>,
        root: StorageRoot,
    },
    GetStorageRoot {
        resp: CsmResp<Option<StorageRoot>>,
        root_uuid: RootUuid,
    },
    ListStorageRoots {
        resp: CsmResp<Vec<(RootUuid, StorageRoot)>>,
    },
    UpdateStorageRoot {
        resp: CsmResp<()>,
        root_uuid: RootUuid,
        update: StorageRootUpdate,
    },
    SetRootLastScan {
        resp: CsmResp<()>,
        root_uuid: RootUuid,
        last_scan: i64,
    },

    // file messages
    UpsertFile {
        resp: CsmResp<(FileUuid, UpsertOp)>,
        root_uuid: RootUuid,
        upsert: FileUpsert,
        now: i64,
    },
    SetQuickHash {
        resp: CsmResp<()>,
        file_uuid: FileUuid,
        quick_hash: Option<String>,
    },
    GetFile {
        resp: CsmResp<Option<(FileUuid, FileRecord)>>,
        root_uuid: RootUuid,
        path: String,
    },
    GetFileByUuid {
        resp: CsmResp<Option<FileRecord>>,
        file_uuid: FileUuid,
    },
    ListChildren {
        resp: CsmResp<Vec<(FileUuid, FileRecord)>>,
        parent_uuid: FileUuid,
    },
    ListSubtree {
        resp: CsmResp<Vec<(FileUuid, FileRecord)>>,
        root_uuid: RootUuid,
        dir_path: String,
    },
    FindByHash {
        resp: CsmResp<Vec<FileUuid>>,
        root_uuid: Option<RootUuid>,
        quick_hash: String,
        size: i64,
    },
    SumSubtreeSize {
        resp: CsmResp<i64>,
        root_uuid: RootUuid,
        dir_path: String,
    },
    MarkDeleted {
        resp: CsmResp<Option<GroupUuid>>,
        file_uuid: FileUuid,
        now: i64,
    },
    MarkUndeleted {
        resp: CsmResp<()>,
        file_uuid: FileUuid,
        now: i64,
    },
    SweepDeletions {
        resp: CsmResp<Vec<FileUuid>>,
        root_uuid: RootUuid,
        scan_start: i64,
        now: i64,
    },

    // duplicate group messages
    MergeDuplicateGroup {
        resp: CsmResp<GroupUuid>,
        file_uuids: Vec<FileUuid>,
        now: i64,
    },
    PruneDuplicateGroups {
        resp: CsmResp<u64>,
        now: i64,
    },
    GetDuplicateGroup {
        resp: CsmResp<Option<DuplicateGroup>>,
        group_uuid: GroupUuid,
    },

    // move messages
    ProcessMove {
        resp: CsmResp<()>,
        file_uuid: FileUuid,
        root_uuid: RootUuid,
        old_path: String,
        new_path: String,
        is_directory: bool,
        now: i64,
    },

    // file metadata messages
    UpsertFileMetadata {
        resp: CsmResp<()>,
        file_uuid: FileUuid,
        entries: Vec<(String, String, MetadataValueType)>,
    },

    // scan history messages
    CreateScan {
        resp: CsmResp<ScanUuid>,
        root_uuid: RootUuid,
        mode: ScanMode,
        started: i64,
    },
    FinalizeScan {
        resp: CsmResp<()>,
        scan_uuid: ScanUuid,
        status: ScanStatus,
        counters: ScanCounters,
        finished: i64,
    },
    FailOrphanedScans {
        resp: CsmResp<u64>,
        now: i64,
    },
    LatestScan {
        resp: CsmResp<Option<ScanHistory>>,
        root_uuid: RootUuid,
    },

    // change log messages
    AppendChangeLog {
        resp: CsmResp<()>,
        entry: ChangeLogEntry,
    },
    PendingChangeLog {
        resp: CsmResp<Vec<(ChangeLogUuid, ChangeLogEntry)>>,
        limit: u32,
    },
    MarkChangeLogProcessed {
        resp: CsmResp<()>,
        uuids: Vec<ChangeLogUuid>,
    },

    // media type and rule messages
    GetMediaTypes {
        resp: CsmResp<Vec<(MediaTypeUuid, MediaType)>>,
    },
    GetDetectionRules {
        resp: CsmResp<Vec<(RuleUuid, DetectionRule)>>,
    },

    // directory analysis and media item messages
    UpsertDirectoryAnalysis {
        resp: CsmResp<(AnalysisUuid, bool)>,
        analysis: DirectoryAnalysis,
        epsilon: f64,
        now: i64,
    },
    GetDirectoryAnalysis {
        resp: CsmResp<Option<DirectoryAnalysis>>,
        directory_path: String,
    },
    FindMediaItem {
        resp: CsmResp<Option<MediaUuid>>,
        media_type_uuid: MediaTypeUuid,
        title: String,
        year: Option<i32>,
    },
    AddMediaItem {
        resp: CsmResp<MediaUuid>,
        item: MediaItem,
    },
    GetMediaItem {
        resp: CsmResp<Option<MediaItem>>,
        media_uuid: MediaUuid,
    },
    SetMediaItemStatus {
        resp: CsmResp<()>,
        media_uuid: MediaUuid,
        status: MediaItemStatus,
    },
    FillMediaItemFields {
        resp: CsmResp<()>,
        media_uuid: MediaUuid,
        genre: Option<String>,
        director: Option<String>,
        rating: Option<f64>,
        runtime: Option<i64>,
        original_title: Option<String>,
    },
    UpsertMediaFile {
        resp: CsmResp<()>,
        media_file: MediaFile,
    },
    UpsertExternalMetadata {
        resp: CsmResp<()>,
        metadata: ExternalMetadata,
    },
}

impl From<DbMsg> for CSM {
    fn from(value: DbMsg) -> Self {
        CSM::Db(value)
    }
}
