use serde::{Deserialize, Serialize};

use crate::root::RootUuid;

// structs and types

pub type FileUuid = i64;
pub type GroupUuid = i64;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Video,
    Audio,
    Image,
    Document,
    Subtitle,
    Metadata,
    Other,
    Directory,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Video => "video",
            FileType::Audio => "audio",
            FileType::Image => "image",
            FileType::Document => "document",
            FileType::Subtitle => "subtitle",
            FileType::Metadata => "metadata",
            FileType::Other => "other",
            FileType::Directory => "directory",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "video" => Some(FileType::Video),
            "audio" => Some(FileType::Audio),
            "image" => Some(FileType::Image),
            "document" => Some(FileType::Document),
            "subtitle" => Some(FileType::Subtitle),
            "metadata" => Some(FileType::Metadata),
            "other" => Some(FileType::Other),
            "directory" => Some(FileType::Directory),
            _ => None,
        }
    }

    pub fn is_media(&self) -> bool {
        matches!(self, FileType::Video | FileType::Audio | FileType::Image)
    }
}

// one catalog entry within a storage root, unique by (root_uuid, path)
//
// paths are canonical: forward slashes, leading slash, no dot segments, no
// trailing slash except for the root itself
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileRecord {
    pub root_uuid: RootUuid,
    pub path: String,
    pub name: String,
    pub extension: Option<String>,
    pub mime_type: Option<String>,
    pub file_type: FileType,
    pub size: i64,
    pub is_directory: bool,

    pub created: Option<i64>,
    pub modified: i64,

    // tombstone; deleted entries keep their row so that moves and undeletes
    // preserve the uuid
    pub deleted: bool,
    pub deleted_at: Option<i64>,

    pub parent: Option<FileUuid>,

    // digest of the first 64 KiB, present for files inside the hashing window
    pub quick_hash: Option<String>,

    // optional whole-file digests
    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub sha256: Option<String>,
    pub blake3: Option<String>,

    pub duplicate_group: Option<GroupUuid>,

    pub last_scan: i64,
}

impl FileRecord {
    pub fn is_duplicate(&self) -> bool {
        self.duplicate_group.is_some()
    }
}

// a set of files sharing (quick_hash, size); exists only while it has at
// least two live members
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub file_count: i64,
    pub total_size: i64,
    pub created: i64,
    pub updated: i64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataValueType {
    Text,
    Integer,
    Float,
    Boolean,
    Json,
}

impl MetadataValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataValueType::Text => "text",
            MetadataValueType::Integer => "integer",
            MetadataValueType::Float => "float",
            MetadataValueType::Boolean => "boolean",
            MetadataValueType::Json => "json",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MetadataValueType::Text),
            "integer" => Some(MetadataValueType::Integer),
            "float" => Some(MetadataValueType::Float),
            "boolean" => Some(MetadataValueType::Boolean),
            "json" => Some(MetadataValueType::Json),
            _ => None,
        }
    }
}

// untyped key/value sidecar for a file, unique by (file_uuid, key)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileMetadataEntry {
    pub file_uuid: FileUuid,
    pub key: String,
    pub value: String,
    pub value_type: MetadataValueType,
}
