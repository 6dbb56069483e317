use serde::{Deserialize, Serialize};

use crate::file::FileUuid;
use crate::root::RootUuid;

// structs and types

pub type MediaUuid = i64;
pub type MediaTypeUuid = i64;
pub type AnalysisUuid = i64;

// a row of the media_types table; the stock set is seeded by the schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaType {
    pub name: String,
    pub display_name: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaItemStatus {
    New,
    Enriched,
    Stale,
    Missing,
}

impl MediaItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaItemStatus::New => "new",
            MediaItemStatus::Enriched => "enriched",
            MediaItemStatus::Stale => "stale",
            MediaItemStatus::Missing => "missing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(MediaItemStatus::New),
            "enriched" => Some(MediaItemStatus::Enriched),
            "stale" => Some(MediaItemStatus::Stale),
            "missing" => Some(MediaItemStatus::Missing),
            _ => None,
        }
    }
}

// a logical media entity promoted from a directory
//
// every item is bound to at least one directory_analysis or media_file row;
// the store refuses to leave orphans behind
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaItem {
    pub media_type_uuid: MediaTypeUuid,
    pub title: String,
    pub original_title: Option<String>,
    pub year: Option<i32>,
    pub genre: Option<String>,
    pub director: Option<String>,
    pub rating: Option<f64>,
    pub runtime: Option<i64>,
    pub status: MediaItemStatus,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    FilenamePattern,
    DirectoryStructure,
    FileAnalysis,
    Hybrid,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::FilenamePattern => "filename_pattern",
            DetectionMethod::DirectoryStructure => "directory_structure",
            DetectionMethod::FileAnalysis => "file_analysis",
            DetectionMethod::Hybrid => "hybrid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "filename_pattern" => Some(DetectionMethod::FilenamePattern),
            "directory_structure" => Some(DetectionMethod::DirectoryStructure),
            "file_analysis" => Some(DetectionMethod::FileAnalysis),
            "hybrid" => Some(DetectionMethod::Hybrid),
            _ => None,
        }
    }
}

// the engine's committed decision about one directory, unique by
// directory_path; confidence_score stays in [0, 1]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DirectoryAnalysis {
    pub directory_path: String,
    pub root_uuid: RootUuid,
    pub media_uuid: Option<MediaUuid>,
    pub confidence_score: f64,
    pub detection_method: DetectionMethod,
    pub files_count: i64,
    pub total_size: i64,
}

// links a catalog file (or a bare path, for entries that predate the file
// row) to its owning media item
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaFile {
    pub media_uuid: MediaUuid,
    pub file_uuid: Option<FileUuid>,
    pub file_path: String,
    pub quality: Option<String>,
    pub language: Option<String>,
}

// per-provider enrichment payload for a media item
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExternalMetadata {
    pub media_uuid: MediaUuid,
    pub provider: String,
    pub external_id: String,
    pub raw_data: serde_json::Value,
    pub rating: Option<f64>,
    pub cover_url: Option<String>,
    pub trailer_url: Option<String>,
}
