use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::media::MediaTypeUuid;

// structs and types

pub type RuleUuid = i64;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    FilenamePattern,
    DirectoryStructure,
    FileAnalysis,
    Hybrid,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::FilenamePattern => "filename_pattern",
            RuleType::DirectoryStructure => "directory_structure",
            RuleType::FileAnalysis => "file_analysis",
            RuleType::Hybrid => "hybrid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "filename_pattern" => Some(RuleType::FilenamePattern),
            "directory_structure" => Some(RuleType::DirectoryStructure),
            "file_analysis" => Some(RuleType::FileAnalysis),
            "hybrid" => Some(RuleType::Hybrid),
            _ => None,
        }
    }
}

// one scoring rule; pattern is a json document whose shape depends on
// rule_type, decoded by the detection engine
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectionRule {
    pub media_type_uuid: MediaTypeUuid,
    pub rule_type: RuleType,
    pub pattern: String,
    pub confidence_weight: f64,
    pub enabled: bool,
    pub priority: i64,
}

// rule pattern payloads
//
// unknown fields are preserved in the extra map so that a rule round-trips
// through edit surfaces unchanged; they do not affect scoring

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FilenamePattern {
    #[serde(default)]
    pub globs: Vec<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StructurePattern {
    #[serde(default)]
    pub required_dirs: Vec<String>,

    #[serde(default)]
    pub optional_dirs: Vec<String>,

    // extension (with leading dot) to minimum count
    #[serde(default)]
    pub file_types: HashMap<String, u32>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SizeBand {
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,

    #[serde(default)]
    pub min_count: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SizePattern {
    #[serde(default)]
    pub size_patterns: HashMap<String, SizeBand>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HybridPattern {
    pub filename_pattern: Option<FilenamePattern>,
    pub directory_structure: Option<StructurePattern>,
    pub file_analysis: Option<SizePattern>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}
