use serde::{Deserialize, Serialize};
use serde_json::Value;

// structs and types

pub type ChangeLogUuid = i64;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    File,
    Directory,
    MediaItem,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::File => "file",
            EntityType::Directory => "directory",
            EntityType::MediaItem => "media_item",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(EntityType::File),
            "directory" => Some(EntityType::Directory),
            "media_item" => Some(EntityType::MediaItem),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Modified,
    Deleted,
    Moved,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Modified => "modified",
            ChangeType::Deleted => "deleted",
            ChangeType::Moved => "moved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(ChangeType::Created),
            "modified" => Some(ChangeType::Modified),
            "deleted" => Some(ChangeType::Deleted),
            "moved" => Some(ChangeType::Moved),
            _ => None,
        }
    }
}

// append-only record of one catalog mutation, written in the same
// transaction as the mutation itself; processed is flipped by the external
// fan-out consumer
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub entity_type: EntityType,

    // stringified file uuid or path, disambiguated by entity_type
    pub entity_id: String,

    pub change_type: ChangeType,
    pub new_data: Option<Value>,
    pub detected_at: i64,
    pub processed: bool,
}
