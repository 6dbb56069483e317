use serde::{Deserialize, Serialize};

use api::file::FileType;

pub mod mariadb;

// what an upsert did to the files table; the scanner's counters and the
// change log both key off this
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum UpsertOp {
    Inserted,
    Updated,
    Unchanged,
}

// the scanner- and watcher-facing shape of one files row mutation; the
// store fills in uuid, tombstone, and hash bookkeeping
#[derive(Clone, Debug)]
pub struct FileUpsert {
    pub path: String,
    pub name: String,
    pub extension: Option<String>,
    pub mime_type: Option<String>,
    pub file_type: FileType,
    pub size: i64,
    pub is_directory: bool,
    pub created: Option<i64>,
    pub modified: i64,
    pub parent: Option<api::file::FileUuid>,
}
