use anyhow::Result;
use async_trait::async_trait;

use api::file::{FileRecord, FileUuid};
use api::root::RootUuid;

use crate::service::CsInner;

pub mod debounce;
pub mod msg;
pub mod rename;
pub mod svc;

// classification of a raw os event after debouncing
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,

    // only some platforms report both ends of a rename in one event; the
    // delete/create pair path covers the rest
    Moved,
}

// one enriched, debounced filesystem change
#[derive(Clone, Debug)]
pub struct ChangeEvent {
    pub root_uuid: RootUuid,
    pub path: String,
    pub kind: ChangeKind,
    pub is_dir: bool,
    pub size: i64,
    pub quick_hash: Option<String>,

    // for deletes (and the old half of moves): the catalog row being acted
    // on, recovered before the row can change under us
    pub prior: Option<(FileUuid, FileRecord)>,
}

#[derive(Clone, Debug, Default)]
pub struct WatchStatus {
    pub watched_roots: Vec<RootUuid>,
    pub processed_events: i64,
    pub dropped_events: i64,
    pub pending_debounce: usize,
    pub pending_moves: usize,
}

#[async_trait]
pub trait CsWatchService: CsInner {
    async fn watch_root(&self, root_uuid: RootUuid, mount_path: String) -> Result<()>;

    async fn unwatch_root(&self, root_uuid: RootUuid) -> Result<()>;

    async fn status(&self) -> Result<WatchStatus>;

    async fn stop(&self) -> Result<()>;
}
