use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use api::root::RootUuid;
use api::scan::ScanUuid;
use api::task::{Task, TaskStatus, TaskType, TaskUid};

use crate::service::CsInner;
use crate::task::scan_utils::ScanCountersAtomic;

pub mod msg;
pub mod scan;
pub mod scan_utils;
pub mod svc;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("a scan is already running for this root")]
    AlreadyRunning,

    #[error("no task is running for this root")]
    NotRunning,
}

// live state shared between a scan future and the task runner, so that an
// aborted scan can still have its history row finalized with real counters
#[derive(Debug)]
pub struct RunningScanState {
    pub counters: Arc<ScanCountersAtomic>,
    scan_uuid: Mutex<Option<ScanUuid>>,
}

impl RunningScanState {
    pub fn new() -> Self {
        RunningScanState {
            counters: Arc::new(ScanCountersAtomic::default()),
            scan_uuid: Mutex::new(None),
        }
    }

    pub async fn set_scan_uuid(&self, scan_uuid: ScanUuid) {
        *self.scan_uuid.lock().await = Some(scan_uuid);
    }

    pub async fn scan_uuid(&self) -> Option<ScanUuid> {
        *self.scan_uuid.lock().await
    }
}

impl Default for RunningScanState {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
pub trait CsTaskService: CsInner {
    async fn start_task(
        &self,
        root_uuid: RootUuid,
        task_type: TaskType,
        uid: TaskUid,
    ) -> Result<()>;

    async fn stop_task(&self, root_uuid: RootUuid) -> Result<()>;

    async fn show_tasks(&self, root_uuid: RootUuid) -> Result<Vec<Task>>;

    async fn complete_task(
        &self,
        root_uuid: RootUuid,
        status: TaskStatus,
        end: i64,
    ) -> Result<()>;
}
