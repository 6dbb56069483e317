use anyhow::Result;
use async_trait::async_trait;

use api::root::RootUuid;

use crate::service::CsInner;

pub mod msg;
pub mod rules;
pub mod svc;
pub mod title;

#[derive(Clone, Debug, Default)]
pub struct DetectStatus {
    pub queued: usize,
    pub analyzed: i64,
    pub promoted: i64,
}

#[async_trait]
pub trait CsDetectService: CsInner {
    async fn enqueue_analysis(
        &self,
        root_uuid: RootUuid,
        dir_path: String,
        priority: i64,
    ) -> Result<()>;

    async fn status(&self) -> Result<DetectStatus>;
}
