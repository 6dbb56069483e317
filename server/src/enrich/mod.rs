use anyhow::Result;
use async_trait::async_trait;

use api::media::MediaUuid;

use crate::service::CsInner;

pub mod msg;
pub mod providers;
pub mod svc;

#[derive(Clone, Debug, Default)]
pub struct EnrichStatus {
    pub enriched: i64,
    pub failures: i64,
    pub active_providers: Vec<&'static str>,
}

#[async_trait]
pub trait CsEnrichService: CsInner {
    async fn enrich(&self, media_uuid: MediaUuid) -> Result<()>;

    async fn status(&self) -> Result<EnrichStatus>;
}
