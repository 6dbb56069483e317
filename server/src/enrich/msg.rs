use api::media::MediaUuid;

use crate::enrich::EnrichStatus;
use crate::service::{CSM, CsmResp};

#[derive(Debug)]
pub enum EnrichMsg {
    // fire-and-forget from the detection engine; results land in
    // external_metadata and on the media item itself
    Enrich {
        media_uuid: MediaUuid,
    },
    Status {
        resp: CsmResp<EnrichStatus>,
    },
}

impl From<EnrichMsg> for CSM {
    fn from(value: EnrichMsg) -> Self {
        CSM::Enrich(value)
    }
}
