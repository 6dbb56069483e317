use api::root::RootUuid;

use crate::detect::DetectStatus;
use crate::service::{CSM, CsmResp};

#[derive(Debug)]
pub enum DetectMsg {
    // fire-and-forget: the scanner and watcher nudge the engine and move
    // on; results land in the catalog
    AnalyzeDirectory {
        root_uuid: RootUuid,
        dir_path: String,
        priority: i64,
    },
    Status {
        resp: CsmResp<DetectStatus>,
    },
}

impl From<DetectMsg> for CSM {
    fn from(value: DetectMsg) -> Self {
        CSM::Detect(value)
    }
}
