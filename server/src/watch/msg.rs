use api::root::RootUuid;

use crate::service::{CSM, CsmResp};
use crate::watch::WatchStatus;

#[derive(Debug)]
pub enum WatchMsg {
    WatchRoot {
        resp: CsmResp<()>,
        root_uuid: RootUuid,
        mount_path: String,
    },
    UnwatchRoot {
        resp: CsmResp<()>,
        root_uuid: RootUuid,
    },
    Status {
        resp: CsmResp<WatchStatus>,
    },
    Stop {
        resp: CsmResp<()>,
    },
}

impl From<WatchMsg> for CSM {
    fn from(value: WatchMsg) -> Self {
        CSM::Watch(value)
    }
}
