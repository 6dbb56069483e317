use api::root::RootUuid;
use api::task::{Task, TaskStatus, TaskType, TaskUid};

use crate::service::{CSM, CsmResp};

#[derive(Debug)]
pub enum TaskMsg {
    StartTask {
        resp: CsmResp<()>,
        root_uuid: RootUuid,
        task_type: TaskType,
        uid: TaskUid,
    },
    StopTask {
        resp: CsmResp<()>,
        root_uuid: RootUuid,
    },
    ShowTasks {
        resp: CsmResp<Vec<Task>>,
        root_uuid: RootUuid,
    },
    CompleteTask {
        root_uuid: RootUuid,
        status: TaskStatus,
        end: i64,
    },
}

impl From<TaskMsg> for CSM {
    fn from(value: TaskMsg) -> Self {
        CSM::Task(value)
    }
}
