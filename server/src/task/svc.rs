use std::sync::Arc;

use anyhow::Result;
use async_cell::sync::AsyncCell;
use async_trait::async_trait;
use chrono::Local;
use dashmap::{DashMap, Entry};
use ringbuffer::{AllocRingBuffer, RingBuffer};
use tokio::{
    sync::{
        Mutex, RwLock,
        oneshot::{Sender, channel},
    },
    task::{JoinHandle, spawn},
};
use tracing::{Level, debug, error, info, instrument};

use api::root::RootUuid;
use api::scan::{ScanMode, ScanStatus};
use api::task::{Task, TaskStatus, TaskType, TaskUid};
use common::config::CSConfig;

use crate::db::msg::DbMsg;
use crate::service::{
    CSM, CatalogizerService, CsInner, CsmReceiver, CsmRegistry, ServiceType,
};
use crate::task::{
    CsTaskService, RunningScanState, ScanError, msg::TaskMsg, scan::scan_root,
};

// how many finished tasks we remember per root
const TASK_HISTORY_DEPTH: usize = 32;

// task service
//
// catalog scans take far too long for a single rpc round trip, so they run
// as managed tasks: one slot per storage root (second starts are rejected),
// a cancel channel per run, and a small ring buffer of finished runs for
// the status surface.
pub struct TaskService {
    config: Arc<CSConfig>,
    receiver: Arc<Mutex<CsmReceiver>>,
    handle: AsyncCell<tokio::task::JoinHandle<Result<()>>>,
}

#[async_trait]
impl CatalogizerService for TaskService {
    type Inner = TaskRunner;

    fn create(config: Arc<CSConfig>, registry: &CsmRegistry) -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel::<CSM>(1024);

        registry
            .insert(ServiceType::Task, tx)
            .expect("failed to add task sender to registry");

        TaskService {
            config: config.clone(),
            receiver: Arc::new(Mutex::new(rx)),
            handle: AsyncCell::new(),
        }
    }

    #[instrument(level=Level::DEBUG, skip(self, registry))]
    async fn start(&self, registry: &CsmRegistry) -> Result<()> {
        info!("starting task service");

        let receiver = Arc::clone(&self.receiver);
        let state = Arc::new(TaskRunner::new(self.config.clone(), registry.clone())?);

        let serve = {
            async move {
                let mut receiver = receiver.lock().await;

                while let Some(msg) = receiver.recv().await {
                    let state = Arc::clone(&state);
                    tokio::task::spawn(async move {
                        match state.message_handler(msg).await {
                            Ok(()) => (),
                            Err(err) => {
                                error!({service = "task", channel = "csm", error = %err})
                            }
                        }
                    });
                }

                Err(anyhow::Error::msg("task service csm channel disconnected"))
            }
        };

        self.handle.set(tokio::task::spawn(serve));

        debug!("started task service");
        Ok(())
    }
}

#[derive(Debug)]
pub struct TaskRunner {
    config: Arc<CSConfig>,
    registry: CsmRegistry,
    running_tasks: DashMap<RootUuid, Arc<Mutex<Option<RunningTask>>>>,
    task_history: DashMap<RootUuid, Arc<RwLock<AllocRingBuffer<Task>>>>,
}

#[derive(Debug)]
struct RunningTask {
    task: Task,
    cancel: Sender<()>,

    #[allow(dead_code)]
    handle: JoinHandle<()>,
}

impl TaskRunner {
    fn running_slot(&self, root_uuid: RootUuid) -> Arc<Mutex<Option<RunningTask>>> {
        match self.running_tasks.entry(root_uuid) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let v = Arc::new(Mutex::new(None));
                entry.insert(v.clone());
                v
            }
        }
    }

    fn history_slot(&self, root_uuid: RootUuid) -> Arc<RwLock<AllocRingBuffer<Task>>> {
        match self.task_history.entry(root_uuid) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let v = Arc::new(RwLock::new(AllocRingBuffer::new(TASK_HISTORY_DEPTH)));
                entry.insert(v.clone());
                v
            }
        }
    }
}

#[async_trait]
impl CsInner for TaskRunner {
    fn new(config: Arc<CSConfig>, registry: CsmRegistry) -> Result<Self> {
        Ok(TaskRunner {
            config: config.clone(),
            registry: registry.clone(),
            running_tasks: DashMap::new(),
            task_history: DashMap::new(),
        })
    }

    fn registry(&self) -> CsmRegistry {
        self.registry.clone()
    }

    async fn message_handler(&self, csm: CSM) -> Result<()> {
        match csm {
            CSM::Task(message) => match message {
                TaskMsg::StartTask {
                    resp,
                    root_uuid,
                    task_type,
                    uid,
                } => {
                    self.respond(resp, self.start_task(root_uuid, task_type, uid))
                        .await
                }
                TaskMsg::StopTask { resp, root_uuid } => {
                    self.respond(resp, self.stop_task(root_uuid)).await
                }
                TaskMsg::ShowTasks { resp, root_uuid } => {
                    self.respond(resp, self.show_tasks(root_uuid)).await
                }
                TaskMsg::CompleteTask {
                    root_uuid,
                    status,
                    end,
                } => self.complete_task(root_uuid, status, end).await,
            },
            _ => Err(anyhow::Error::msg("not implemented")),
        }
    }
}

#[async_trait]
impl CsTaskService for TaskRunner {
    #[instrument(level=Level::DEBUG, skip(self))]
    async fn start_task(
        &self,
        root_uuid: RootUuid,
        task_type: TaskType,
        uid: TaskUid,
    ) -> Result<()> {
        // root verification before committing a slot
        let db_svc_sender = self.registry().get(&ServiceType::Db)?;

        let (db_tx, db_rx) = channel();

        db_svc_sender
            .send(DbMsg::GetStorageRoot { resp: db_tx, root_uuid }.into())
            .await?;

        db_rx
            .await??
            .ok_or_else(|| anyhow::Error::msg("storage root does not exist"))?;

        let rt_entry = self.running_slot(root_uuid);

        // hold the slot lock for the entirety of the startup action so only
        // one caller can claim it
        let mut running_task = rt_entry.lock().await;

        if running_task.is_some() {
            return Err(ScanError::AlreadyRunning.into());
        }

        let task = Task {
            task_type: task_type.clone(),
            uid,
            status: TaskStatus::Running,
            start: Local::now().timestamp(),
            end: None,
        };

        let mode = match task_type {
            TaskType::ScanFull => ScanMode::Full,
            TaskType::ScanIncremental => ScanMode::Incremental,
        };

        // aborting the scan needs an explicit abort() on the handle, so the
        // cancel channel is packaged with the tracked state to reach the
        // twice-separated task future
        let (tx, rx) = channel::<()>();

        let task_svc_sender = self.registry().get(&ServiceType::Task)?;

        let scan_state = Arc::new(RunningScanState::new());

        let scan_future = scan_root(
            self.config.clone(),
            self.registry.clone(),
            root_uuid,
            mode,
            scan_state.clone(),
        );

        let watcher = {
            let db_svc_sender = db_svc_sender.clone();

            async move {
                let task_handle = spawn(scan_future);

                let abort_handle = task_handle.abort_handle();

                let status = tokio::select! {
                    _ = rx => {
                        abort_handle.abort();

                        // the aborted run never reached its own finalize;
                        // close the history row out with what we have
                        if let Some(scan_uuid) = scan_state.scan_uuid().await {
                            let (tx, rx) = channel();

                            let msg = DbMsg::FinalizeScan {
                                resp: tx,
                                scan_uuid,
                                status: ScanStatus::Failed,
                                counters: scan_state.counters.snapshot(),
                                finished: Local::now().timestamp(),
                            };

                            if db_svc_sender.send(msg.into()).await.is_ok() {
                                let _ = rx.await;
                            }
                        }

                        TaskStatus::Aborted
                    }

                    res = task_handle => {
                        match res {
                            Ok(Ok(())) => TaskStatus::Success,
                            Ok(Err(_)) => TaskStatus::Failure,
                            Err(_) => TaskStatus::Unknown,
                        }
                    }
                };

                let msg = TaskMsg::CompleteTask {
                    root_uuid,
                    status,
                    end: Local::now().timestamp(),
                };

                match task_svc_sender.send(msg.into()).await {
                    Ok(_) => {}
                    Err(err) => error!("failed to send a message: {err}"),
                }
            }
        };

        let handle = spawn(watcher);

        *running_task = Some(RunningTask {
            task,
            cancel: tx,
            handle,
        });

        Ok(())
    }

    #[instrument(level=Level::DEBUG, skip(self))]
    async fn stop_task(&self, root_uuid: RootUuid) -> Result<()> {
        let rt_entry = self.running_slot(root_uuid);

        let mut running_task = rt_entry.lock().await;

        match running_task.take() {
            Some(running) => {
                // the completion watcher records history once the abort
                // lands, so dropping the slot here is safe
                let _ = running.cancel.send(());

                let mut task = running.task;
                task.status = TaskStatus::Aborted;
                task.end = Some(Local::now().timestamp());

                self.history_slot(root_uuid).write().await.enqueue(task);

                Ok(())
            }
            None => Err(ScanError::NotRunning.into()),
        }
    }

    async fn show_tasks(&self, root_uuid: RootUuid) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();

        // clone the slot handles out so no map shard stays locked across
        // the awaits below
        let running = self.running_tasks.get(&root_uuid).map(|slot| slot.clone());
        let history = self.task_history.get(&root_uuid).map(|slot| slot.clone());

        if let Some(slot) = running {
            if let Some(running) = slot.lock().await.as_ref() {
                tasks.push(running.task.clone());
            }
        }

        if let Some(slot) = history {
            let history = slot.read().await;

            for task in history.iter() {
                tasks.push(task.clone());
            }
        }

        Ok(tasks)
    }

    async fn complete_task(
        &self,
        root_uuid: RootUuid,
        status: TaskStatus,
        end: i64,
    ) -> Result<()> {
        let rt_entry = self.running_slot(root_uuid);

        let mut running_task = rt_entry.lock().await;

        // stop_task may have already recorded the aborted run
        let Some(running) = running_task.take() else {
            return Ok(());
        };

        let mut task = running.task;
        task.status = status;
        task.end = Some(end);

        self.history_slot(root_uuid).write().await.enqueue(task);

        Ok(())
    }
}
