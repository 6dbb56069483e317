use std::{future::Future, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio;

use common::config::CSConfig;

// these are the services that make up the catalogizer backend
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ServiceType {
    Db,
    Task,
    Watch,
    Detect,
    Enrich,
}

// Catalogizer Service Messages
//
// without higher-kinded types, we use the normal enum-of-enums to enable
// general safe message passing between services
pub type CsmSender = tokio::sync::mpsc::Sender<CSM>;
pub type CsmReceiver = tokio::sync::mpsc::Receiver<CSM>;

// message responses are carried back via oneshot channels.  this type
// eliminates quite a bit of boilerplate in the responder logic.
pub type CsmResp<T> = tokio::sync::oneshot::Sender<Result<T>>;

#[derive(Debug)]
pub enum CSM {
    Db(crate::db::msg::DbMsg),
    Task(crate::task::msg::TaskMsg),
    Watch(crate::watch::msg::WatchMsg),
    Detect(crate::detect::msg::DetectMsg),
    Enrich(crate::enrich::msg::EnrichMsg),
}

// service registry
//
// each service is instantiated once and there is one message namespace.
// many services avoid the hash table lookup by cloning the sender, so care
// needs to be taken if this struct becomes dynamic in some fashion.
#[derive(Clone, Debug)]
pub struct CsmRegistry(Arc<DashMap<ServiceType, CsmSender>>);

impl CsmRegistry {
    pub fn new() -> Self {
        CsmRegistry(Arc::new(DashMap::new()))
    }

    pub fn insert(&self, k: ServiceType, v: CsmSender) -> Result<()> {
        match self.0.clone().insert(k.clone(), v) {
            None => Ok(()),
            Some(w) => {
                self.0.clone().insert(k, w);
                Err(anyhow::Error::msg(
                    "internal error: a sender was added twice to the registry",
                ))
            }
        }
    }

    pub fn get(&self, k: &ServiceType) -> Result<CsmSender> {
        Ok(self
            .0
            .get(k)
            .ok_or_else(|| {
                anyhow::Error::msg(format!(
                    "internal error: a service was started without a necessary dependency ({k:?})"
                ))
            })?
            .clone())
    }
}

impl Default for CsmRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// core service trait
//
// create() wires the service's sender into the registry; start() spawns the
// receive loop after every dependency has had its create() run.
#[async_trait]
pub trait CatalogizerService: Send + Sync + 'static {
    type Inner: CsInner;

    fn create(config: Arc<CSConfig>, registry: &CsmRegistry) -> Self;

    async fn start(&self, registry: &CsmRegistry) -> Result<()>;
}

// service message responder
//
// the magic of the service model is in the message_handler rpc function;
// services may respond to external events on other channels (os file
// events, timers) as well.
#[async_trait]
pub trait CsInner: Sized + Send + Sync + 'static {
    fn new(config: Arc<CSConfig>, registry: CsmRegistry) -> Result<Self>;

    fn registry(&self) -> CsmRegistry;

    async fn message_handler(&self, csm: CSM) -> Result<()>;

    // rather than have the inner service trait functions (i.e., the rpc
    // calls) respond directly, we define this helper function for use in
    // the message_handler loop
    //
    // this is necessary so that the rpc functions can be used by each other
    // without any weird Option<resp> or the like
    async fn respond<T, Fut>(&self, resp: CsmResp<T>, fut: Fut) -> Result<()>
    where
        T: Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
    {
        resp.send(fut.await).map_err(|_| {
            anyhow::Error::msg(format!(
                "failed to respond to a {} message",
                std::any::type_name::<T>()
            ))
        })
    }
}
