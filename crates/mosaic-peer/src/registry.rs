//! Table of services this peer exports for remote calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::gatekeeper::Gatekeeper;
use crate::peer::PeerId;
use crate::puzzle::RemotePuzzle;
use crate::rpc::ServiceRef;
use crate::semaphore::RemoteSemaphore;

/// An exported object.
#[derive(Debug, Clone)]
pub enum Service {
    Gatekeeper(Arc<Gatekeeper>),
    Puzzle(Arc<RemotePuzzle>),
    Semaphore(Arc<RemoteSemaphore>),
}

impl Service {
    /// Short name of the service kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Service::Gatekeeper(_) => "gatekeeper",
            Service::Puzzle(_) => "puzzle",
            Service::Semaphore(_) => "semaphore",
        }
    }
}

/// Name → service table served by this peer's RPC server.
#[derive(Debug)]
pub struct Registry {
    owner: PeerId,
    services: RwLock<HashMap<String, Service>>,
    next_id: AtomicU64,
}

impl Registry {
    /// Create an empty registry for the peer `owner`.
    pub fn new(owner: PeerId) -> Self {
        Self {
            owner,
            services: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// The peer whose services these are.
    pub fn owner(&self) -> &PeerId {
        &self.owner
    }

    /// Bind `service` under a well-known name, replacing any previous binding.
    pub async fn bind(&self, name: impl Into<String>, service: Service) -> ServiceRef {
        let name = name.into();
        debug!(%name, kind = service.kind(), "binding service");
        self.services.write().await.insert(name.clone(), service);
        ServiceRef::new(self.owner.clone(), name)
    }

    /// Export `service` under a freshly generated name.
    pub async fn export(&self, service: Service) -> ServiceRef {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}", service.kind(), id);
        self.bind(name, service).await
    }

    /// Find the service bound under `name`.
    pub async fn lookup(&self, name: &str) -> Result<Service> {
        self.services
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotBound {
                peer: self.owner.clone(),
                name: name.to_string(),
            })
    }

    /// Remove a binding. Returns whether it existed.
    pub async fn unbind(&self, name: &str) -> bool {
        self.services.write().await.remove(name).is_some()
    }

    /// Remove every binding.
    pub async fn clear(&self) {
        self.services.write().await.clear();
    }
}
