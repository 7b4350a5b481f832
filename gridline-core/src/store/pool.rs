//! Per-thread warehouse handles.
//!
//! A warehouse handle is opened lazily the first time a thread asks for one,
//! then reused by that thread until it exits. Handles of exited threads are
//! dropped the next time any thread asks for a handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, ThreadId};
use tracing::debug;

use super::{StoreError, Warehouse};

type Connector = dyn Fn() -> Result<Arc<dyn Warehouse>, StoreError> + Send + Sync;

thread_local! {
    /// Dropped when the thread exits, which marks its handles as stale.
    static THREAD_ALIVE: Arc<()> = Arc::new(());
}

struct ThreadHandle {
    alive: Weak<()>,
    store: Arc<dyn Warehouse>,
}

impl ThreadHandle {
    fn is_live(&self) -> bool {
        self.alive.strong_count() > 0
    }
}

pub struct WarehousePool {
    connect: Box<Connector>,
    handles: Mutex<HashMap<ThreadId, ThreadHandle>>,
}

impl WarehousePool {
    /// Pool that calls `connect` once per thread.
    pub fn new<F>(connect: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Warehouse>, StoreError> + Send + Sync + 'static,
    {
        Self {
            connect: Box::new(connect),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Pool where every thread shares one store.
    pub fn shared(store: Arc<dyn Warehouse>) -> Self {
        Self::new(move || Ok(Arc::clone(&store)))
    }

    /// The calling thread's handle, connecting on first use.
    pub fn handle(&self) -> Result<Arc<dyn Warehouse>, StoreError> {
        let id = thread::current().id();
        let alive = THREAD_ALIVE.with(Arc::downgrade);
        let mut handles = self.handles.lock().map_err(|_| StoreError::Poisoned)?;

        let before = handles.len();
        handles.retain(|_, h| h.is_live());
        if handles.len() < before {
            debug!(released = before - handles.len(), "stale warehouse handles released");
        }

        if let Some(handle) = handles.get(&id) {
            return Ok(Arc::clone(&handle.store));
        }
        let store = (self.connect)()?;
        debug!(thread = ?id, "warehouse handle opened");
        handles.insert(
            id,
            ThreadHandle {
                alive,
                store: Arc::clone(&store),
            },
        );
        Ok(store)
    }

    /// Number of live threads holding a handle.
    pub fn open_handles(&self) -> usize {
        self.handles
            .lock()
            .map(|h| h.values().filter(|h| h.is_live()).count())
            .unwrap_or(0)
    }
}
