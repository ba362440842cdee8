//! In-process stand-in for the `barriers(name, opened_at)` table (§6): lets
//! two concurrently-spawned worker tasks rendezvous during crash-injection
//! scenarios the way two real worker *processes* would via the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

#[derive(Default)]
pub struct BarrierSet {
    opened: Mutex<HashMap<String, Arc<Notify>>>,
}

impl BarrierSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify_for(&self, name: &str, opened: &mut HashMap<String, Arc<Notify>>) -> Arc<Notify> {
        opened.entry(name.to_string()).or_insert_with(|| Arc::new(Notify::new())).clone()
    }

    /// Opens `name`, waking any task currently blocked in [`Self::wait`] and
    /// any future waiter immediately.
    pub async fn open(&self, name: &str) {
        let mut opened = self.opened.lock().await;
        let notify = self.notify_for(name, &mut opened);
        notify.notify_waiters();
        notify.notify_one();
    }

    /// Blocks until `name` is opened or `timeout` elapses.
    pub async fn wait(&self, name: &str, timeout: Duration) -> Result<(), BarrierTimeout> {
        let notify = {
            let mut opened = self.opened.lock().await;
            self.notify_for(name, &mut opened)
        };

        tokio::time::timeout(timeout, notify.notified())
            .await
            .map_err(|_| BarrierTimeout { name: name.to_string() })
    }
}

#[derive(Debug)]
pub struct BarrierTimeout {
    pub name: String,
}

impl std::fmt::Display for BarrierTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "barrier {:?} was not opened before the timeout", self.name)
    }
}

impl std::error::Error for BarrierTimeout {}
