use std::{
    collections::{
        hash_map::Entry,
        HashMap,
    },
    sync::Arc,
};

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::task::{
    PendingKey,
    PushTask,
    PushingKey,
};

/// How the pending buffer handled an offered task.
#[derive(Debug, PartialEq, Eq)]
pub enum OfferOutcome {
    /// No task was pending for this key.
    Fresh,
    /// A strictly older task was pending; the new one took its place and
    /// inherited its debounce deadline.
    Replaced,
    /// The pending task is not strictly older than the offered one. The
    /// offer is rejected and the pending task stays.
    Conflict,
}

/// Debounce buffer: at most one task per pending key, awaiting its deadline.
///
/// A replacement inherits the replaced task's deadline rather than its own.
/// A stream of rapidly arriving intents therefore cannot postpone dispatch
/// indefinitely; the window opened by the first intent holds.
pub struct PendingBuffer {
    tasks: Mutex<HashMap<PendingKey, Arc<PushTask>>>,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn offer(&self, task: Arc<PushTask>) -> OfferOutcome {
        let mut tasks = self.tasks.lock();
        match tasks.entry(task.pending_key_of()) {
            Entry::Vacant(entry) => {
                entry.insert(task);
                OfferOutcome::Fresh
            },
            Entry::Occupied(mut entry) => {
                let prev = entry.get();
                if task.after_than(prev) {
                    task.set_expire_at(prev.expire_at());
                    entry.insert(task);
                    OfferOutcome::Replaced
                } else {
                    OfferOutcome::Conflict
                }
            },
        }
    }

    /// Remove and return every task that is ready to dispatch: flagged
    /// `no_delay` or past its debounce deadline. Dispatch happens outside
    /// the buffer lock.
    pub fn drain_ready(&self, now: Instant) -> Vec<Arc<PushTask>> {
        let mut ready = Vec::new();
        self.tasks.lock().retain(|_, task| {
            if task.no_delay || task.expire_at() <= now {
                ready.push(task.clone());
                false
            } else {
                true
            }
        });
        ready
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, key: &PendingKey) -> Option<Arc<PushTask>> {
        self.tasks.lock().get(key).cloned()
    }
}

/// Tasks currently awaiting their transport callback, at most one per
/// pushing key.
pub struct InflightRegistry {
    tasks: Mutex<HashMap<PushingKey, Arc<PushTask>>>,
}

impl InflightRegistry {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &PushingKey) -> Option<Arc<PushTask>> {
        self.tasks.lock().get(key).cloned()
    }

    pub fn insert(&self, key: PushingKey, task: Arc<PushTask>) {
        self.tasks.lock().insert(key, task);
    }

    /// Force-remove whatever occupies `key`. Used when evicting a stuck push.
    pub fn remove(&self, key: &PushingKey) -> Option<Arc<PushTask>> {
        self.tasks.lock().remove(key)
    }

    /// Remove the entry for `key` only if it still holds `task`. A callback
    /// racing a newer dispatch for the same key must not tear down the newer
    /// task's slot.
    pub fn remove_task(&self, key: &PushingKey, task: &Arc<PushTask>) -> bool {
        let mut tasks = self.tasks.lock();
        match tasks.get(key) {
            Some(current) if Arc::ptr_eq(current, task) => {
                tasks.remove(key);
                true
            },
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}
