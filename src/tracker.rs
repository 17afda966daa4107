//! Pending state: what is waiting, what is running, what is blocked.
//!
//! Three independently locked collections:
//!
//! - the waiting list together with per-key waiting counts,
//! - the set of keys currently dispatched to the worker pool,
//! - the set of keys blocked for the current scheduling pass.
//!
//! No lock is ever held while another is taken, so submitters, the
//! scheduling loop and completion callbacks only contend on the collection
//! they actually touch.
//!
//! The waiting list is an ordered map keyed by a monotonically increasing
//! sequence number. A [`Handle`] stays valid until its entry is removed,
//! and walking forward from a handle is unaffected by removals elsewhere
//! in the list.

use crate::error::{Error, Result};
use crate::model::Keyed;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};

/// Stable handle to a waiting entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u64);

/// A waiting entry as seen by a scan: its handle and its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<K> {
    pub handle: Handle,
    pub key: K,
}

struct Waiting<T: Keyed> {
    entries: BTreeMap<u64, T>,
    counts: HashMap<T::Key, usize>,
    next_seq: u64,
    closed: bool,
}

impl<T: Keyed> Waiting<T> {
    fn entry_at(&self, seq: u64, item: &T) -> Entry<T::Key> {
        Entry {
            handle: Handle(seq),
            key: item.key().clone(),
        }
    }
}

/// Bookkeeping shared by submitters, the scheduling loop and completion
/// callbacks.
pub struct PendingState<T: Keyed> {
    waiting: Mutex<Waiting<T>>,
    processing: Mutex<HashSet<T::Key>>,
    blocked: Mutex<HashSet<T::Key>>,
}

impl<T: Keyed> Default for PendingState<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Keyed> PendingState<T> {
    pub fn new() -> Self {
        Self {
            waiting: Mutex::new(Waiting {
                entries: BTreeMap::new(),
                counts: HashMap::new(),
                next_seq: 0,
                closed: false,
            }),
            processing: Mutex::new(HashSet::new()),
            blocked: Mutex::new(HashSet::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Waiting list
    // -----------------------------------------------------------------------

    /// Append an item and bump its key's waiting count.
    ///
    /// Returns `false` without enqueuing once the list has been closed.
    pub fn enqueue(&self, item: T) -> Result<bool> {
        let mut waiting = guard(&self.waiting, "enqueue")?;
        if waiting.closed {
            return Ok(false);
        }

        let seq = waiting.next_seq;
        waiting.next_seq = seq
            .checked_add(1)
            .ok_or_else(|| Error::tracker("enqueue", "sequence space exhausted"))?;
        *waiting.counts.entry(item.key().clone()).or_insert(0) += 1;
        waiting.entries.insert(seq, item);
        Ok(true)
    }

    /// Remove an entry and decrement (or drop) its key's waiting count.
    pub fn remove_from_queue(&self, handle: Handle) -> Result<T> {
        let mut waiting = guard(&self.waiting, "remove_from_queue")?;
        let item = waiting.entries.remove(&handle.0).ok_or_else(|| {
            Error::tracker(
                "remove_from_queue",
                format!("entry {} is not waiting", handle.0),
            )
        })?;

        match waiting.counts.get_mut(item.key()) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                waiting.counts.remove(item.key());
            }
            None => {
                return Err(Error::tracker(
                    "remove_from_queue",
                    format!("no waiting count for key '{}'", item.key()),
                ));
            }
        }
        Ok(item)
    }

    /// The current head of the waiting list, without removing it.
    pub fn dequeue(&self) -> Result<Option<Entry<T::Key>>> {
        let waiting = guard(&self.waiting, "dequeue")?;
        Ok(waiting
            .entries
            .first_key_value()
            .map(|(seq, item)| waiting.entry_at(*seq, item)))
    }

    /// The first waiting entry submitted after `handle`.
    ///
    /// `handle` itself may already have been removed.
    pub fn next_after(&self, handle: Handle) -> Result<Option<Entry<T::Key>>> {
        let waiting = guard(&self.waiting, "next_after")?;
        Ok(waiting
            .entries
            .range((Bound::Excluded(handle.0), Bound::Unbounded))
            .next()
            .map(|(seq, item)| waiting.entry_at(*seq, item)))
    }

    /// Number of distinct keys with at least one waiting item.
    pub fn queued_unique_count(&self) -> Result<usize> {
        Ok(guard(&self.waiting, "queued_unique_count")?.counts.len())
    }

    /// Total number of waiting items.
    pub fn queued_count(&self) -> Result<usize> {
        Ok(guard(&self.waiting, "queued_count")?.entries.len())
    }

    /// Refuse further enqueues. Returns `true` if this call closed the list.
    pub fn close(&self) -> Result<bool> {
        let mut waiting = guard(&self.waiting, "close")?;
        Ok(!std::mem::replace(&mut waiting.closed, true))
    }

    pub fn is_closed(&self) -> Result<bool> {
        Ok(guard(&self.waiting, "is_closed")?.closed)
    }

    // -----------------------------------------------------------------------
    // In processing
    // -----------------------------------------------------------------------

    /// Mark a key as dispatched. Re-adding is a no-op that returns `false`.
    pub fn add_to_processing(&self, key: &T::Key) -> Result<bool> {
        Ok(guard(&self.processing, "add_to_processing")?.insert(key.clone()))
    }

    /// Release a key. Returns `false` if it was not in processing.
    pub fn remove_from_processing(&self, key: &T::Key) -> Result<bool> {
        Ok(guard(&self.processing, "remove_from_processing")?.remove(key))
    }

    pub fn in_processing(&self, key: &T::Key) -> Result<bool> {
        Ok(guard(&self.processing, "in_processing")?.contains(key))
    }

    pub fn processing_count(&self) -> Result<usize> {
        Ok(guard(&self.processing, "processing_count")?.len())
    }

    // -----------------------------------------------------------------------
    // Blocked for the current pass
    // -----------------------------------------------------------------------

    pub fn add_to_blocked(&self, key: &T::Key) -> Result<()> {
        guard(&self.blocked, "add_to_blocked")?.insert(key.clone());
        Ok(())
    }

    pub fn in_blocked(&self, key: &T::Key) -> Result<bool> {
        Ok(guard(&self.blocked, "in_blocked")?.contains(key))
    }

    pub fn clear_blocked(&self) -> Result<()> {
        guard(&self.blocked, "clear_blocked")?.clear();
        Ok(())
    }
}

fn guard<'a, S>(lock: &'a Mutex<S>, operation: &'static str) -> Result<MutexGuard<'a, S>> {
    lock.lock()
        .map_err(|_| Error::tracker(operation, "lock poisoned"))
}
