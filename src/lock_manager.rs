// Copyright 2015-2023 Martin Pool.

//! Reader/writer locking on committed block IDs.
//!
//! Locks are in-process only (the store is worker-local, per the crate's
//! scope) so plain [`std::sync::Condvar`] is sufficient; there's no need for
//! a cross-process file lock like the teacher crate's gc lock.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, RwLock};

use tracing::trace;

use crate::errors::{Error, Result};
use crate::metadata_manager::BlockMetadataManager;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

#[derive(Clone, Debug)]
pub struct LockRecord {
    pub lock_id: u64,
    pub session_id: u64,
    pub block_id: u64,
    pub mode: LockMode,
}

#[derive(Default)]
struct BlockLockState {
    readers: u32,
    writer: bool,
    waiting_writers: u32,
}

impl BlockLockState {
    fn is_idle(&self) -> bool {
        self.readers == 0 && !self.writer && self.waiting_writers == 0
    }
}

struct Inner {
    next_lock_id: u64,
    records: HashMap<u64, LockRecord>,
    block_states: HashMap<u64, BlockLockState>,
}

/// Grants and releases read/write locks on committed block IDs.
pub struct LockManager {
    metadata: Arc<RwLock<BlockMetadataManager>>,
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl LockManager {
    pub fn new(metadata: Arc<RwLock<BlockMetadataManager>>) -> LockManager {
        LockManager {
            metadata,
            inner: Mutex::new(Inner {
                next_lock_id: 1,
                records: HashMap::new(),
                block_states: HashMap::new(),
            }),
        cond: Condvar::new(),
        }
    }

    /// Acquire a lock on `block_id`, blocking until it's available.
    ///
    /// `NotFound` if the block is not currently committed.
    pub fn lock_block(&self, session_id: u64, block_id: u64, mode: LockMode) -> Result<u64> {
        if !self.metadata.read().expect("read metadata").has_block_meta(block_id) {
            return Err(Error::NotFound { block_id });
        }

        let mut guard = self.inner.lock().expect("lock manager mutex");
        if mode == LockMode::Write {
            guard
                .block_states
                .entry(block_id)
                .or_default()
                .waiting_writers += 1;
        }
        loop {
            let can_acquire = {
                let state = guard.block_states.entry(block_id).or_default();
                match mode {
                    LockMode::Read => !state.writer && state.waiting_writers == 0,
                    LockMode::Write => state.readers == 0 && !state.writer,
                }
            };
            if can_acquire {
                break;
            }
            guard = self.cond.wait(guard).expect("condvar wait");
        }

        let state = guard.block_states.entry(block_id).or_default();
        match mode {
            LockMode::Read => state.readers += 1,
            LockMode::Write => {
                state.writer = true;
                state.waiting_writers -= 1;
            }
        }

        let lock_id = guard.next_lock_id;
        guard.next_lock_id += 1;
        guard.records.insert(
            lock_id,
            LockRecord {
                lock_id,
                session_id,
                block_id,
                mode,
            },
        );
        trace!(lock_id, block_id, session_id, ?mode, "lock acquired");
        Ok(lock_id)
    }

    pub fn unlock_block(&self, lock_id: u64) -> Result<()> {
        let mut guard = self.inner.lock().expect("lock manager mutex");
        let record = guard
            .records
            .remove(&lock_id)
            .ok_or(Error::LockNotFound { lock_id })?;
        self.release_locked(&mut guard, &record);
        self.cond.notify_all();
        Ok(())
    }

    /// Release every lock held by `session_id` on `block_id`.
    pub fn unlock_block_for_session(&self, session_id: u64, block_id: u64) {
        let mut guard = self.inner.lock().expect("lock manager mutex");
        let matching: Vec<u64> = guard
            .records
            .values()
            .filter(|r| r.session_id == session_id && r.block_id == block_id)
            .map(|r| r.lock_id)
            .collect();
        for lock_id in matching {
            let record = guard.records.remove(&lock_id).expect("just found");
            self.release_locked(&mut guard, &record);
        }
        self.cond.notify_all();
    }

    /// Release every lock held by `session_id`.
    pub fn cleanup_session(&self, session_id: u64) {
        let mut guard = self.inner.lock().expect("lock manager mutex");
        let matching: Vec<u64> = guard
            .records
            .values()
            .filter(|r| r.session_id == session_id)
            .map(|r| r.lock_id)
            .collect();
        for lock_id in matching {
            let record = guard.records.remove(&lock_id).expect("just found");
            self.release_locked(&mut guard, &record);
        }
        self.cond.notify_all();
    }

    pub fn get_locked_blocks(&self) -> std::collections::HashSet<u64> {
        self.inner
            .lock()
            .expect("lock manager mutex")
            .records
            .values()
            .map(|r| r.block_id)
            .collect()
    }

    fn release_locked(&self, guard: &mut Inner, record: &LockRecord) {
        let state = guard
            .block_states
            .get_mut(&record.block_id)
            .expect("block state exists for held lock");
        match record.mode {
            LockMode::Read => state.readers -= 1,
            LockMode::Write => state.writer = false,
        }
        if state.is_idle() {
            guard.block_states.remove(&record.block_id);
        }
        trace!(lock_id = record.lock_id, block_id = record.block_id, "lock released");
    }
}
