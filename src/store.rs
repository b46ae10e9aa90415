// Copyright 2015-2023 Martin Pool.

//! The public façade: coordinates metadata, locking and eviction behind the
//! operations a session actually calls.

use std::collections::HashSet;
use std::io::Write;
use std::sync::{Arc, RwLock};

use tracing::{instrument, warn};

use crate::errors::{Error, Result};
use crate::evictor::{EvictionPlan, Evictor, LruEvictor};
use crate::file_ops::FileOps;
use crate::location::BlockStoreLocation;
use crate::lock_manager::{LockManager, LockMode};
use crate::metadata_manager::{BlockMetadataManager, BlockStoreMeta};
use crate::storage_dir::{BlockMeta, TempBlockMeta};
use crate::storage_tier::StorageTier;
use crate::listener::{Event, Listener};

/// Coordinates [`BlockMetadataManager`], [`LockManager`] and an [`Evictor`]
/// behind the store's public operations, holding the metadata lock and
/// per-block locks in the order required to avoid deadlock: per-block locks
/// are always acquired before the metadata lock, never the reverse.
pub struct TieredBlockStore {
    metadata: Arc<RwLock<BlockMetadataManager>>,
    locks: LockManager,
    evictor: Box<dyn Evictor>,
    file_ops: Box<dyn FileOps>,
    listeners: RwLock<Vec<Box<dyn Listener>>>,
}

impl TieredBlockStore {
    pub fn new(tiers: Vec<StorageTier>, file_ops: Box<dyn FileOps>) -> TieredBlockStore {
        Self::with_evictor(tiers, file_ops, Box::new(LruEvictor::new()))
    }

    pub fn with_evictor(
        tiers: Vec<StorageTier>,
        file_ops: Box<dyn FileOps>,
        evictor: Box<dyn Evictor>,
    ) -> TieredBlockStore {
        let metadata = Arc::new(RwLock::new(BlockMetadataManager::new(tiers)));
        TieredBlockStore {
            locks: LockManager::new(metadata.clone()),
            metadata,
            evictor,
            file_ops,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Populate metadata from what's already on disk, discarding stale
    /// per-session temp files left by a previous run.
    pub fn scan_startup(&self) -> Result<()> {
        self.metadata
            .write()
            .expect("metadata lock")
            .scan_startup(self.file_ops.as_ref())
    }

    pub fn add_listener(&self, listener: Box<dyn Listener>) {
        self.listeners.write().expect("listeners lock").push(listener);
    }

    fn notify(&self, event: Event) {
        for listener in self.listeners.read().expect("listeners lock").iter() {
            listener.on_event(&event);
        }
    }

    #[instrument(skip(self))]
    pub fn create_block_meta(
        &self,
        session_id: u64,
        block_id: u64,
        location: BlockStoreLocation,
        initial_size: u64,
    ) -> Result<TempBlockMeta> {
        let mut metadata = self.metadata.write().expect("metadata lock");
        if metadata.has_block_meta(block_id) || metadata.has_temp_block_meta(block_id) {
            return Err(Error::AlreadyExists { block_id });
        }
        let dir = match metadata.get_eligible_dir(location, initial_size) {
            Some(dir) => dir,
            None => {
                let pinned = self.locks.get_locked_blocks();
                self.admit_space(&mut metadata, initial_size, location, &pinned)?;
                metadata
                    .get_eligible_dir(location, initial_size)
                    .ok_or(Error::NoEligibleDir {
                        location,
                        bytes: initial_size,
                    })?
            }
        };
        let temp = TempBlockMeta {
            block_id,
            owner_session_id: session_id,
            size: initial_size,
            dir,
        };
        metadata.add_temp_block_meta(dir, temp.clone())?;
        // Touch the temp file now so commit/abort always find it on disk,
        // even if the caller never opens a writer (e.g. a zero-size block).
        let path = self.dir_of(&metadata, dir)?.temp_path(session_id, block_id);
        self.file_ops.create_writer(&path)?;
        Ok(temp)
    }

    pub fn get_block_writer(&self, session_id: u64, block_id: u64) -> Result<Box<dyn Write + Send>> {
        let metadata = self.metadata.read().expect("metadata lock");
        let temp = metadata.get_temp_block_meta(block_id)?;
        if temp.owner_session_id != session_id {
            return Err(Error::InvalidState {
                block_id,
                reason: "temp block owned by a different session".into(),
            });
        }
        let path = self
            .dir_of(&metadata, temp.dir)?
            .temp_path(session_id, block_id);
        Ok(self.file_ops.create_writer(&path)?)
    }

    #[instrument(skip(self))]
    pub fn request_space(&self, session_id: u64, block_id: u64, additional_bytes: u64) -> Result<()> {
        let mut metadata = self.metadata.write().expect("metadata lock");
        let temp = metadata.get_temp_block_meta(block_id)?;
        if temp.owner_session_id != session_id {
            return Err(Error::InvalidState {
                block_id,
                reason: "temp block owned by a different session".into(),
            });
        }
        let new_size = temp.size + additional_bytes;
        let dir_location = BlockStoreLocation::specific(temp.dir.tier, temp.dir.dir);
        if metadata.get_available_bytes(dir_location)? < additional_bytes {
            let pinned = self.locks.get_locked_blocks();
            self.admit_space(&mut metadata, additional_bytes, dir_location, &pinned)?;
        }
        metadata.resize_temp_block_meta(block_id, new_size)
    }

    #[instrument(skip(self))]
    pub fn commit_block(&self, session_id: u64, block_id: u64) -> Result<BlockMeta> {
        let mut metadata = self.metadata.write().expect("metadata lock");
        if metadata.has_block_meta(block_id) {
            return Err(Error::AlreadyExists { block_id });
        }
        let temp = metadata.get_temp_block_meta(block_id)?;
        if temp.owner_session_id != session_id {
            return Err(Error::InvalidState {
                block_id,
                reason: "temp block owned by a different session".into(),
            });
        }
        let dir = self.dir_of(&metadata, temp.dir)?;
        let src = dir.temp_path(session_id, block_id);
        let dst = dir.commit_path(block_id);
        self.file_ops.rename(&src, &dst)?;
        let meta = metadata.commit_temp_block(temp)?;
        self.evictor.record_access(block_id);
        self.notify(Event::Commit {
            block_id,
            location: meta.dir,
        });
        Ok(meta)
    }

    #[instrument(skip(self))]
    pub fn abort_block(&self, session_id: u64, block_id: u64) -> Result<()> {
        let mut metadata = self.metadata.write().expect("metadata lock");
        if metadata.has_block_meta(block_id) {
            return Err(Error::AlreadyExists { block_id });
        }
        let temp = metadata.get_temp_block_meta(block_id)?;
        if temp.owner_session_id != session_id {
            return Err(Error::InvalidState {
                block_id,
                reason: "temp block owned by a different session".into(),
            });
        }
        let path = self
            .dir_of(&metadata, temp.dir)?
            .temp_path(session_id, block_id);
        self.file_ops.delete(&path)?;
        metadata.abort_temp_block(temp)?;
        self.notify(Event::Abort { block_id });
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn move_block(&self, session_id: u64, block_id: u64, new_location: BlockStoreLocation) -> Result<BlockMeta> {
        let lock_id = self.locks.lock_block(session_id, block_id, LockMode::Write)?;
        let result = self.move_block_locked(block_id, new_location);
        self.locks.unlock_block(lock_id).ok();
        result
    }

    fn move_block_locked(&self, block_id: u64, new_location: BlockStoreLocation) -> Result<BlockMeta> {
        let mut metadata = self.metadata.write().expect("metadata lock");
        let old_meta = metadata.get_block_meta(block_id)?;
        let target_dir_loc = match metadata.get_eligible_dir(new_location, old_meta.size) {
            Some(dir) => dir,
            None => {
                let mut pinned = self.locks.get_locked_blocks();
                pinned.remove(&block_id);
                self.admit_space(&mut metadata, old_meta.size, new_location, &pinned)?;
                metadata
                    .get_eligible_dir(new_location, old_meta.size)
                    .ok_or(Error::NoEligibleDir {
                        location: new_location,
                        bytes: old_meta.size,
                    })?
            }
        };
        let src = self.dir_of(&metadata, old_meta.dir)?.commit_path(block_id);
        let dst = self.dir_of(&metadata, target_dir_loc)?.commit_path(block_id);
        self.file_ops.rename(&src, &dst)?;
        let moved = metadata.move_block_meta(old_meta.clone(), target_dir_loc)?;
        self.notify(Event::Move {
            block_id,
            from: old_meta.dir,
            to: target_dir_loc,
        });
        Ok(moved)
    }

    #[instrument(skip(self))]
    pub fn remove_block(&self, session_id: u64, block_id: u64) -> Result<()> {
        // A temp block has no per-block lock to take (locks only exist for
        // committed blocks); reject it before engaging the lock manager.
        if self.metadata.read().expect("metadata lock").has_temp_block_meta(block_id) {
            return Err(Error::InvalidState {
                block_id,
                reason: "cannot remove a temp block, only committed blocks".into(),
            });
        }
        let lock_id = self.locks.lock_block(session_id, block_id, LockMode::Write)?;
        let result = self.remove_block_locked(block_id);
        self.locks.unlock_block(lock_id).ok();
        result
    }

    fn remove_block_locked(&self, block_id: u64) -> Result<()> {
        let mut metadata = self.metadata.write().expect("metadata lock");
        let meta = metadata.get_block_meta(block_id)?;
        let path = self.dir_of(&metadata, meta.dir)?.commit_path(block_id);
        self.file_ops.delete(&path)?;
        metadata.remove_block_meta(block_id)?;
        self.evictor.forget(block_id);
        self.notify(Event::Remove { block_id });
        Ok(())
    }

    /// Free at least `bytes` in `location` on behalf of `session_id`, by
    /// eviction or tier relocation. `session_id` is carried for tracing
    /// context only: freeing space is not scoped to the caller's own blocks,
    /// and never touches a block currently locked by any session.
    #[instrument(skip(self))]
    pub fn free_space(&self, session_id: u64, bytes: u64, location: BlockStoreLocation) -> Result<()> {
        let mut metadata = self.metadata.write().expect("metadata lock");
        let pinned = self.locks.get_locked_blocks();
        self.admit_space(&mut metadata, bytes, location, &pinned)
    }

    pub fn lock_block(&self, session_id: u64, block_id: u64, mode: LockMode) -> Result<u64> {
        let lock_id = self.locks.lock_block(session_id, block_id, mode)?;
        if mode == LockMode::Read {
            self.evictor.record_access(block_id);
        }
        Ok(lock_id)
    }

    pub fn unlock_block(&self, lock_id: u64) -> Result<()> {
        self.locks.unlock_block(lock_id)
    }

    pub fn get_locked_blocks(&self) -> HashSet<u64> {
        self.locks.get_locked_blocks()
    }

    /// Unlock all of a session's locks and best-effort abort its temp
    /// blocks, logging and continuing on any per-block failure.
    pub fn cleanup_session(&self, session_id: u64) {
        self.locks.cleanup_session(session_id);
        let owned: Vec<u64> = {
            let metadata = self.metadata.read().expect("metadata lock");
            metadata
                .tiers()
                .iter()
                .flat_map(|t| t.dirs())
                .flat_map(|(_, d)| d.temp_blocks().cloned().collect::<Vec<_>>())
                .filter(|t| t.owner_session_id == session_id)
                .map(|t| t.block_id)
                .collect()
        };
        for block_id in owned {
            if let Err(err) = self.abort_block(session_id, block_id) {
                warn!(block_id, session_id, %err, "failed to abort temp block during session cleanup");
            }
        }
    }

    pub fn has_block_meta(&self, block_id: u64) -> bool {
        self.metadata.read().expect("metadata lock").has_block_meta(block_id)
    }

    pub fn get_block_meta(&self, block_id: u64) -> Result<BlockMeta> {
        self.metadata.read().expect("metadata lock").get_block_meta(block_id)
    }

    pub fn get_block_store_meta(&self) -> BlockStoreMeta {
        self.metadata.read().expect("metadata lock").get_block_store_meta()
    }

    /// Resolve a `(tier, dir)` location to its [`StorageDir`], for path
    /// construction. `location` must name a specific dir, not `ANY_DIR`.
    fn dir_of<'a>(
        &self,
        metadata: &'a BlockMetadataManager,
        location: BlockStoreLocation,
    ) -> Result<&'a crate::storage_dir::StorageDir> {
        metadata
            .tiers()
            .iter()
            .find(|t| t.alias == location.tier)
            .ok_or(Error::NoSuchDir {
                tier: location.tier.to_string(),
                dir_index: location.dir,
            })?
            .dir(location.dir)
    }

    /// Run the §4.6.1 space admission algorithm against an already
    /// write-locked metadata manager.
    fn admit_space(
        &self,
        metadata: &mut BlockMetadataManager,
        required_bytes: u64,
        location: BlockStoreLocation,
        pinned: &HashSet<u64>,
    ) -> Result<()> {
        let view = metadata.get_block_store_meta();
        let plan = self
            .evictor
            .free_space_with_view(required_bytes, location, &view, pinned)
            .ok_or(Error::OutOfSpace {
                reason: "no eviction plan by evictor".into(),
            })?;
        self.execute_plan(metadata, &plan)?;
        if metadata.get_eligible_dir(location, required_bytes).is_none() {
            return Err(Error::OutOfSpace {
                reason: "admission raced with another admission".into(),
            });
        }
        Ok(())
    }

    fn execute_plan(&self, metadata: &mut BlockMetadataManager, plan: &EvictionPlan) -> Result<()> {
        for &(block_id, new_dir) in &plan.to_move {
            let meta = metadata.get_block_meta(block_id)?;
            let target = metadata
                .get_eligible_dir(new_dir, meta.size)
                .ok_or(Error::NoEligibleDir {
                    location: new_dir,
                    bytes: meta.size,
                })?;
            let src = self.dir_of(metadata, meta.dir)?.commit_path(block_id);
            let dst = self.dir_of(metadata, target)?.commit_path(block_id);
            self.file_ops.rename(&src, &dst)?;
            metadata.move_block_meta(meta.clone(), target)?;
            self.notify(Event::Move {
                block_id,
                from: meta.dir,
                to: target,
            });
        }
        for &block_id in &plan.to_evict {
            let meta = metadata.get_block_meta(block_id)?;
            let path = self.dir_of(metadata, meta.dir)?.commit_path(block_id);
            self.file_ops.delete(&path)?;
            metadata.remove_block_meta(block_id)?;
            self.evictor.forget(block_id);
            self.notify(Event::Remove { block_id });
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::file_ops::LocalFileOps;
    use crate::location::TierAlias;
    use crate::storage_dir::StorageDir;
    use tempfile::tempdir;

    fn store(capacity: u64) -> (TieredBlockStore, tempfile::TempDir) {
        let tmp = tempdir().unwrap();
        let dir = StorageDir::new(tmp.path().join("ssd0"), capacity);
        let store = TieredBlockStore::new(
            vec![StorageTier::new(TierAlias::Ssd, vec![dir])],
            Box::new(LocalFileOps::new()),
        );
        (store, tmp)
    }

    fn loc() -> BlockStoreLocation {
        BlockStoreLocation::any_dir(TierAlias::Ssd)
    }

    #[test]
    fn create_write_commit_roundtrip() {
        let (store, _tmp) = store(1024);
        store.create_block_meta(1, 42, loc(), 5).unwrap();
        {
            let mut w = store.get_block_writer(1, 42).unwrap();
            w.write_all(b"hello").unwrap();
        }
        let meta = store.commit_block(1, 42).unwrap();
        assert_eq!(meta.size, 5);
        assert!(store.has_block_meta(42));
    }

    #[test]
    fn create_abort_restores_capacity() {
        let (store, _tmp) = store(1024);
        store.create_block_meta(1, 42, loc(), 512).unwrap();
        store.abort_block(1, 42).unwrap();
        assert!(!store.has_block_meta(42));
        assert_eq!(
            store
                .metadata
                .read()
                .unwrap()
                .get_available_bytes(loc())
                .unwrap(),
            1024
        );
    }

    #[test]
    fn commit_session_mismatch_is_invalid_state() {
        let (store, _tmp) = store(1024);
        store.create_block_meta(1, 42, loc(), 5).unwrap();
        let err = store.commit_block(2, 42).unwrap_err();
        assert!(matches!(err, Error::InvalidState { block_id: 42, .. }));
    }

    #[test]
    fn create_under_pressure_evicts_lru() {
        let (store, _tmp) = store(1024);
        store.create_block_meta(1, 1, loc(), 512).unwrap();
        store.commit_block(1, 1).unwrap();
        store.create_block_meta(1, 2, loc(), 512).unwrap();
        store.commit_block(1, 2).unwrap();
        // dir is full; creating a third block must evict block 1 (LRU).
        store.create_block_meta(1, 3, loc(), 512).unwrap();
        assert!(!store.has_block_meta(1));
        assert!(store.has_block_meta(2));
    }

    #[test]
    fn admission_blocked_by_reader_fails() {
        let (store, _tmp) = store(1024);
        store.create_block_meta(1, 1, loc(), 512).unwrap();
        store.commit_block(1, 1).unwrap();
        store.create_block_meta(1, 2, loc(), 512).unwrap();
        store.commit_block(1, 2).unwrap();
        let lock_id = store.lock_block(1, 1, LockMode::Read).unwrap();
        // Evicting block 2 alone only frees 512 bytes; block 1 is pinned
        // and cannot be touched, so a 1024-byte request is infeasible.
        let err = store.create_block_meta(1, 3, loc(), 1024).unwrap_err();
        assert!(matches!(err, Error::OutOfSpace { .. }));
        store.unlock_block(lock_id).unwrap();
    }

    #[test]
    fn move_blocked_by_reader_fails() {
        let (store, _tmp) = store(1024);
        store.create_block_meta(1, 1, loc(), 512).unwrap();
        store.commit_block(1, 1).unwrap();
        let lock_id = store.lock_block(2, 1, LockMode::Read).unwrap();
        std::thread::scope(|scope| {
            let handle = scope.spawn(|| store.move_block(1, 1, BlockStoreLocation::any_dir(TierAlias::Ssd)));
            std::thread::sleep(std::time::Duration::from_millis(50));
            store.unlock_block(lock_id).unwrap();
            handle.join().unwrap().unwrap();
        });
    }

    #[test]
    fn remove_unknown_block_not_found() {
        let (store, _tmp) = store(1024);
        let err = store.remove_block(1, 999).unwrap_err();
        assert!(matches!(err, Error::NotFound { block_id: 999 }));
    }

    #[test]
    fn cleanup_session_aborts_owned_temp_blocks() {
        let (store, _tmp) = store(1024);
        store.create_block_meta(1, 1, loc(), 256).unwrap();
        store.cleanup_session(1);
        assert!(!store.has_block_meta(1));
        assert_eq!(
            store
                .metadata
                .read()
                .unwrap()
                .get_available_bytes(loc())
                .unwrap(),
            1024
        );
    }
}
