// Copyright 2015-2023 Martin Pool.

//! Global index of committed and temp blocks across all tiers and dirs.

use std::collections::HashMap;

use tracing::{debug, instrument, warn};

use crate::errors::{Error, Result};
use crate::file_ops::FileOps;
use crate::location::{BlockStoreLocation, TierAlias};
use crate::storage_dir::{BlockMeta, TempBlockMeta};
use crate::storage_tier::StorageTier;

/// Snapshot of one dir's capacity and resident blocks, as seen by an
/// [`crate::evictor::Evictor`].
#[derive(Clone, Debug)]
pub struct DirSnapshot {
    pub location: BlockStoreLocation,
    pub capacity_bytes: u64,
    pub available_bytes: u64,
    pub committed_blocks: Vec<BlockMeta>,
}

/// Snapshot of the whole block store, used by the evictor and exposed
/// upward for diagnostics.
#[derive(Clone, Debug, Default)]
pub struct BlockStoreMeta {
    pub dirs: Vec<DirSnapshot>,
}

/// Owns all [`StorageTier`]s and provides O(1) lookup of which dir holds a
/// given block, committed or temp.
#[derive(Debug)]
pub struct BlockMetadataManager {
    tiers: Vec<StorageTier>,
    committed_index: HashMap<u64, BlockStoreLocation>,
    temp_index: HashMap<u64, BlockStoreLocation>,
}

impl BlockMetadataManager {
    /// Build a manager over `tiers`, indexing whatever committed and temp
    /// blocks they already contain (e.g. from tests constructing a
    /// [`StorageDir`](crate::storage_dir::StorageDir) directly).
    pub fn new(tiers: Vec<StorageTier>) -> BlockMetadataManager {
        let mut committed_index = HashMap::new();
        let mut temp_index = HashMap::new();
        for tier in &tiers {
            for (dir_idx, dir) in tier.dirs() {
                let location = BlockStoreLocation::specific(tier.alias, dir_idx);
                for meta in dir.committed_blocks() {
                    committed_index.insert(meta.block_id, location);
                }
                for temp in dir.temp_blocks() {
                    temp_index.insert(temp.block_id, location);
                }
            }
        }
        BlockMetadataManager {
            tiers,
            committed_index,
            temp_index,
        }
    }

    fn tier_index(&self, alias: TierAlias) -> Option<usize> {
        self.tiers.iter().position(|t| t.alias == alias)
    }

    pub fn tiers(&self) -> &[StorageTier] {
        &self.tiers
    }

    pub fn has_block_meta(&self, block_id: u64) -> bool {
        self.committed_index.contains_key(&block_id)
    }

    pub fn has_temp_block_meta(&self, block_id: u64) -> bool {
        self.temp_index.contains_key(&block_id)
    }

    pub fn get_block_meta(&self, block_id: u64) -> Result<BlockMeta> {
        let loc = self
            .committed_index
            .get(&block_id)
            .ok_or(Error::NotFound { block_id })?;
        let dir = self.tiers[self.tier_index(loc.tier).unwrap()].dir(loc.dir)?;
        dir.get_block_meta(block_id).cloned()
    }

    pub fn get_temp_block_meta(&self, block_id: u64) -> Result<TempBlockMeta> {
        let loc = self
            .temp_index
            .get(&block_id)
            .ok_or(Error::NotFound { block_id })?;
        let dir = self.tiers[self.tier_index(loc.tier).unwrap()].dir(loc.dir)?;
        dir.get_temp_block_meta(block_id).cloned()
    }

    /// Find a dir within `location` with at least `bytes` available.
    pub fn get_eligible_dir(
        &self,
        location: BlockStoreLocation,
        bytes: u64,
    ) -> Option<BlockStoreLocation> {
        let tier_idx = self.tier_index(location.tier)?;
        let tier = &self.tiers[tier_idx];
        if location.is_any_dir() {
            tier.dirs()
                .find(|(_, dir)| dir.available_bytes() >= bytes)
                .map(|(idx, _)| BlockStoreLocation::specific(location.tier, idx))
        } else {
            let dir = tier.dir(location.dir).ok()?;
            (dir.available_bytes() >= bytes).then_some(location)
        }
    }

    /// Sum of available bytes across all dirs in `location`.
    pub fn get_available_bytes(&self, location: BlockStoreLocation) -> Result<u64> {
        let tier_idx = self
            .tier_index(location.tier)
            .ok_or_else(|| Error::NoSuchDir {
                tier: location.tier.to_string(),
                dir_index: location.dir,
            })?;
        let tier = &self.tiers[tier_idx];
        if location.is_any_dir() {
            Ok(tier.dirs().map(|(_, d)| d.available_bytes()).sum())
        } else {
            Ok(tier.dir(location.dir)?.available_bytes())
        }
    }

    pub fn add_temp_block_meta(&mut self, location: BlockStoreLocation, meta: TempBlockMeta) -> Result<()> {
        debug_assert!(!location.is_any_dir());
        if self.committed_index.contains_key(&meta.block_id)
            || self.temp_index.contains_key(&meta.block_id)
        {
            return Err(Error::AlreadyExists {
                block_id: meta.block_id,
            });
        }
        let tier_idx = self.tier_index(location.tier).expect("tier exists");
        self.tiers[tier_idx]
            .dir_mut(location.dir)?
            .add_temp_block_meta(meta.clone())?;
        self.temp_index.insert(meta.block_id, location);
        Ok(())
    }

    pub fn resize_temp_block_meta(&mut self, block_id: u64, new_size: u64) -> Result<()> {
        let loc = *self
            .temp_index
            .get(&block_id)
            .ok_or(Error::NotFound { block_id })?;
        let tier_idx = self.tier_index(loc.tier).expect("tier exists");
        self.tiers[tier_idx]
            .dir_mut(loc.dir)?
            .resize_temp_block_meta(block_id, new_size)
    }

    /// Remove the temp record and insert a committed [`BlockMeta`] of the
    /// same final size, in the same dir.
    #[instrument(skip(self))]
    pub fn commit_temp_block(&mut self, temp: TempBlockMeta) -> Result<BlockMeta> {
        if self.committed_index.contains_key(&temp.block_id) {
            return Err(Error::AlreadyExists {
                block_id: temp.block_id,
            });
        }
        let loc = temp.dir;
        let tier_idx = self.tier_index(loc.tier).expect("tier exists");
        let dir = self.tiers[tier_idx].dir_mut(loc.dir)?;
        dir.remove_temp_block_meta(temp.block_id)?;
        let meta = BlockMeta {
            block_id: temp.block_id,
            size: temp.size,
            dir: loc,
        };
        dir.add_block_meta(meta.clone())?;
        self.temp_index.remove(&temp.block_id);
        self.committed_index.insert(temp.block_id, loc);
        Ok(meta)
    }

    pub fn abort_temp_block(&mut self, temp: TempBlockMeta) -> Result<()> {
        let loc = temp.dir;
        let tier_idx = self.tier_index(loc.tier).expect("tier exists");
        self.tiers[tier_idx]
            .dir_mut(loc.dir)?
            .remove_temp_block_meta(temp.block_id)?;
        self.temp_index.remove(&temp.block_id);
        Ok(())
    }

    /// Remove `meta` from its current dir and insert it into `new_dir`.
    /// Both steps must succeed for the move to commit.
    pub fn move_block_meta(&mut self, meta: BlockMeta, new_dir: BlockStoreLocation) -> Result<BlockMeta> {
        debug_assert!(!new_dir.is_any_dir());
        let old_tier_idx = self.tier_index(meta.dir.tier).expect("tier exists");
        self.tiers[old_tier_idx]
            .dir_mut(meta.dir.dir)?
            .remove_block_meta(meta.block_id)?;
        let moved = BlockMeta {
            block_id: meta.block_id,
            size: meta.size,
            dir: new_dir,
        };
        let new_tier_idx = self.tier_index(new_dir.tier).expect("tier exists");
        self.tiers[new_tier_idx]
            .dir_mut(new_dir.dir)?
            .add_block_meta(moved.clone())?;
        self.committed_index.insert(meta.block_id, new_dir);
        Ok(moved)
    }

    pub fn remove_block_meta(&mut self, block_id: u64) -> Result<BlockMeta> {
        let loc = self
            .committed_index
            .remove(&block_id)
            .ok_or(Error::NotFound { block_id })?;
        let tier_idx = self.tier_index(loc.tier).expect("tier exists");
        self.tiers[tier_idx].dir_mut(loc.dir)?.remove_block_meta(block_id)
    }

    pub fn get_block_store_meta(&self) -> BlockStoreMeta {
        let mut dirs = Vec::new();
        for tier in &self.tiers {
            for (idx, dir) in tier.dirs() {
                dirs.push(DirSnapshot {
                    location: BlockStoreLocation::specific(tier.alias, idx),
                    capacity_bytes: dir.capacity_bytes(),
                    available_bytes: dir.available_bytes(),
                    committed_blocks: dir.committed_blocks().cloned().collect(),
                });
            }
        }
        BlockStoreMeta { dirs }
    }

    /// Walk each dir's committed path, inserting a [`BlockMeta`] for every
    /// file found, and delete any leftover temp files from prior sessions.
    pub fn scan_startup(&mut self, file_ops: &dyn FileOps) -> Result<()> {
        for tier_idx in 0..self.tiers.len() {
            let tier_alias = self.tiers[tier_idx].alias;
            let dir_count = self.tiers[tier_idx].len();
            for dir_idx in 0..dir_count {
                let root = self.tiers[tier_idx].dir(dir_idx)?.root().to_path_buf();
                for entry in file_ops.read_dir(&root)? {
                    let Some(name) = entry.file_name().and_then(|n| n.to_str()) else {
                        continue;
                    };
                    if name == "tmp" {
                        continue;
                    }
                    let Ok(block_id) = name.parse::<u64>() else {
                        warn!(path = ?entry, "unexpected entry in block dir, skipping");
                        continue;
                    };
                    let size = file_ops.size(&entry)?;
                    let dir = self.tiers[tier_idx].dir_mut(dir_idx)?;
                    dir.add_block_meta(BlockMeta {
                        block_id,
                        size,
                        dir: BlockStoreLocation::specific(tier_alias, dir_idx),
                    })?;
                    self.committed_index
                        .insert(block_id, BlockStoreLocation::specific(tier_alias, dir_idx));
                }
                let tmp_root = root.join("tmp");
                for session_dir in file_ops.read_dir(&tmp_root).unwrap_or_default() {
                    for stale in file_ops.read_dir(&session_dir).unwrap_or_default() {
                        debug!(path = ?stale, "removing stale temp file from prior session");
                        let _ = file_ops.delete(&stale);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::storage_dir::StorageDir;
    use std::path::PathBuf;

    fn manager() -> BlockMetadataManager {
        let dir1 = StorageDir::new(PathBuf::from("/d1"), 1024);
        let dir2 = StorageDir::new(PathBuf::from("/d2"), 1024);
        BlockMetadataManager::new(vec![
            StorageTier::new(TierAlias::Ssd, vec![dir1]),
            StorageTier::new(TierAlias::Hdd, vec![dir2]),
        ])
    }

    #[test]
    fn create_commit_abort_lifecycle() {
        let mut mgr = manager();
        let loc = BlockStoreLocation::specific(TierAlias::Ssd, 0);
        mgr.add_temp_block_meta(
            loc,
            TempBlockMeta {
                block_id: 1,
                owner_session_id: 9,
                size: 512,
                dir: loc,
            },
        )
        .unwrap();
        assert!(mgr.has_temp_block_meta(1));
        assert!(!mgr.has_block_meta(1));

        let temp = mgr.get_temp_block_meta(1).unwrap();
        mgr.commit_temp_block(temp).unwrap();
        assert!(mgr.has_block_meta(1));
        assert!(!mgr.has_temp_block_meta(1));
        assert_eq!(mgr.get_available_bytes(loc).unwrap(), 512);
    }

    #[test]
    fn move_block_between_dirs() {
        let mut mgr = manager();
        let loc1 = BlockStoreLocation::specific(TierAlias::Ssd, 0);
        let loc2 = BlockStoreLocation::specific(TierAlias::Hdd, 0);
        mgr.add_temp_block_meta(
            loc1,
            TempBlockMeta {
                block_id: 1,
                owner_session_id: 9,
                size: 512,
                dir: loc1,
            },
        )
        .unwrap();
        let temp = mgr.get_temp_block_meta(1).unwrap();
        let meta = mgr.commit_temp_block(temp).unwrap();
        mgr.move_block_meta(meta, loc2).unwrap();
        assert_eq!(mgr.get_available_bytes(loc1).unwrap(), 1024);
        assert_eq!(mgr.get_available_bytes(loc2).unwrap(), 512);
    }

    #[test]
    fn eligible_dir_any_vs_specific() {
        let mgr = manager();
        let any = BlockStoreLocation::any_dir(TierAlias::Ssd);
        assert_eq!(
            mgr.get_eligible_dir(any, 100),
            Some(BlockStoreLocation::specific(TierAlias::Ssd, 0))
        );
        let too_big = BlockStoreLocation::any_dir(TierAlias::Ssd);
        assert_eq!(mgr.get_eligible_dir(too_big, 2048), None);
    }
}
