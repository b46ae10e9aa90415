// Copyright 2015-2023 Martin Pool.

//! A capacity-bounded directory within a tier, holding committed and
//! temporary block files.
//!
//! The structure on disk is: dir root > (block files | tmp/session/block).

use std::collections::HashMap;
use std::path::PathBuf;

use crate::errors::{Error, Result};
use crate::location::BlockStoreLocation;

/// Identity of a committed block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockMeta {
    pub block_id: u64,
    pub size: u64,
    pub dir: BlockStoreLocation,
}

/// Identity of an uncommitted block, owned by one session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TempBlockMeta {
    pub block_id: u64,
    pub owner_session_id: u64,
    pub size: u64,
    pub dir: BlockStoreLocation,
}

/// A single filesystem directory with a fixed capacity.
#[derive(Debug)]
pub struct StorageDir {
    root: PathBuf,
    capacity_bytes: u64,
    available_bytes: u64,
    committed_blocks: HashMap<u64, BlockMeta>,
    temp_blocks: HashMap<u64, TempBlockMeta>,
}

impl StorageDir {
    pub fn new(root: PathBuf, capacity_bytes: u64) -> StorageDir {
        StorageDir {
            root,
            capacity_bytes,
            available_bytes: capacity_bytes,
            committed_blocks: HashMap::new(),
            temp_blocks: HashMap::new(),
        }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    pub fn available_bytes(&self) -> u64 {
        self.available_bytes
    }

    /// Path to a block once committed: `<root>/<block_id>`.
    pub fn commit_path(&self, block_id: u64) -> PathBuf {
        self.root.join(block_id.to_string())
    }

    /// Path to a block's temp file: `<root>/tmp/<session_id>/<block_id>`.
    pub fn temp_path(&self, session_id: u64, block_id: u64) -> PathBuf {
        self.root
            .join("tmp")
            .join(session_id.to_string())
            .join(block_id.to_string())
    }

    pub fn has_block_meta(&self, block_id: u64) -> bool {
        self.committed_blocks.contains_key(&block_id)
    }

    pub fn has_temp_block_meta(&self, block_id: u64) -> bool {
        self.temp_blocks.contains_key(&block_id)
    }

    pub fn get_block_meta(&self, block_id: u64) -> Result<&BlockMeta> {
        self.committed_blocks
            .get(&block_id)
            .ok_or(Error::NotFound { block_id })
    }

    pub fn get_temp_block_meta(&self, block_id: u64) -> Result<&TempBlockMeta> {
        self.temp_blocks
            .get(&block_id)
            .ok_or(Error::NotFound { block_id })
    }

    pub fn committed_blocks(&self) -> impl Iterator<Item = &BlockMeta> {
        self.committed_blocks.values()
    }

    pub fn temp_blocks(&self) -> impl Iterator<Item = &TempBlockMeta> {
        self.temp_blocks.values()
    }

    pub fn add_block_meta(&mut self, meta: BlockMeta) -> Result<()> {
        if self.committed_blocks.contains_key(&meta.block_id) {
            return Err(Error::AlreadyExists {
                block_id: meta.block_id,
            });
        }
        self.available_bytes -= meta.size;
        self.committed_blocks.insert(meta.block_id, meta);
        Ok(())
    }

    pub fn remove_block_meta(&mut self, block_id: u64) -> Result<BlockMeta> {
        let meta = self
            .committed_blocks
            .remove(&block_id)
            .ok_or(Error::NotFound { block_id })?;
        self.available_bytes += meta.size;
        Ok(meta)
    }

    pub fn add_temp_block_meta(&mut self, meta: TempBlockMeta) -> Result<()> {
        if self.temp_blocks.contains_key(&meta.block_id) {
            return Err(Error::AlreadyExists {
                block_id: meta.block_id,
            });
        }
        if meta.size > self.available_bytes {
            return Err(Error::OutOfSpace {
                reason: format!(
                    "dir has {} available, need {}",
                    self.available_bytes, meta.size
                ),
            });
        }
        self.available_bytes -= meta.size;
        self.temp_blocks.insert(meta.block_id, meta);
        Ok(())
    }

    pub fn remove_temp_block_meta(&mut self, block_id: u64) -> Result<TempBlockMeta> {
        let meta = self
            .temp_blocks
            .remove(&block_id)
            .ok_or(Error::NotFound { block_id })?;
        self.available_bytes += meta.size;
        Ok(meta)
    }

    /// Grow a temp block's reservation. `new_size` must be >= current size.
    pub fn resize_temp_block_meta(&mut self, block_id: u64, new_size: u64) -> Result<()> {
        let meta = self
            .temp_blocks
            .get_mut(&block_id)
            .ok_or(Error::NotFound { block_id })?;
        debug_assert!(new_size >= meta.size, "temp block size must not shrink");
        let delta = new_size - meta.size;
        if delta > self.available_bytes {
            return Err(Error::OutOfSpace {
                reason: format!(
                    "dir has {} available, need {} more",
                    self.available_bytes, delta
                ),
            });
        }
        self.available_bytes -= delta;
        meta.size = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::location::TierAlias;

    fn loc() -> BlockStoreLocation {
        BlockStoreLocation::specific(TierAlias::Ssd, 0)
    }

    #[test]
    fn capacity_accounting() {
        let mut dir = StorageDir::new(PathBuf::from("/tmp/d"), 1024);
        assert_eq!(dir.available_bytes(), 1024);
        dir.add_block_meta(BlockMeta {
            block_id: 1,
            size: 512,
            dir: loc(),
        })
        .unwrap();
        assert_eq!(dir.available_bytes(), 512);
        dir.remove_block_meta(1).unwrap();
        assert_eq!(dir.available_bytes(), 1024);
    }

    #[test]
    fn duplicate_block_meta_rejected() {
        let mut dir = StorageDir::new(PathBuf::from("/tmp/d"), 1024);
        dir.add_block_meta(BlockMeta {
            block_id: 1,
            size: 512,
            dir: loc(),
        })
        .unwrap();
        let err = dir
            .add_block_meta(BlockMeta {
                block_id: 1,
                size: 1,
                dir: loc(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { block_id: 1 }));
    }

    #[test]
    fn resize_temp_block_respects_capacity() {
        let mut dir = StorageDir::new(PathBuf::from("/tmp/d"), 1024);
        dir.add_temp_block_meta(TempBlockMeta {
            block_id: 1,
            owner_session_id: 9,
            size: 100,
            dir: loc(),
        })
        .unwrap();
        dir.resize_temp_block_meta(1, 1024).unwrap();
        assert_eq!(dir.available_bytes(), 0);
        let err = dir.resize_temp_block_meta(1, 1025).unwrap_err();
        assert!(matches!(err, Error::OutOfSpace { .. }));
    }

    #[test]
    fn paths_follow_layout() {
        let dir = StorageDir::new(PathBuf::from("/root"), 1024);
        assert_eq!(dir.commit_path(42), PathBuf::from("/root/42"));
        assert_eq!(dir.temp_path(7, 42), PathBuf::from("/root/tmp/7/42"));
    }
}
