// Copyright 2015-2023 Martin Pool.

//! Parses the tier-layout configuration and builds a [`TieredBlockStore`]
//! from it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::file_ops::{FileOps, LocalFileOps};
use crate::location::TierAlias;
use crate::storage_dir::StorageDir;
use crate::storage_tier::StorageTier;
use crate::store::TieredBlockStore;

/// One directory's on-disk root and capacity within a tier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DirLayout {
    pub path: PathBuf,
    pub capacity_bytes: u64,
}

/// One tier's alias and its ordered directories.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TierLayout {
    pub tier: TierAlias,
    pub dirs: Vec<DirLayout>,
}

/// The tier-layout mapping the core reads from config: an ordered list of
/// `(tierAlias, [(dirPath, capacityBytes)])`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TierLayoutConfig {
    pub tiers: Vec<TierLayout>,
}

impl TierLayoutConfig {
    pub fn from_json(text: &str) -> serde_json::Result<TierLayoutConfig> {
        serde_json::from_str(text)
    }

    fn build_tiers(&self) -> Vec<StorageTier> {
        self.tiers
            .iter()
            .map(|t| {
                let dirs = t
                    .dirs
                    .iter()
                    .map(|d| StorageDir::new(d.path.clone(), d.capacity_bytes))
                    .collect();
                StorageTier::new(t.tier, dirs)
            })
            .collect()
    }

    /// Build a store backed by the real filesystem, scanning existing
    /// on-disk state into metadata before returning.
    pub fn build_store(&self) -> Result<TieredBlockStore> {
        self.build_store_with(Box::new(LocalFileOps::new()))
    }

    pub fn build_store_with(&self, file_ops: Box<dyn FileOps>) -> Result<TieredBlockStore> {
        let store = TieredBlockStore::new(self.build_tiers(), file_ops);
        store.scan_startup()?;
        Ok(store)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_tier_layout_json() {
        let json = r#"{
            "tiers": [
                {"tier": "Memory", "dirs": [{"path": "/m0", "capacity_bytes": 1024}]},
                {"tier": "Ssd", "dirs": [{"path": "/s0", "capacity_bytes": 4096}, {"path": "/s1", "capacity_bytes": 4096}]}
            ]
        }"#;
        let config = TierLayoutConfig::from_json(json).unwrap();
        assert_eq!(config.tiers.len(), 2);
        assert_eq!(config.tiers[1].dirs.len(), 2);
    }

    #[test]
    fn builds_store_from_config() {
        let json = r#"{"tiers": [{"tier": "Ssd", "dirs": [{"path": "/s0", "capacity_bytes": 1024}]}]}"#;
        let config = TierLayoutConfig::from_json(json).unwrap();
        let store = config
            .build_store_with(Box::new(crate::file_ops::MemFileOps::new()))
            .unwrap();
        assert!(!store.has_block_meta(1));
    }
}
