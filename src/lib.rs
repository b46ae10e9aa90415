// Tiered block store.
// Copyright 2015-2023 Martin Pool.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! A worker-local, tiered block store for a distributed file cache data
//! node: manages opaque fixed-identity byte blocks across a hierarchy of
//! capacity-bounded storage tiers, with a two-phase temp-then-commit write
//! lifecycle, per-block reader/writer locking, and pluggable eviction.

pub mod config;
pub mod errors;
pub mod evictor;
pub mod file_ops;
pub mod listener;
pub mod location;
pub mod lock_manager;
pub mod metadata_manager;
pub mod storage_dir;
pub mod storage_tier;
pub mod store;

pub use errors::{Error, Result};
pub use evictor::{EvictionPlan, Evictor, LruEvictor};
pub use file_ops::{FileOps, LocalFileOps, MemFileOps};
pub use listener::{Event, Listener};
pub use location::{BlockStoreLocation, TierAlias, ANY_DIR};
pub use lock_manager::{LockManager, LockMode};
pub use metadata_manager::{BlockMetadataManager, BlockStoreMeta, DirSnapshot};
pub use storage_dir::{BlockMeta, StorageDir, TempBlockMeta};
pub use storage_tier::StorageTier;
pub use store::TieredBlockStore;
