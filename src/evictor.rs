// Copyright 2015-2023 Martin Pool.

//! Pluggable eviction policy: given a required number of bytes and a target
//! location, decide which committed blocks to move to a lower tier or
//! evict outright.

use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Mutex;

use lru::LruCache;

use crate::location::BlockStoreLocation;
use crate::metadata_manager::BlockStoreMeta;

/// A plan to free space: blocks to relocate to a lower tier, and blocks to
/// delete outright. Executed by the façade, never by the evictor itself.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EvictionPlan {
    pub to_evict: Vec<u64>,
    pub to_move: Vec<(u64, BlockStoreLocation)>,
}

impl EvictionPlan {
    pub fn is_empty(&self) -> bool {
        self.to_evict.is_empty() && self.to_move.is_empty()
    }
}

/// Produces eviction plans from a metadata snapshot and a pin set.
///
/// Implementations must be pure functions of their arguments: no I/O, no
/// blocking, so they can be swapped and unit-tested in isolation. Access
/// bookkeeping (e.g. for an LRU policy) is kept in the evictor via interior
/// mutability and updated out-of-band through [`Evictor::record_access`],
/// not as a side effect of planning.
pub trait Evictor: Send + Sync + Debug {
    /// Produce a plan that frees at least `bytes_to_free` in some eligible
    /// dir of `location`, without touching any block in `pinned`. Returns
    /// `None` if no such plan exists.
    fn free_space_with_view(
        &self,
        bytes_to_free: u64,
        location: BlockStoreLocation,
        view: &BlockStoreMeta,
        pinned: &HashSet<u64>,
    ) -> Option<EvictionPlan>;

    /// Record that `block_id` was just accessed (a successful read-lock
    /// grant or a commit), for policies that track recency.
    fn record_access(&self, block_id: u64);

    /// Drop any bookkeeping held for `block_id`, once it is evicted or
    /// removed and will never be looked up again.
    fn forget(&self, block_id: u64);
}

/// Default LRU eviction policy.
///
/// Maintains a global least-recently-used order across all tiers. Eviction
/// prefers relocating a victim one tier down over deleting it outright;
/// victims already at the bottom tier are always deleted.
#[derive(Debug)]
pub struct LruEvictor {
    order: Mutex<LruCache<u64, ()>>,
}

impl Default for LruEvictor {
    fn default() -> Self {
        LruEvictor {
            order: Mutex::new(LruCache::unbounded()),
        }
    }
}

impl LruEvictor {
    pub fn new() -> LruEvictor {
        LruEvictor::default()
    }

    /// Candidate blocks in `location`, oldest access first, ties broken by
    /// lowest `block_id`.
    fn candidates_in(&self, location: BlockStoreLocation, view: &BlockStoreMeta) -> Vec<u64> {
        let present: HashSet<u64> = view
            .dirs
            .iter()
            .filter(|d| location.contains(&d.location))
            .flat_map(|d| d.committed_blocks.iter().map(|b| b.block_id))
            .collect();

        let order = self.order.lock().expect("lru order mutex");
        // `iter()` yields most-recently-used first; reverse for oldest-first.
        let mut ranked: Vec<u64> = order
            .iter()
            .rev()
            .map(|(id, ())| *id)
            .filter(|id| present.contains(id))
            .collect();
        // Anything present but never recorded as accessed is the oldest of
        // all (it predates tracking); append in block-id order for a
        // deterministic tie-break.
        let mut untracked: Vec<u64> = present
            .iter()
            .filter(|id| !ranked.contains(id))
            .copied()
            .collect();
        untracked.sort_unstable();
        let mut result = untracked;
        result.append(&mut ranked);
        result
    }

    fn dir_available(location: BlockStoreLocation, view: &BlockStoreMeta) -> u64 {
        view.dirs
            .iter()
            .filter(|d| location.contains(&d.location))
            .map(|d| d.available_bytes)
            .max()
            .unwrap_or(0)
    }

    fn block_size(view: &BlockStoreMeta, block_id: u64) -> Option<(u64, BlockStoreLocation)> {
        view.dirs.iter().find_map(|d| {
            d.committed_blocks
                .iter()
                .find(|b| b.block_id == block_id)
                .map(|b| (b.size, d.location))
        })
    }
}

impl Evictor for LruEvictor {
    fn free_space_with_view(
        &self,
        bytes_to_free: u64,
        location: BlockStoreLocation,
        view: &BlockStoreMeta,
        pinned: &HashSet<u64>,
    ) -> Option<EvictionPlan> {
        if Self::dir_available(location, view) >= bytes_to_free {
            return Some(EvictionPlan::default());
        }

        let mut freed = 0u64;
        let mut plan = EvictionPlan::default();
        for block_id in self.candidates_in(location, view) {
            if freed + Self::dir_available(location, view) >= bytes_to_free {
                break;
            }
            if pinned.contains(&block_id) {
                continue;
            }
            let (size, current_dir) = match Self::block_size(view, block_id) {
                Some(v) => v,
                None => continue,
            };

            if let Some(lower) = current_dir.tier.next_lower() {
                // Relocate down a tier rather than deleting outright, if
                // there's room (without needing to recursively evict there).
                let lower_any = BlockStoreLocation::any_dir(lower);
                if Self::dir_available(lower_any, view) >= size {
                    plan.to_move.push((block_id, lower_any));
                    freed += size;
                    continue;
                }
            }
            plan.to_evict.push(block_id);
            freed += size;
        }

        if freed + Self::dir_available(location, view) >= bytes_to_free {
            Some(plan)
        } else {
            None
        }
    }

    fn record_access(&self, block_id: u64) {
        self.order.lock().expect("lru order mutex").put(block_id, ());
    }

    fn forget(&self, block_id: u64) {
        self.order.lock().expect("lru order mutex").pop(&block_id);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::location::TierAlias;
    use crate::metadata_manager::DirSnapshot;
    use crate::storage_dir::BlockMeta;

    fn view(dirs: Vec<DirSnapshot>) -> BlockStoreMeta {
        BlockStoreMeta { dirs }
    }

    fn block(id: u64, size: u64, loc: BlockStoreLocation) -> BlockMeta {
        BlockMeta {
            block_id: id,
            size,
            dir: loc,
        }
    }

    #[test]
    fn already_enough_space_returns_empty_plan() {
        let loc = BlockStoreLocation::specific(TierAlias::Ssd, 0);
        let v = view(vec![DirSnapshot {
            location: loc,
            capacity_bytes: 1024,
            available_bytes: 1024,
            committed_blocks: vec![],
        }]);
        let evictor = LruEvictor::new();
        let plan = evictor
            .free_space_with_view(512, loc, &v, &HashSet::new())
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn evicts_bottom_tier_victim() {
        let loc = BlockStoreLocation::specific(TierAlias::Hdd, 0);
        let v = view(vec![DirSnapshot {
            location: loc,
            capacity_bytes: 1024,
            available_bytes: 0,
            committed_blocks: vec![block(1000, 512, loc)],
        }]);
        let evictor = LruEvictor::new();
        let plan = evictor
            .free_space_with_view(512, loc, &v, &HashSet::new())
            .unwrap();
        assert_eq!(plan.to_evict, vec![1000]);
        assert!(plan.to_move.is_empty());
    }

    #[test]
    fn pinned_blocks_are_never_chosen() {
        let loc = BlockStoreLocation::specific(TierAlias::Hdd, 0);
        let v = view(vec![DirSnapshot {
            location: loc,
            capacity_bytes: 1024,
            available_bytes: 0,
            committed_blocks: vec![block(1000, 512, loc)],
        }]);
        let evictor = LruEvictor::new();
        let mut pinned = HashSet::new();
        pinned.insert(1000u64);
        assert!(evictor
            .free_space_with_view(512, loc, &v, &pinned)
            .is_none());
    }

    #[test]
    fn non_bottom_tier_victim_is_relocated_not_deleted() {
        let ssd = BlockStoreLocation::specific(TierAlias::Ssd, 0);
        let hdd = BlockStoreLocation::specific(TierAlias::Hdd, 0);
        let v = view(vec![
            DirSnapshot {
                location: ssd,
                capacity_bytes: 1024,
                available_bytes: 0,
                committed_blocks: vec![block(1, 512, ssd)],
            },
            DirSnapshot {
                location: hdd,
                capacity_bytes: 1024,
                available_bytes: 1024,
                committed_blocks: vec![],
            },
        ]);
        let evictor = LruEvictor::new();
        let plan = evictor
            .free_space_with_view(512, ssd, &v, &HashSet::new())
            .unwrap();
        assert!(plan.to_evict.is_empty());
        assert_eq!(plan.to_move, vec![(1, BlockStoreLocation::any_dir(TierAlias::Hdd))]);
    }

    #[test]
    fn oldest_access_evicted_first() {
        let loc = BlockStoreLocation::specific(TierAlias::Hdd, 0);
        let v = view(vec![DirSnapshot {
            location: loc,
            capacity_bytes: 1024,
            available_bytes: 0,
            committed_blocks: vec![block(1, 256, loc), block(2, 256, loc)],
        }]);
        let evictor = LruEvictor::new();
        evictor.record_access(2);
        evictor.record_access(1); // 1 is now most-recently-used; 2 is oldest
        let plan = evictor
            .free_space_with_view(256, loc, &v, &HashSet::new())
            .unwrap();
        assert_eq!(plan.to_evict, vec![2]);
    }

    #[test]
    fn forget_drops_tracking_entry() {
        let evictor = LruEvictor::new();
        evictor.record_access(1);
        evictor.record_access(2);
        evictor.forget(1);
        assert_eq!(evictor.order.lock().unwrap().len(), 1);
        assert!(evictor.order.lock().unwrap().contains(&2));
    }
}
