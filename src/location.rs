// Copyright 2020 Martin Pool.

//! Naming a tier, and optionally a specific directory within it.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Sentinel `dir_index` meaning "any dir in this tier".
pub const ANY_DIR: usize = usize::MAX;

/// A class of storage medium. Ordinal order is precedence order: lower is
/// faster and more preferred. Eviction moves blocks from a lower ordinal
/// towards a higher one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum)]
pub enum TierAlias {
    Memory,
    Ssd,
    Hdd,
}

impl TierAlias {
    pub const ALL: [TierAlias; 3] = [TierAlias::Memory, TierAlias::Ssd, TierAlias::Hdd];

    /// The next lower (slower) tier, if any.
    pub fn next_lower(self) -> Option<TierAlias> {
        Self::ALL
            .iter()
            .position(|t| *t == self)
            .and_then(|i| Self::ALL.get(i + 1))
            .copied()
    }
}

impl std::fmt::Display for TierAlias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Names a tier and, optionally, a specific directory within it.
///
/// `dir == ANY_DIR` means "any dir in this tier".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockStoreLocation {
    pub tier: TierAlias,
    pub dir: usize,
}

impl BlockStoreLocation {
    pub fn any_dir(tier: TierAlias) -> BlockStoreLocation {
        BlockStoreLocation { tier, dir: ANY_DIR }
    }

    pub fn specific(tier: TierAlias, dir: usize) -> BlockStoreLocation {
        BlockStoreLocation { tier, dir }
    }

    pub fn is_any_dir(&self) -> bool {
        self.dir == ANY_DIR
    }

    /// True if `self` contains `other`: same tier, and either `self` names
    /// any dir, or both name the same dir.
    pub fn contains(&self, other: &BlockStoreLocation) -> bool {
        self.tier == other.tier && (self.is_any_dir() || self.dir == other.dir)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn any_dir_contains_specific() {
        let any = BlockStoreLocation::any_dir(TierAlias::Ssd);
        let specific = BlockStoreLocation::specific(TierAlias::Ssd, 2);
        assert!(any.contains(&specific));
        assert!(!specific.contains(&any));
    }

    #[test]
    fn different_tiers_never_contain() {
        let a = BlockStoreLocation::any_dir(TierAlias::Memory);
        let b = BlockStoreLocation::any_dir(TierAlias::Ssd);
        assert!(!a.contains(&b));
    }

    #[test]
    fn tier_precedence_order() {
        assert!(TierAlias::Memory < TierAlias::Ssd);
        assert!(TierAlias::Ssd < TierAlias::Hdd);
        assert_eq!(TierAlias::Memory.next_lower(), Some(TierAlias::Ssd));
        assert_eq!(TierAlias::Hdd.next_lower(), None);
    }
}
