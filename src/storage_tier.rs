// Copyright 2020 Martin Pool.

//! An ordered collection of [`StorageDir`]s at one tier level.

use crate::errors::{Error, Result};
use crate::location::TierAlias;
use crate::storage_dir::StorageDir;

#[derive(Debug)]
pub struct StorageTier {
    pub alias: TierAlias,
    dirs: Vec<StorageDir>,
}

impl StorageTier {
    pub fn new(alias: TierAlias, dirs: Vec<StorageDir>) -> StorageTier {
        StorageTier { alias, dirs }
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    pub fn dir(&self, index: usize) -> Result<&StorageDir> {
        self.dirs.get(index).ok_or_else(|| Error::NoSuchDir {
            tier: self.alias.to_string(),
            dir_index: index,
        })
    }

    pub fn dir_mut(&mut self, index: usize) -> Result<&mut StorageDir> {
        let alias = self.alias.to_string();
        self.dirs
            .get_mut(index)
            .ok_or(Error::NoSuchDir {
                tier: alias,
                dir_index: index,
            })
    }

    pub fn dirs(&self) -> impl Iterator<Item = (usize, &StorageDir)> {
        self.dirs.iter().enumerate()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn lookup_by_index() {
        let tier = StorageTier::new(
            TierAlias::Ssd,
            vec![StorageDir::new(PathBuf::from("/a"), 1024)],
        );
        assert_eq!(tier.len(), 1);
        assert!(tier.dir(0).is_ok());
        assert!(matches!(
            tier.dir(1).unwrap_err(),
            Error::NoSuchDir { dir_index: 1, .. }
        ));
    }
}
