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

//! Block store error types.

use std::io;

use thiserror::Error;

use crate::location::BlockStoreLocation;

/// Tiered block store error.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    #[error("no blockId {block_id} found")]
    NotFound { block_id: u64 },

    #[error("no lockId {lock_id} found")]
    LockNotFound { lock_id: u64 },

    #[error("blockId {block_id} already exists")]
    AlreadyExists { block_id: u64 },

    #[error("invalid state for blockId {block_id}: {reason}")]
    InvalidState { block_id: u64, reason: String },

    #[error("out of space: {reason}")]
    OutOfSpace { reason: String },

    #[error("dir index {dir_index} out of range for tier {tier}")]
    NoSuchDir { tier: String, dir_index: usize },

    #[error("no eligible dir in location {location:?} for {bytes} bytes")]
    NoEligibleDir {
        location: BlockStoreLocation,
        bytes: u64,
    },

    /// Generic IO error, wrapping a `FileOps` failure.
    #[error(transparent)]
    IOError {
        #[from]
        source: io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
