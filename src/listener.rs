// Copyright 2015-2023 Martin Pool.

//! Observers notified synchronously of block lifecycle transitions.

use std::fmt::Debug;

use crate::location::BlockStoreLocation;

/// A state transition the store just committed to its metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Commit { block_id: u64, location: BlockStoreLocation },
    Abort { block_id: u64 },
    Move { block_id: u64, from: BlockStoreLocation, to: BlockStoreLocation },
    Remove { block_id: u64 },
}

/// Notified in-line, under the metadata lock, immediately after each
/// transition. Implementations must not block or re-enter the store.
pub trait Listener: Send + Sync + Debug {
    fn on_event(&self, event: &Event);
}
