//! Cross-run cache shared by filters: nested namespaces of values, each
//! stamped with a validity token.

pub mod store;
pub mod token;

use thiserror::Error;

pub use store::{CACHE_FORMAT, CacheNamespace, CachePath, CacheSlot, CacheStore, CacheValue};
pub use token::{
    AllOf, AlwaysValid, DateChecker, EntryHashChecker, PerEntry, TokenChecker, TokenContext,
    ValidityToken, VersionChecker,
};

/// Cache failures. Callers degrade these to "empty" or "stale"; they never abort a run.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt cache data: {0}")]
    Corrupt(String),

    #[error("unsupported cache format {0}")]
    UnsupportedFormat(u32),

    #[error("no entry named {0} to compute a token from")]
    MissingEntry(String),

    #[error("stored token does not match the checker's token kind")]
    TokenMismatch,
}
