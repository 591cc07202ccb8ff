//! bibscope core: entry model, BibTeX I/O, validity-checked cache, config.

pub mod bibfile;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;

pub use cache::{CachePath, CacheStore, TokenContext};
pub use config::AppConfig;
pub use error::{CoreError, Result};
pub use models::*;
