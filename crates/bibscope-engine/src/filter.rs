//! The filter contract: three action kinds, one trait each.

use std::fmt;
use std::path::Path;

use bibscope_core::{CacheStore, Entries, Entry};

use crate::document::Document;

/// Scope a filter operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterAction {
    /// Full control over the document: sources, entries, cache.
    WholeDocument,
    /// Receives the entry set and returns its replacement.
    WholeDatabase,
    /// Called once per entry, in database order.
    SingleEntry,
}

impl fmt::Display for FilterAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::WholeDocument => "whole-document",
            Self::WholeDatabase => "whole-database",
            Self::SingleEntry => "single-entry",
        })
    }
}

/// What database and entry filters may use besides the entries themselves.
pub struct FilterContext<'a> {
    pub document_path: &'a Path,
    pub cache: &'a mut CacheStore,
}

pub trait DocumentFilter {
    fn filter_document(&mut self, document: &mut Document) -> anyhow::Result<()>;
}

pub trait DatabaseFilter {
    fn filter_database(
        &mut self,
        entries: Entries,
        ctx: &mut FilterContext<'_>,
    ) -> anyhow::Result<Entries>;
}

/// Per-entry filters must not look at other entries, so `filter_entry`
/// takes `&self`; shared setup belongs in `prepare`.
pub trait EntryFilter: Sync {
    fn prepare(&mut self, _ctx: &mut FilterContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn filter_entry(&self, entry: &mut Entry) -> anyhow::Result<()>;
}

/// A constructed filter, tagged with its action kind.
pub enum FilterInstance {
    Document(Box<dyn DocumentFilter>),
    Database(Box<dyn DatabaseFilter>),
    Entry(Box<dyn EntryFilter>),
}

impl FilterInstance {
    pub fn action(&self) -> FilterAction {
        match self {
            Self::Document(_) => FilterAction::WholeDocument,
            Self::Database(_) => FilterAction::WholeDatabase,
            Self::Entry(_) => FilterAction::SingleEntry,
        }
    }
}

impl fmt::Debug for FilterInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FilterInstance").field(&self.action()).finish()
    }
}
