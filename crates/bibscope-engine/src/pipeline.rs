//! Runs a target document's filter pipeline end to end.

use std::path::Path;

use anyhow::Context;
use bibscope_core::AppConfig;
use serde::Serialize;
use tracing::{info, warn};

use crate::document::{Document, FilterDecl};
use crate::error::{EngineError, Result};
use crate::filter::FilterInstance;
use crate::registry::FilterRegistry;
use crate::sources::{DefaultFetcher, SourceFetcher};

/// What one run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub entries: usize,
    pub filters_run: usize,
    pub duplicates: usize,
    pub cache_saved: bool,
}

pub struct Pipeline {
    registry: FilterRegistry,
    fetcher: Box<dyn SourceFetcher>,
    config: AppConfig,
}

impl Pipeline {
    pub fn new(registry: FilterRegistry, config: AppConfig) -> Result<Self> {
        let fetcher = DefaultFetcher::new(&config.fetch)?;
        Ok(Self {
            registry,
            fetcher: Box::new(fetcher),
            config,
        })
    }

    pub fn with_fetcher(mut self, fetcher: impl SourceFetcher + 'static) -> Self {
        self.fetcher = Box::new(fetcher);
        self
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Process the target document at `path` and rewrite it in place.
    pub fn run(&self, path: &Path) -> Result<RunSummary> {
        let mut document = Document::open(path)?;
        self.run_document(&mut document)
    }

    /// Parse, resolve every filter, load, run the filters in order, then
    /// write. Nothing is written unless every step succeeds; a failed cache
    /// write is only logged.
    pub fn run_document(&self, document: &mut Document) -> Result<RunSummary> {
        document.parse_config()?;

        let mut filters: Vec<(FilterDecl, FilterInstance)> =
            Vec::with_capacity(document.filter_decls.len());
        for decl in &document.filter_decls {
            let instance = self.registry.instantiate(decl)?;
            filters.push((decl.clone(), instance));
        }

        let cache_path = self
            .config
            .cache
            .enabled
            .then(|| self.config.cache_path_for(document.path()));
        document.load(self.fetcher.as_ref(), cache_path.as_deref())?;

        if document.entries.is_empty() {
            return Err(EngineError::NoSourceEntries(document.path().to_path_buf()));
        }

        for (decl, instance) in &mut filters {
            info!(filter = %decl.name, action = %instance.action(), "running filter");
            run_filter(document, instance).map_err(|e| EngineError::FilterRuntime {
                filter: decl.name.clone(),
                lines: Some(decl.lines),
                message: format!("{e:#}"),
            })?;
        }

        document.write()?;

        let cache_saved = match &cache_path {
            Some(path) if !document.cache.is_empty() => match document.cache.save(path) {
                Ok(()) => {
                    info!(path = %path.display(), "saved cache");
                    true
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "could not save cache");
                    false
                }
            },
            _ => false,
        };

        Ok(RunSummary {
            entries: document.entries.len(),
            filters_run: filters.len(),
            duplicates: document.duplicates.len(),
            cache_saved,
        })
    }
}

fn run_filter(document: &mut Document, instance: &mut FilterInstance) -> anyhow::Result<()> {
    match instance {
        FilterInstance::Document(filter) => filter.filter_document(document),
        FilterInstance::Database(filter) => {
            let (entries, mut ctx) = document.filter_parts();
            let current = std::mem::take(entries);
            *entries = filter.filter_database(current, &mut ctx)?;
            Ok(())
        }
        FilterInstance::Entry(filter) => {
            let (entries, mut ctx) = document.filter_parts();
            filter.prepare(&mut ctx)?;
            for entry in entries.iter_mut() {
                filter
                    .filter_entry(entry)
                    .with_context(|| format!("entry {}", entry.key))?;
            }
            // an entry filter may have rewritten keys
            let before = entries.len();
            *entries = std::mem::take(entries).into_iter().collect();
            if entries.len() < before {
                warn!(dropped = before - entries.len(), "rewritten keys collided, kept the first entries");
            }
            Ok(())
        }
    }
}
