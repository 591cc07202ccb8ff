use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use bibscope_core::cache::{AllOf, EntryHashChecker, VersionChecker};
use bibscope_core::{CachePath, TokenContext};
use tracing::{debug, info, warn};

use crate::dedup::{DuplicateMatcher, DuplicateRecord};
use crate::document::Document;
use crate::filter::{DocumentFilter, FilterAction, FilterInstance};
use crate::identifiers::{ArxivInfo, ArxivLookup, LocalArxivLookup};
use crate::options::{BoundArgs, OptionSchema, OptionValue};
use crate::registry::FilterFactory;

const HELP: &str = "Detect duplicate entries and merge them into the first occurrence.

Entries match when their authors, year and month agree and either a DOI or
arXiv identifier coincides, or no weaker field (note, journal, volume, number,
title) contradicts.

  - dupfile (str): write \\bibalias definitions for every duplicate to this
      file, relative to the bibliography
  - warn (bool): log every duplicate found
  - merge (bool): fill in fields missing from the kept entry using its
      duplicates
  - custom_bibalias (bool): do not emit the \\bibalias macro definition in the
      dupfile
";

/// Cache namespace holding the arXiv information resolved per entry key.
const ARXIV_CACHE: &str = "arxiv_info";

/// Bumped whenever the cached arXiv information changes shape or meaning.
const ARXIV_CACHE_VERSION: &str = "1";

/// Entry fields the arXiv detection looks at.
const ARXIV_FIELDS: [&str; 9] = [
    "eprint",
    "archiveprefix",
    "eprinttype",
    "arxiv",
    "journal",
    "url",
    "doi",
    "note",
    "howpublished",
];

const BIBALIAS_DEFINITION: &str = "\\makeatletter
\\providecommand*\\bibalias[2]{%
  \\global\\@namedef{bibalias@#1}{#2}}
\\makeatother
";

/// Builds [`DuplicatesFilter`]s sharing one arXiv lookup.
#[derive(Clone)]
pub struct DuplicatesFactory {
    lookup: Arc<dyn ArxivLookup>,
}

impl Default for DuplicatesFactory {
    fn default() -> Self {
        Self {
            lookup: Arc::new(LocalArxivLookup),
        }
    }
}

impl DuplicatesFactory {
    /// Resolve arXiv information through `lookup` on cache misses.
    pub fn with_lookup(mut self, lookup: Arc<dyn ArxivLookup>) -> Self {
        self.lookup = lookup;
        self
    }
}

impl FilterFactory for DuplicatesFactory {
    fn name(&self) -> &str {
        "duplicates"
    }

    fn description(&self) -> &str {
        HELP.lines().next().unwrap_or_default()
    }

    fn action(&self) -> FilterAction {
        FilterAction::WholeDocument
    }

    fn schema(&self) -> OptionSchema {
        OptionSchema::from_doc(HELP).with_default("merge", OptionValue::Bool(true))
    }

    fn build(&self, args: &BoundArgs) -> anyhow::Result<FilterInstance> {
        if let Some(dupfile) = args.str("dupfile")
            && dupfile.trim().is_empty()
        {
            anyhow::bail!("dupfile must not be empty");
        }
        Ok(FilterInstance::Document(Box::new(DuplicatesFilter {
            dupfile: args.str("dupfile").map(PathBuf::from),
            warn: args.flag("warn", false),
            merge: args.flag("merge", true),
            custom_bibalias: args.flag("custom_bibalias", false),
            lookup: Arc::clone(&self.lookup),
        })))
    }
}

pub struct DuplicatesFilter {
    dupfile: Option<PathBuf>,
    warn: bool,
    merge: bool,
    custom_bibalias: bool,
    lookup: Arc<dyn ArxivLookup>,
}

impl DuplicatesFilter {
    /// arXiv information per entry key, served from the cache where it is
    /// still valid.
    fn arxiv_info(&self, document: &mut Document) -> HashMap<String, ArxivInfo> {
        let path = CachePath::new([ARXIV_CACHE]);
        let checker = AllOf::default()
            .and(VersionChecker::new(ARXIV_CACHE_VERSION))
            .and(EntryHashChecker::new(ARXIV_FIELDS).with_entry_type());
        document.cache.set_checker(&path, Arc::new(checker));

        let ctx = TokenContext::with_entries(&document.entries);
        document.cache.validate(&path, &ctx);

        let mut found = HashMap::new();
        let mut hits = 0usize;
        for entry in document.entries.iter() {
            let info = match document.cache.get_as::<Option<ArxivInfo>>(&path, &entry.key, &ctx) {
                Some(cached) => {
                    hits += 1;
                    cached
                }
                None => {
                    let info = self.lookup.lookup(entry);
                    if let Err(err) = document.cache.set(&path, &entry.key, &info, &ctx) {
                        debug!(key = %entry.key, error = %err, "could not cache arXiv info");
                    }
                    info
                }
            };
            if let Some(info) = info {
                found.insert(entry.key.clone(), info);
            }
        }
        debug!(entries = document.entries.len(), cache_hits = hits, "resolved arXiv info");
        found
    }

    fn write_dupfile(&self, document: &Document, target: &Path) -> anyhow::Result<()> {
        let path = document.base_dir().join(target);
        let mut out = String::new();
        writeln!(out, "%")?;
        writeln!(
            out,
            "% Duplicate entries of {}, generated by bibscope.",
            document.path().display()
        )?;
        writeln!(out, "%")?;
        if !self.custom_bibalias {
            out.push_str(BIBALIAS_DEFINITION);
        }
        out.push('\n');
        for DuplicateRecord { alias, original } in &document.duplicates {
            writeln!(out, "\\bibalias{{{alias}}}{{{original}}}")?;
        }
        std::fs::write(&path, out)
            .with_context(|| format!("cannot write dupfile {}", path.display()))?;
        info!(path = %path.display(), aliases = document.duplicates.len(), "wrote dupfile");
        Ok(())
    }
}

impl DocumentFilter for DuplicatesFilter {
    fn filter_document(&mut self, document: &mut Document) -> anyhow::Result<()> {
        let arxiv = self.arxiv_info(document);

        let entries = std::mem::take(&mut document.entries);
        let outcome = DuplicateMatcher::new()
            .with_merge(self.merge)
            .run(entries, &arxiv);
        document.entries = outcome.entries;

        if self.warn {
            for record in &outcome.duplicates {
                warn!(alias = %record.alias, original = %record.original, "duplicate entry");
            }
        }
        info!(duplicates = outcome.duplicates.len(), "duplicate detection finished");
        document.duplicates.extend(outcome.duplicates);

        if let Some(target) = &self.dupfile {
            self.write_dupfile(document, target)?;
        }
        Ok(())
    }
}
