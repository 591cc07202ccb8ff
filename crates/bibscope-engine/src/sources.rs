//! Fetching and merging the bibliography sources named by `src:` commands.

use std::path::{Path, PathBuf};

use bibscope_core::bibfile::parse_bibtex;
use bibscope_core::config::FetchConfig;
use bibscope_core::{Entries, Entry};
use thiserror::Error;
use tracing::{debug, info};

use crate::document::SourceDecl;
use crate::error::{EngineError, Result};
use crate::http::HttpFetcher;

/// Why one source location could not be read. Always recoverable: the
/// loader moves on to the next alternative.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Reads the raw text of a source location.
pub trait SourceFetcher {
    fn fetch(&self, location: &str, base_dir: &Path) -> std::result::Result<String, FetchError>;
}

pub fn is_url(location: &str) -> bool {
    let lower = location.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Resolve a local location: `~/` is the home directory, relative paths are
/// taken from `base_dir`.
pub fn resolve_local(location: &str, base_dir: &Path) -> PathBuf {
    if let Some(rest) = location.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    let path = Path::new(location);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Local files plus `http(s)://` URLs.
pub struct DefaultFetcher {
    http: HttpFetcher,
}

impl DefaultFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(config)?,
        })
    }
}

impl SourceFetcher for DefaultFetcher {
    fn fetch(&self, location: &str, base_dir: &Path) -> std::result::Result<String, FetchError> {
        if is_url(location) {
            return self.http.get(location);
        }
        let path = resolve_local(location, base_dir);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(path.display().to_string()))
            }
            Err(err) => Err(FetchError::Io(err)),
        }
    }
}

/// Merge `incoming` into `entries`; an existing key always wins.
/// Returns how many entries were added.
pub fn merge_entries(
    entries: &mut Entries,
    incoming: impl IntoIterator<Item = Entry>,
    origin: &str,
) -> usize {
    let mut added = 0;
    for entry in incoming {
        let key = entry.key.clone();
        if entries.insert(entry) {
            added += 1;
        } else {
            info!(key = %key, source = origin, "duplicate key, keeping the first entry");
        }
    }
    added
}

/// Load every declaration in order. Per declaration the first readable
/// alternative is used; a declaration with none contributes nothing.
pub fn load_sources(
    decls: &[SourceDecl],
    fetcher: &dyn SourceFetcher,
    base_dir: &Path,
) -> Result<Entries> {
    let mut entries = Entries::new();
    for decl in decls {
        let mut loaded = false;
        for location in &decl.alternatives {
            let text = match fetcher.fetch(location, base_dir) {
                Ok(text) => text,
                Err(err) => {
                    debug!(location = %location, error = %err, "source alternative unavailable");
                    continue;
                }
            };
            let parsed = parse_bibtex(&text).map_err(|e| EngineError::SourceParse {
                location: location.clone(),
                message: e.to_string(),
            })?;
            let total = parsed.len();
            let added = merge_entries(&mut entries, parsed, location);
            info!(location = %location, total, added, "loaded source");
            loaded = true;
            break;
        }
        if !loaded {
            info!(
                alternatives = ?decl.alternatives,
                line = decl.lines.0,
                "no readable source among alternatives, skipping"
            );
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    /// In-memory fetcher: unknown locations are not found.
    struct FakeFetcher(HashMap<&'static str, &'static str>);

    impl SourceFetcher for FakeFetcher {
        fn fetch(&self, location: &str, _base_dir: &Path) -> std::result::Result<String, FetchError> {
            self.0
                .get(location)
                .map(|text| text.to_string())
                .ok_or_else(|| FetchError::NotFound(location.to_string()))
        }
    }

    const B_BIB: &str = "@article{b1, title = {First}}\n@book{b2, title = {Second}}\n";

    fn decl(alternatives: &[&str]) -> SourceDecl {
        SourceDecl {
            alternatives: alternatives.iter().map(|s| s.to_string()).collect(),
            lines: (1, 1),
        }
    }

    fn fetcher() -> FakeFetcher {
        FakeFetcher(HashMap::from([
            ("b.bib", B_BIB),
            ("c.bib", "@misc{b1, title = {Shadowed}}\n@misc{c1, title = {Third}}\n"),
        ]))
    }

    #[test]
    fn first_readable_alternative_wins() {
        let entries = load_sources(&[decl(&["a.bib", "b.bib", "c.bib"])], &fetcher(), Path::new(".")).unwrap();
        assert_eq!(entries.keys().collect::<Vec<_>>(), vec!["b1", "b2"]);
        assert_eq!(entries.get("b1").unwrap().field("title"), Some("First"));
    }

    #[test]
    fn unreadable_declaration_contributes_nothing() {
        let entries = load_sources(&[decl(&["a.bib", "z.bib"])], &fetcher(), Path::new(".")).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn merge_keeps_first_entry_per_key() {
        let decls = [decl(&["b.bib"]), decl(&["c.bib"]), decl(&["b.bib"])];
        let entries = load_sources(&decls, &fetcher(), Path::new(".")).unwrap();
        assert_eq!(entries.keys().collect::<Vec<_>>(), vec!["b1", "b2", "c1"]);
        assert_eq!(entries.get("B1").unwrap().field("title"), Some("First"));
    }

    #[test]
    fn merging_twice_is_a_no_op() {
        let mut entries = Entries::new();
        let parsed = parse_bibtex(B_BIB).unwrap();
        assert_eq!(merge_entries(&mut entries, parsed.clone(), "b.bib"), 2);
        let before = entries.clone();
        assert_eq!(merge_entries(&mut entries, parsed, "b.bib"), 0);
        assert_eq!(entries, before);
    }

    #[test]
    fn local_paths_resolve_against_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("refs.bib"), B_BIB).unwrap();
        let fetcher = DefaultFetcher::new(&FetchConfig::default()).unwrap();

        let text = fetcher.fetch("refs.bib", dir.path()).unwrap();
        assert!(text.contains("b1"));
        assert!(matches!(
            fetcher.fetch("missing.bib", dir.path()),
            Err(FetchError::NotFound(_))
        ));
    }

    #[test]
    fn location_kinds() {
        assert!(is_url("https://example.org/refs.bib"));
        assert!(is_url("HTTP://example.org/refs.bib"));
        assert!(!is_url("refs.bib"));
        assert_eq!(resolve_local("/abs/refs.bib", Path::new("/base")), PathBuf::from("/abs/refs.bib"));
        assert_eq!(resolve_local("sub/refs.bib", Path::new("/base")), PathBuf::from("/base/sub/refs.bib"));
    }
}
