use bibscope_core::Entry;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

// New format: YYMM.NNNN or YYMM.NNNNN (with optional version)
static NEW_FORMAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4}\.\d{4,5})(v(\d+))?$").expect("valid regex"));

// Old format: category/YYMMNNN
static OLD_FORMAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-zA-Z\-]+(?:\.[A-Z]{2})?)/(\d{7})(v(\d+))?$").expect("valid regex")
});

// An arXiv identifier mentioned inside free text ("arXiv:1234.5678", "arxiv.org/abs/...").
static IN_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)arxiv(?:\.org/(?:abs|pdf)/|:|\s+)\s*(\d{4}\.\d{4,5}(?:v\d+)?|[a-z\-]+(?:\.[a-z]{2})?/\d{7}(?:v\d+)?)",
    )
    .expect("valid regex")
});

// DataCite DOIs minted for arXiv papers: 10.48550/arXiv.2301.04567
static ARXIV_DOI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^10\.48550/arxiv\.(.+)$").expect("valid regex"));

/// A resolved arXiv identifier, as cached per entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArxivInfo {
    /// Identifier without version, e.g. `2301.04567` or `hep-th/9901001`.
    pub id: String,
    pub version: Option<u32>,
    pub category: Option<String>,
}

impl ArxivInfo {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let stripped = ["arXiv:", "arxiv:", "ARXIV:"]
            .iter()
            .find_map(|p| input.strip_prefix(p))
            .unwrap_or(input)
            .trim();

        if let Some(caps) = NEW_FORMAT.captures(stripped) {
            return Ok(Self {
                id: caps[1].to_string(),
                version: caps.get(3).and_then(|v| v.as_str().parse().ok()),
                category: None,
            });
        }

        if let Some(caps) = OLD_FORMAT.captures(stripped) {
            let category = caps[1].to_string();
            return Ok(Self {
                id: format!("{}/{}", category.to_lowercase(), &caps[2]),
                version: caps.get(4).and_then(|v| v.as_str().parse().ok()),
                category: Some(category),
            });
        }

        Err(EngineError::InvalidArxivId(input.to_string()))
    }

    /// Find the arXiv identifier an entry refers to, looking at the fields
    /// BibTeX styles commonly use for it.
    pub fn detect(entry: &Entry) -> Option<Self> {
        let archive = entry
            .non_empty_field("archiveprefix")
            .or_else(|| entry.non_empty_field("eprinttype"))
            .map(|a| a.trim().eq_ignore_ascii_case("arxiv"));
        if let Some(eprint) = entry.non_empty_field("eprint")
            && archive != Some(false)
            && let Ok(info) = Self::parse(eprint)
        {
            return Some(info);
        }

        if let Some(raw) = entry.non_empty_field("arxiv")
            && let Ok(info) = Self::parse(raw)
        {
            return Some(info);
        }

        if let Some(doi) = entry.non_empty_field("doi")
            && let Some(caps) = ARXIV_DOI.captures(doi.trim())
            && let Ok(info) = Self::parse(&caps[1])
        {
            return Some(info);
        }

        ["journal", "url", "note", "howpublished"]
            .iter()
            .filter_map(|field| entry.non_empty_field(field))
            .find_map(|text| {
                IN_TEXT
                    .captures(text)
                    .and_then(|caps| Self::parse(&caps[1]).ok())
            })
    }
}

/// Source of arXiv information for entries. The default looks only at the
/// entry itself; implementations may consult a remote service.
pub trait ArxivLookup: Send + Sync {
    fn lookup(&self, entry: &Entry) -> Option<ArxivInfo>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalArxivLookup;

impl ArxivLookup for LocalArxivLookup {
    fn lookup(&self, entry: &Entry) -> Option<ArxivInfo> {
        ArxivInfo::detect(entry)
    }
}
