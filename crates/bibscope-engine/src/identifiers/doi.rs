use bibscope_core::Entry;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{EngineError, Result};

static DOI_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^https?://(?:dx\.)?doi\.org/(10\..+)$").expect("valid regex")
});

/// A DOI in canonical lower-case form, without resolver prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Doi(String);

impl Doi {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let stripped = if let Some(caps) = DOI_URL.captures(input) {
            caps.get(1).map_or(input, |m| m.as_str())
        } else if input.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("doi:")) {
            input[4..].trim_start()
        } else {
            input
        };

        // must start with "10.", contain "/", and have a non-empty suffix
        let Some((prefix, suffix)) = stripped.split_once('/') else {
            return Err(EngineError::InvalidDoi(input.to_string()));
        };
        if !prefix.starts_with("10.") || prefix.len() < 4 || suffix.trim().is_empty() {
            return Err(EngineError::InvalidDoi(input.to_string()));
        }

        Ok(Self(stripped.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// DOI of an entry: the `doi` field, else a doi.org `url`.
    pub fn from_entry(entry: &Entry) -> Option<Self> {
        if let Some(raw) = entry.non_empty_field("doi") {
            return Self::parse(raw).ok();
        }
        entry
            .non_empty_field("url")
            .filter(|url| DOI_URL.is_match(url.trim()))
            .and_then(|url| Self::parse(url).ok())
    }
}
