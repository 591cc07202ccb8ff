use std::path::PathBuf;

use thiserror::Error;

/// Line span `(first, last)` of a command inside the target document, 1-based.
pub type LineSpan = (usize, usize);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{file}:{line}: config error: {message}")]
    ConfigParse {
        file: String,
        line: usize,
        message: String,
    },

    #[error("no such filter: {name} ({})", .tried.join("; "))]
    NoSuchFilter { name: String, tried: Vec<String> },

    #[error("no such filter package: {0}")]
    NoSuchFilterPackage(String),

    #[error("filter {filter}: bad option string: {message}")]
    FilterOptions { filter: String, message: String },

    #[error("filter {filter}: bad arguments: {message}")]
    FilterBind { filter: String, message: String },

    #[error("filter {filter}: construction failed: {message}")]
    FilterConstruction { filter: String, message: String },

    #[error("filter {filter}{}: {message}", format_span(.lines))]
    FilterRuntime {
        filter: String,
        lines: Option<LineSpan>,
        message: String,
    },

    #[error("no entries loaded from any source of {}; refusing to overwrite it", .0.display())]
    NoSourceEntries(PathBuf),

    #[error("cannot parse source {location}: {message}")]
    SourceParse { location: String, message: String },

    #[error("document is {found}, expected {expected}")]
    InvalidState { expected: String, found: String },

    #[error("invalid DOI: {0}")]
    InvalidDoi(String),

    #[error("invalid arXiv ID: {0}")]
    InvalidArxivId(String),

    #[error("HTTP error")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Core(#[from] bibscope_core::CoreError),

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

fn format_span(lines: &Option<LineSpan>) -> String {
    match lines {
        Some((first, last)) if first == last => format!(" (line {first})"),
        Some((first, last)) => format!(" (lines {first}-{last})"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
