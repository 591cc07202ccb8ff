use thiserror::Error;

/// All errors that can occur in bibscope-core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("BibTeX parse error: {0}")]
    BibtexParse(String),

    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error")]
    TomlSerialize(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
