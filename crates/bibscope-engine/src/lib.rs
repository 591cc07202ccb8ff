//! bibscope engine: target documents, filter registry and pipeline,
//! source loading and duplicate detection.

pub mod dedup;
pub mod document;
pub mod error;
pub mod filter;
pub mod filters;
pub mod http;
pub mod identifiers;
pub mod lexer;
pub mod normalize;
pub mod options;
pub mod pipeline;
pub mod registry;
pub mod sources;

pub use dedup::{DedupOutcome, DuplicateMatcher, DuplicateRecord};
pub use document::{BEGIN_CONFIG, Document, DocumentState, END_CONFIG, FilterDecl, SourceDecl};
pub use error::{EngineError, LineSpan, Result};
pub use filter::{
    DatabaseFilter, DocumentFilter, EntryFilter, FilterAction, FilterContext, FilterInstance,
};
pub use filters::{BUILTIN_PACKAGE, builtin_package};
pub use options::{BoundArgs, FilterArgs, OptionSchema, OptionValue, ParamType};
pub use pipeline::{Pipeline, RunSummary};
pub use registry::{FilterFactory, FilterPackage, FilterRegistry, ResolvedFilter};
pub use sources::{DefaultFetcher, FetchError, SourceFetcher};
