pub mod arxiv;
pub mod doi;

pub use arxiv::{ArxivInfo, ArxivLookup, LocalArxivLookup};
pub use doi::Doi;
