//! Filters shipped with bibscope.

pub mod duplicates;
pub mod fields;
pub mod orderentries;

use crate::registry::FilterPackage;

pub use duplicates::{DuplicatesFactory, DuplicatesFilter};
pub use fields::FieldsFactory;
pub use orderentries::OrderEntriesFactory;

pub const BUILTIN_PACKAGE: &str = "builtin";

pub fn builtin_package() -> FilterPackage {
    FilterPackage::new(BUILTIN_PACKAGE, "Filters shipped with bibscope")
        .with(DuplicatesFactory::default())
        .with(OrderEntriesFactory)
        .with(FieldsFactory)
}
