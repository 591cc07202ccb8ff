pub mod entry;
pub mod person;

pub use entry::{Entries, Entry, PERSON_ROLES};
pub use person::{Person, format_person_list};
