use anyhow::bail;
use bibscope_core::Entry;

use crate::filter::{EntryFilter, FilterAction, FilterInstance};
use crate::lexer::split_words;
use crate::options::{BoundArgs, FilterArgs, OptionSchema, OptionValue};
use crate::registry::FilterFactory;

const HELP: &str = "Remove fields from every entry, or keep only some of them.

Options are written as `name=value` pairs, e.g. `remove=abstract,file`.

  - remove (list): fields to drop
  - keep (list): fields to keep; every other field is dropped
";

pub struct FieldsFactory;

impl FilterFactory for FieldsFactory {
    fn name(&self) -> &str {
        "fields"
    }

    fn description(&self) -> &str {
        HELP.lines().next().unwrap_or_default()
    }

    fn action(&self) -> FilterAction {
        FilterAction::SingleEntry
    }

    fn schema(&self) -> OptionSchema {
        OptionSchema::from_doc(HELP)
    }

    fn parse_options(&self, text: &str) -> Option<Result<FilterArgs, String>> {
        Some(parse_assignments(text))
    }

    fn build(&self, args: &BoundArgs) -> anyhow::Result<FilterInstance> {
        let lower = |names: &[String]| -> Vec<String> {
            names.iter().map(|n| n.to_lowercase()).collect()
        };
        let rule = match (args.list("remove"), args.list("keep")) {
            (Some(_), Some(_)) => bail!("`remove` and `keep` cannot be combined"),
            (Some(remove), None) => FieldRule::Remove(lower(remove)),
            (None, Some(keep)) => FieldRule::Keep(lower(keep)),
            (None, None) => bail!("nothing to do: give `remove=...` or `keep=...`"),
        };
        Ok(FilterInstance::Entry(Box::new(FieldsFilter { rule })))
    }
}

/// `name=value` words; values become strings and are cast when bound.
fn parse_assignments(text: &str) -> Result<FilterArgs, String> {
    let mut args = FilterArgs::default();
    for word in split_words(text)? {
        let Some((name, value)) = word.split_once('=') else {
            return Err(format!("expected name=value, got {word:?}"));
        };
        let name = name.trim().to_lowercase();
        if args.named.contains_key(&name) {
            return Err(format!("option '{name}' given more than once"));
        }
        args.named.insert(name, OptionValue::Str(value.to_string()));
    }
    Ok(args)
}

enum FieldRule {
    Remove(Vec<String>),
    Keep(Vec<String>),
}

struct FieldsFilter {
    rule: FieldRule,
}

impl EntryFilter for FieldsFilter {
    fn filter_entry(&self, entry: &mut Entry) -> anyhow::Result<()> {
        match &self.rule {
            FieldRule::Remove(names) => {
                for name in names {
                    entry.remove_field(name);
                }
            }
            FieldRule::Keep(names) => {
                for name in entry.field_names() {
                    if !names.contains(&name) {
                        entry.remove_field(&name);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::FilterDecl;
    use crate::error::EngineError;
    use crate::registry::{FilterPackage, FilterRegistry};

    fn registry() -> FilterRegistry {
        let mut registry = FilterRegistry::new();
        registry.register(FilterPackage::new("builtin", "").with(FieldsFactory));
        registry
    }

    fn instantiate(options: &str) -> crate::error::Result<FilterInstance> {
        registry().instantiate(&FilterDecl {
            name: "fields".to_string(),
            options: options.to_string(),
            lines: (1, 1),
        })
    }

    fn entry() -> Entry {
        Entry::new("k", "article")
            .with_field("title", "T")
            .with_field("abstract", "long text")
            .with_field("file", "paper.pdf")
            .with_field("year", "2020")
    }

    fn apply(options: &str) -> Entry {
        let FilterInstance::Entry(filter) = instantiate(options).unwrap() else {
            panic!("expected an entry filter");
        };
        let mut entry = entry();
        filter.filter_entry(&mut entry).unwrap();
        entry
    }

    #[test]
    fn removes_listed_fields() {
        let entry = apply("remove=Abstract,file");
        assert_eq!(entry.field_names(), vec!["title", "year"]);
    }

    #[test]
    fn keeps_only_listed_fields() {
        let entry = apply("keep=title");
        assert_eq!(entry.field_names(), vec!["title"]);
    }

    #[test]
    fn option_errors() {
        assert!(matches!(
            instantiate("remove"),
            Err(EngineError::FilterOptions { .. })
        ));
        assert!(matches!(
            instantiate("drop=abstract"),
            Err(EngineError::FilterBind { .. })
        ));
        assert!(matches!(
            instantiate("remove=a keep=b"),
            Err(EngineError::FilterConstruction { .. })
        ));
        assert!(matches!(
            instantiate(""),
            Err(EngineError::FilterConstruction { .. })
        ));
    }
}
