use std::cmp::Ordering;

use anyhow::bail;
use bibscope_core::{Entries, Entry};
use tracing::debug;

use crate::filter::{DatabaseFilter, FilterAction, FilterContext, FilterInstance};
use crate::options::{BoundArgs, OptionSchema};
use crate::registry::FilterFactory;

const HELP: &str = "Reorder the entries of the bibliography.

  - order (str): `key` (alphabetical by citation key, the default), `year`
      (oldest first) or `-year` (newest first)
  - reverse (bool): reverse the resulting order
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortKey {
    Key,
    Year,
    YearDescending,
}

pub struct OrderEntriesFactory;

impl FilterFactory for OrderEntriesFactory {
    fn name(&self) -> &str {
        "orderentries"
    }

    fn description(&self) -> &str {
        HELP.lines().next().unwrap_or_default()
    }

    fn action(&self) -> FilterAction {
        FilterAction::WholeDatabase
    }

    fn schema(&self) -> OptionSchema {
        OptionSchema::from_doc(HELP)
    }

    fn build(&self, args: &BoundArgs) -> anyhow::Result<FilterInstance> {
        let key = match args.str("order").unwrap_or("key").trim() {
            "key" => SortKey::Key,
            "year" => SortKey::Year,
            "-year" => SortKey::YearDescending,
            other => bail!("unknown order '{other}', expected key, year or -year"),
        };
        Ok(FilterInstance::Database(Box::new(OrderEntries {
            key,
            reverse: args.flag("reverse", false),
        })))
    }
}

struct OrderEntries {
    key: SortKey,
    reverse: bool,
}

/// Leading digits of the year field; entries without one sort last.
fn year_of(entry: &Entry) -> Option<i32> {
    let year = entry.non_empty_field("year")?;
    let digits: String = year
        .trim()
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

fn compare_years(a: Option<i32>, b: Option<i32>, descending: bool) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) if descending => y.cmp(&x),
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl DatabaseFilter for OrderEntries {
    fn filter_database(
        &mut self,
        mut entries: Entries,
        _ctx: &mut FilterContext<'_>,
    ) -> anyhow::Result<Entries> {
        match self.key {
            SortKey::Key => entries.sort_by(|a, b| a.key.to_lowercase().cmp(&b.key.to_lowercase())),
            SortKey::Year => entries.sort_by(|a, b| compare_years(year_of(a), year_of(b), false)),
            SortKey::YearDescending => {
                entries.sort_by(|a, b| compare_years(year_of(a), year_of(b), true))
            }
        }
        if self.reverse {
            entries = entries.into_iter().rev().collect();
        }
        debug!(order = ?self.key, reverse = self.reverse, "reordered entries");
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use bibscope_core::CacheStore;

    use super::*;
    use crate::options::parse_option_string;

    fn run(options: &str, entries: Vec<Entry>) -> anyhow::Result<Vec<String>> {
        let factory = OrderEntriesFactory;
        let schema = factory.schema();
        let args = schema
            .bind(parse_option_string(&schema, options).map_err(anyhow::Error::msg)?)
            .map_err(anyhow::Error::msg)?;
        let FilterInstance::Database(mut filter) = factory.build(&args)? else {
            bail!("expected a database filter");
        };
        let mut cache = CacheStore::new();
        let mut ctx = FilterContext {
            document_path: Path::new("refs.bib"),
            cache: &mut cache,
        };
        let sorted = filter.filter_database(entries.into_iter().collect(), &mut ctx)?;
        Ok(sorted.keys().map(String::from).collect())
    }

    fn sample() -> Vec<Entry> {
        vec![
            Entry::new("smith", "article").with_field("year", "2019"),
            Entry::new("Adams", "article").with_field("year", "2021"),
            Entry::new("nodate", "misc"),
            Entry::new("jones", "article").with_field("year", "{2019}"),
        ]
    }

    #[test]
    fn default_orders_by_key() {
        assert_eq!(run("", sample()).unwrap(), vec!["Adams", "jones", "nodate", "smith"]);
    }

    #[test]
    fn orders_by_year_stably() {
        assert_eq!(
            run("-sOrder=year", sample()).unwrap(),
            vec!["smith", "jones", "Adams", "nodate"]
        );
        assert_eq!(
            run("-sOrder=-year", sample()).unwrap(),
            vec!["Adams", "smith", "jones", "nodate"]
        );
    }

    #[test]
    fn reverse_flag() {
        assert_eq!(
            run("--order key -dReverse", sample()).unwrap(),
            vec!["smith", "nodate", "jones", "Adams"]
        );
    }

    #[test]
    fn unknown_order_fails_to_build() {
        let err = run("-sOrder=title", sample()).unwrap_err();
        assert!(err.to_string().contains("unknown order"));
    }
}
