//! Duplicate detection over a whole entry set.
//!
//! Every entry is compared against the entries kept so far with an ordered
//! rule chain; the first kept entry that matches absorbs the duplicate.

use std::collections::HashMap;

use bibscope_core::{Entries, Entry};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::identifiers::{ArxivInfo, Doi};
use crate::normalize::{clean_name, clean_note, clean_title, normalize_journal};

/// `alias` was found to duplicate the kept entry `original`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateRecord {
    pub alias: String,
    pub original: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AuthorKey {
    last: String,
    initial: Option<char>,
}

/// Pre-folded fields of one entry, computed once per run.
#[derive(Debug, Clone, Default)]
pub struct ComparisonData {
    authors: Vec<AuthorKey>,
    title: Option<String>,
    journal: Option<String>,
    arxiv: Option<String>,
    note: Option<String>,
    doi: Option<String>,
    year: Option<String>,
    month: Option<String>,
    volume: Option<String>,
    number: Option<String>,
}

fn non_blank(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

fn trimmed(entry: &Entry, field: &str) -> Option<String> {
    entry
        .non_empty_field(field)
        .map(|v| v.trim().trim_matches(|c| c == '{' || c == '}').trim().to_lowercase())
        .and_then(non_blank)
}

impl ComparisonData {
    pub fn for_entry(entry: &Entry, arxiv: Option<&ArxivInfo>) -> Self {
        let authors = entry
            .persons("author")
            .iter()
            .map(|person| AuthorKey {
                last: clean_name(&person.last),
                initial: clean_name(&person.given_names()).chars().next(),
            })
            .collect();

        Self {
            authors,
            title: entry.non_empty_field("title").map(clean_title).and_then(non_blank),
            journal: entry
                .non_empty_field("journal")
                .map(normalize_journal)
                .and_then(non_blank),
            arxiv: arxiv.map(|info| info.id.clone()),
            note: entry.non_empty_field("note").map(clean_note).and_then(non_blank),
            doi: Doi::from_entry(entry).map(|doi| doi.as_str().to_string()),
            year: trimmed(entry, "year"),
            month: trimmed(entry, "month"),
            volume: trimmed(entry, "volume"),
            number: trimmed(entry, "number"),
        }
    }
}

/// Maximum edit distance tolerated between two last names.
fn name_tolerance(a: &str, b: &str) -> usize {
    let len = a.chars().count().max(b.chars().count());
    1 + len / 8
}

fn same_author(a: &AuthorKey, b: &AuthorKey) -> bool {
    if strsim::levenshtein(&a.last, &b.last) > name_tolerance(&a.last, &b.last) {
        return false;
    }
    match (a.initial, b.initial) {
        (Some(x), Some(y)) => x == y,
        _ => true,
    }
}

/// Both sides declare the value and they differ.
fn conflict(a: &Option<String>, b: &Option<String>) -> bool {
    matches!((a, b), (Some(x), Some(y)) if x != y)
}

/// Decide whether two entries describe the same work.
///
/// Authors, year and month must agree first. A shared DOI or arXiv ID then
/// settles the question either way; otherwise note, journal, volume, number
/// and title may each still reject the pair.
pub fn compare_entries_same(a: &ComparisonData, b: &ComparisonData) -> bool {
    if a.authors.len() != b.authors.len() {
        return false;
    }
    if !a.authors.iter().zip(&b.authors).all(|(x, y)| same_author(x, y)) {
        return false;
    }

    if conflict(&a.year, &b.year) || conflict(&a.month, &b.month) {
        return false;
    }

    if let (Some(x), Some(y)) = (&a.doi, &b.doi) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (&a.arxiv, &b.arxiv) {
        return x == y;
    }

    if conflict(&a.note, &b.note) {
        return false;
    }
    if conflict(&a.journal, &b.journal) {
        return false;
    }
    if conflict(&a.volume, &b.volume) || conflict(&a.number, &b.number) {
        return false;
    }
    if conflict(&a.title, &b.title) {
        return false;
    }

    true
}

#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub entries: Entries,
    pub duplicates: Vec<DuplicateRecord>,
}

/// First-fit greedy matcher: an entry joins the first kept entry it matches.
#[derive(Debug, Clone)]
pub struct DuplicateMatcher {
    merge: bool,
}

impl Default for DuplicateMatcher {
    fn default() -> Self {
        Self { merge: true }
    }
}

impl DuplicateMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether kept entries take over fields their duplicates have and they lack.
    pub fn with_merge(mut self, merge: bool) -> Self {
        self.merge = merge;
        self
    }

    /// `arxiv` maps entry keys to their resolved arXiv identifiers.
    pub fn run(&self, entries: Entries, arxiv: &HashMap<String, ArxivInfo>) -> DedupOutcome {
        let mut kept: Vec<(Entry, ComparisonData)> = Vec::with_capacity(entries.len());
        let mut duplicates = Vec::new();

        for entry in entries {
            let data = ComparisonData::for_entry(&entry, arxiv.get(&entry.key));
            let matched = kept
                .iter()
                .position(|(_, kept_data)| compare_entries_same(kept_data, &data));

            match matched {
                Some(idx) => {
                    let (original, original_data) = &mut kept[idx];
                    if self.merge {
                        let filled = original.fill_missing_from(&entry);
                        if !filled.is_empty() {
                            debug!(key = %original.key, from = %entry.key, ?filled, "merged fields");
                            *original_data =
                                ComparisonData::for_entry(original, arxiv.get(&original.key));
                        }
                    }
                    duplicates.push(DuplicateRecord {
                        alias: entry.key.clone(),
                        original: original.key.clone(),
                    });
                }
                None => kept.push((entry, data)),
            }
        }

        DedupOutcome {
            entries: kept.into_iter().map(|(entry, _)| entry).collect(),
            duplicates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(key: &str, author: &str, year: &str) -> Entry {
        Entry::new(key, "article")
            .with_field("author", author)
            .with_field("year", year)
    }

    fn data(entry: &Entry) -> ComparisonData {
        ComparisonData::for_entry(entry, None)
    }

    fn dedup(entries: Vec<Entry>) -> DedupOutcome {
        DuplicateMatcher::new().run(entries.into_iter().collect(), &HashMap::new())
    }

    #[test]
    fn transliterated_author_with_same_doi_is_duplicate() {
        let a = article("A", "J. Koenig", "2020").with_field("doi", "10.1/x");
        let b = article("B", "J. K{\\\"o}nig", "2020").with_field("doi", "10.1/x");
        let outcome = dedup(vec![a, b]);
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(
            outcome.duplicates,
            vec![DuplicateRecord {
                alias: "B".to_string(),
                original: "A".to_string()
            }]
        );

        let b = article("B", "J. König", "2020").with_field("doi", "10.1/x");
        let a = article("A", "J. Koenig", "2020").with_field("doi", "10.1/x");
        assert!(compare_entries_same(&data(&a), &data(&b)));
    }

    #[test]
    fn different_dois_are_not_duplicates() {
        let a = article("A", "J. Koenig", "2020").with_field("doi", "10.1/x");
        let b = article("B", "J. König", "2020").with_field("doi", "10.1/y");
        let outcome = dedup(vec![a, b]);
        assert_eq!(outcome.entries.len(), 2);
        assert!(outcome.duplicates.is_empty());
    }

    #[test]
    fn author_count_and_initials_must_agree() {
        let a = article("A", "J. Smith and K. Jones", "2020");
        let b = article("B", "J. Smith", "2020");
        assert!(!compare_entries_same(&data(&a), &data(&b)));

        let a = article("A", "J. Smith", "2020");
        let b = article("B", "P. Smith", "2020");
        assert!(!compare_entries_same(&data(&a), &data(&b)));

        // missing initial on one side is not a conflict
        let a = article("A", "Smith", "2020");
        let b = article("B", "Smith, Paul", "2020");
        assert!(compare_entries_same(&data(&a), &data(&b)));
    }

    #[test]
    fn name_tolerance_grows_with_length() {
        // 1 + floor(17/8) = 3 edits allowed for a 17-letter name
        let a = article("A", "A. Vandermeulenbroek", "2020");
        let b = article("B", "A. Vandermoelenbroek", "2020");
        assert!(compare_entries_same(&data(&a), &data(&b)));

        let a = article("A", "A. Li", "2020");
        let b = article("B", "A. Liu", "2020");
        assert!(compare_entries_same(&data(&a), &data(&b)));

        let a = article("A", "A. Li", "2020");
        let b = article("B", "A. Lium", "2020");
        assert!(!compare_entries_same(&data(&a), &data(&b)));
    }

    #[test]
    fn year_mismatch_rejects_even_with_same_doi() {
        let a = article("A", "J. Smith", "2020").with_field("doi", "10.1/x");
        let b = article("B", "J. Smith", "2021").with_field("doi", "10.1/x");
        assert!(!compare_entries_same(&data(&a), &data(&b)));
    }

    #[test]
    fn equal_doi_short_circuits_title_check() {
        let a = article("A", "J. Smith", "2020")
            .with_field("doi", "10.1/x")
            .with_field("title", "Preprint title");
        let b = article("B", "J. Smith", "2020")
            .with_field("doi", "https://doi.org/10.1/X")
            .with_field("title", "Published title");
        assert!(compare_entries_same(&data(&a), &data(&b)));
    }

    #[test]
    fn arxiv_ids_decide_when_no_doi() {
        let a = article("A", "J. Smith", "2020").with_field("title", "One");
        let b = article("B", "J. Smith", "2020").with_field("title", "Two");
        let info = ArxivInfo::parse("2001.00001").unwrap();
        let other = ArxivInfo::parse("2001.00002").unwrap();
        let same_a = ComparisonData::for_entry(&a, Some(&info));
        let same_b = ComparisonData::for_entry(&b, Some(&info));
        assert!(compare_entries_same(&same_a, &same_b));

        let diff_b = ComparisonData::for_entry(&b, Some(&other));
        assert!(!compare_entries_same(&same_a, &diff_b));
    }

    #[test]
    fn weak_fields_reject_without_identifiers() {
        let base = article("A", "J. Smith", "2020").with_field("title", "On Things");

        let other = base.clone().with_field("journal", "Physical Review A");
        let b = base.clone().with_field("journal", "Physical Review B");
        assert!(!compare_entries_same(&data(&other), &data(&b)));

        let a = base.clone().with_field("volume", "12");
        let b = base.clone().with_field("volume", "13");
        assert!(!compare_entries_same(&data(&a), &data(&b)));

        let a = base.clone().with_field("note", "Erratum");
        let b = base.clone().with_field("note", "Reply");
        assert!(!compare_entries_same(&data(&a), &data(&b)));

        let b = article("B", "J. Smith", "2020").with_field("title", "On Other Things");
        assert!(!compare_entries_same(&data(&base), &data(&b)));
    }

    #[test]
    fn title_match_ignores_markup_and_case() {
        let a = article("A", "J. Smith", "2020")
            .with_field("title", "The {Ising} model in $d=3$")
            .with_field("journal", "Phys. Rev. Lett.");
        let b = article("B", "J. Smith", "2020")
            .with_field("title", "The Ising Model in")
            .with_field("journal", "Physical Review Letters");
        assert!(compare_entries_same(&data(&a), &data(&b)));
    }

    #[test]
    fn merge_fills_missing_fields_only() {
        let a = article("A", "J. Smith", "2020").with_field("title", "T");
        let b = article("B", "J. Smith", "2020")
            .with_field("title", "T")
            .with_field("pages", "1--10");
        let outcome = dedup(vec![a.clone(), b.clone()]);
        let kept = outcome.entries.get("A").unwrap();
        assert_eq!(kept.field("pages"), Some("1--10"));
        assert_eq!(kept.field("title"), Some("T"));

        let outcome = DuplicateMatcher::new()
            .with_merge(false)
            .run(vec![a, b].into_iter().collect(), &HashMap::new());
        assert_eq!(outcome.entries.get("A").unwrap().field("pages"), None);
        assert_eq!(outcome.duplicates.len(), 1);
    }

    #[test]
    fn chains_collapse_to_first_seen() {
        let a = article("A", "J. Smith", "2020").with_field("title", "T");
        let b = article("B", "J. Smith", "2020").with_field("title", "T");
        let c = article("C", "J. Smith", "2020").with_field("title", "T");
        let outcome = dedup(vec![a, b, c]);
        let originals: Vec<_> = outcome.duplicates.iter().map(|d| d.original.as_str()).collect();
        assert_eq!(originals, vec!["A", "A"]);
        assert_eq!(outcome.entries.keys().collect::<Vec<_>>(), vec!["A"]);
    }
}
