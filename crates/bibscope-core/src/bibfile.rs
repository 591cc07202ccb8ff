//! BibTeX text ⇄ [`Entry`] conversion.
//!
//! Parsing uses the raw layer of the `biblatex` crate, so field values keep
//! their LaTeX source text and fields keep their source order. Writing uses
//! our own serializer.

use std::collections::HashMap;

use biblatex::{Field, RawBibliography, RawChunk};
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::models::Entry;

/// Parse BibTeX source into entries, in file order. `@string` abbreviations
/// are expanded; month names and unknown abbreviations stay as written.
pub fn parse_bibtex(source: &str) -> Result<Vec<Entry>> {
    let raw = RawBibliography::parse(source).map_err(|e| CoreError::BibtexParse(e.to_string()))?;

    let mut strings: HashMap<String, String> = HashMap::new();
    for pair in &raw.abbreviations {
        let value = field_to_latex(&pair.value.v, &strings);
        strings.insert(pair.key.v.to_lowercase(), value);
    }

    let mut entries = Vec::with_capacity(raw.entries.len());
    for parsed in &raw.entries {
        let mut entry = Entry::new(parsed.v.key.v, parsed.v.kind.v);
        for pair in &parsed.v.fields {
            let name = pair.key.v;
            if entry.has_field(name) {
                debug!(key = %entry.key, field = name, "repeated field, keeping the first value");
                continue;
            }
            entry.set_field(name, field_to_latex(&pair.value.v, &strings));
        }
        entries.push(entry);
    }
    Ok(entries)
}

/// Join the `#`-concatenated parts of a raw field value.
fn field_to_latex(field: &Field<'_>, strings: &HashMap<String, String>) -> String {
    let mut out = String::new();
    for chunk in field {
        match chunk.v {
            RawChunk::Normal(text) => out.push_str(text),
            RawChunk::Abbreviation(name) => match strings.get(&name.to_lowercase()) {
                Some(value) => out.push_str(value),
                None => out.push_str(name),
            },
        }
    }
    out
}

/// Serialize one entry as `@type{key,\n  field = {value},\n}`.
pub fn write_entry(entry: &Entry) -> String {
    let mut bib = format!("@{}{{{},\n", entry.entry_type, entry.key);
    for (name, value) in entry.fields() {
        bib.push_str(&format!("  {} = {{{}}},\n", name, protect_braces(value)));
    }
    bib.push_str("}\n");
    bib
}

/// Serialize entries separated by blank lines.
pub fn write_entries<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> String {
    entries
        .into_iter()
        .map(write_entry)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Values with unbalanced braces would swallow the rest of the file; escape them.
fn protect_braces(value: &str) -> String {
    let mut depth = 0i64;
    for c in value.chars() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    break;
                }
            }
            _ => {}
        }
    }
    if depth == 0 {
        value.to_string()
    } else {
        value.replace('{', "\\{").replace('}', "\\}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
@article{einstein1935,
  author = {Einstein, A. and Podolsky, B. and Rosen, N.},
  title = {Can Quantum-Mechanical Description of {Physical} Reality Be Considered Complete?},
  journal = {Physical Review},
  year = {1935},
  volume = {47},
}

@book{knuth1984,
  author = {Donald E. Knuth},
  title = {The {\TeX}book},
  year = 1984,
}
"#;

    #[test]
    fn parses_entries_in_order() {
        let entries = parse_bibtex(SAMPLE).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "einstein1935");
        assert_eq!(entries[0].entry_type, "article");
        assert_eq!(entries[0].persons("author").len(), 3);
        assert_eq!(entries[0].field("volume"), Some("47"));
        assert_eq!(entries[1].key, "knuth1984");
        assert_eq!(entries[1].field("year"), Some("1984"));
    }

    #[test]
    fn protected_words_keep_their_braces() {
        let entries = parse_bibtex(SAMPLE).unwrap();
        let title = entries[0].field("title").unwrap();
        assert!(title.contains("{Physical}"), "{title}");
    }

    #[test]
    fn written_entries_parse_back() {
        let entries = parse_bibtex(SAMPLE).unwrap();
        let text = write_entries(&entries);
        assert!(text.starts_with("@article{einstein1935,\n"));
        let reparsed = parse_bibtex(&text).unwrap();
        assert_eq!(reparsed.len(), 2);
        assert_eq!(reparsed[0].field("journal"), Some("Physical Review"));
    }

    #[test]
    fn unbalanced_braces_are_escaped() {
        let entry = Entry::new("k", "misc").with_field("note", "a } b");
        let text = write_entry(&entry);
        assert!(text.contains("note = {a \\} b}"));
    }

    #[test]
    fn values_keep_latex_source_and_field_order() {
        let source = r#"@article{k,
  title = {On {\AA}ngstr{\"o}m},
  author = {J. K{\"o}nig and {\AA}ngstr{\"o}m, A.},
  journal = {Phys. Rev.},
  pages = {1--4},
  month = jan,
  year = 2020,
  abstract = {$\alpha$-decay},
}"#;
        let entries = parse_bibtex(source).unwrap();
        let entry = &entries[0];
        assert_eq!(
            entry.field_names(),
            vec!["title", "author", "journal", "pages", "month", "year", "abstract"]
        );
        assert_eq!(entry.field("author"), Some(r#"J. K{\"o}nig and {\AA}ngstr{\"o}m, A."#));
        assert_eq!(entry.field("pages"), Some("1--4"));
        assert_eq!(entry.field("month"), Some("jan"));
        assert_eq!(entry.field("year"), Some("2020"));
        assert_eq!(entry.field("abstract"), Some("$\\alpha$-decay"));

        let rewritten = write_entries(&entries);
        assert_eq!(parse_bibtex(&rewritten).unwrap(), entries);
    }

    #[test]
    fn string_abbreviations_are_expanded() {
        let source = r#"@string{prl = "Phys. Rev. Lett."}
@article{k, journal = prl # { Suppl.}, title = "Quoted {Value}"}"#;
        let entries = parse_bibtex(source).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].field("journal"), Some("Phys. Rev. Lett. Suppl."));
        assert_eq!(entries[0].field("title"), Some("Quoted {Value}"));
    }

    #[test]
    fn malformed_source_is_an_error() {
        assert!(parse_bibtex("@article{broken, title = {unterminated").is_err());
    }
}
