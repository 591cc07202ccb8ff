use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::person::{Person, format_person_list};

/// Fields whose value is a list of persons; kept in sync with [`Entry::persons`].
pub const PERSON_ROLES: [&str; 2] = ["author", "editor"];

/// A single bibliographic record, identified by its citation key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    pub entry_type: String,
    fields: IndexMap<String, String>,
    persons: IndexMap<String, Vec<Person>>,
}

impl Entry {
    pub fn new(key: impl Into<String>, entry_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            entry_type: entry_type.into().to_lowercase(),
            fields: IndexMap::new(),
            persons: IndexMap::new(),
        }
    }

    /// Builder-style field setter, handy when synthesizing entries.
    pub fn with_field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_field(name, value);
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Field value, treating blank values as absent.
    pub fn non_empty_field(&self, name: &str) -> Option<&str> {
        self.field(name).filter(|v| !v.trim().is_empty())
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(&name.to_lowercase())
    }

    /// Set a field, keeping its position if it already exists. Setting a person
    /// role field re-derives the person list.
    pub fn set_field(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_lowercase();
        let value = value.into();
        if PERSON_ROLES.contains(&name.as_str()) {
            self.persons.insert(name.clone(), Person::parse_list(&value));
        }
        self.fields.insert(name, value);
    }

    pub fn remove_field(&mut self, name: &str) -> Option<String> {
        let name = name.to_lowercase();
        self.persons.shift_remove(&name);
        self.fields.shift_remove(&name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    pub fn persons(&self, role: &str) -> &[Person] {
        self.persons
            .get(&role.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Replace a role's persons and rewrite the backing field.
    pub fn set_persons(&mut self, role: &str, persons: Vec<Person>) {
        let role = role.to_lowercase();
        if persons.is_empty() {
            self.fields.shift_remove(&role);
            self.persons.shift_remove(&role);
            return;
        }
        self.fields.insert(role.clone(), format_person_list(&persons));
        self.persons.insert(role, persons);
    }

    /// Copy every field of `other` that this entry lacks. Present values are never touched.
    /// Returns the names of the fields that were filled in.
    pub fn fill_missing_from(&mut self, other: &Entry) -> Vec<String> {
        let mut filled = Vec::new();
        for (name, value) in other.fields() {
            if self.non_empty_field(name).is_none() && !value.trim().is_empty() {
                self.set_field(name, value);
                filled.push(name.to_string());
            }
        }
        filled
    }
}

/// Ordered collection of entries with case-insensitively unique keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entries {
    map: IndexMap<String, Entry>,
}

fn fold_key(key: &str) -> String {
    key.to_lowercase()
}

impl Entries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(&fold_key(key))
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.map.get(&fold_key(key))
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Entry> {
        self.map.get_mut(&fold_key(key))
    }

    /// Insert unless an entry with the same key exists; the existing entry wins.
    /// Returns whether the entry was inserted.
    pub fn insert(&mut self, entry: Entry) -> bool {
        let folded = fold_key(&entry.key);
        if self.map.contains_key(&folded) {
            return false;
        }
        self.map.insert(folded, entry);
        true
    }

    /// Insert or overwrite, keeping the position of an overwritten entry.
    pub fn replace(&mut self, entry: Entry) -> Option<Entry> {
        self.map.insert(fold_key(&entry.key), entry)
    }

    pub fn remove(&mut self, key: &str) -> Option<Entry> {
        self.map.shift_remove(&fold_key(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.map.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.map.values_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.map.values().map(|e| e.key.as_str())
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&Entry) -> bool) {
        self.map.retain(|_, entry| keep(entry));
    }

    /// Stable sort of the iteration order.
    pub fn sort_by(&mut self, mut cmp: impl FnMut(&Entry, &Entry) -> std::cmp::Ordering) {
        self.map.sort_by(|_, a, _, b| cmp(a, b));
    }
}

impl FromIterator<Entry> for Entries {
    fn from_iter<I: IntoIterator<Item = Entry>>(iter: I) -> Self {
        let mut entries = Entries::new();
        for entry in iter {
            entries.insert(entry);
        }
        entries
    }
}

impl IntoIterator for Entries {
    type Item = Entry;
    type IntoIter = indexmap::map::IntoValues<String, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.map.into_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn author_field_derives_persons() {
        let entry = Entry::new("k", "Article").with_field("Author", "Doe, John and Jane Roe");
        assert_eq!(entry.entry_type, "article");
        assert_eq!(entry.persons("author").len(), 2);
        assert_eq!(entry.persons("author")[1].last, "Roe");
        assert_eq!(entry.field("author"), Some("Doe, John and Jane Roe"));
    }

    #[test]
    fn set_persons_rewrites_field() {
        let mut entry = Entry::new("k", "article").with_field("author", "John Doe");
        let mut persons = entry.persons("author").to_vec();
        persons[0].first = "J.".to_string();
        entry.set_persons("author", persons);
        assert_eq!(entry.field("author"), Some("Doe, J."));
    }

    #[test]
    fn fill_missing_never_overwrites() {
        let mut kept = Entry::new("a", "article")
            .with_field("title", "Kept")
            .with_field("volume", "");
        let dup = Entry::new("b", "article")
            .with_field("title", "Other")
            .with_field("volume", "12")
            .with_field("pages", "1--5");
        let filled = kept.fill_missing_from(&dup);
        assert_eq!(filled, vec!["volume".to_string(), "pages".to_string()]);
        assert_eq!(kept.field("title"), Some("Kept"));
        assert_eq!(kept.field("volume"), Some("12"));
    }

    #[test]
    fn field_order_is_preserved() {
        let mut entry = Entry::new("k", "misc")
            .with_field("title", "T")
            .with_field("year", "2020")
            .with_field("note", "N");
        entry.set_field("title", "T2");
        assert_eq!(entry.field_names(), vec!["title", "year", "note"]);
        entry.remove_field("year");
        assert_eq!(entry.field_names(), vec!["title", "note"]);
    }

    #[test]
    fn keys_are_case_insensitive_and_first_wins() {
        let mut entries = Entries::new();
        assert!(entries.insert(Entry::new("Smith2020", "article").with_field("title", "first")));
        assert!(!entries.insert(Entry::new("smith2020", "article").with_field("title", "second")));
        assert_eq!(entries.len(), 1);
        let kept = entries.get("SMITH2020").unwrap();
        assert_eq!(kept.key, "Smith2020");
        assert_eq!(kept.field("title"), Some("first"));
    }

    #[test]
    fn sort_is_stable() {
        let mut entries: Entries = ["c", "a", "b"]
            .into_iter()
            .map(|k| Entry::new(k, "misc"))
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(entries.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }
}
