use serde::{Deserialize, Serialize};

/// One name out of an `author`/`editor` list, split into BibTeX name parts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub first: String,
    pub middle: String,
    /// The "von" part.
    pub prelast: String,
    pub last: String,
    /// The "Jr" part.
    pub lineage: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NameToken {
    Word(String),
    Comma,
}

impl Person {
    /// Parse one name in any of the three BibTeX forms:
    /// `First von Last`, `von Last, First` and `von Last, Jr, First`.
    pub fn parse(name: &str) -> Self {
        let tokens = tokenize(name);
        let mut parts: Vec<Vec<String>> = vec![Vec::new()];
        for token in tokens {
            match token {
                NameToken::Comma => parts.push(Vec::new()),
                NameToken::Word(word) => {
                    if let Some(part) = parts.last_mut() {
                        part.push(word);
                    }
                }
            }
        }

        let mut person = Person::default();
        match parts.len() {
            1 => {
                let words = &parts[0];
                if words.is_empty() {
                    return person;
                }
                let n = words.len();
                let von_start = words[..n - 1].iter().position(|w| is_von(w));
                match von_start {
                    Some(start) => {
                        let von_end = (start..n - 1)
                            .rev()
                            .find(|i| is_von(&words[*i]))
                            .map(|i| i + 1)
                            .unwrap_or(start + 1);
                        person.set_given(&words[..start]);
                        person.prelast = words[start..von_end].join(" ");
                        person.last = words[von_end..].join(" ");
                    }
                    None => {
                        person.set_given(&words[..n - 1]);
                        person.last = words[n - 1].clone();
                    }
                }
            }
            2 => {
                person.set_von_last(&parts[0]);
                person.set_given(&parts[1]);
            }
            _ => {
                person.set_von_last(&parts[0]);
                person.lineage = parts[1].join(" ");
                let given: Vec<String> = parts[2..].iter().flatten().cloned().collect();
                person.set_given(&given);
            }
        }
        person
    }

    /// Split an `author`-style field on top-level `and` separators.
    pub fn parse_list(field: &str) -> Vec<Self> {
        let mut names = Vec::new();
        let mut current = String::new();
        for word in split_top_level_words(field) {
            if word.eq_ignore_ascii_case("and") {
                if !current.trim().is_empty() {
                    names.push(Person::parse(&current));
                }
                current.clear();
            } else {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(&word);
            }
        }
        if !current.trim().is_empty() {
            names.push(Person::parse(&current));
        }
        names
    }

    /// Render in the unambiguous `von Last, Jr, First Middle` form.
    pub fn to_bibtex(&self) -> String {
        let mut out = String::new();
        if !self.prelast.is_empty() {
            out.push_str(&self.prelast);
            out.push(' ');
        }
        out.push_str(&self.last);
        let given = self.given_names();
        if !self.lineage.is_empty() {
            out.push_str(", ");
            out.push_str(&self.lineage);
            out.push_str(", ");
            out.push_str(&given);
        } else if !given.is_empty() {
            out.push_str(", ");
            out.push_str(&given);
        }
        out
    }

    /// First and middle names joined.
    pub fn given_names(&self) -> String {
        match (self.first.is_empty(), self.middle.is_empty()) {
            (true, _) => self.middle.clone(),
            (false, true) => self.first.clone(),
            (false, false) => format!("{} {}", self.first, self.middle),
        }
    }

    fn set_given(&mut self, words: &[String]) {
        if let Some((first, rest)) = words.split_first() {
            self.first = first.clone();
            self.middle = rest.join(" ");
        }
    }

    fn set_von_last(&mut self, words: &[String]) {
        if words.is_empty() {
            return;
        }
        let n = words.len();
        let von_len = words[..n - 1].iter().take_while(|w| is_von(w)).count();
        self.prelast = words[..von_len].join(" ");
        self.last = words[von_len..].join(" ");
    }
}

pub fn format_person_list(persons: &[Person]) -> String {
    persons
        .iter()
        .map(Person::to_bibtex)
        .collect::<Vec<_>>()
        .join(" and ")
}

fn is_von(word: &str) -> bool {
    word.chars().next().is_some_and(|c| c.is_lowercase())
}

fn tokenize(name: &str) -> Vec<NameToken> {
    let mut tokens = Vec::new();
    for word in split_top_level_words(name) {
        let mut rest = word.as_str();
        while !rest.is_empty() {
            match top_level_comma(rest) {
                Some(idx) => {
                    if idx > 0 {
                        tokens.push(NameToken::Word(rest[..idx].to_string()));
                    }
                    tokens.push(NameToken::Comma);
                    rest = &rest[idx + 1..];
                }
                None => {
                    tokens.push(NameToken::Word(rest.to_string()));
                    rest = "";
                }
            }
        }
    }
    tokens
}

fn top_level_comma(word: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, c) in word.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => return Some(idx),
            _ => {}
        }
    }
    None
}

fn split_top_level_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_last_form() {
        let p = Person::parse("J. König");
        assert_eq!(p.first, "J.");
        assert_eq!(p.last, "König");
        assert!(p.prelast.is_empty());
    }

    #[test]
    fn first_middle_von_last_form() {
        let p = Person::parse("Ludwig Otto van der Waals");
        assert_eq!(p.first, "Ludwig");
        assert_eq!(p.middle, "Otto");
        assert_eq!(p.prelast, "van der");
        assert_eq!(p.last, "Waals");
    }

    #[test]
    fn last_comma_first_form() {
        let p = Person::parse("de la Fontaine, Jean");
        assert_eq!(p.prelast, "de la");
        assert_eq!(p.last, "Fontaine");
        assert_eq!(p.first, "Jean");
    }

    #[test]
    fn lineage_form() {
        let p = Person::parse("King, Jr, Martin Luther");
        assert_eq!(p.last, "King");
        assert_eq!(p.lineage, "Jr");
        assert_eq!(p.first, "Martin");
        assert_eq!(p.middle, "Luther");
        assert_eq!(p.to_bibtex(), "King, Jr, Martin Luther");
    }

    #[test]
    fn braces_protect_and_and_commas() {
        let list = Person::parse_list("{Barnes and Noble, Inc.} and Doe, John");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].last, "{Barnes and Noble, Inc.}");
        assert_eq!(list[1].last, "Doe");
        assert_eq!(list[1].first, "John");
    }

    #[test]
    fn list_roundtrips_through_canonical_form() {
        let list = Person::parse_list("Albert Einstein and Podolsky, B. and N. Rosen");
        assert_eq!(
            format_person_list(&list),
            "Einstein, Albert and Podolsky, B. and Rosen, N."
        );
    }

    #[test]
    fn single_word_name() {
        let p = Person::parse("Aristotle");
        assert_eq!(p.last, "Aristotle");
        assert!(p.first.is_empty());
        assert_eq!(p.to_bibtex(), "Aristotle");
    }
}
