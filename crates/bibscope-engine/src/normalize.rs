//! Text folding used to compare entries: LaTeX removal, accent stripping and
//! the journal-name reduction.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

static INLINE_MATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$[^$]*\$").expect("valid regex"));

static ARXIV_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\barxiv[:\s]*\S+").expect("valid regex"));

/// Words that carry no information in a journal name.
const BORING_WORDS: &[&str] = &[
    "a", "an", "and", "at", "de", "der", "des", "die", "du", "for", "fur", "fuer", "in", "la",
    "le", "of", "on", "the", "to", "und",
];

/// Rewrites applied before reducing a journal name to its capitals, for
/// journals whose usual abbreviation does not share the full name's initials.
static JOURNAL_ABBREVIATIONS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)\bof the united states of america\b", ""),
        (r"(?i)\bu\.?\s?s\.?\s?a\.?\s*$", ""),
        (
            r"(?i)\bproc(?:eedings|\.)?\s+(?:of\s+the\s+)?nat(?:iona)?l?\.?\s+acad(?:emy|\.)?\s+(?:of\s+)?sci(?:ences|\.)?",
            "PNAS",
        ),
        (r"(?i)\bphysical review\b", "Phys Rev"),
        (r"(?i)\bj\.?\s*high energy phys(?:ics|\.)?", "JHEP"),
        (r"(?i)\bjournal of high energy physics\b", "JHEP"),
        (r"(?i)\bnpj\b", "NPJ"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).expect("valid regex"), replacement))
    .collect()
});

/// Remove LaTeX markup: accent macros keep their base letter, symbol macros
/// become their character, other control words vanish but their braced
/// arguments stay, and grouping braces are dropped.
pub fn delatex(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let name: String = match chars.peek().copied() {
                    Some(n) if n.is_ascii_alphabetic() => {
                        let mut name = String::new();
                        while let Some(n) = chars.peek().copied().filter(char::is_ascii_alphabetic) {
                            name.push(n);
                            chars.next();
                        }
                        name
                    }
                    Some(_) => chars.next().map(String::from).unwrap_or_default(),
                    None => String::new(),
                };
                match name.as_str() {
                    "\"" | "'" | "`" | "^" | "~" | "=" | "." | "c" | "v" | "u" | "H" | "k"
                    | "r" | "d" | "b" | "t" => {
                        while chars.peek().is_some_and(|n| *n == ' ') {
                            chars.next();
                        }
                        out.push_str(&take_argument(&mut chars));
                    }
                    "ss" => out.push_str("ss"),
                    "ae" | "AE" | "oe" | "OE" => out.push_str(&name),
                    "o" | "O" | "l" | "L" | "i" | "j" => out.push_str(&name),
                    "aa" => out.push('a'),
                    "AA" => out.push('A'),
                    "&" | "%" | "$" | "_" | "#" | "{" | "}" => out.push_str(&name),
                    " " => out.push(' '),
                    _ => {}
                }
            }
            '{' | '}' => {}
            '~' => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

/// Argument of an accent macro: a braced group, a control word, or one character.
fn take_argument(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    match chars.peek().copied() {
        Some('{') => {
            chars.next();
            let mut depth = 1usize;
            let mut inner = String::new();
            for c in chars.by_ref() {
                match c {
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
                inner.push(c);
            }
            delatex(&inner)
        }
        Some('\\') => {
            chars.next();
            let mut name = String::new();
            while let Some(n) = chars.peek().copied().filter(char::is_ascii_alphabetic) {
                name.push(n);
                chars.next();
            }
            name
        }
        Some(_) => chars.next().map(String::from).unwrap_or_default(),
        None => String::new(),
    }
}

pub fn strip_accents(input: &str) -> String {
    input.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

pub fn strip_math(input: &str) -> String {
    INLINE_MATH.replace_all(input, " ").into_owned()
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercased, accent-free, math-free title with punctuation removed.
pub fn clean_title(title: &str) -> String {
    let folded = strip_accents(&delatex(&strip_math(title))).to_lowercase();
    let kept: String = folded
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    collapse_whitespace(&kept)
}

/// Letters of a name part only, lowercased and accent-free.
pub fn clean_name(name: &str) -> String {
    strip_accents(&delatex(name))
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphabetic())
        .collect()
}

/// Note text with arXiv references removed, folded like a title.
pub fn clean_note(note: &str) -> String {
    clean_title(&ARXIV_MENTION.replace_all(note, " "))
}

/// Reduce a journal name to the capitals of its significant words, so that
/// "Physical Review Letters" and "Phys. Rev. Lett." both become "PRL".
pub fn normalize_journal(journal: &str) -> String {
    let mut text = strip_accents(&delatex(journal));
    for (pattern, replacement) in JOURNAL_ABBREVIATIONS.iter() {
        text = pattern.replace_all(&text, *replacement).into_owned();
    }

    let mut capitals = String::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() || BORING_WORDS.contains(&word.to_lowercase().as_str()) {
            continue;
        }
        let mut chars = word.chars();
        if let Some(first) = chars.next()
            && first.is_alphabetic()
        {
            capitals.extend(first.to_uppercase());
        }
        capitals.extend(chars.filter(|c| c.is_ascii_uppercase()));
    }
    capitals
}
