//! Shell-like word splitting for `src:` lines and filter option strings.

/// Split on unquoted whitespace. Single quotes are literal, double quotes allow
/// `\"` and `\\`, and a backslash outside quotes escapes the next character.
pub fn split_words(text: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err("unterminated single quote".to_string()),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err("unterminated double quote".to_string()),
                        },
                        Some(c) => current.push(c),
                        None => return Err("unterminated double quote".to_string()),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(c) => current.push(c),
                    None => current.push('\\'),
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_words() {
        assert_eq!(split_words("  a.bib   b.bib ").unwrap(), vec!["a.bib", "b.bib"]);
    }

    #[test]
    fn quotes_group_words() {
        assert_eq!(
            split_words(r#"'my refs.bib' "other \"refs\".bib" x\ y"#).unwrap(),
            vec!["my refs.bib", "other \"refs\".bib", "x y"]
        );
    }

    #[test]
    fn empty_quotes_make_empty_word() {
        assert_eq!(split_words("-sNote= ''").unwrap(), vec!["-sNote=", ""]);
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        assert!(split_words("'oops").is_err());
        assert!(split_words("\"oops").is_err());
    }
}
