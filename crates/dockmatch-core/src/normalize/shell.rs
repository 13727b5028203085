//! Minimal POSIX-shell word splitting and quoting.
//!
//! Only what command comparison needs: quotes and backslash escapes are
//! honoured, expansions are left as literal text.

/// First word of `input` and the unparsed text after it.
///
/// Unterminated quotes run to end of input.
pub fn split_first_word(input: &str) -> Option<(String, &str)> {
    let input = input.trim_start();
    let mut chars = input.char_indices().peekable();
    chars.peek()?;

    let mut current = String::new();
    while let Some((idx, c)) = chars.next() {
        match c {
            '\'' => {
                for (_, q) in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    current.push(q);
                }
            }
            '"' => {
                while let Some((_, q)) = chars.next() {
                    match q {
                        '"' => break,
                        '\\' => match chars.peek() {
                            Some(&(_, next @ ('"' | '\\' | '$' | '`'))) => {
                                current.push(next);
                                chars.next();
                            }
                            _ => current.push('\\'),
                        },
                        other => current.push(other),
                    }
                }
            }
            '\\' => {
                if let Some((_, next)) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() => return Some((current, &input[idx..])),
            other => current.push(other),
        }
    }
    Some((current, ""))
}

/// Split `input` into words.
pub fn split_words(input: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut rest = input;
    while let Some((word, after)) = split_first_word(rest) {
        words.push(word);
        rest = after;
    }
    words
}

fn needs_quoting(word: &str) -> bool {
    word.is_empty()
        || word
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '\'' | '"' | '\\'))
}

/// Quote a single word so that [`split_words`] yields it back unchanged.
pub fn quote_word(word: &str) -> String {
    if !needs_quoting(word) {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Render words as one line that splits back into the same words.
pub fn join_words(words: &[String]) -> String {
    words
        .iter()
        .map(|w| quote_word(w))
        .collect::<Vec<_>>()
        .join(" ")
}
