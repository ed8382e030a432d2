//! Turns raw model output into a single line of executable SQL.

const LANGUAGE_TAGS: &[&str] = &["postgresql", "postgres", "sqlite", "mysql", "sql"];

#[derive(Clone, Copy, PartialEq)]
enum Quote {
    Single,
    Double,
    Backtick,
}

impl Quote {
    fn char(self) -> char {
        match self {
            Quote::Single => '\'',
            Quote::Double => '"',
            Quote::Backtick => '`',
        }
    }
}

/// Removes comments and markdown fences, then collapses all whitespace runs
/// to single spaces. Comment markers inside quoted text are preserved.
///
/// Idempotent: `normalize(&normalize(x)) == normalize(x)`.
pub fn normalize(raw: &str) -> String {
    collapse_whitespace(&strip_comments_and_fences(raw))
}

fn strip_comments_and_fences(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len());
    let mut quote: Option<Quote> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if let Some(q) = quote {
            out.push(c);
            if c == q.char() {
                quote = None;
            }
            i += 1;
            continue;
        }

        match c {
            '/' if next == Some('*') => {
                // Block comment; unterminated ones run to end of input.
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
                out.push(' ');
            }
            '-' if next == Some('-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                out.push(' ');
            }
            '`' if next == Some('`') && chars.get(i + 2) == Some(&'`') => {
                while i < chars.len() && chars[i] == '`' {
                    i += 1;
                }
                i += language_tag_len(&chars[i..]);
                out.push(' ');
            }
            '\'' => {
                quote = Some(Quote::Single);
                out.push(c);
                i += 1;
            }
            '"' => {
                quote = Some(Quote::Double);
                out.push(c);
                i += 1;
            }
            '`' => {
                quote = Some(Quote::Backtick);
                out.push(c);
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

// Length of a language tag glued to an opening fence, e.g. "sql" in "```sql".
fn language_tag_len(rest: &[char]) -> usize {
    let word_len = rest
        .iter()
        .take_while(|c| c.is_ascii_alphanumeric())
        .count();
    if word_len == 0 {
        return 0;
    }
    let word: String = rest[..word_len].iter().collect::<String>().to_ascii_lowercase();
    if LANGUAGE_TAGS.contains(&word.as_str()) {
        word_len
    } else {
        0
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
