//! Input sanitizer applied to every user message before it reaches a prompt.
//!
//! 1. HTML-escape `& < > " '`.
//! 2. Blank out `{ } ; < > ( ) ! $` (this also blanks the `;` that closes
//!    each entity, so `<` ends up as `&lt `).
//! 3. Collapse whitespace runs to a single space and trim.
//!
//! A previous pass leaves entity stems (`&lt`, `&amp`, ...) followed by a
//! space or the end of input. The escape step copies exactly that shape
//! verbatim instead of escaping its `&` again, so sanitizing twice gives
//! the same result as sanitizing once.

const ENTITY_STEMS: [&str; 5] = ["&amp", "&lt", "&gt", "&quot", "&#x27"];

const STRIPPED: [char; 9] = ['{', '}', ';', '<', '>', '(', ')', '!', '$'];

/// Sanitize raw user text. Pure and total.
pub fn sanitize(raw: &str) -> String {
    let escaped = escape_html(raw);

    let stripped: String = escaped
        .chars()
        .map(|c| if STRIPPED.contains(&c) { ' ' } else { c })
        .collect();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + raw.len() / 4);
    let mut rest = raw;

    while let Some(c) = rest.chars().next() {
        if c == '&' {
            if let Some(stem) = escaped_stem(rest) {
                out.push_str(stem);
                rest = &rest[stem.len()..];
                continue;
            }
        }

        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
        rest = &rest[c.len_utf8()..];
    }

    out
}

/// An entity stem left behind by a previous pass, if `s` starts with one.
fn escaped_stem(s: &str) -> Option<&'static str> {
    ENTITY_STEMS.iter().copied().find(|stem| {
        s.starts_with(stem) && s[stem.len()..].chars().next().is_none_or(char::is_whitespace)
    })
}
