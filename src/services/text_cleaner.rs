use std::sync::LazyLock;

use regex::Regex;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag regex"));
static RTF_CONTROL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\[a-zA-Z]+-?\d* ?|\\'[0-9a-fA-F]{2}|\\[^a-zA-Z]").expect("rtf regex")
});

const ENTITIES: [(&str, &str); 6] = [
    ("&nbsp;", " "),
    ("&quot;", "\""),
    ("&apos;", "'"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&amp;", "&"),
];

fn is_kept(c: char) -> bool {
    c == '\n' || c == '\t' || (' '..='~').contains(&c)
}

/// Normalizes extracted content to printable ASCII with single-space separation.
///
/// With `markup` set, every tag becomes one space and the common entities are decoded.
pub fn clean_text(raw: &str, markup: bool) -> String {
    let mut text = if markup {
        let mut stripped = TAG_RE.replace_all(raw, " ").into_owned();
        for (entity, literal) in ENTITIES {
            stripped = stripped.replace(entity, literal);
        }
        stripped
    } else {
        raw.to_string()
    };

    text = text
        .chars()
        .map(|c| if is_kept(c) { c } else { ' ' })
        .collect();

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drops RTF control words, escapes and group braces, leaving the literal text.
pub fn strip_rtf(raw: &str) -> String {
    RTF_CONTROL_RE
        .replace_all(raw, " ")
        .chars()
        .filter(|c| *c != '{' && *c != '}')
        .collect()
}

pub fn is_markup_extension(extension: &str) -> bool {
    matches!(extension, ".xml" | ".html" | ".htm" | ".svg" | ".docx")
}
