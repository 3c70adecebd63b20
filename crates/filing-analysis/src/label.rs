//! Label tokenizer turning provider labels into human-readable ones
//!
//! Providers hand out labels in many shapes: XBRL concept names
//! (`us-gaap:AssetsCurrent`), snake or kebab identifiers
//! (`total_current_assets`), screaming case, or already readable captions
//! (`Net income (loss)`). The tokenizer splits identifier artifacts into
//! words and capitalizes them. Digits are never split apart or rewritten.

/// Taxonomy prefixes stripped from concept-style labels
const NAMESPACE_PREFIXES: &[&str] = &["us-gaap", "ifrs-full", "dei", "srt"];

/// Words kept lowercase unless they start the label
const MINOR_WORDS: &[&str] = &[
    "a", "an", "and", "as", "at", "by", "for", "from", "in", "of", "on", "or", "per", "the", "to",
    "with",
];

/// Convert a raw provider label into a spaced, capitalized label
pub fn humanize(raw: &str) -> String {
    let words = tokenize(raw);
    let shouting = is_shouting(raw);

    words
        .iter()
        .enumerate()
        .map(|(position, word)| {
            if shouting {
                capitalize(&word.to_lowercase(), position == 0)
            } else {
                capitalize(word, position == 0)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a raw label into words without changing their case
pub fn tokenize(raw: &str) -> Vec<String> {
    let text = strip_namespace(raw.trim());
    let identifier = !text.chars().any(char::is_whitespace);

    let mut words = Vec::new();
    for chunk in text.split(|c: char| c.is_whitespace() || c == '_') {
        if chunk.is_empty() {
            continue;
        }
        if identifier {
            for part in split_hyphens(chunk) {
                words.extend(split_camel(part));
            }
        } else {
            words.push(chunk.to_string());
        }
    }
    words
}

fn strip_namespace(text: &str) -> &str {
    if !text.chars().any(char::is_whitespace) {
        if let Some((_, local)) = text.rsplit_once(':') {
            if !local.is_empty() {
                return local;
            }
        }
    }

    let lower = text.to_ascii_lowercase();
    for prefix in NAMESPACE_PREFIXES {
        if lower.starts_with(prefix) {
            let rest = &text[prefix.len()..];
            if let Some(stripped) = rest.strip_prefix(['_', '-', ':']) {
                if !stripped.is_empty() {
                    return stripped;
                }
            }
        }
    }
    text
}

/// Split on hyphens that sit between two letters; `10-K` stays whole
fn split_hyphens(chunk: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = chunk.char_indices().collect();
    let mut parts = Vec::new();
    let mut start = 0;

    for window in chars.windows(3) {
        let [(_, before), (index, '-'), (_, after)] = window else {
            continue;
        };
        if before.is_alphabetic() && after.is_alphabetic() {
            parts.push(&chunk[start..*index]);
            start = index + 1;
        }
    }
    parts.push(&chunk[start..]);
    parts.into_iter().filter(|part| !part.is_empty()).collect()
}

/// Split camel case at lower→upper, acronym→word and lower→digit boundaries
fn split_camel(word: &str) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if i > 0 && !current.is_empty() {
            let prev = chars[i - 1];
            let next = chars.get(i + 1).copied();
            let next_lower = next.is_some_and(char::is_lowercase);

            let boundary = (prev.is_lowercase() && c.is_uppercase())
                || (prev.is_uppercase() && c.is_uppercase() && next_lower)
                || (prev.is_ascii_digit() && c.is_uppercase() && next_lower)
                || (prev.is_lowercase() && c.is_ascii_digit());

            if boundary {
                parts.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn capitalize(word: &str, first: bool) -> String {
    let core: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
    let core_lower = core.to_lowercase();

    if !first && MINOR_WORDS.contains(&core_lower.as_str()) && !is_acronym(&core) {
        return word.to_lowercase();
    }
    if is_acronym(&core) {
        return word.to_string();
    }

    let mut out = String::with_capacity(word.len());
    let mut done = false;
    for c in word.chars() {
        if !done && c.is_alphabetic() {
            out.extend(c.to_uppercase());
            done = true;
        } else {
            if c.is_alphanumeric() {
                done = true;
            }
            out.push(c);
        }
    }
    out
}

fn is_acronym(core: &str) -> bool {
    core.chars().filter(|c| c.is_alphabetic()).count() > 1
        && core.chars().all(|c| !c.is_alphabetic() || c.is_uppercase())
}

/// A multi-word label written entirely in upper case
fn is_shouting(raw: &str) -> bool {
    let letters = raw.chars().filter(|c| c.is_alphabetic()).count();
    letters > 4
        && raw.chars().all(|c| !c.is_alphabetic() || c.is_uppercase())
        && raw.contains(|c: char| c == '_' || c == '-' || c.is_whitespace())
}
