use std::collections::BTreeSet;

/// Canonicalize one raw model token into a tag, or reject it.
///
/// Rules, in order: underscores become spaces, everything that is neither a
/// letter nor a space is stripped, whitespace runs collapse to a single space,
/// each word is Title Cased. Tokens with no letters left are rejected.
pub fn normalize(raw: &str) -> Option<String> {
    let spaced: String = raw
        .chars()
        .map(|c| if c == '_' { ' ' } else { c })
        .filter(|c| c.is_alphabetic() || c.is_whitespace())
        .collect();

    let mut out = String::with_capacity(spaced.len());
    for word in spaced.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            for c in chars {
                out.extend(c.to_lowercase());
            }
        }
    }

    if out.chars().any(|c| c.is_alphabetic()) {
        Some(out)
    } else {
        None
    }
}

/// Normalize a batch of raw tokens, deduplicating within the pass.
///
/// A BTreeSet keeps the pass's tag set ordered, which makes logs and test
/// assertions deterministic.
pub fn normalize_all<I, S>(raw_tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw_tags
        .into_iter()
        .filter_map(|raw| normalize(raw.as_ref()))
        .collect()
}
