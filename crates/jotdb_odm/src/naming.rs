//! Collection-name derivation.
//!
//! Model type names turn into collection names by snake-casing the
//! CamelCase name and pluralising it with a fixed, ordered rule table. The
//! rule order is part of the contract: changing it would silently rename
//! existing collections.

/// Converts a CamelCase type name to snake_case.
pub(crate) fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

/// Pluralises a snake_case word.
///
/// Rules, applied in order:
/// 1. ends in `s`, `x`, `z`, `ch`, `sh`: append `es`
/// 2. ends in consonant + `y`: replace `y` with `ies`
/// 3. otherwise: append `s`
pub(crate) fn pluralize(word: &str) -> String {
    if word.ends_with('s')
        || word.ends_with('x')
        || word.ends_with('z')
        || word.ends_with("ch")
        || word.ends_with("sh")
    {
        return format!("{word}es");
    }

    let mut chars = word.chars().rev();
    if let (Some('y'), Some(prev)) = (chars.next(), chars.next()) {
        if !matches!(prev, 'a' | 'e' | 'i' | 'o' | 'u') {
            return format!("{}ies", &word[..word.len() - 1]);
        }
    }

    format!("{word}s")
}

/// Derives a collection name from a model type name.
pub(crate) fn derive_collection_name(model_name: &str) -> String {
    pluralize(&snake_case(model_name))
}
