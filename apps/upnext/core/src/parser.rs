//! Extraction of question numbers from pasted free-form text.
//!
//! Input is typically a copied chat log or a hand-typed list, so nothing here
//! ever fails: tokens that do not reduce to a positive integer are dropped.

/// Splits `raw` on whitespace and commas and returns every token that reduces
/// to a positive integer, in input order. Duplicates are kept; merging into a
/// queue is where they collapse.
///
/// Leading non-digit characters are stripped first, so `"Q13"` and `"#42"`
/// yield `13` and `42`. A token with anything after its digits (`"12a"`) or a
/// value of zero is discarded.
pub fn parse(raw: &str) -> Vec<u64> {
    raw.split(|c: char| c.is_whitespace() || c == ',')
        .filter_map(parse_token)
        .collect()
}

fn parse_token(token: &str) -> Option<u64> {
    let digits = token.trim_start_matches(|c: char| !c.is_ascii_digit());
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match digits.parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(value) => Some(value),
    }
}
