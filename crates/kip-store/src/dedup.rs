//! Duplicate detection
//!
//! Two layers: an identical-key match on domain + category + normalized item
//! text, and a weighted token similarity for near-duplicates ("Cisco ASA
//! 5516-X" vs "ASA 5516-X firewall"). Longer tokens weigh more, so a shared
//! model number counts for more than a shared stop word.

/// Normalize item text into a comparison key: lowercase, punctuation
/// stripped, whitespace collapsed.
#[must_use]
pub fn normalized_key(item: &str) -> String {
    item.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Weighted token similarity in `[0.0, 1.0]`.
///
/// Dice coefficient over normalized tokens, weighted by token length.
#[must_use]
pub fn similarity(a: &str, b: &str) -> f64 {
    let ka = normalized_key(a);
    let kb = normalized_key(b);
    if ka.is_empty() || kb.is_empty() {
        return 0.0;
    }
    if ka == kb {
        return 1.0;
    }

    let tokens_a: Vec<&str> = ka.split(' ').collect();
    let mut tokens_b: Vec<&str> = kb.split(' ').collect();

    let total: usize = tokens_a.iter().chain(tokens_b.iter()).map(|t| t.len()).sum();
    let mut shared = 0usize;
    for t in &tokens_a {
        if let Some(pos) = tokens_b.iter().position(|u| u == t) {
            shared += t.len();
            tokens_b.swap_remove(pos);
        }
    }
    (2 * shared) as f64 / total as f64
}
