//! Token-level fuzzy similarity shared by the legal and name matchers.
//!
//! Two measures are provided, both returning a score in `[0.0, 1.0]`:
//!
//! - [`token_set_ratio`]: order-insensitive comparison that treats one
//!   token set contained in the other as a full match. Suited to subdivision
//!   names, where one source writes "TUSCANY" and another "TUSCANY
//!   SUBDIVISION AT TAMPA PALMS".
//! - [`soft_jaccard`]: Jaccard overlap where two tokens count as shared when
//!   their Jaro-Winkler similarity clears a floor. Suited to party names,
//!   where a missing middle name is a different signal than a typo.

use std::collections::BTreeSet;

/// Jaro-Winkler floor for two name tokens to count as the same token.
pub const TOKEN_MATCH_FLOOR: f64 = 0.88;

/// Order-insensitive token-set ratio.
///
/// Splits both inputs on whitespace, then compares the sorted intersection
/// against each side's intersection-plus-remainder, keeping the best
/// normalized Levenshtein similarity. Empty input on either side scores 0.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let set_a: BTreeSet<&str> = a.split_whitespace().collect();
    let set_b: BTreeSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let inter: Vec<&str> = set_a.intersection(&set_b).copied().collect();
    let diff_ab: Vec<&str> = set_a.difference(&set_b).copied().collect();
    let diff_ba: Vec<&str> = set_b.difference(&set_a).copied().collect();

    if !inter.is_empty() && (diff_ab.is_empty() || diff_ba.is_empty()) {
        return 1.0;
    }

    let joined_inter = inter.join(" ");
    let combined_a = join_nonempty(&joined_inter, &diff_ab.join(" "));
    let combined_b = join_nonempty(&joined_inter, &diff_ba.join(" "));

    let mut best = strsim::normalized_levenshtein(&combined_a, &combined_b);
    if !joined_inter.is_empty() {
        best = best
            .max(strsim::normalized_levenshtein(&joined_inter, &combined_a))
            .max(strsim::normalized_levenshtein(&joined_inter, &combined_b));
    }
    best
}

fn join_nonempty(head: &str, tail: &str) -> String {
    match (head.is_empty(), tail.is_empty()) {
        (true, _) => tail.to_string(),
        (_, true) => head.to_string(),
        _ => format!("{} {}", head, tail),
    }
}

/// Jaccard similarity with fuzzy token equality.
///
/// Token pairs are matched greedily from the most similar pair down; each
/// token is used at most once. A matched pair contributes its Jaro-Winkler
/// score to the intersection weight. The result is
/// `weight / (|A| + |B| - weight)`.
pub fn soft_jaccard(a: &[&str], b: &[&str]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut pairs: Vec<(f64, usize, usize)> = Vec::with_capacity(a.len() * b.len());
    for (i, ta) in a.iter().enumerate() {
        for (j, tb) in b.iter().enumerate() {
            let score = if ta == tb {
                1.0
            } else {
                strsim::jaro_winkler(ta, tb)
            };
            if score >= TOKEN_MATCH_FLOOR {
                pairs.push((score, i, j));
            }
        }
    }
    pairs.sort_by(|x, y| {
        y.0.partial_cmp(&x.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(x.1.cmp(&y.1))
            .then(x.2.cmp(&y.2))
    });

    let mut used_a = vec![false; a.len()];
    let mut used_b = vec![false; b.len()];
    let mut weight = 0.0;
    for (score, i, j) in pairs {
        if used_a[i] || used_b[j] {
            continue;
        }
        used_a[i] = true;
        used_b[j] = true;
        weight += score;
    }

    let denom = a.len() as f64 + b.len() as f64 - weight;
    if denom <= f64::EPSILON {
        1.0
    } else {
        weight / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_set_subset_is_full_match() {
        let r = token_set_ratio("TUSCANY", "TUSCANY SUBDIVISION AT TAMPA PALMS");
        assert!((r - 1.0).abs() < 1e-9);
    }

    #[test]
    fn token_set_is_order_insensitive() {
        let r = token_set_ratio("TAMPA PALMS TUSCANY", "TUSCANY TAMPA PALMS");
        assert!((r - 1.0).abs() < 1e-9);
    }

    #[test]
    fn token_set_disjoint_names_score_low() {
        assert!(token_set_ratio("TOUCHSTONE", "HERITAGE ISLES") < 0.5);
        assert_eq!(token_set_ratio("", "ANYTHING"), 0.0);
    }

    #[test]
    fn soft_jaccard_tolerates_typos() {
        let r = soft_jaccard(&["JOHN", "SMITH"], &["JON", "SMITH"]);
        assert!(r > 0.85, "got {}", r);
    }

    #[test]
    fn soft_jaccard_penalizes_extra_tokens() {
        let r = soft_jaccard(&["JOHN", "SMITH"], &["JOHN", "Q", "SMITH"]);
        assert!(r < 0.85, "got {}", r);
        assert!((soft_jaccard(&["SMITH"], &["SMITH"]) - 1.0).abs() < 1e-9);
    }
}
