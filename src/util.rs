//! Text normalization helpers shared by the matchers and the flow handler.

/// Lowercase, strip punctuation (apostrophes survive, they carry meaning in
/// contractions), collapse runs of whitespace.
pub fn normalize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if c.is_alphanumeric() || c == '\'' {
            out.extend(c.to_lowercase());
        } else {
            out.push(' ');
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn tokenize(normalized: &str) -> Vec<&str> {
    normalized.split_whitespace().collect()
}

/// Jaccard similarity over word sets. Two empty inputs are identical (1.0);
/// one empty input shares nothing (0.0).
pub fn jaccard(a: &str, b: &str) -> f32 {
    let set_a: std::collections::HashSet<&str> = tokenize(a).into_iter().collect();
    let set_b: std::collections::HashSet<&str> = tokenize(b).into_iter().collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f32 / union as f32
}

pub fn word_count(normalized: &str) -> usize {
    normalized.split_whitespace().count()
}
