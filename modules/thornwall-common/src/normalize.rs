//! Text normalization used to compare names and AI-flagged content.

/// Canonical form of a name or text fragment: lowercased, with common
/// letter substitutions folded and everything except letters and digits
/// removed.
pub fn normalize_name(input: &str) -> String {
    input
        .chars()
        .filter_map(|c| {
            let folded = fold_substitution(c);
            if folded.is_alphanumeric() {
                Some(folded.to_ascii_lowercase())
            } else {
                None
            }
        })
        .collect()
}

/// Whether `haystack` contains `needle` after both are normalized.
/// Empty needles never match.
pub fn contains_normalized(haystack: &str, needle: &str) -> bool {
    let needle = normalize_name(needle);
    if needle.is_empty() {
        return false;
    }
    normalize_name(haystack).contains(&needle)
}

/// Fold the number-for-letter substitutions that show up in evasive names.
fn fold_substitution(c: char) -> char {
    match c {
        '0' => 'o',
        '1' => 'i',
        '3' => 'e',
        '4' => 'a',
        '5' => 's',
        '7' => 't',
        '@' => 'a',
        '$' => 's',
        _ => c,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_symbols() {
        assert_eq!(normalize_name("Some_User.99"), "someuser99");
        assert_eq!(normalize_name("  spaced out  "), "spacedout");
    }

    #[test]
    fn folds_substitutions() {
        assert_eq!(normalize_name("l33t_n4me"), "leetname");
        assert_eq!(normalize_name("$3cr3t"), "secret");
    }

    #[test]
    fn contains_after_normalization() {
        assert!(contains_normalized("My C00l Profile", "cool"));
        assert!(contains_normalized("tr4de only", "trade"));
        assert!(!contains_normalized("plain text", "missing"));
    }

    #[test]
    fn empty_needle_never_matches() {
        assert!(!contains_normalized("anything", ""));
        assert!(!contains_normalized("anything", "!!!"));
    }
}
