use std::collections::HashSet;

/// Maps header text to a storage-safe identifier.
///
/// ASCII letters, digits and `_` pass through; space, `(`, `)` and `-` become
/// `_`; everything else is dropped. The output only contains characters that
/// pass through unchanged, so normalizing twice is a no-op.
pub fn normalize_column_name(name: &str) -> String {
    name.chars()
        .filter_map(|ch| match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' => Some(ch),
            ' ' | '(' | ')' | '-' => Some('_'),
            _ => None,
        })
        .collect()
}

/// Normalizes a full header row, resolving empty identifiers and collisions.
///
/// Empty results fall back to `field_{n}` (one-based position) and repeated
/// identifiers receive a numeric suffix in physical column order.
pub fn normalize_headers(headers: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::with_capacity(headers.len());
    let mut names = Vec::with_capacity(headers.len());
    for (idx, header) in headers.iter().enumerate() {
        let mut candidate = normalize_column_name(header);
        if candidate.is_empty() {
            candidate = format!("field_{}", idx + 1);
        }
        if seen.contains(&candidate) {
            let base = candidate.clone();
            let mut counter = 1usize;
            while seen.contains(&candidate) {
                candidate = format!("{base}_{counter}");
                counter += 1;
            }
        }
        seen.insert(candidate.clone());
        names.push(candidate);
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rewrites_separators_and_drops_symbols() {
        assert_eq!(normalize_column_name("Order ID"), "Order_ID");
        assert_eq!(normalize_column_name("total (usd)"), "total__usd_");
        assert_eq!(normalize_column_name("first-name"), "first_name");
        assert_eq!(normalize_column_name("$Percent%"), "Percent");
        assert_eq!(normalize_column_name("café"), "caf");
        assert_eq!(normalize_column_name(""), "");
    }

    #[test]
    fn normalize_headers_fills_blanks_and_suffixes_duplicates() {
        let headers = vec![
            "name".to_string(),
            "###".to_string(),
            "name!".to_string(),
            "name".to_string(),
        ];
        assert_eq!(
            normalize_headers(&headers),
            vec!["name", "field_2", "name_1", "name_2"]
        );
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(raw in "\\PC{0,24}") {
            let once = normalize_column_name(&raw);
            prop_assert_eq!(normalize_column_name(&once), once.clone());
            prop_assert!(once.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        }
    }
}
