use std::cmp::Ordering;

/// `4p1` splits into `4` and `p1`: digits compare numerically, missing
/// components count as zero, suffixes only break ties.
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let left = components(left);
    let right = components(right);
    let len = left.len().max(right.len());

    let numeric = (0..len)
        .map(|i| {
            let a = left.get(i).map(|c| c.0).unwrap_or("");
            let b = right.get(i).map(|c| c.0).unwrap_or("");
            compare_digits(a, b)
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal);

    if numeric.is_ne() {
        return numeric;
    }

    (0..len)
        .map(|i| {
            let a = left.get(i).map(|c| c.1).unwrap_or("");
            let b = right.get(i).map(|c| c.1).unwrap_or("");
            a.cmp(b)
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Leading `v` and surrounding whitespace are ignored.
pub fn is_version_like(raw: &str) -> bool {
    let raw = raw.trim().trim_start_matches(['v', 'V']);
    raw.chars().next().is_some_and(|c| c.is_ascii_digit())
}

fn components(raw: &str) -> Vec<(&str, &str)> {
    raw.trim()
        .trim_start_matches(['v', 'V'])
        .split(['.', '-', '_', '+'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let digits_end = part
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(part.len());
            let (digits, rest) = part.split_at(digits_end);
            (digits.trim_start_matches('0'), rest)
        })
        .collect()
}

// leading zeros already stripped
fn compare_digits(left: &str, right: &str) -> Ordering {
    left.len().cmp(&right.len()).then_with(|| left.cmp(right))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_components_not_lexical() {
        assert_eq!(compare_versions("1.10", "1.9"), Ordering::Greater);
        assert_eq!(compare_versions("2.0", "10.0"), Ordering::Less);
    }

    #[test]
    fn test_missing_components_are_zero() {
        assert_eq!(compare_versions("8", "8.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("8.0.1", "8"), Ordering::Greater);
    }

    #[test]
    fn test_components_wider_than_u64() {
        assert_eq!(
            compare_versions("20240101000000000000.1", "1.0"),
            Ordering::Greater
        );
        assert_eq!(
            compare_versions("99999999999999999999", "100000000000000000000"),
            Ordering::Less
        );
        assert_eq!(compare_versions("1.010", "1.10"), Ordering::Equal);
        assert_eq!(compare_versions("1.0", "1.00.000"), Ordering::Equal);
    }

    #[test]
    fn test_suffix_breaks_ties_lexically() {
        assert_eq!(compare_versions("8.9p1", "8.9"), Ordering::Greater);
        assert_eq!(compare_versions("8.9p1", "8.9p2"), Ordering::Less);
        assert_eq!(compare_versions("9.0p1", "8.9p9"), Ordering::Greater);
    }

    #[test]
    fn test_leading_v_and_separators() {
        assert_eq!(compare_versions("v2", "2"), Ordering::Equal);
        assert_eq!(compare_versions("5.14.0-362", "5.14.0-70"), Ordering::Greater);
    }

    #[test]
    fn test_is_version_like() {
        assert!(is_version_like("v1.2"));
        assert!(is_version_like(" 3.0"));
        assert!(!is_version_like("unknown"));
        assert!(!is_version_like(""));
    }
}
