use crate::report::SyntaxDetail;
use regex::Regex;
use std::sync::LazyLock;

// Simplified RFC 5322 shape: local part, then one or more dotted labels
// with an alphabetic TLD of at least two characters.
static ADDRESS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$")
        .expect("address pattern is valid")
});

pub(crate) fn check_syntax(email: &str) -> (i32, SyntaxDetail) {
    let valid = ADDRESS_PATTERN.is_match(email);
    let detail = SyntaxDetail {
        valid,
        reason: if valid { "Valid syntax" } else { "Invalid syntax" },
    };
    (if valid { 10 } else { 0 }, detail)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accepts_common_shapes() {
        for email in [
            "user@example.com",
            "first.last@example.co.uk",
            "user+tag@example.io",
            "USER_99%x@sub.example.org",
        ] {
            let (points, detail) = check_syntax(email);
            assert!(detail.valid, "{email} should be valid");
            assert_eq!(points, 10);
        }
    }

    #[test]
    fn rejects_malformed_addresses() {
        for email in [
            "not-an-address",
            "missing-domain@",
            "@missing-local.com",
            "user@nodot",
            "user@example.c3",
            "user@example.",
            "two@@example.com",
            "spaces in@example.com",
        ] {
            let (points, detail) = check_syntax(email);
            assert!(!detail.valid, "{email} should be invalid");
            assert_eq!(points, 0);
        }
    }
}
