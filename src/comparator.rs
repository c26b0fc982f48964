//! Output comparison for test-case grading
//!
//! Comparison is whitespace-insensitive but exact on content, case and
//! ordering: both sides are trimmed and every internal whitespace run
//! (spaces, tabs, any newline flavor) collapses to a single space before an
//! equality check. No numeric tolerance or structural comparison is applied.

/// Normalizes a program output for comparison
pub fn normalize_output(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Checks whether an actual output matches the expected output
pub fn outputs_match(actual: &str, expected: &str) -> bool {
    normalize_output(actual) == normalize_output(expected)
}
