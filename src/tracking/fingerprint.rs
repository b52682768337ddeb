//! Stable grouping keys for error occurrences
//!
//! A fingerprint is built from the error type, the message with digit runs
//! collapsed, the status/code, and the first three stack frames with their
//! line:column positions blanked. The composite key is hashed with a 32-bit
//! rolling hash and encoded in base 36.

use crate::tracking::record::{ErrorType, RawError};

/// Placeholder substituted for every run of digits in a message
const NUMBER_PLACEHOLDER: &str = "<n>";

/// Number of stack frames contributing to the signature
const SIGNATURE_FRAMES: usize = 3;

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Compute the grouping fingerprint for a classified error
pub fn fingerprint(error_type: ErrorType, raw: &RawError) -> String {
    rolling_hash(&composite_key(error_type, raw))
}

/// Build the un-hashed composite key
///
/// Exposed for diagnostics; two errors group together exactly when their
/// composite keys are equal (barring hash collisions).
pub fn composite_key(error_type: ErrorType, raw: &RawError) -> String {
    let mut parts = vec![
        error_type.as_str().to_string(),
        normalize_message(&raw.message),
    ];

    if let Some(status) = raw.status {
        parts.push(status.to_string());
    }
    if let Some(code) = raw.code.as_deref().filter(|code| !code.is_empty()) {
        parts.push(code.to_string());
    }
    if let Some(signature) = raw.stack.as_deref().and_then(stack_signature) {
        parts.push(signature);
    }

    parts.join("|")
}

/// Replace every run of ASCII digits with a placeholder
pub fn normalize_message(message: &str) -> String {
    let mut normalized = String::with_capacity(message.len());
    let mut in_digits = false;

    for ch in message.trim().chars() {
        if ch.is_ascii_digit() {
            if !in_digits {
                normalized.push_str(NUMBER_PLACEHOLDER);
                in_digits = true;
            }
        } else {
            in_digits = false;
            normalized.push(ch);
        }
    }

    normalized
}

/// Signature of the first frames of a stack trace
///
/// Lines starting with `at ` are treated as frames; a stack without such lines
/// uses its first non-empty lines instead. Returns `None` for an empty stack.
pub fn stack_signature(stack: &str) -> Option<String> {
    let lines: Vec<&str> = stack
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let frames: Vec<&str> = {
        let at_frames: Vec<&str> = lines
            .iter()
            .copied()
            .filter(|line| line.starts_with("at "))
            .collect();
        if at_frames.is_empty() {
            lines
        } else {
            at_frames
        }
    };

    if frames.is_empty() {
        return None;
    }

    Some(
        frames
            .into_iter()
            .take(SIGNATURE_FRAMES)
            .map(blank_positions)
            .collect::<Vec<_>>()
            .join(">"),
    )
}

/// Drop the digits of every `:<line>` / `:<column>` suffix
fn blank_positions(frame: &str) -> String {
    let mut blanked = String::with_capacity(frame.len());
    let mut after_colon = false;

    for ch in frame.chars() {
        if after_colon && ch.is_ascii_digit() {
            continue;
        }
        after_colon = ch == ':';
        blanked.push(ch);
    }

    blanked
}

/// 32-bit `h * 31 + c` hash over UTF-16 code units, base-36 encoded
fn rolling_hash(input: &str) -> String {
    let mut hash: i32 = 0;
    for unit in input.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit));
    }
    to_base36(hash.unsigned_abs())
}

fn to_base36(mut value: u32) -> String {
    if value == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36_DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_message_collapses_digit_runs() {
        assert_eq!(
            normalize_message("Failed after 3 retries"),
            "Failed after <n> retries"
        );
        assert_eq!(
            normalize_message("Order 12345 failed at step 7"),
            "Order <n> failed at step <n>"
        );
        assert_eq!(normalize_message("no digits"), "no digits");
    }

    #[test]
    fn test_stack_signature_blanks_positions() {
        let stack = "TypeError: x is undefined\n    at render (app.js:120:15)\n    at update (app.js:88:3)\n    at loop (vendor.js:9:1)\n    at main (index.js:1:1)";
        let signature = stack_signature(stack).unwrap();
        assert_eq!(
            signature,
            "at render (app.js::)>at update (app.js::)>at loop (vendor.js::)"
        );
    }

    #[test]
    fn test_stack_signature_without_frames_uses_lines() {
        assert_eq!(
            stack_signature("caused by: timeout\n").as_deref(),
            Some("caused by: timeout")
        );
        assert!(stack_signature("  \n ").is_none());
    }

    #[test]
    fn test_fingerprint_stable_across_line_shifts() {
        let a = RawError::new("boom").with_stack("Error: boom\n at f (a.js:10:5)\n at g (a.js:20:1)");
        let b = RawError::new("boom").with_stack("Error: boom\n at f (a.js:14:9)\n at g (a.js:31:1)");
        assert_eq!(
            fingerprint(ErrorType::Javascript, &a),
            fingerprint(ErrorType::Javascript, &b)
        );
    }

    #[test]
    fn test_fingerprint_separates_distinct_failures() {
        let load = RawError::new("Failed to load profile");
        let save = RawError::new("Failed to save profile");
        assert_ne!(
            fingerprint(ErrorType::Javascript, &load),
            fingerprint(ErrorType::Javascript, &save)
        );

        let api = RawError::new("Request failed").with_status(500);
        let other = RawError::new("Request failed").with_status(404);
        assert_ne!(fingerprint(ErrorType::Api, &api), fingerprint(ErrorType::Api, &other));

        let same = RawError::new("Request failed");
        assert_ne!(
            fingerprint(ErrorType::Api, &same),
            fingerprint(ErrorType::Network, &same)
        );
    }

    #[test]
    fn test_fingerprint_is_base36() {
        let fp = fingerprint(ErrorType::Javascript, &RawError::new("anything"));
        assert!(!fp.is_empty());
        assert!(fp
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_to_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(u32::MAX), "1z141z3");
    }
}
