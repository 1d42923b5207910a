use serde_json::Value;

use crate::scan::{dangling_string_tail, missing_closers, StringTracker};

/// One way of turning a candidate into JSON.
pub type Strategy = fn(&str) -> Result<Value, serde_json::Error>;

/// Strategies tried on every candidate, in order.
pub const STRATEGIES: [(&str, Strategy); 3] = [
    ("normalized", parse_normalized),
    ("closed_brackets", parse_with_closers),
    ("closed_string", parse_with_closed_string),
];

/// Strip BOM, drop trailing commas and quote bare fraction literals.
pub fn normalize(input: &str) -> String {
    let trimmed = input.trim().trim_start_matches('\u{feff}').trim_start();
    quote_fractions(&drop_trailing_commas(trimmed))
}

pub fn append_missing_closers(input: &str) -> String {
    let trimmed = input.trim();
    format!("{trimmed}{}", missing_closers(trimmed))
}

pub fn close_dangling_string(input: &str) -> String {
    let trimmed = input.trim();
    format!("{trimmed}{}", dangling_string_tail(trimmed))
}

pub fn parse_normalized(candidate: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(&normalize(candidate))
}

pub fn parse_with_closers(candidate: &str) -> Result<Value, serde_json::Error> {
    let repaired = append_missing_closers(&normalize(candidate));
    serde_json::from_str(&normalize(&repaired))
}

/// The string is closed first so its closing quote lands before the brackets.
pub fn parse_with_closed_string(candidate: &str) -> Result<Value, serde_json::Error> {
    let repaired = append_missing_closers(&close_dangling_string(&normalize(candidate)));
    serde_json::from_str(&normalize(&repaired))
}

fn drop_trailing_commas(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut tracker = StringTracker::default();

    for (idx, c) in input.char_indices() {
        let structural = tracker.is_structural(c);
        if structural && c == ',' {
            let rest = input.get(idx.saturating_add(1)..).unwrap_or_default();
            if rest.trim_start().starts_with(['}', ']']) {
                continue;
            }
        }
        out.push(c);
    }

    out
}

/// Byte length of a `3/4`-style literal at the start of `value`, up to the
/// next `,`, `}` or `]`.
fn fraction_literal_len(value: &str) -> Option<usize> {
    let leading_digits = |s: &str| s.chars().take_while(char::is_ascii_digit).count();

    let numerator = leading_digits(value);
    if numerator == 0 {
        return None;
    }
    let denominator = value.get(numerator..)?.strip_prefix('/')?;
    if leading_digits(denominator) == 0 {
        return None;
    }

    Some(
        value
            .find(|c: char| matches!(c, ',' | '}' | ']'))
            .unwrap_or(value.len()),
    )
}

fn quote_fractions(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut tracker = StringTracker::default();
    let mut idx = 0;

    while let Some(c) = input.get(idx..).and_then(|rest| rest.chars().next()) {
        idx = idx.saturating_add(c.len_utf8());
        out.push(c);

        if !(tracker.is_structural(c) && c == ':') {
            continue;
        }

        let tail = input.get(idx..).unwrap_or_default();
        let value = tail.trim_start();
        let Some(len) = fraction_literal_len(value) else {
            continue;
        };
        let literal = value.get(..len).unwrap_or_default().trim();
        let quoted = serde_json::to_string(literal).unwrap_or_else(|_| format!("\"{literal}\""));

        out.push(' ');
        out.push_str(&quoted);
        idx = idx
            .saturating_add(tail.len().saturating_sub(value.len()))
            .saturating_add(len);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trailing_commas_outside_strings_are_dropped() {
        assert_eq!(normalize("{\"a\":1,}"), "{\"a\":1}");
        assert_eq!(normalize("[1, 2 ,\n ]"), "[1, 2 \n ]");
        assert_eq!(normalize("{\"a\":\",}\"}"), "{\"a\":\",}\"}");
    }

    #[test]
    fn bom_is_stripped() {
        assert_eq!(normalize("\u{feff}{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn bare_fractions_become_strings() {
        assert_eq!(
            parse_normalized("{\"ratio\": 3/4, \"n\": 1}").expect("parse"),
            json!({"ratio": "3/4", "n": 1})
        );
        assert_eq!(
            parse_normalized("{\"dose\": 1/2 cup}").expect("parse"),
            json!({"dose": "1/2 cup"})
        );
        assert_eq!(normalize("{\"t\": \"a: 1/2\"}"), "{\"t\": \"a: 1/2\"}");
    }

    #[test]
    fn closers_repair_truncated_arrays() {
        assert!(parse_normalized("{\"a\": [1, 2").is_err());
        assert_eq!(
            parse_with_closers("{\"a\": [1, 2").expect("repair"),
            json!({"a": [1, 2]})
        );
    }

    #[test]
    fn truncation_after_comma_is_repaired() {
        assert_eq!(
            parse_with_closers("{\"a\": 1, \"b\": [true,").expect("repair"),
            json!({"a": 1, "b": [true]})
        );
    }

    #[test]
    fn dangling_string_is_closed_before_brackets() {
        assert!(parse_with_closers("{\"name\": \"Ada Lov").is_err());
        assert_eq!(
            parse_with_closed_string("{\"name\": \"Ada Lov").expect("repair"),
            json!({"name": "Ada Lov"})
        );
    }
}
