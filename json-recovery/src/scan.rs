/// Tracks whether a character stream is inside a JSON string literal.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct StringTracker {
    in_string: bool,
    escaped: bool,
}

impl StringTracker {
    /// Feed one character. Returns `true` when it sits outside every string
    /// literal and is not itself a quote.
    pub(crate) fn is_structural(&mut self, c: char) -> bool {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if c == '\\' {
                self.escaped = true;
            } else if c == '"' {
                self.in_string = false;
            }
            false
        } else if c == '"' {
            self.in_string = true;
            false
        } else {
            true
        }
    }

    pub(crate) fn in_string(&self) -> bool {
        self.in_string
    }

    pub(crate) fn pending_escape(&self) -> bool {
        self.escaped
    }
}

pub(crate) fn closer_for(opener: char) -> Option<char> {
    match opener {
        '{' => Some('}'),
        '[' => Some(']'),
        _ => None,
    }
}

/// Every top-level balanced `{...}` / `[...]` block, in order of appearance.
pub(crate) fn balanced_blocks(input: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut tracker = StringTracker::default();
    let mut stack: Vec<char> = Vec::new();
    let mut start = None;

    for (idx, c) in input.char_indices() {
        if !tracker.is_structural(c) {
            continue;
        }
        if let Some(closer) = closer_for(c) {
            if stack.is_empty() {
                start = Some(idx);
            }
            stack.push(closer);
        } else if stack.last() == Some(&c) {
            stack.pop();
            if stack.is_empty() {
                if let Some(block) = start
                    .take()
                    .and_then(|begin| input.get(begin..idx.saturating_add(c.len_utf8())))
                {
                    blocks.push(block);
                }
            }
        }
    }

    blocks
}

/// Closers needed to balance every bracket still open at the end of `input`.
pub(crate) fn missing_closers(input: &str) -> String {
    let mut tracker = StringTracker::default();
    let mut stack: Vec<char> = Vec::new();

    for c in input.chars() {
        if !tracker.is_structural(c) {
            continue;
        }
        if let Some(closer) = closer_for(c) {
            stack.push(closer);
        } else if stack.last() == Some(&c) {
            stack.pop();
        }
    }

    stack.iter().rev().collect()
}

/// Characters that terminate a string literal left open at the end of `input`.
pub(crate) fn dangling_string_tail(input: &str) -> &'static str {
    let mut tracker = StringTracker::default();
    for c in input.chars() {
        tracker.is_structural(c);
    }

    match (tracker.in_string(), tracker.pending_escape()) {
        (true, true) => "\\\"",
        (true, false) => "\"",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_ignore_brackets_inside_strings() {
        let text = r#"noise {"a": "}{", "b": [1, {"c": "]"}]} tail [1,2] end"#;
        let blocks = balanced_blocks(text);
        assert_eq!(
            blocks,
            vec![r#"{"a": "}{", "b": [1, {"c": "]"}]}"#, "[1,2]"]
        );
    }

    #[test]
    fn blocks_respect_escaped_quotes() {
        let text = r#"x {"q": "say \"}\" now"} y"#;
        assert_eq!(balanced_blocks(text), vec![r#"{"q": "say \"}\" now"}"#]);
    }

    #[test]
    fn missing_closers_are_emitted_innermost_first() {
        assert_eq!(missing_closers(r#"{"a": [1, {"b": 2"#), "}]}");
        assert_eq!(missing_closers(r#"{"a": "[{"#), "}");
        assert_eq!(missing_closers("[]"), "");
    }

    #[test]
    fn dangling_tail_handles_trailing_backslash() {
        assert_eq!(dangling_string_tail(r#"{"a": "abc"#), "\"");
        assert_eq!(dangling_string_tail(r#"{"a": "abc\"#), "\\\"");
        assert_eq!(dangling_string_tail(r#"{"a": "abc"}"#), "");
    }
}
