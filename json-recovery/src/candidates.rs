use crate::scan::balanced_blocks;

const FENCE: &str = "```";

/// Remove a surrounding Markdown code fence (with optional language tag).
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(after_ticks) = trimmed.strip_prefix(FENCE) else {
        return trimmed;
    };

    let body = after_ticks
        .trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        .trim_start();

    match body.rfind(FENCE) {
        Some(end) => body.get(..end).unwrap_or(body).trim(),
        None => body.trim(),
    }
}

/// Body of the first fenced block when the fence follows some prose.
fn embedded_fence(text: &str) -> Option<&str> {
    let start = text.find(FENCE)?;
    if start == 0 {
        return None;
    }
    let fenced = text.get(start..)?;
    let inner = fenced
        .strip_prefix(FENCE)?
        .trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    let end = inner.find(FENCE).unwrap_or(inner.len());
    inner.get(..end).map(str::trim)
}

fn push_unique<'a>(candidates: &mut Vec<&'a str>, candidate: Option<&'a str>) {
    let Some(candidate) = candidate.map(str::trim) else {
        return;
    };
    if !candidate.is_empty() && !candidates.contains(&candidate) {
        candidates.push(candidate);
    }
}

/// Substrings of `raw` that may hold the JSON payload, most literal first.
pub fn collect_candidates(raw: &str) -> Vec<&str> {
    let mut candidates = Vec::new();
    let stripped = strip_code_fences(raw);

    push_unique(&mut candidates, Some(raw));
    push_unique(&mut candidates, Some(stripped));
    push_unique(&mut candidates, embedded_fence(raw));

    for block in balanced_blocks(stripped) {
        push_unique(&mut candidates, Some(block));
    }

    for (opener, closer) in [('{', '}'), ('[', ']')] {
        let Some(first) = stripped.find(opener) else {
            continue;
        };
        push_unique(&mut candidates, stripped.get(first..));
        if let Some(last) = stripped.rfind(closer).filter(|last| *last > first) {
            push_unique(&mut candidates, stripped.get(first..=last));
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_with_language_tag_are_removed() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("```json\n{\"a\":1"), "{\"a\":1");
        assert_eq!(strip_code_fences("  plain  "), "plain");
    }

    #[test]
    fn candidates_are_trimmed_and_deduplicated() {
        let candidates = collect_candidates("  {\"a\":1}  ");
        assert_eq!(candidates, vec!["{\"a\":1}"]);
    }

    #[test]
    fn prose_wrapped_payload_yields_block_candidates() {
        let raw = "Here it is: {\"a\": 1} and also [2, 3]. Done";
        let candidates = collect_candidates(raw);
        assert!(candidates.contains(&"{\"a\": 1}"));
        assert!(candidates.contains(&"[2, 3]"));
        assert!(candidates.contains(&"{\"a\": 1} and also [2, 3]. Done"));
        assert_eq!(candidates.first(), Some(&raw));
    }

    #[test]
    fn fence_after_prose_is_a_candidate() {
        let raw = "Sure!\n```json\n{\"a\": 1}\n```\nThanks";
        assert!(collect_candidates(raw).contains(&"{\"a\": 1}"));
    }
}
