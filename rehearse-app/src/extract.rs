//! Pulling a typed JSON payload out of free-form model text.
//!
//! Responses produced with a search tool cannot be constrained to a schema,
//! so the payload may be wrapped in prose or repeated across several fenced
//! blocks. Candidates are tried in order:
//!
//! 1. fenced code blocks, last to first (later blocks tend to be corrections);
//! 2. the span between the first `{` and the last `}`.
//!
//! A candidate is accepted only if it deserializes completely and passes the
//! caller's check.

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

const FENCE: &str = "```";

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("the response was empty")]
    Empty,
    #[error("could not find a usable result in the response; please try again")]
    ParseFailure,
}

/// Extract the last valid `T` from `text`.
pub fn extract_structured<T>(text: &str, is_valid: impl Fn(&T) -> bool) -> Result<T, ExtractError>
where
    T: DeserializeOwned,
{
    if text.trim().is_empty() {
        return Err(ExtractError::Empty);
    }

    let blocks = fenced_blocks(text);
    for (idx, block) in blocks.iter().enumerate().rev() {
        match serde_json::from_str::<T>(block) {
            Ok(parsed) if is_valid(&parsed) => return Ok(parsed),
            Ok(_) => debug!(block = idx, "fenced block parsed but failed validation"),
            Err(e) => debug!(block = idx, error = %e, "fenced block is not the payload"),
        }
    }

    if let Some(span) = outer_object(text) {
        match serde_json::from_str::<T>(span) {
            Ok(parsed) if is_valid(&parsed) => return Ok(parsed),
            Ok(_) => debug!("brace span parsed but failed validation"),
            Err(e) => warn!(error = %e, "brace span extraction failed"),
        }
    }

    warn!(
        chars = text.chars().count(),
        fenced_blocks = blocks.len(),
        "no structured payload found in response"
    );
    Err(ExtractError::ParseFailure)
}

/// Contents of each complete ```…``` block, with an optional `json` tag removed.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let segments: Vec<&str> = text.split(FENCE).collect();
    // Odd segments sit between an opening and a closing fence; a trailing
    // odd segment has no closing fence.
    segments
        .iter()
        .enumerate()
        .filter(|(i, _)| i % 2 == 1 && *i + 1 < segments.len())
        .map(|(_, block)| {
            let block = block.trim_start();
            block.strip_prefix("json").unwrap_or(block).trim()
        })
        .collect()
}

fn outer_object(text: &str) -> Option<&str> {
    let first = text.find('{')?;
    let last = text.rfind('}')?;
    (last > first).then(|| &text[first..=last])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Payload {
        items: Vec<u32>,
        label: String,
    }

    fn non_empty(p: &Payload) -> bool {
        !p.items.is_empty()
    }

    #[test]
    fn prefers_the_last_valid_fenced_block() {
        let text = "Draft:\n```json\n{\"items\":[1],\"label\":\"first\"}\n```\n\
                    Corrected:\n```json\n{\"items\":[2],\"label\":\"second\"}\n```";
        let parsed: Payload = extract_structured(text, non_empty).unwrap();
        assert_eq!(parsed.label, "second");
    }

    #[test]
    fn skips_invalid_trailing_block() {
        let text = "```\n{\"items\":[7],\"label\":\"ok\"}\n```\nand then\n```json\n{\"items\": [\n```";
        let parsed: Payload = extract_structured(text, non_empty).unwrap();
        assert_eq!(parsed.items, vec![7]);
    }

    #[test]
    fn falls_back_to_outer_braces() {
        let text = "Here you go: {\"items\":[3,4],\"label\":\"inline\"} Hope it helps!";
        let parsed: Payload = extract_structured(text, non_empty).unwrap();
        assert_eq!(parsed.items, vec![3, 4]);
    }

    #[test]
    fn partially_valid_payload_is_rejected() {
        // `label` missing: no partial acceptance.
        let text = "```json\n{\"items\":[1]}\n```";
        let err = extract_structured::<Payload>(text, non_empty).unwrap_err();
        assert!(matches!(err, ExtractError::ParseFailure));
    }

    #[test]
    fn validation_hook_can_reject() {
        let text = "{\"items\":[],\"label\":\"empty\"}";
        assert!(matches!(
            extract_structured::<Payload>(text, non_empty),
            Err(ExtractError::ParseFailure)
        ));
    }

    #[test]
    fn empty_text_is_reported_as_such() {
        assert!(matches!(
            extract_structured::<Payload>("  \n", non_empty),
            Err(ExtractError::Empty)
        ));
    }

    #[test]
    fn unclosed_fence_is_ignored() {
        assert!(fenced_blocks("```json\n{\"a\":1}").is_empty());
        assert_eq!(fenced_blocks("x ```json {} ``` y"), vec!["{}"]);
    }
}
