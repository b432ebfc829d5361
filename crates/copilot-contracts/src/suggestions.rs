use serde_json::{Map, Value};

use crate::prompts::SUGGESTIONS_KEY;
use crate::session::SUGGESTION_COUNT;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SuggestionParseError {
    #[error("the suggestion reply is empty")]
    Empty,
    #[error("the suggestion reply does not contain a JSON object")]
    NotJson,
    #[error("the suggestion reply has no \"{SUGGESTIONS_KEY}\" list")]
    MissingKey,
    #[error("the suggestion reply holds {found} usable questions, expected {SUGGESTION_COUNT}")]
    TooFew { found: usize },
}

/// Reads the suggested follow-up questions out of a raw model reply.
///
/// The reply is tried as JSON directly, then with a surrounding code fence
/// removed, then as the first balanced `{...}` block found in the text.
/// Extra questions beyond [`SUGGESTION_COUNT`] are dropped; fewer is an error.
pub fn parse_suggestions(raw: &str) -> Result<Vec<String>, SuggestionParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(SuggestionParseError::Empty);
    }
    let object = extract_json_object(raw).ok_or(SuggestionParseError::NotJson)?;
    let rows = object
        .get(SUGGESTIONS_KEY)
        .and_then(Value::as_array)
        .ok_or(SuggestionParseError::MissingKey)?;

    let questions = rows
        .iter()
        .filter_map(Value::as_str)
        .map(|text| text.split_whitespace().collect::<Vec<&str>>().join(" "))
        .filter(|text| !text.is_empty())
        .take(SUGGESTION_COUNT)
        .collect::<Vec<String>>();
    if questions.len() < SUGGESTION_COUNT {
        return Err(SuggestionParseError::TooFew {
            found: questions.len(),
        });
    }
    Ok(questions)
}

fn extract_json_object(raw: &str) -> Option<Map<String, Value>> {
    let unfenced = strip_code_fence(raw);
    let candidates = [
        Some(raw),
        Some(unfenced.as_str()),
        first_json_object(raw),
    ];
    let found = candidates
        .into_iter()
        .flatten()
        .find_map(|candidate| match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(object)) => Some(object),
            _ => None,
        });
    found
}

pub fn strip_code_fence(text: &str) -> String {
    let raw = text.trim();
    if !(raw.starts_with("```") && raw.ends_with("```")) || raw.len() < 6 {
        return raw.to_string();
    }
    let inner = &raw[3..raw.len() - 3];
    let body = match inner.split_once('\n') {
        Some((tag, rest)) if tag.trim().chars().all(|ch| ch.is_ascii_alphanumeric()) => rest,
        _ => inner,
    };
    body.trim().to_string()
}

/// Returns the first balanced top-level `{...}` block, skipping braces that
/// appear inside JSON strings.
pub fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::{first_json_object, parse_suggestions, strip_code_fence, SuggestionParseError};

    #[test]
    fn parses_plain_json_in_order() {
        let parsed = parse_suggestions(r#"{"questions":["a","b","c","d"]}"#).unwrap();
        assert_eq!(parsed, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn parses_fenced_json() {
        let raw = "```json\n{\"questions\": [\"a\", \"b\", \"c\", \"d\"]}\n```";
        assert_eq!(parse_suggestions(raw).unwrap(), vec!["a", "b", "c", "d"]);

        let bare_fence = "```\n{\"questions\": [\"a\", \"b\", \"c\", \"d\"]}\n```";
        assert_eq!(
            parse_suggestions(bare_fence).unwrap(),
            vec!["a", "b", "c", "d"]
        );
    }

    #[test]
    fn parses_object_wrapped_in_prose() {
        let raw = "Sure! Here you go: {\"questions\": [\"Why {this}?\", \"b\", \"c\", \"d\"]} Hope it helps.";
        assert_eq!(
            parse_suggestions(raw).unwrap(),
            vec!["Why {this}?", "b", "c", "d"]
        );
    }

    #[test]
    fn keeps_first_four_when_more_are_returned() {
        let raw = r#"{"questions":["a","b","c","d","e"]}"#;
        assert_eq!(parse_suggestions(raw).unwrap(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert_eq!(
            parse_suggestions("{\"questions\": [\"a\", \"b\""),
            Err(SuggestionParseError::NotJson)
        );
        assert_eq!(
            parse_suggestions("just some prose"),
            Err(SuggestionParseError::NotJson)
        );
        assert_eq!(parse_suggestions("  "), Err(SuggestionParseError::Empty));
    }

    #[test]
    fn missing_key_or_short_list_is_an_error() {
        assert_eq!(
            parse_suggestions(r#"{"items":["a","b","c","d"]}"#),
            Err(SuggestionParseError::MissingKey)
        );
        assert_eq!(
            parse_suggestions(r#"{"questions":"a, b, c, d"}"#),
            Err(SuggestionParseError::MissingKey)
        );
        assert_eq!(
            parse_suggestions(r#"{"questions":["a","", 3,"d"]}"#),
            Err(SuggestionParseError::TooFew { found: 2 })
        );
    }

    #[test]
    fn strip_code_fence_leaves_unfenced_text() {
        assert_eq!(strip_code_fence("  {\"a\": 1} "), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }

    #[test]
    fn first_json_object_skips_braces_in_strings() {
        let text = r#"prefix {"a": "}", "b": {"c": "\"{"}} trailing {"d": 1}"#;
        assert_eq!(
            first_json_object(text),
            Some(r#"{"a": "}", "b": {"c": "\"{"}}"#)
        );
        assert_eq!(first_json_object("{ unbalanced"), None);
        assert_eq!(first_json_object("no braces"), None);
    }
}
