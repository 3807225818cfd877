//! Turning model output for `autoFillForm` into field values.

use crate::error::ParseError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Parse the model's answer as a flat `field name -> value` object.
///
/// The whole output is tried first; failing that, the first balanced
/// top-level `{...}` inside it. Numbers and booleans are stringified, nulls
/// dropped, nested values kept as JSON text.
pub fn parse_form_values(output: &str) -> Result<BTreeMap<String, String>, ParseError> {
    let object = serde_json::from_str::<Map<String, Value>>(output.trim())
        .ok()
        .or_else(|| {
            let candidate = first_json_object(output)?;
            serde_json::from_str::<Map<String, Value>>(candidate).ok()
        })
        .ok_or(ParseError::FormFillJsonInvalid)?;

    Ok(object
        .into_iter()
        .filter_map(|(k, v)| {
            let v = match v {
                Value::Null => return None,
                Value::String(s) => s,
                other => other.to_string(),
            };
            Some((k, v))
        })
        .collect())
}

/// The first `{...}` span whose braces balance, ignoring braces in strings.
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_object_parses_directly() {
        let out = parse_form_values(r#"{"firstName":"Ann","age":31,"subscribe":true,"note":null}"#).unwrap();
        assert_eq!(out.get("firstName").map(String::as_str), Some("Ann"));
        assert_eq!(out.get("age").map(String::as_str), Some("31"));
        assert_eq!(out.get("subscribe").map(String::as_str), Some("true"));
        assert!(!out.contains_key("note"));
    }

    #[test]
    fn object_is_extracted_from_surrounding_prose() {
        let out = parse_form_values("Here is the data:\n{\"firstName\":\"Ann\"}\n").unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out["firstName"], "Ann");
    }

    #[test]
    fn braces_inside_strings_do_not_end_the_object() {
        let out = parse_form_values("```json\n{\"bio\":\"likes {curly} \\\"braces\\\"\",\"x\":\"y\"}\n```").unwrap();
        assert_eq!(out["bio"], "likes {curly} \"braces\"");
        assert_eq!(out["x"], "y");
    }

    #[test]
    fn unparseable_output_asks_for_retry() {
        assert_eq!(
            parse_form_values("Sorry, I can't help with that."),
            Err(ParseError::FormFillJsonInvalid)
        );
        assert_eq!(parse_form_values("{\"a\": "), Err(ParseError::FormFillJsonInvalid));
        assert_eq!(parse_form_values("[1, 2]"), Err(ParseError::FormFillJsonInvalid));
    }
}
