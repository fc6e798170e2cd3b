//! Pulling JSON out of model replies
//!
//! Models are asked for bare JSON but regularly wrap it in Markdown fences or
//! a sentence of chatter. Each helper tries the whole reply first, then the
//! widest bracketed span, then a scan for standalone values.

use serde_json::Value;

/// Drop a surrounding ```json ... ``` fence if there is one
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Parse the first complete JSON value starting exactly at `text`'s head
fn value_at(text: &str) -> Option<(Value, usize)> {
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => Some((value, stream.byte_offset())),
        _ => None,
    }
}

/// A JSON object from the reply
pub fn json_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    let cleaned = strip_fences(text);

    if let Ok(Value::Object(map)) = serde_json::from_str(cleaned) {
        return Some(map);
    }
    if let Some(Ok(Value::Object(map))) = span(cleaned, '{', '}').map(serde_json::from_str) {
        return Some(map);
    }
    cleaned
        .match_indices('{')
        .find_map(|(i, _)| match value_at(&cleaned[i..]) {
            Some((Value::Object(map), _)) => Some(map),
            _ => None,
        })
}

/// A JSON array from the reply
pub fn json_array(text: &str) -> Option<Vec<Value>> {
    let cleaned = strip_fences(text);

    if let Ok(Value::Array(items)) = serde_json::from_str(cleaned) {
        return Some(items);
    }
    if let Some(Ok(Value::Array(items))) = span(cleaned, '[', ']').map(serde_json::from_str) {
        return Some(items);
    }
    None
}

/// Every standalone object carrying a `"name"` key, in order.
/// Last resort when an array came back truncated or malformed.
pub fn named_objects(text: &str) -> Vec<Value> {
    let mut found = Vec::new();
    let mut pos = 0;

    while let Some(offset) = text[pos..].find('{') {
        let start = pos + offset;
        match value_at(&text[start..]) {
            Some((value, consumed)) if value.get("name").is_some() => {
                found.push(value);
                pos = start + consumed;
            }
            _ => pos = start + 1,
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_object() {
        let map = json_object(r#"{"food_type": "apple", "confidence": 0.9}"#).unwrap();
        assert_eq!(map["food_type"], "apple");
    }

    #[test]
    fn test_fenced_object() {
        let reply = "```json\n{\"food_type\": \"banana\", \"confidence\": 0.8}\n```";
        assert_eq!(json_object(reply).unwrap()["food_type"], "banana");
    }

    #[test]
    fn test_object_with_chatter() {
        let reply = "Sure! Here you go: {\"food_type\": \"kiwi\"} Hope that helps.";
        assert_eq!(json_object(reply).unwrap()["food_type"], "kiwi");
    }

    #[test]
    fn test_object_scan_when_span_is_invalid() {
        // Widest {...} span covers both objects and the prose between them
        let reply = "{\"food_type\": \"pear\"} or maybe {\"food_type\": \"apple\"}";
        assert_eq!(json_object(reply).unwrap()["food_type"], "pear");
    }

    #[test]
    fn test_no_object() {
        assert!(json_object("I cannot identify this image.").is_none());
        assert!(json_object("[1, 2, 3]").is_none());
    }

    #[test]
    fn test_array_with_prefix() {
        let reply = "Here are your recipes:\n[{\"name\": \"A\"}, {\"name\": \"B\"}]";
        let items = json_array(reply).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["name"], "B");
    }

    #[test]
    fn test_truncated_array_falls_back_to_objects() {
        let reply = r#"[{"name": "Omelette", "ingredients": ["egg"]}, {"name": "Toast", "ingredients": ["bread"]}, {"name": "Sal"#;
        assert!(json_array(reply).is_none());

        let objects = named_objects(reply);
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0]["name"], "Omelette");
        assert_eq!(objects[1]["name"], "Toast");
    }

    #[test]
    fn test_named_objects_skip_nested_and_unnamed() {
        let reply = r#"{"meta": {"x": 1}} {"name": "Soup", "nutrition": {"kcal": 200}}"#;
        let objects = named_objects(reply);
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0]["nutrition"]["kcal"], 200);
    }
}
