//! V3 → current message reshaping.
//!
//! V3 stored one flat text field per message. The upgrade wraps that text
//! in a single content fragment. Detection is structural: a message with
//! a `fragments` array is already current, whatever payload it arrived in.

use colloquy_protocol::FragmentId;
use serde_json::Value;
use serde_json::json;

/// The single `is_current_shape` home: presence of a `fragments` array
/// marks a message as already current.
pub fn is_current_shape(message: &Value) -> bool {
    message.get("fragments").is_some_and(Value::is_array)
}

/// Upgrade one legacy message value in place. Idempotent: messages that
/// already carry a `fragments` array are left alone.
pub fn upgrade_message_value(message: &mut Value) {
    if is_current_shape(message) {
        return;
    }
    let Some(obj) = message.as_object_mut() else {
        return;
    };

    let text = match obj.remove("text") {
        Some(Value::String(s)) => s,
        // A legacy message with no usable text still becomes a valid
        // empty message rather than being dropped.
        Some(_) | None => String::new(),
    };
    let fragments = if text.is_empty() {
        json!([])
    } else {
        json!([{
            "kind": "content",
            "fragment_id": FragmentId::random(),
            "part": {"type": "text", "text": text},
        }])
    };
    obj.insert("fragments".to_string(), fragments);

    // V3 called the streaming flag `typing`.
    if let Some(typing) = obj.remove("typing") {
        if typing.as_bool() == Some(true) {
            obj.insert("pending_incomplete".to_string(), Value::Bool(true));
        }
    }

    // V3 did not track a separate update stamp.
    let created = obj
        .get("created")
        .and_then(Value::as_i64)
        .unwrap_or_else(colloquy_protocol::now_ms);
    obj.entry("created").or_insert_with(|| created.into());
    obj.entry("updated").or_insert_with(|| created.into());
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn flat_text_becomes_one_content_fragment() {
        let mut message = json!({
            "id": "m1",
            "role": "user",
            "text": "hello there",
            "created": 5,
        });
        upgrade_message_value(&mut message);
        assert!(message.get("text").is_none());
        let fragments = message["fragments"].as_array().unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0]["part"]["text"], "hello there");
    }

    #[test]
    fn current_messages_are_untouched() {
        let mut message = json!({
            "id": "m1",
            "role": "user",
            "fragments": [],
            "text": "should stay because the message is already current",
        });
        let snapshot = message.clone();
        upgrade_message_value(&mut message);
        assert_eq!(message, snapshot);
    }

    #[test]
    fn typing_flag_maps_to_pending_incomplete() {
        let mut message = json!({"role": "assistant", "text": "partial", "typing": true});
        upgrade_message_value(&mut message);
        assert_eq!(message["pending_incomplete"], true);
        assert!(message.get("typing").is_none());
    }

    #[test]
    fn empty_text_yields_no_fragments() {
        let mut message = json!({"role": "user", "text": ""});
        upgrade_message_value(&mut message);
        assert_eq!(message["fragments"].as_array().unwrap().len(), 0);
    }
}
