//! Custom assertion helpers for JSON schema validation
//!
//! Provides utilities to verify broker wire frames match expected structure:
//! required fields present, field types correct.

use serde_json::Value;

/// Assert that a JSON value contains all required fields
pub fn assert_has_fields(json: &Value, required_fields: &[&str]) {
    let obj = json.as_object().expect("Expected JSON object");

    for field in required_fields {
        assert!(
            obj.contains_key(*field),
            "Missing required field: {}",
            field
        );
    }
}

/// Assert that a JSON field has the expected type
pub fn assert_field_type(json: &Value, field: &str, expected_type: JsonType) {
    let obj = json.as_object().expect("Expected JSON object");
    let value = obj
        .get(field)
        .unwrap_or_else(|| panic!("Field {} not found", field));

    match expected_type {
        JsonType::String => assert!(value.is_string(), "Field {} is not a string", field),
        JsonType::Number => assert!(value.is_number(), "Field {} is not a number", field),
        JsonType::Boolean => assert!(value.is_boolean(), "Field {} is not a boolean", field),
        JsonType::Array => assert!(value.is_array(), "Field {} is not an array", field),
        JsonType::Object => assert!(value.is_object(), "Field {} is not an object", field),
        JsonType::Null => assert!(value.is_null(), "Field {} is not null", field),
    }
}

/// Supported JSON types for validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Null,
}

/// Assert that a `depth` channel payload has the `{bids, asks}` shape the
/// broker actually emits (no `lastUpdateId` — that stays server-side in
/// `DepthCache`).
pub fn assert_depth_payload_schema(payload: &Value) {
    assert_has_fields(payload, &["bids", "asks"]);
    assert_field_type(payload, "bids", JsonType::Array);
    assert_field_type(payload, "asks", JsonType::Array);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_assert_has_fields() {
        let data = json!({
            "symbol": "BTCUSDT",
            "price": "50000.00"
        });

        assert_has_fields(&data, &["symbol", "price"]);
    }

    #[test]
    #[should_panic(expected = "Missing required field")]
    fn test_assert_has_fields_missing() {
        let data = json!({
            "symbol": "BTCUSDT"
        });

        assert_has_fields(&data, &["symbol", "price"]);
    }

    #[test]
    fn test_assert_field_type() {
        let data = json!({
            "name": "test",
            "count": 42,
            "active": true,
            "tags": [],
            "meta": {}
        });

        assert_field_type(&data, "name", JsonType::String);
        assert_field_type(&data, "count", JsonType::Number);
        assert_field_type(&data, "active", JsonType::Boolean);
        assert_field_type(&data, "tags", JsonType::Array);
        assert_field_type(&data, "meta", JsonType::Object);
    }

    #[test]
    fn test_assert_depth_payload_schema() {
        let depth = json!({
            "bids": [["50000.00", "1.5"]],
            "asks": [["50100.00", "2.0"]]
        });

        assert_depth_payload_schema(&depth);
    }
}
