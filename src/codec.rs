//! Pure payload encoding.
//!
//! Turns an event's data into the bytes actually sent over the wire,
//! per the subscription's declared content type. No side effects; the
//! only failure mode is [`EncodingError`] for shapes the encoding
//! cannot represent.

use serde_json::Value;

use crate::error::EncodingError;
use crate::types::ContentType;

/// Encode `data` for the given content type.
///
/// Returns the request body; the matching MIME header comes from
/// [`ContentType::mime`].
pub fn encode(content_type: ContentType, data: &Value) -> Result<Vec<u8>, EncodingError> {
    match content_type {
        ContentType::Json => encode_json(data),
        ContentType::Form => encode_form(data),
    }
}

fn encode_json(data: &Value) -> Result<Vec<u8>, EncodingError> {
    serde_json::to_vec(data).map_err(|e| EncodingError::Serialize {
        detail: e.to_string(),
    })
}

/// Flatten a top-level object into `application/x-www-form-urlencoded`
/// pairs. Form encoding has no native nesting, so objects and arrays
/// anywhere below the top level are rejected.
fn encode_form(data: &Value) -> Result<Vec<u8>, EncodingError> {
    let Value::Object(map) = data else {
        return Err(EncodingError::NotAnObject);
    };

    let mut pairs: Vec<(&str, String)> = Vec::with_capacity(map.len());
    for (key, value) in map {
        let rendered = match value {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            Value::Array(_) | Value::Object(_) => {
                return Err(EncodingError::NestedValue { key: key.clone() });
            }
        };
        pairs.push((key.as_str(), rendered));
    }

    serde_urlencoded::to_string(&pairs)
        .map(String::into_bytes)
        .map_err(|e| EncodingError::Serialize {
            detail: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_round_trips_structure() {
        let data = json!({"id": 1, "items": [{"sku": "a"}]});
        let body = encode(ContentType::Json, &data).unwrap();
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), data);
    }

    #[test]
    fn form_flattens_scalars() {
        let data = json!({"id": 1, "name": "order created", "live": true, "note": null});
        let body = encode(ContentType::Form, &data).unwrap();
        let s = String::from_utf8(body).unwrap();
        // serde_json maps iterate in key order, so the output is stable.
        assert_eq!(s, "id=1&live=true&name=order+created&note=");
    }

    #[test]
    fn form_rejects_nested_object() {
        let data = json!({"id": 1, "customer": {"name": "x"}});
        let err = encode(ContentType::Form, &data).unwrap_err();
        assert_eq!(err, EncodingError::NestedValue { key: "customer".into() });
    }

    #[test]
    fn form_rejects_array() {
        let data = json!({"ids": [1, 2]});
        let err = encode(ContentType::Form, &data).unwrap_err();
        assert_eq!(err, EncodingError::NestedValue { key: "ids".into() });
    }

    #[test]
    fn form_rejects_non_object_top_level() {
        let err = encode(ContentType::Form, &json!([1, 2])).unwrap_err();
        assert_eq!(err, EncodingError::NotAnObject);
    }

    #[test]
    fn mime_headers_match_encoding() {
        assert_eq!(ContentType::Json.mime(), "application/json");
        assert_eq!(ContentType::Form.mime(), "application/x-www-form-urlencoded");
    }
}
