//! Response bodies and envelope normalization

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use super::error::ClientError;

/// Body of a successful response
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedBody {
    /// 204 or an empty body
    Null,
    Json(JsonValue),
    /// Anything that is not valid JSON, e.g. XML from the ERP bridge
    Text(String),
}

impl ParsedBody {
    pub(crate) fn from_bytes(status: reqwest::StatusCode, bytes: &[u8]) -> Self {
        if status == reqwest::StatusCode::NO_CONTENT || bytes.iter().all(u8::is_ascii_whitespace) {
            return Self::Null;
        }
        serde_json::from_slice(bytes).map_or_else(
            |_| Self::Text(String::from_utf8_lossy(bytes).into_owned()),
            Self::Json,
        )
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Strip the response envelope and deserialize the payload.
    ///
    /// A null body deserializes from JSON `null`, so `Option<T>` and `()`
    /// accept it. A text body deserializes from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the payload does not match `T`
    pub fn unwrap<T: DeserializeOwned>(self) -> Result<T, ClientError> {
        let value = match self {
            Self::Null => JsonValue::Null,
            Self::Json(value) => unwrap_envelope(value),
            Self::Text(text) => JsonValue::String(text),
        };
        Ok(serde_json::from_value(value)?)
    }
}

/// Peel the backend's response wrappers.
///
/// Endpoints answer with `{"data": ...}`, `{"result": ...}`,
/// `{"success": true, "data": {"result": ...}}` or a bare payload. At most
/// two wrapper levels are removed; a bare array or object without either
/// key passes through unchanged.
pub fn unwrap_envelope(value: JsonValue) -> JsonValue {
    let mut current = value;
    for _ in 0..2 {
        current = match current {
            JsonValue::Object(mut map) => {
                let key = ["data", "result"]
                    .into_iter()
                    .find(|key| map.get(*key).is_some_and(|v| !v.is_null()));
                match key.and_then(|key| map.remove(key)) {
                    Some(inner) => inner,
                    None => return JsonValue::Object(map),
                }
            }
            other => return other,
        };
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Asset {
        id: u32,
        tag: String,
    }

    #[test]
    fn test_empty_and_no_content_are_null() {
        assert!(ParsedBody::from_bytes(StatusCode::NO_CONTENT, b"").is_null());
        assert!(ParsedBody::from_bytes(StatusCode::OK, b"").is_null());
        assert!(ParsedBody::from_bytes(StatusCode::OK, b"  \n").is_null());
    }

    #[test]
    fn test_non_json_falls_back_to_text() {
        let xml = b"<soap:Envelope><AddAssetResult>OK</AddAssetResult></soap:Envelope>";
        let body = ParsedBody::from_bytes(StatusCode::OK, xml);
        assert_eq!(
            body.as_text(),
            Some("<soap:Envelope><AddAssetResult>OK</AddAssetResult></soap:Envelope>")
        );
    }

    #[test]
    fn test_unwrap_handles_each_envelope_shape() {
        let expected = vec![Asset {
            id: 1,
            tag: "PMP-001".to_string(),
        }];
        let shapes = [
            json!([{"id": 1, "tag": "PMP-001"}]),
            json!({"data": [{"id": 1, "tag": "PMP-001"}]}),
            json!({"result": [{"id": 1, "tag": "PMP-001"}]}),
            json!({"success": true, "data": {"result": [{"id": 1, "tag": "PMP-001"}]}}),
        ];
        for shape in shapes {
            let assets: Vec<Asset> = ParsedBody::Json(shape).unwrap().unwrap();
            assert_eq!(assets, expected);
        }
    }

    #[test]
    fn test_bare_object_passes_through() {
        let value = json!({"id": 3, "tag": "CMP-9"});
        assert_eq!(unwrap_envelope(value.clone()), value);

        // A null data field is not an envelope
        let value = json!({"data": null, "id": 3});
        assert_eq!(unwrap_envelope(value.clone()), value);
    }

    #[test]
    fn test_null_and_text_unwrap() {
        let nothing: Option<Asset> = ParsedBody::Null.unwrap().unwrap();
        assert!(nothing.is_none());

        let text: String = ParsedBody::Text("plain".to_string()).unwrap().unwrap();
        assert_eq!(text, "plain");

        let mismatch = ParsedBody::Json(json!({"data": "nope"})).unwrap::<Vec<Asset>>();
        assert!(matches!(mismatch, Err(ClientError::Serialization(_))));
    }
}
