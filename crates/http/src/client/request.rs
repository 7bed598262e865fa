//! Request options for authenticated calls

use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::error::ClientError;

/// Body of an outgoing request
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(JsonValue),
    Text(String),
    Multipart(FormPayload),
}

/// One part of a multipart submission
#[derive(Debug, Clone)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime: Option<String>,
        bytes: Vec<u8>,
    },
}

/// Multipart form kept as plain data.
///
/// `reqwest::multipart::Form` is consumed on send, so the form is rebuilt for
/// every attempt, including the retry after a token refresh.
#[derive(Debug, Clone, Default)]
pub struct FormPayload {
    parts: Vec<FormPart>,
}

impl FormPayload {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(FormPart::Text {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime: Option<&str>,
        bytes: Vec<u8>,
    ) -> Self {
        self.parts.push(FormPart::File {
            name: name.into(),
            file_name: file_name.into(),
            mime: mime.map(str::to_string),
            bytes,
        });
        self
    }

    pub fn parts(&self) -> &[FormPart] {
        &self.parts
    }

    pub(crate) fn to_form(&self) -> Result<reqwest::multipart::Form, ClientError> {
        let mut form = reqwest::multipart::Form::new();
        for part in &self.parts {
            form = match part {
                FormPart::Text { name, value } => form.text(name.clone(), value.clone()),
                FormPart::File {
                    name,
                    file_name,
                    mime,
                    bytes,
                } => {
                    let mut file =
                        reqwest::multipart::Part::bytes(bytes.clone()).file_name(file_name.clone());
                    if let Some(mime) = mime {
                        file = file.mime_str(mime).map_err(|e| {
                            ClientError::Configuration(format!("invalid mime type {mime}: {e}"))
                        })?;
                    }
                    form.part(name.clone(), file)
                }
            };
        }
        Ok(form)
    }
}

/// Method, headers, body and per-call limits of a request
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: RequestBody,
    /// Overrides the client-wide request timeout
    pub timeout: Option<Duration>,
    /// Aborts this caller's wait when cancelled
    pub cancel: Option<CancellationToken>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            timeout: None,
            cancel: None,
        }
    }
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    /// POST with a JSON body
    ///
    /// # Errors
    ///
    /// Returns an error if `body` cannot be serialized to JSON
    pub fn post_json<T: Serialize + ?Sized>(body: &T) -> Result<Self, ClientError> {
        Ok(Self::new(Method::POST).with_body(RequestBody::Json(serde_json::to_value(body)?)))
    }

    /// PUT with a JSON body
    ///
    /// # Errors
    ///
    /// Returns an error if `body` cannot be serialized to JSON
    pub fn put_json<T: Serialize + ?Sized>(body: &T) -> Result<Self, ClientError> {
        Ok(Self::new(Method::PUT).with_body(RequestBody::Json(serde_json::to_value(body)?)))
    }

    /// POST a multipart form
    pub fn multipart(form: FormPayload) -> Self {
        Self::new(Method::POST).with_body(RequestBody::Multipart(form))
    }

    #[must_use]
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Whether a JSON content type should be added.
    ///
    /// Multipart bodies need the boundary reqwest generates, and an explicit
    /// caller content type always wins.
    pub fn needs_json_content_type(&self) -> bool {
        !matches!(self.body, RequestBody::Multipart(_)) && !self.headers.contains_key(CONTENT_TYPE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_content_type_rules() {
        assert!(RequestOptions::get().needs_json_content_type());
        assert!(
            RequestOptions::post_json(&json!({"a": 1}))
                .unwrap()
                .needs_json_content_type()
        );
        assert!(!RequestOptions::multipart(FormPayload::new()).needs_json_content_type());

        let xml = RequestOptions::new(Method::POST)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/xml"))
            .with_body(RequestBody::Text("<a/>".to_string()));
        assert!(!xml.needs_json_content_type());
    }

    #[test]
    fn test_form_payload_rebuilds() {
        let payload = FormPayload::new()
            .text("description", "Pump seal replaced")
            .file("attachment", "seal.jpg", Some("image/jpeg"), vec![0xff, 0xd8]);

        assert_eq!(payload.parts().len(), 2);
        assert!(payload.to_form().is_ok());
        assert!(payload.to_form().is_ok());
    }

    #[test]
    fn test_invalid_mime_is_rejected() {
        let payload = FormPayload::new().file("f", "x.bin", Some("not a mime"), vec![1]);
        assert!(payload.to_form().is_err());
    }
}
