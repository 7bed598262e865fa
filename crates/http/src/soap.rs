//! SOAP bridge to the ERP asset service
//!
//! Envelopes are assembled from `(element, value)` pairs supplied by the
//! caller. Responses come back as raw XML text; only fault detection is
//! interpreted here.

use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{Client, ClientBuilder};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, warn};

use crate::client::error::ClientError;

const SOAP_NAMESPACE: &str = "http://tempuri.org/";
const XML_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

/// Operations exposed by the ERP asset service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoapAction {
    AddAsset,
    EditAsset,
    DeleteAsset,
}

impl SoapAction {
    pub const fn operation(self) -> &'static str {
        match self {
            Self::AddAsset => "AddAsset",
            Self::EditAsset => "EditAsset",
            Self::DeleteAsset => "DeleteAsset",
        }
    }

    /// Value of the `SOAPAction` header
    pub fn header_value(self) -> String {
        format!("{SOAP_NAMESPACE}{}", self.operation())
    }
}

/// Raw reply from the SOAP endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapResponse {
    pub status: u16,
    pub body: String,
}

impl SoapResponse {
    /// Whether the body carries a SOAP fault.
    ///
    /// Substring match only; the ERP returns faults with either a prefixed
    /// `Fault` element or a bare `faultstring`.
    pub fn is_fault(&self) -> bool {
        self.body.contains("Fault>") || self.body.contains("faultstring")
    }

    /// Text of the first `faultstring` element, if any
    pub fn fault_message(&self) -> Option<&str> {
        let start = self.body.find("<faultstring>")? + "<faultstring>".len();
        let end = self.body[start..].find("</faultstring>")? + start;
        Some(self.body[start..end].trim())
    }
}

/// Escape the five XML special characters
pub fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Build a SOAP 1.1 envelope for `action` with the given fields
pub fn build_envelope(action: SoapAction, fields: &[(&str, &str)]) -> String {
    let operation = action.operation();
    let mut body = String::new();
    for (element, value) in fields {
        // Writing to a String cannot fail
        let _ = write!(body, "<{element}>{}</{element}>", escape_xml(value));
    }
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<soap:Envelope xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" "#,
            r#"xmlns:xsd="http://www.w3.org/2001/XMLSchema" "#,
            r#"xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">"#,
            r#"<soap:Body><{op} xmlns="{ns}">{body}</{op}></soap:Body>"#,
            r#"</soap:Envelope>"#
        ),
        op = operation,
        ns = SOAP_NAMESPACE,
        body = body,
    )
}

/// Client for the ERP SOAP endpoint.
///
/// Separate from [`crate::SessionManager`]: the ERP has its own auth and
/// never receives the REST bearer token.
#[derive(Debug, Clone)]
pub struct SoapGateway {
    client: Client,
    url: String,
}

impl SoapGateway {
    /// Create a gateway for `url`
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an empty URL, or `Connectivity` if the
    /// HTTP client cannot be initialized
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(ClientError::Configuration("soap_url is required".into()));
        }
        let client = ClientBuilder::new().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Post one envelope and return the raw reply.
    ///
    /// Non-2xx statuses are returned, not raised, since SOAP faults arrive
    /// with status 500.
    ///
    /// # Errors
    ///
    /// Returns `Connectivity` if no response arrived in time
    pub async fn call(
        &self,
        action: SoapAction,
        fields: &[(&str, &str)],
    ) -> Result<SoapResponse, ClientError> {
        let envelope = build_envelope(action, fields);
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, HeaderValue::from_static(XML_CONTENT_TYPE))
            .header("SOAPAction", action.header_value())
            .body(envelope)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        let reply = SoapResponse { status, body };
        if reply.is_fault() {
            warn!(operation = action.operation(), status, fault = ?reply.fault_message(), "SOAP fault");
        } else {
            debug!(operation = action.operation(), status, "SOAP call completed");
        }
        Ok(reply)
    }

    /// # Errors
    ///
    /// See [`SoapGateway::call`]
    pub async fn add_asset(&self, fields: &[(&str, &str)]) -> Result<SoapResponse, ClientError> {
        self.call(SoapAction::AddAsset, fields).await
    }

    /// # Errors
    ///
    /// See [`SoapGateway::call`]
    pub async fn edit_asset(&self, fields: &[(&str, &str)]) -> Result<SoapResponse, ClientError> {
        self.call(SoapAction::EditAsset, fields).await
    }

    /// # Errors
    ///
    /// See [`SoapGateway::call`]
    pub async fn delete_asset(&self, fields: &[(&str, &str)]) -> Result<SoapResponse, ClientError> {
        self.call(SoapAction::DeleteAsset, fields).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_xml() {
        assert_eq!(
            escape_xml(r#"Pump <A> & "B" 'C'"#),
            "Pump &lt;A&gt; &amp; &quot;B&quot; &apos;C&apos;"
        );
        assert_eq!(escape_xml("plain"), "plain");
    }

    #[test]
    fn test_envelope_wraps_escaped_fields() {
        let envelope = build_envelope(SoapAction::AddAsset, &[("AssetTag", "PMP-001"), ("Name", "A&B")]);
        assert!(envelope.starts_with(r#"<?xml version="1.0" encoding="utf-8"?>"#));
        assert!(envelope.contains(r#"<AddAsset xmlns="http://tempuri.org/">"#));
        assert!(envelope.contains("<AssetTag>PMP-001</AssetTag><Name>A&amp;B</Name>"));
        assert!(envelope.ends_with("</AddAsset></soap:Body></soap:Envelope>"));
    }

    #[test]
    fn test_fault_detection() {
        let fault = SoapResponse {
            status: 500,
            body: "<soap:Fault><faultcode>soap:Server</faultcode><faultstring> Asset exists </faultstring></soap:Fault>".to_string(),
        };
        assert!(fault.is_fault());
        assert_eq!(fault.fault_message(), Some("Asset exists"));

        let ok = SoapResponse {
            status: 200,
            body: "<AddAssetResponse><AddAssetResult>OK</AddAssetResult></AddAssetResponse>".to_string(),
        };
        assert!(!ok.is_fault());
        assert_eq!(ok.fault_message(), None);
    }

    #[test]
    fn test_action_header() {
        assert_eq!(SoapAction::DeleteAsset.header_value(), "http://tempuri.org/DeleteAsset");
    }

    #[test]
    fn test_gateway_requires_url() {
        assert!(matches!(
            SoapGateway::new("", Duration::from_secs(5)),
            Err(ClientError::Configuration(_))
        ));
    }
}
