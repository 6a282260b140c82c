//! HTTP transport for provider API calls
//!
//! All provider operations are JSON-over-HTTP RPC: the operation name goes
//! in a target header, parameters in the JSON body. Failed calls are parsed
//! into a typed error carrying the provider's machine-readable error code.

use crate::error::ApiError;
use reqwest::Client;
use serde_json::Value;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging.
/// Truncates long responses and strips non-printable characters.
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        format!(
            "{}... [truncated, {} bytes total]",
            &body[..MAX_LOG_BODY_LENGTH],
            body.len()
        )
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Extract the machine-readable error code from a provider error body.
///
/// Providers report either `{"__type": "namespace#SomeFault", ...}` or
/// `{"Error": {"Code": "SomeFault", ...}}`.
fn extract_error_code(body: &Value) -> Option<String> {
    if let Some(t) = body.get("__type").and_then(Value::as_str) {
        let code = t.rsplit('#').next().unwrap_or(t);
        return Some(code.to_string());
    }
    body.get("Error")
        .and_then(|e| e.get("Code"))
        .and_then(Value::as_str)
        .map(|s| s.to_string())
}

/// Extract the human-readable error message from a provider error body.
fn extract_error_message(body: &Value) -> Option<String> {
    for key in ["message", "Message"] {
        if let Some(m) = body.get(key).and_then(Value::as_str) {
            return Some(m.to_string());
        }
    }
    body.get("Error")
        .and_then(|e| e.get("Message"))
        .and_then(Value::as_str)
        .map(|s| s.to_string())
}

/// HTTP client wrapper for provider API calls
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a new transport.
    pub fn new() -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(concat!("steward/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| transport_error("", "", format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// POST one RPC operation: target header + JSON params body.
    pub async fn call(
        &self,
        endpoint: &str,
        service: &str,
        operation: &str,
        token: &str,
        params: &Value,
    ) -> Result<Value, ApiError> {
        tracing::debug!("POST {} {}.{}", endpoint, service, operation);

        let response = self
            .client
            .post(endpoint)
            .header("X-Api-Target", format!("{service}.{operation}"))
            .bearer_auth(token)
            .json(params)
            .send()
            .await
            .map_err(|e| transport_error(service, operation, format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(service, operation, format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            // Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!(
                "{}.{} error: {} - {}",
                service,
                operation,
                status,
                sanitize_for_log(&body)
            );
            let parsed: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
            return Err(ApiError {
                service: service.to_string(),
                operation: operation.to_string(),
                status: status.as_u16(),
                code: extract_error_code(&parsed).unwrap_or_else(|| "UnknownError".to_string()),
                message: extract_error_message(&parsed)
                    .unwrap_or_else(|| format!("request failed with status {status}")),
            });
        }

        // Handle empty response
        if body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body)
            .map_err(|e| transport_error(service, operation, format!("failed to parse response JSON: {e}")))
    }
}

fn transport_error(service: &str, operation: &str, message: String) -> ApiError {
    ApiError {
        service: service.to_string(),
        operation: operation.to_string(),
        status: 0,
        code: "TransportError".to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_code_from_namespaced_type() {
        let body = json!({"__type": "com.provider.rds#InvalidDBClusterStateFault", "message": "nope"});
        assert_eq!(
            extract_error_code(&body).as_deref(),
            Some("InvalidDBClusterStateFault")
        );
        assert_eq!(extract_error_message(&body).as_deref(), Some("nope"));
    }

    #[test]
    fn error_code_from_error_envelope() {
        let body = json!({"Error": {"Code": "Throttling", "Message": "slow down"}});
        assert_eq!(extract_error_code(&body).as_deref(), Some("Throttling"));
        assert_eq!(extract_error_message(&body).as_deref(), Some("slow down"));
    }

    #[test]
    fn sanitize_truncates_long_bodies() {
        let long = "x".repeat(500);
        let out = sanitize_for_log(&long);
        assert!(out.contains("truncated"));
        assert!(out.len() < 300);
    }
}
