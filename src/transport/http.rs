use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use url::Url;

use super::traits::Backend;
use super::types::{ActionRequest, DispatchError, Envelope};

/// Talks to a remote action endpoint with form-encoded POSTs.
pub struct HttpBackend {
    client: Client,
    endpoint: Url,
    action_prefix: String,
}

impl HttpBackend {
    pub fn new(
        endpoint: Url,
        action_prefix: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint,
            action_prefix: action_prefix.into(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn build_form(&self, request: &ActionRequest) -> Result<Vec<(String, String)>, DispatchError> {
        let mut fields = vec![
            (
                "action".to_string(),
                format!("{}{}", self.action_prefix, request.action.as_str()),
            ),
            ("nonce".to_string(), request.credential.clone()),
        ];
        fields.extend(form_fields(&request.payload)?);
        Ok(fields)
    }

    fn parse_error_message(status: reqwest::StatusCode, body: &str) -> DispatchError {
        // Some endpoints reply with an error status and a regular failure envelope.
        if let Ok(envelope) = serde_json::from_str::<Envelope>(body) {
            if !envelope.success {
                if let Err(e) = envelope.into_result() {
                    return e;
                }
            }
        }
        DispatchError::Transport(format!("HTTP {}: Request failed", status.as_u16()))
    }
}

/// Flatten a JSON object into form fields.
///
/// Scalars are written as-is, `null` becomes an empty field and nested values
/// are sent as JSON text.
pub fn form_fields(payload: &Value) -> Result<Vec<(String, String)>, DispatchError> {
    let map = match payload {
        Value::Null => return Ok(Vec::new()),
        Value::Object(map) => map,
        other => {
            return Err(DispatchError::InvalidRequest(format!(
                "payload must be an object, got {}",
                other
            )))
        }
    };

    Ok(map
        .iter()
        .map(|(key, value)| {
            let text = match value {
                Value::Null => String::new(),
                Value::String(s) => s.clone(),
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                nested => nested.to_string(),
            };
            (key.clone(), text)
        })
        .collect())
}

#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn dispatch(&self, request: ActionRequest) -> Result<Envelope, DispatchError> {
        let form = self.build_form(&request)?;

        let response = self
            .client
            .post(self.endpoint.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                DispatchError::Transport(format!(
                    "Failed to reach {}: {}",
                    self.endpoint.host_str().unwrap_or("endpoint"),
                    e
                ))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(Self::parse_error_message(status, &body));
        }

        serde_json::from_str::<Envelope>(&body).map_err(|e| {
            DispatchError::InvalidResponse(format!(
                "{} returned a malformed body: {}",
                request.action.as_str(),
                e
            ))
        })
    }
}
