use serde_json::{Value, json};

use crate::credentials::CredentialContext;

/// Query parameter that carries the API key on every upstream call.
const CREDENTIAL_QUERY_KEY: &str = "KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    AuthMissing,
    NetworkError,
    BadUpstreamResponse,
    UpstreamError,
    InvalidInput,
    UnknownTool,
    UnknownPrompt,
}

impl FailureKind {
    pub fn code(self) -> &'static str {
        match self {
            FailureKind::AuthMissing => "auth_missing",
            FailureKind::NetworkError => "network_error",
            FailureKind::BadUpstreamResponse => "bad_upstream_response",
            FailureKind::UpstreamError => "upstream_error",
            FailureKind::InvalidInput => "invalid_input",
            FailureKind::UnknownTool => "unknown_tool",
            FailureKind::UnknownPrompt => "unknown_prompt",
        }
    }
}

/// Uniform failure shape for everything that can go wrong during dispatch.
///
/// Failures are surfaced to the caller as ordinary result payloads, not as
/// protocol faults — the calling agent is expected to read and narrate the
/// error field.
#[derive(Debug, Clone)]
pub struct UpstreamFailure {
    pub kind: FailureKind,
    pub message: String,
    pub status: Option<u16>,
    pub body: Option<Value>,
}

impl UpstreamFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            body: None,
        }
    }

    pub fn auth_missing() -> Self {
        Self::new(FailureKind::AuthMissing, "Missing API key")
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::new(FailureKind::UnknownTool, format!("Unknown tool: {name}"))
    }

    pub fn unknown_prompt(name: &str) -> Self {
        Self::new(FailureKind::UnknownPrompt, format!("Unknown prompt: {name}"))
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidInput, message)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn to_value(&self) -> Value {
        let mut payload = json!({
            "error": self.kind.code(),
            "message": self.message
        });
        if let Some(status) = self.status {
            payload["status"] = json!(status);
        }
        if let Some(body) = &self.body {
            payload["body"] = body.clone();
        }
        payload
    }
}

/// Issues the single outbound request behind one tool invocation.
///
/// The credential resolves through the invocation's context before any
/// network activity, so a missing key never costs a round trip.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    host: String,
}

impl UpstreamClient {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            host: host.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// One GET against `https://{host}/{path}`. No retries, no masking:
    /// transport, parse and status failures each map to their own kind.
    pub async fn call(
        &self,
        credentials: &CredentialContext,
        path: &str,
        params: &[(String, String)],
    ) -> Result<Value, UpstreamFailure> {
        let Some(key) = credentials.resolve() else {
            return Err(UpstreamFailure::auth_missing());
        };

        let url = self.build_url(key, path, params)?;

        let response = self.http.get(url).send().await.map_err(|e| {
            UpstreamFailure::new(
                FailureKind::NetworkError,
                format!("Failed to reach {}: {e}", self.host),
            )
        })?;

        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|e| {
            UpstreamFailure::new(
                FailureKind::NetworkError,
                format!("Failed to read upstream response body: {e}"),
            )
        })?;

        let body: Value = match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(_) => {
                return Err(UpstreamFailure::new(
                    FailureKind::BadUpstreamResponse,
                    format!("Upstream returned a non-JSON body (status {status})"),
                )
                .with_status(status));
            }
        };

        if !(200..=299).contains(&status) {
            return Err(UpstreamFailure::new(
                FailureKind::UpstreamError,
                format!("Upstream request failed with status {status}"),
            )
            .with_status(status)
            .with_body(body));
        }

        Ok(body)
    }

    fn build_url(
        &self,
        key: &str,
        path: &str,
        params: &[(String, String)],
    ) -> Result<reqwest::Url, UpstreamFailure> {
        let base = format!(
            "https://{}/{}",
            self.host.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let mut url = reqwest::Url::parse(&base).map_err(|e| {
            UpstreamFailure::new(FailureKind::NetworkError, format!("Invalid upstream URL: {e}"))
        })?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair(CREDENTIAL_QUERY_KEY, key);
            for (query_key, value) in params {
                // Empty values are omitted, not sent as empty strings.
                if value.is_empty() {
                    continue;
                }
                pairs.append_pair(query_key, value);
            }
        }
        Ok(url)
    }
}
