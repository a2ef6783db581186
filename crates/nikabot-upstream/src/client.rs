use std::sync::Arc;
use std::time::{Duration, Instant};

use nikabot_core::Metrics;
use tracing::{debug, warn};

use crate::error::{Result, UpstreamError};
use crate::types::{Intent, UpstreamRequest, UpstreamResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct UpstreamClient {
    http: reqwest::Client,
    url: String,
    referrer: Option<String>,
    metrics: Arc<Metrics>,
}

impl UpstreamClient {
    pub fn new(url: String, referrer: Option<String>, metrics: Arc<Metrics>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client with a fixed timeout always builds");
        Self {
            http,
            url,
            referrer,
            metrics,
        }
    }

    /// POSTs the request to the configured workflow URL and normalises
    /// the response shape (§4.4). The request-latency histogram is
    /// observed unconditionally, success or failure, via a guard that
    /// runs in every return path.
    pub async fn call(&self, req: &UpstreamRequest, trace_id: Option<&str>) -> Result<UpstreamResponse> {
        let intent_label = req.intent.as_label();
        let started = Instant::now();
        let result = self.call_inner(req, trace_id).await;
        self.metrics
            .n8n_request_seconds
            .with_label_values(&[intent_label])
            .observe(started.elapsed().as_secs_f64());
        result
    }

    async fn call_inner(&self, req: &UpstreamRequest, trace_id: Option<&str>) -> Result<UpstreamResponse> {
        let mut builder = self
            .http
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");

        if let Some(tid) = trace_id.filter(|t| is_ascii(t)) {
            builder = builder.header("X-Trace-Id", tid);
        }
        if let Some(referrer) = self.referrer.as_deref().filter(|r| is_valid_referrer(r)) {
            builder = builder.header("Referer", referrer);
        }

        debug!(intent = req.intent.as_label(), url = %self.url, "calling upstream workflow");

        let resp = builder
            .json(req)
            .send()
            .await
            .map_err(|e| UpstreamError::OtherError(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| UpstreamError::OtherError(format!("failed reading response body: {e}")))?;

        if status.is_server_error() {
            return Err(UpstreamError::ServerError {
                status: status.as_u16(),
                body,
            });
        }
        if status.is_client_error() {
            return Err(UpstreamError::ClientError {
                status: status.as_u16(),
                body,
            });
        }

        if body.trim().is_empty() {
            return Err(UpstreamError::ServerError {
                status: status.as_u16(),
                body: "empty response body".to_string(),
            });
        }

        let raw: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
            warn!(preview = %preview(&body), "upstream returned non-JSON body");
            UpstreamError::ServerError {
                status: status.as_u16(),
                body: e.to_string(),
            }
        })?;

        let normalised = normalise_response_shape(raw);
        serde_json::from_value(normalised)
            .map_err(|e| UpstreamError::OtherError(format!("response validation failed: {e}")))
    }
}

/// Unwraps the three response envelopes the workflow is allowed to use:
/// a bare object, `[ {json: ...} ]` (or the array's first element
/// itself), `{json: ...}`, or `{data: ...}`.
fn normalise_response_shape(value: serde_json::Value) -> serde_json::Value {
    let unwrapped = match value {
        serde_json::Value::Array(mut arr) if !arr.is_empty() => arr.remove(0),
        other => other,
    };
    match unwrapped {
        serde_json::Value::Object(mut map) => {
            if let Some(inner) = map.remove("json") {
                inner
            } else if let Some(inner) = map.remove("data") {
                inner
            } else {
                serde_json::Value::Object(map)
            }
        }
        other => other,
    }
}

fn is_ascii(s: &str) -> bool {
    s.is_ascii()
}

fn is_valid_referrer(raw: &str) -> bool {
    if !raw.is_ascii() {
        return false;
    }
    match url::Url::parse(raw) {
        Ok(u) => matches!(u.scheme(), "http" | "https") && u.host_str().is_some_and(|h| !h.is_empty()),
        Err(_) => false,
    }
}

fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalises_bare_object() {
        let v = serde_json::json!({"reply": "hi"});
        assert_eq!(normalise_response_shape(v), serde_json::json!({"reply": "hi"}));
    }

    #[test]
    fn normalises_array_wrapped_json_field() {
        let v = serde_json::json!([{"json": {"reply": "hi"}}]);
        assert_eq!(normalise_response_shape(v), serde_json::json!({"reply": "hi"}));
    }

    #[test]
    fn normalises_data_wrapper() {
        let v = serde_json::json!({"data": {"reply": "hi"}});
        assert_eq!(normalise_response_shape(v), serde_json::json!({"reply": "hi"}));
    }

    #[test]
    fn normalises_array_without_json_or_data_key() {
        let v = serde_json::json!([{"reply": "hi"}]);
        assert_eq!(normalise_response_shape(v), serde_json::json!({"reply": "hi"}));
    }

    #[test]
    fn referrer_requires_scheme_and_host() {
        assert!(is_valid_referrer("https://example.com/path"));
        assert!(!is_valid_referrer("not a url"));
        assert!(!is_valid_referrer("ftp://example.com"));
    }

    #[test]
    fn ascii_trace_id_check() {
        assert!(is_ascii("abc-123"));
        assert!(!is_ascii("трасса"));
    }
}
