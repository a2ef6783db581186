use thiserror::Error;

/// Upstream call failure classification (§4.4, §7). `ServerError` is
/// retryable by the queue worker; `ClientError` is terminal; `OtherError`
/// covers network/empty-body/malformed-JSON failures and is treated as
/// server-class (retryable) but logged under a distinct event kind.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream returned {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("upstream returned {status}: {body}")]
    ClientError { status: u16, body: String },
    #[error("upstream call failed: {0}")]
    OtherError(String),
}

impl UpstreamError {
    pub fn code(&self) -> &'static str {
        match self {
            UpstreamError::ServerError { .. } => "UPSTREAM_SERVER_ERROR",
            UpstreamError::ClientError { .. } => "UPSTREAM_CLIENT_ERROR",
            UpstreamError::OtherError(_) => "UPSTREAM_OTHER_ERROR",
        }
    }

    /// Event kind written to the audit stream for this failure (§7).
    pub fn event_kind(&self) -> &'static str {
        match self {
            UpstreamError::ServerError { .. } => "n8n_error_5xx",
            UpstreamError::ClientError { .. } => "n8n_error_4xx",
            UpstreamError::OtherError(_) => "n8n_error_other",
        }
    }

    /// Metric label class (§4.4 "Observe n8n_request_seconds ... regardless").
    pub fn metric_class(&self) -> &'static str {
        match self {
            UpstreamError::ServerError { .. } => "5xx",
            UpstreamError::ClientError { .. } => "4xx",
            UpstreamError::OtherError(_) => "other",
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, UpstreamError::ClientError { .. })
    }
}

pub type Result<T> = std::result::Result<T, UpstreamError>;
