use thiserror::Error;

/// HTTP/WS-facing error type returned by the ingest and diagnostics routes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("upstream not found: {0}")]
    UpstreamNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("docker host removed: {0}")]
    HostRemoved(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Config(#[from] anyhow::Error),
}

#[allow(dead_code)]
pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    /// HTTP status code to answer the route with.
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            ApiError::UpstreamNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::HostRemoved(_) => StatusCode::GONE,
            ApiError::Internal(ref detail) => {
                tracing::error!("internal error: {}", detail);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Config(ref err) => {
                tracing::error!("config error: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

/// Error taxonomy used by pollers to classify failures before handing them
/// to `record_task_result` (spec.md §4.4/§7).
///
/// The classification decides three things: whether the circuit breaker
/// counts the failure, whether the task is retried or routed to the DLQ,
/// and whether the upstream's partition is cleared.
#[derive(Debug, Error, Clone)]
pub enum PollError {
    /// Network/timeout/context-deadline style failures. Retried with
    /// backoff; counted against the breaker; does not clear state.
    #[error("transient error polling {upstream}: {detail}")]
    Transient { upstream: String, detail: String },

    /// 401/403-class failures. Counted in a separate auth counter; after
    /// enough consecutive auth failures the upstream is marked failed.
    #[error("auth error polling {upstream}: {detail}")]
    Auth { upstream: String, detail: String },

    /// Schema/404/501-class failures on endpoints we require. Fails the
    /// upstream for this cycle; DLQ-routed on repeated exhaustion.
    #[error("permanent error polling {upstream}: {detail}")]
    Permanent { upstream: String, detail: String },

    /// A sub-endpoint is unsupported or a subset of entities is
    /// unreachable; the rest of the poll still produced usable data.
    #[error("partial failure polling {upstream}: {detail}")]
    Partial { upstream: String, detail: String },
}

impl PollError {
    pub fn upstream(&self) -> &str {
        match self {
            PollError::Transient { upstream, .. }
            | PollError::Auth { upstream, .. }
            | PollError::Permanent { upstream, .. }
            | PollError::Partial { upstream, .. } => upstream,
        }
    }

    /// Whether this failure counts against the circuit breaker's failure
    /// tally (everything except a purely partial/degraded result).
    pub fn counts_against_breaker(&self) -> bool {
        !matches!(self, PollError::Partial { .. })
    }

    /// Whether repeated occurrences of this error, once retry attempts are
    /// exhausted, should route the task to the dead-letter queue.
    pub fn is_dlq_eligible(&self) -> bool {
        matches!(self, PollError::Transient { .. })
    }

    pub fn transient(upstream: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        PollError::Transient { upstream: upstream.into(), detail: detail.to_string() }
    }

    pub fn auth(upstream: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        PollError::Auth { upstream: upstream.into(), detail: detail.to_string() }
    }

    pub fn permanent(upstream: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        PollError::Permanent { upstream: upstream.into(), detail: detail.to_string() }
    }

    pub fn partial(upstream: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        PollError::Partial { upstream: upstream.into(), detail: detail.to_string() }
    }

    /// Classify a raw `reqwest::Error` for a given upstream.
    pub fn from_reqwest(upstream: &str, e: &reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            return PollError::transient(upstream, e);
        }
        if let Some(status) = e.status() {
            let code = status.as_u16();
            if code == 401 || code == 403 {
                return PollError::auth(upstream, e);
            }
            if code == 404 || code == 501 {
                return PollError::permanent(upstream, e);
            }
            if status.is_server_error() {
                return PollError::transient(upstream, e);
            }
            return PollError::permanent(upstream, e);
        }
        PollError::transient(upstream, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_does_not_count_against_breaker() {
        let e = PollError::partial("pve1", "degraded endpoint");
        assert!(!e.counts_against_breaker());
        assert!(!e.is_dlq_eligible());
    }

    #[test]
    fn transient_is_dlq_eligible() {
        let e = PollError::transient("pve1", "timed out");
        assert!(e.counts_against_breaker());
        assert!(e.is_dlq_eligible());
    }

    #[test]
    fn auth_counts_but_not_dlq() {
        let e = PollError::auth("pve1", "401");
        assert!(e.counts_against_breaker());
        assert!(!e.is_dlq_eligible());
    }

    #[test]
    fn upstream_accessor_matches_all_variants() {
        assert_eq!(PollError::transient("a", "x").upstream(), "a");
        assert_eq!(PollError::auth("b", "x").upstream(), "b");
        assert_eq!(PollError::permanent("c", "x").upstream(), "c");
        assert_eq!(PollError::partial("d", "x").upstream(), "d");
    }
}
