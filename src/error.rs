//! Error type shared by the network service layer.
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to reach {service}: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service} error {status}: {body}")]
    Status {
        service: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("invalid {service} response: {reason}")]
    Decode {
        service: &'static str,
        reason: String,
    },
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            ApiError::Status { status, .. } if *status == StatusCode::TOO_MANY_REQUESTS
        )
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Turn a non-success response into `ApiError::Status`, keeping the body for diagnostics.
pub(crate) async fn check_status(
    service: &'static str,
    res: reqwest::Response,
) -> ApiResult<reqwest::Response> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    Err(ApiError::Status {
        service,
        status,
        body,
    })
}

pub(crate) fn transport(service: &'static str) -> impl FnOnce(reqwest::Error) -> ApiError {
    move |source| ApiError::Transport { service, source }
}

pub(crate) fn decode(service: &'static str) -> impl FnOnce(reqwest::Error) -> ApiError {
    move |err| ApiError::Decode {
        service,
        reason: err.to_string(),
    }
}
