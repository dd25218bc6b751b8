//! vCenter client errors

use thiserror::Error;

/// Errors returned by the vCenter REST client
#[derive(Debug, Error)]
pub enum VCenterError {
    /// The request never produced a response
    #[error("request to {server} failed: {source}")]
    Http {
        /// vCenter server address
        server: String,
        /// Underlying transport error
        #[source]
        source: reqwest::Error,
    },

    /// vCenter answered with an unexpected status
    #[error("{server} returned {status} for {operation}: {body}")]
    Status {
        /// vCenter server address
        server: String,
        /// What was being attempted
        operation: String,
        /// HTTP status code
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// Credentials rejected or session expired
    #[error("authentication against {server} failed: {message}")]
    Auth {
        /// vCenter server address
        server: String,
        /// Description of what failed
        message: String,
    },

    /// Inventory object does not exist
    #[error("{what} not found on {server}")]
    NotFound {
        /// vCenter server address
        server: String,
        /// Object that was looked up
        what: String,
    },

    /// Response body could not be decoded
    #[error("failed to decode {operation} response from {server}: {message}")]
    Decode {
        /// vCenter server address
        server: String,
        /// What was being attempted
        operation: String,
        /// Decoder error
        message: String,
    },
}

/// Longest response body kept in a [`VCenterError::Status`]
const MAX_BODY_LEN: usize = 512;

impl VCenterError {
    pub(crate) fn status(
        server: &str,
        operation: &str,
        status: reqwest::StatusCode,
        mut body: String,
    ) -> Self {
        if body.len() > MAX_BODY_LEN {
            let mut cut = MAX_BODY_LEN;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Self::Auth {
                server: server.to_string(),
                message: format!("{} rejected: {}", operation, body),
            };
        }
        Self::Status {
            server: server.to_string(),
            operation: operation.to_string(),
            status: status.as_u16(),
            body,
        }
    }

    /// Whether a retry may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Auth { .. } | Self::NotFound { .. } | Self::Decode { .. } => false,
        }
    }

    /// Whether the session must be re-established
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

impl From<VCenterError> for capv_common::Error {
    fn from(e: VCenterError) -> Self {
        let server = match &e {
            VCenterError::Http { server, .. }
            | VCenterError::Status { server, .. }
            | VCenterError::Auth { server, .. }
            | VCenterError::NotFound { server, .. }
            | VCenterError::Decode { server, .. } => server.clone(),
        };
        capv_common::Error::vcenter(server, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn unauthorized_status_becomes_auth() {
        let err = VCenterError::status("vc", "list modules", StatusCode::UNAUTHORIZED, "no".into());
        assert!(err.is_unauthenticated());
        assert!(!err.is_retryable());
    }

    #[test]
    fn server_errors_are_retryable() {
        let err = VCenterError::status("vc", "op", StatusCode::SERVICE_UNAVAILABLE, String::new());
        assert!(err.is_retryable());
        let err = VCenterError::status("vc", "op", StatusCode::BAD_REQUEST, String::new());
        assert!(!err.is_retryable());
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(2000);
        match VCenterError::status("vc", "op", StatusCode::BAD_REQUEST, body) {
            VCenterError::Status { body, .. } => assert_eq!(body.len(), MAX_BODY_LEN),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn converts_to_common_error() {
        let err: capv_common::Error = VCenterError::NotFound {
            server: "vc".into(),
            what: "resource pool Resources".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "vcenter error [vc]: resource pool Resources not found on vc"
        );
    }
}
