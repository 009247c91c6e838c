use http::StatusCode;
use token_handler::{OidcError, SessionError};

/// Helper trait for converting errors to a standard response error format
pub(crate) trait IntoResponseError<T> {
    fn into_response_error(self) -> Result<T, (StatusCode, String)>;
}

/// Session failures are either "not logged in" (401) or a server fault (500).
/// Server faults are logged with detail and answered with a generic body.
impl<T> IntoResponseError<T> for Result<T, SessionError> {
    fn into_response_error(self) -> Result<T, (StatusCode, String)> {
        self.map_err(|e| session_error_response(&e))
    }
}

/// Provider calls outside of a session operation fail as a bad gateway.
impl<T> IntoResponseError<T> for Result<T, OidcError> {
    fn into_response_error(self) -> Result<T, (StatusCode, String)> {
        self.map_err(|e| {
            tracing::error!(error = %e, "Identity provider request failed");
            (
                StatusCode::BAD_GATEWAY,
                "Identity provider request failed".to_string(),
            )
        })
    }
}

pub(crate) fn session_error_response(err: &SessionError) -> (StatusCode, String) {
    match err {
        SessionError::SubjectMismatch => {
            tracing::error!("Refreshed tokens belong to another subject");
            (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
        }
        e if e.is_unauthorized() => {
            tracing::debug!(error = %e, "Unauthorized");
            (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
        }
        e => {
            tracing::error!(error = %e, "Session operation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        }
    }
}
