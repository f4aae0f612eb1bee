use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the federation engine.
///
/// Variants are matchable so callers can test error identity; the upstream
/// message rides along where one exists.
#[derive(Debug, Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Unparsable JSON or HTML. Indicates upstream protocol drift; the
    /// offending endpoint is recorded for the log line.
    #[error("malformed response from {endpoint}: {detail}")]
    MalformedResponse { endpoint: String, detail: String },

    #[error("malformed SAML assertion: {0}")]
    MalformedAssertion(String),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("access denied")]
    AccessDenied,

    #[error("bad request to {0}")]
    BadRequest(String),

    #[error("upstream internal error: {0}")]
    UpstreamInternal(String),

    /// The account has no MFA method this engine understands.
    #[error("no supported MFA upgrade path for this account")]
    NoSupportedUpgradePath,

    /// Explicit Duo denial, or any other non-affirmative terminal push
    /// state. The user may simply try again.
    #[error("MFA was not allowed: {0}")]
    MfaNotAllowed(String),

    #[error("no SAML assertion found in the response document")]
    NoSamlAssertion,

    #[error("no Duo form found in the response document")]
    NoDuoForm,

    #[error("role {name:?} was not found in the assertion entitlements")]
    RoleNotFound { name: String },

    #[error("the assertion carries no role entitlements")]
    NoEntitlements,
}

impl Error {
    pub(crate) fn malformed(endpoint: &str, detail: impl Into<String>) -> Error {
        Error::MalformedResponse {
            endpoint: endpoint.to_string(),
            detail: detail.into(),
        }
    }

    /// Maps an HTTP status bucket to the taxonomy. Success statuses pass.
    pub(crate) fn check_status(endpoint: &str, status: reqwest::StatusCode) -> Result<()> {
        if status.is_success() {
            return Ok(());
        }
        Err(match status.as_u16() {
            400 => Error::BadRequest(endpoint.to_string()),
            401 => Error::AuthenticationFailed,
            403 => Error::AccessDenied,
            code if code >= 500 => {
                Error::UpstreamInternal(format!("{} returned {}", endpoint, code))
            }
            code => Error::malformed(endpoint, format!("unexpected status {}", code)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn status_buckets() {
        assert!(Error::check_status("/x", StatusCode::OK).is_ok());
        assert!(matches!(
            Error::check_status("/x", StatusCode::UNAUTHORIZED),
            Err(Error::AuthenticationFailed)
        ));
        assert!(matches!(
            Error::check_status("/x", StatusCode::FORBIDDEN),
            Err(Error::AccessDenied)
        ));
        assert!(matches!(
            Error::check_status("/x", StatusCode::BAD_REQUEST),
            Err(Error::BadRequest(_))
        ));
        assert!(matches!(
            Error::check_status("/x", StatusCode::INTERNAL_SERVER_ERROR),
            Err(Error::UpstreamInternal(_))
        ));
    }
}
