//! Typed error hierarchy for the CodeGuard service.
//!
//! `GuardError` is the taxonomy every subsystem maps into at its boundary:
//! webhook intake and the heal gateway turn variants into HTTP responses,
//! the orchestrator turns them into node-local recoveries or a FAILED run.

use thiserror::Error;

/// Errors surfaced by the compliance service.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("No forge credentials configured (app key or fallback token required)")]
    AuthUnconfigured,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forge rejected the request: {0}")]
    ValidationUpstream(String),

    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Sandbox failure: {0}")]
    SandboxFailure(String),

    #[error("Sandbox timed out after {seconds}s")]
    SandboxTimeout { seconds: u64 },

    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl GuardError {
    /// Whether the orchestrator may keep the FSM moving after this error.
    /// `Fatal` and auth failures end the run; everything else degrades locally.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Fatal(_) | Self::AuthUnconfigured | Self::Unauthorized(_)
        )
    }

    /// Map a forge HTTP status to the matching variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 => Self::Unauthorized(body),
            403 => Self::Forbidden(body),
            404 => Self::NotFound(body),
            409 => Self::Conflict(body),
            422 => Self::ValidationUpstream(body),
            s if s >= 500 => Self::Upstream(format!("HTTP {}: {}", s, body)),
            s => Self::Upstream(format!("unexpected HTTP {}: {}", s, body)),
        }
    }
}

impl From<reqwest::Error> for GuardError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Upstream(format!("request timed out: {}", err))
        } else {
            Self::Upstream(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_is_typed() {
        assert!(matches!(
            GuardError::from_status(404, "missing".into()),
            GuardError::NotFound(_)
        ));
        assert!(matches!(
            GuardError::from_status(409, "stale".into()),
            GuardError::Conflict(_)
        ));
        assert!(matches!(
            GuardError::from_status(422, "bad field".into()),
            GuardError::ValidationUpstream(_)
        ));
        assert!(matches!(
            GuardError::from_status(503, "down".into()),
            GuardError::Upstream(_)
        ));
    }

    #[test]
    fn recoverability_split() {
        assert!(GuardError::NotFound("x".into()).is_recoverable());
        assert!(GuardError::Upstream("x".into()).is_recoverable());
        assert!(GuardError::SandboxTimeout { seconds: 180 }.is_recoverable());
        assert!(!GuardError::AuthUnconfigured.is_recoverable());
        assert!(!GuardError::Fatal(anyhow::anyhow!("bug")).is_recoverable());
    }

    #[test]
    fn variants_render_messages() {
        let err = GuardError::SandboxTimeout { seconds: 180 };
        assert!(err.to_string().contains("180"));
        let err = GuardError::Validation("missing repo_url".into());
        assert!(err.to_string().contains("missing repo_url"));
    }
}
