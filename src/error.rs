use std::fmt;

/// Failures surfaced by the services.
///
/// Storage and transport layers report through [`anyhow::Error`]; services
/// classify those into one of the variants below so the HTTP layer can pick a
/// status code without inspecting messages.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
    /// The outbound call of a replay failed.
    #[error("failed to replay request: {0}")]
    Replay(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn unauthorized(message: impl fmt::Display) -> Self {
        Self::Unauthorized(message.to_string())
    }

    pub fn not_found(message: impl fmt::Display) -> Self {
        Self::NotFound(message.to_string())
    }

    pub fn conflict(message: impl fmt::Display) -> Self {
        Self::Conflict(message.to_string())
    }
}

/// Collects field errors for request payloads.
pub trait Validate {
    /// Returns every problem found, empty when the value is acceptable.
    fn problems(&self) -> Vec<String>;

    fn validate(&self) -> Result<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(problems))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Name(&'static str);

    impl Validate for Name {
        fn problems(&self) -> Vec<String> {
            if self.0.is_empty() {
                vec!["name is required".into()]
            } else {
                vec![]
            }
        }
    }

    #[test]
    fn validation_collects_problems() {
        assert!(Name("ok").validate().is_ok());
        let Err(Error::Validation(problems)) = Name("").validate() else {
            panic!("expected a validation error")
        };
        assert_eq!(problems, vec!["name is required".to_string()]);
    }

    #[test]
    fn replay_error_display() {
        let err = Error::Replay("connection refused".into());
        assert_eq!(err.to_string(), "failed to replay request: connection refused");
    }
}
