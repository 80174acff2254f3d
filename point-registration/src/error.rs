use thiserror::Error;

/// Errors raised while matching and registering point sets.
#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("mismatched inputs: {0}")]
    Mismatch(String),

    #[error("singular system: {0}")]
    Singular(String),

    #[error("{path}:{line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },

    #[error("{0}: {1}")]
    Io(String, #[source] std::io::Error),
}

impl RegistrationError {
    pub(crate) fn parse(path: &str, line: usize, message: impl Into<String>) -> Self {
        RegistrationError::Parse {
            path: path.to_string(),
            line,
            message: message.into(),
        }
    }

    pub(crate) fn check_same_length(a: usize, b: usize) -> Result<(), RegistrationError> {
        if a != b {
            return Err(RegistrationError::Mismatch(format!(
                "{} source points against {} target points",
                a, b
            )));
        }
        Ok(())
    }
}
