use thiserror::Error;

/// Errors raised by the detection pipeline and its file formats.
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid volume: {0}")]
    InvalidVolume(String),

    #[error("{path}:{line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },

    #[error("{0}: {1}")]
    Io(String, #[source] std::io::Error),

    #[error("could not read image {0}: {1}")]
    Image(String, #[source] image::ImageError),

    #[error("npy error for {0}: {1}")]
    Npy(String, String),
}

impl DetectionError {
    pub(crate) fn parse(path: &str, line: usize, message: impl Into<String>) -> Self {
        DetectionError::Parse {
            path: path.to_string(),
            line,
            message: message.into(),
        }
    }
}
