use std::path::PathBuf;

/// Errors surfaced by intake, the advisor, conversion and packaging.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A selected file is not an image. Rejected at intake, per file.
    #[error("file \"{name}\" is not a valid image ({mime})")]
    InvalidFileType { name: String, mime: String },

    /// Settings or an advisor response failed range/shape checks.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The advisor is temporarily overloaded. Retried by the pipeline.
    #[error("advisor service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The advisor answered with a non-transient failure.
    #[error("advisor request failed: {0}")]
    Advisor(String),

    /// Decoding or re-encoding the image failed. Never retried.
    #[error("conversion failed: {0}")]
    Conversion(String),

    /// Bundling converted outputs into an archive failed.
    #[error("archive failed: {0}")]
    Archive(String),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a retry may succeed. Only overload conditions qualify.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::ServiceUnavailable(_))
    }
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::Conversion(e.to_string())
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(e: zip::result::ZipError) -> Self {
        Error::Archive(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
