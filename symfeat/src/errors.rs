use std::time::Duration;

#[non_exhaustive]
#[derive(Debug)]
pub enum Error {
    /// Malformed parameter or structure file
    Parse(String),
    /// An atom or a reference entry uses a species absent from the configured
    /// species order
    UnknownSpecies(String),
    /// Got an invalid argument or option value in a function
    InvalidArgument(String),
    /// Some array does not have the expected dimensions
    ShapeMismatch(String),
    /// The descriptor kernel reported an internal error
    Kernel(String),
    /// The computation for a structure did not finish before its deadline
    Timeout(Duration),
    /// The computation was aborted through an `AbortSignal`
    Cancelled,
    /// Computed features disagree with a reference dataset
    Validation(String),
    /// I/O error while reading a file
    Io(std::io::Error),
    /// Error while serializing/deserializing data
    Json(serde_json::Error),
    /// Error related to reading structure files
    Chemfiles(String),
    /// Error used when a panic was caught
    Panic(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Parse(e) => write!(f, "parse error: {}", e),
            Error::UnknownSpecies(e) => write!(f, "unknown species: {}", e),
            Error::InvalidArgument(e) => write!(f, "invalid argument: {}", e),
            Error::ShapeMismatch(e) => write!(f, "shape mismatch: {}", e),
            Error::Kernel(e) => write!(f, "kernel failure: {}", e),
            Error::Timeout(duration) => write!(f, "computation did not finish in {:.3}s", duration.as_secs_f64()),
            Error::Cancelled => write!(f, "computation was cancelled"),
            Error::Validation(e) => write!(f, "validation failed: {}", e),
            Error::Io(e) => write!(f, "io error: {}", e),
            Error::Json(e) => write!(f, "json error: {}", e),
            Error::Chemfiles(e) => write!(f, "chemfiles error: {}", e),
            Error::Panic(e) => write!(f, "internal error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Parse(_) |
            Error::UnknownSpecies(_) |
            Error::InvalidArgument(_) |
            Error::ShapeMismatch(_) |
            Error::Kernel(_) |
            Error::Timeout(_) |
            Error::Cancelled |
            Error::Validation(_) |
            Error::Chemfiles(_) |
            Error::Panic(_) => None,
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Error {
        Error::Io(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Error {
        Error::Json(error)
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(error: ndarray::ShapeError) -> Error {
        Error::ShapeMismatch(error.to_string())
    }
}

// Box<dyn Any + Send + 'static> is the error type in std::panic::catch_unwind
impl From<Box<dyn std::any::Any + Send + 'static>> for Error {
    fn from(error: Box<dyn std::any::Any + Send + 'static>) -> Error {
        let message = if let Some(message) = error.downcast_ref::<String>() {
            message.clone()
        } else if let Some(message) = error.downcast_ref::<&str>() {
            (*message).to_owned()
        } else {
            "panic message is not a string".to_owned()
        };

        Error::Panic(message)
    }
}
