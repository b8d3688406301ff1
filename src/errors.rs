use std::io;
use std::sync::Arc;

/// Failure kinds shared by every loader and by the geometry layer.
///
/// `NotFound` and `Transient` are the recoverable kinds: `Transient` is retried by the
/// HTTP loader and `NotFound` can be absorbed by `WithDefault`. Everything else is
/// fatal for the request that raised it.
///
/// Errors are `Clone` so that the outcome of a single-flight load can be handed to
/// every waiter; `io::Error` is kept behind an `Arc` for that reason.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("tile ({x}, {y}) at zoom {zoom} is not available")]
    NotFound { x: i64, y: i64, zoom: u32 },
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("zoom {zoom} outside of [{min_zoom}, {max_zoom}]")]
    InvalidZoom {
        zoom: u32,
        min_zoom: u32,
        max_zoom: u32,
    },
    #[error("projection failure: {0}")]
    Crs(String),
    #[error("corrupt data: {0}")]
    Corruption(String),
    #[error("i/o failure: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::Io(Arc::new(value))
    }
}

impl From<image::ImageError> for Error {
    fn from(value: image::ImageError) -> Self {
        Error::Corruption(format!("image codec: {}", value))
    }
}

impl Error {
    pub(crate) fn not_found(x: i64, y: i64, zoom: u32) -> Error {
        Error::NotFound { x, y, zoom }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}
