use thiserror::Error;

/// The closed set of failure kinds this crate can return.
///
/// Every fallible operation in the crate returns `Result<T, Error>`. There
/// is no `Success` variant: a successful call returns `Ok(..)` directly.
#[derive(Debug, Error)]
pub enum Error {
    #[error("library not initialized")]
    NotInitialized,

    #[error("library already initialized")]
    AlreadyInitialized,

    #[error("couldn't load dynamic library: {0}")]
    LibraryUnavailable(String),

    #[error("dynamic library missing required symbol: {0}")]
    SymbolUnavailable(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("memory allocation failed")]
    OutOfMemory,

    #[error("hardware model not supported: {0}")]
    UnsupportedHardware(String),

    #[error("insufficient user permissions")]
    NoPermission,

    #[error("not implemented")]
    NotImplemented,

    #[error("parsing error: {0}")]
    ParseError(String),

    #[error("unsupported")]
    Unsupported,

    #[error("monitor not started")]
    NotStarted,

    #[error("monitor already started")]
    AlreadyStarted,

    #[error("simultaneous measurement limit exceeded")]
    StackFull,

    #[error("malformed configuration: {0}")]
    BadConfig(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("sensor measurement error: {0}")]
    SensorMeasurementError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown error: {0}")]
    Unknown(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(Error::NotInitialized.to_string(), "library not initialized");
        assert_eq!(Error::StackFull.to_string(), "simultaneous measurement limit exceeded");
        assert_eq!(Error::NoPermission.to_string(), "insufficient user permissions");
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
