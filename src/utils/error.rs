//! Customized unified error type.

use std::fmt;
use std::io;
use std::net;
use std::string::FromUtf8Error;

/// Customized error type for Shoal.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ShoalError(pub String);

impl ShoalError {
    /// Builds a `ShoalError` from anything displayable.
    pub fn msg(m: impl fmt::Display) -> Self {
        ShoalError(m.to_string())
    }
}

impl fmt::Display for ShoalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0) // do not display literal quotes
    }
}

impl std::error::Error for ShoalError {}

// Helper macro for saving boiler-plate `impl From<T>`s for transparent
// conversion from various common error types to `ShoalError`.
macro_rules! impl_from_error {
    ($error:ty) => {
        impl From<$error> for ShoalError {
            fn from(e: $error) -> Self {
                // just store the source error's string representation
                ShoalError(e.to_string())
            }
        }
    };
}

impl_from_error!(io::Error);
impl_from_error!(net::AddrParseError);
impl_from_error!(FromUtf8Error);
impl_from_error!(toml::de::Error);
impl_from_error!(tokio::time::error::Elapsed);
impl_from_error!(tokio::task::JoinError);

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn error_display() {
        let e = ShoalError("unreachable introducer".into());
        assert_eq!(format!("{}", e), String::from("unreachable introducer"));
    }

    #[test]
    fn from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "gone");
        let e = ShoalError::from(io_error);
        assert!(e.0.contains("gone"));
    }

    #[test]
    fn from_displayable() {
        let e = ShoalError::msg(42);
        assert_eq!(e, ShoalError("42".into()));
    }
}
