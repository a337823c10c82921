// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use arrow_schema::ArrowError;
use snafu::{location, Location, Snafu};

type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Invalid user input: {source}, {location}"))]
    InvalidInput {
        source: BoxedError,
        location: Location,
    },
    #[snafu(display("Not supported: {source}, {location}"))]
    NotSupported {
        source: BoxedError,
        location: Location,
    },
    #[snafu(display("Failed to allocate {size} bytes of device memory: {message}, {location}"))]
    Allocation {
        size: usize,
        message: String,
        location: Location,
    },
    #[snafu(display("Device execution error in {kernel}: {message}, {location}"))]
    Execution {
        kernel: String,
        message: String,
        location: Location,
    },
    #[snafu(display("LanceError(Arrow): {message}, {location}"))]
    Arrow { message: String, location: Location },
    #[snafu(display("Encountered internal error. Please file a bug report at https://github.com/lancedb/lance/issues. {message}, {location}"))]
    Internal { message: String, location: Location },
}

impl Error {
    pub fn invalid_input(message: impl Into<String>, location: Location) -> Self {
        let message: String = message.into();
        Self::InvalidInput {
            source: message.into(),
            location,
        }
    }

    pub fn not_supported(message: impl Into<String>, location: Location) -> Self {
        let message: String = message.into();
        Self::NotSupported {
            source: message.into(),
            location,
        }
    }

    pub fn internal(message: impl Into<String>, location: Location) -> Self {
        Self::Internal {
            message: message.into(),
            location,
        }
    }

    /// True if the error came from the device rather than from the request.
    pub fn is_device_error(&self) -> bool {
        matches!(self, Self::Allocation { .. } | Self::Execution { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<ArrowError> for Error {
    fn from(e: ArrowError) -> Self {
        Self::Arrow {
            message: e.to_string(),
            location: location!(),
        }
    }
}

impl From<Error> for ArrowError {
    fn from(value: Error) -> Self {
        Self::ExternalError(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_display() {
        let err = Error::invalid_input("split index 12 is out of bounds", location!());
        let msg = err.to_string();
        assert!(msg.starts_with("Invalid user input: split index 12 is out of bounds"));
        assert!(!err.is_device_error());
    }

    #[test]
    fn test_device_errors() {
        let err = Error::Allocation {
            size: 128,
            message: "pool exhausted".to_string(),
            location: location!(),
        };
        assert!(err.is_device_error());
        assert!(err.to_string().contains("128 bytes"));

        let err = Error::Execution {
            kernel: "copy_fixed_width".to_string(),
            message: "invalid launch".to_string(),
            location: location!(),
        };
        assert!(err.is_device_error());
    }

    #[test]
    fn test_from_arrow_error() {
        let err: Error = ArrowError::InvalidArgumentError("bad offsets".to_string()).into();
        assert!(matches!(err, Error::Arrow { .. }));
        assert!(err.to_string().contains("bad offsets"));

        let back = ArrowError::from(err);
        assert!(matches!(back, ArrowError::ExternalError(_)));
    }
}
