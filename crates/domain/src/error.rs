use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("invalid configuration at {path}: {message}")]
    Configuration { path: String, message: String },
    #[error("{what} must be strictly increasing (got {current} after {previous})")]
    NonMonotonicInput {
        what: &'static str,
        previous: f64,
        current: f64,
    },
    #[error("note number {value} outside the valid range {min}..={max}")]
    OutOfRangeNote { value: i64, min: i64, max: i64 },
    #[error("tick position of frame {frame} does not fit in 64 bits")]
    TickOverflow { frame: u64 },
}

impl DomainError {
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation(message.into())
    }

    pub fn configuration(path: &str, message: impl Into<String>) -> Self {
        Self::Configuration {
            path: path.to_string(),
            message: message.into(),
        }
    }

    pub fn non_monotonic(what: &'static str, previous: f64, current: f64) -> Self {
        Self::NonMonotonicInput {
            what,
            previous,
            current,
        }
    }

    /// Structural violations abort a run; everything else is caller input.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::NonMonotonicInput { .. }
                | Self::TickOverflow { .. }
        )
    }
}
