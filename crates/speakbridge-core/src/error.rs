//! Error types for the speakbridge pipeline.

/// Result type alias for speakbridge operations
pub type SpeakbridgeResult<T> = Result<T, SpeakbridgeError>;

/// Main error type for the speech command pipeline
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SpeakbridgeError {
    /// The engine cannot accept the request right now; the same command
    /// should be retried later.
    #[error("Speech engine busy: {message}")]
    EngineBusy {
        /// Error message describing why the engine refused
        message: String,
    },

    /// The engine refused a parameter value
    #[error("Engine rejected {parameter}: {message}")]
    ParameterRejected {
        /// Name of the parameter that was refused
        parameter: String,
        /// Error message returned by the engine
        message: String,
    },

    /// The engine could not be initialized or has gone away
    #[error("Speech engine unavailable: {message}")]
    EngineUnavailable {
        /// Error message describing the engine failure
        message: String,
    },

    /// A unit of work could not be allocated
    #[error("Memory allocation error: {message}")]
    AllocationFailure {
        /// Error message describing the allocation issue
        message: String,
    },

    /// The audio hardware ran dry and must be re-primed
    #[error("Audio underrun: {message}")]
    HardwareUnderrun {
        /// Error message describing the underrun
        message: String,
    },

    /// The audio hardware failed a write in a way that cannot be retried
    #[error("Audio device error: {message}")]
    HardwareFatal {
        /// Error message describing the device issue
        message: String,
    },

    /// Reading the input device failed
    #[error("Device read error: {message}")]
    DeviceRead {
        /// Error message describing the read failure
        message: String,
    },

    /// The synth worker did not acknowledge a stop request in time
    #[error("Stop request not acknowledged: {message}")]
    StopTimeout {
        /// Error message describing the timeout
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// File or descriptor I/O error
    #[error("I/O error: {message}")]
    Io {
        /// Error message describing the I/O failure
        message: String,
    },
}

impl SpeakbridgeError {
    /// Create a new engine busy error
    #[must_use]
    pub fn engine_busy<S: Into<String>>(message: S) -> Self {
        Self::EngineBusy {
            message: message.into(),
        }
    }

    /// Create a new parameter rejected error
    #[must_use]
    pub fn parameter_rejected<P: Into<String>, S: Into<String>>(parameter: P, message: S) -> Self {
        Self::ParameterRejected {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a new engine unavailable error
    #[must_use]
    pub fn engine_unavailable<S: Into<String>>(message: S) -> Self {
        Self::EngineUnavailable {
            message: message.into(),
        }
    }

    /// Create a new allocation error
    #[must_use]
    pub fn allocation<S: Into<String>>(message: S) -> Self {
        Self::AllocationFailure {
            message: message.into(),
        }
    }

    /// Create a new hardware underrun error
    #[must_use]
    pub fn underrun<S: Into<String>>(message: S) -> Self {
        Self::HardwareUnderrun {
            message: message.into(),
        }
    }

    /// Create a new fatal hardware error
    #[must_use]
    pub fn hardware<S: Into<String>>(message: S) -> Self {
        Self::HardwareFatal {
            message: message.into(),
        }
    }

    /// Create a new device read error
    #[must_use]
    pub fn device_read<S: Into<String>>(message: S) -> Self {
        Self::DeviceRead {
            message: message.into(),
        }
    }

    /// Create a new stop timeout error
    #[must_use]
    pub fn stop_timeout<S: Into<String>>(message: S) -> Self {
        Self::StopTimeout {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    #[must_use]
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    #[must_use]
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Check if the operation that produced this error should be retried
    /// with the same input
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::EngineBusy { .. } | Self::HardwareUnderrun { .. })
    }

    /// Check if this error ends the component that observed it
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceRead { .. } | Self::EngineUnavailable { .. })
    }

    /// Get the error category for logging
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::EngineBusy { .. } => "engine_busy",
            Self::ParameterRejected { .. } => "parameter",
            Self::EngineUnavailable { .. } => "engine",
            Self::AllocationFailure { .. } => "allocation",
            Self::HardwareUnderrun { .. } => "underrun",
            Self::HardwareFatal { .. } => "hardware",
            Self::DeviceRead { .. } => "device",
            Self::StopTimeout { .. } => "stop_timeout",
            Self::Configuration { .. } => "configuration",
            Self::Io { .. } => "io",
        }
    }
}

// Convert from common error types
impl From<std::io::Error> for SpeakbridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<nix::errno::Errno> for SpeakbridgeError {
    fn from(err: nix::errno::Errno) -> Self {
        Self::io(format!("{}: {}", err, err.desc()))
    }
}

impl From<hound::Error> for SpeakbridgeError {
    fn from(err: hound::Error) -> Self {
        Self::hardware(format!("WAV output error: {err}"))
    }
}

impl From<toml::de::Error> for SpeakbridgeError {
    fn from(err: toml::de::Error) -> Self {
        Self::configuration(format!("Invalid TOML: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = SpeakbridgeError::parameter_rejected("pitch", "out of range");
        assert_eq!(err.category(), "parameter");
        assert!(!err.is_retriable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = SpeakbridgeError::parameter_rejected("rate", "value 900 too high");
        assert_eq!(err.to_string(), "Engine rejected rate: value 900 too high");

        let err = SpeakbridgeError::engine_busy("buffer full");
        assert_eq!(err.to_string(), "Speech engine busy: buffer full");
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(SpeakbridgeError::engine_busy("test").category(), "engine_busy");
        assert_eq!(SpeakbridgeError::engine_unavailable("test").category(), "engine");
        assert_eq!(SpeakbridgeError::allocation("test").category(), "allocation");
        assert_eq!(SpeakbridgeError::underrun("test").category(), "underrun");
        assert_eq!(SpeakbridgeError::hardware("test").category(), "hardware");
        assert_eq!(SpeakbridgeError::device_read("test").category(), "device");
        assert_eq!(SpeakbridgeError::stop_timeout("test").category(), "stop_timeout");
        assert_eq!(SpeakbridgeError::configuration("test").category(), "configuration");
        assert_eq!(SpeakbridgeError::io("test").category(), "io");
    }

    #[test]
    fn test_retriable_errors() {
        assert!(SpeakbridgeError::engine_busy("test").is_retriable());
        assert!(SpeakbridgeError::underrun("test").is_retriable());
        assert!(!SpeakbridgeError::hardware("test").is_retriable());
        assert!(!SpeakbridgeError::parameter_rejected("pitch", "test").is_retriable());
        assert!(!SpeakbridgeError::stop_timeout("test").is_retriable());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(SpeakbridgeError::device_read("test").is_fatal());
        assert!(SpeakbridgeError::engine_unavailable("test").is_fatal());
        assert!(!SpeakbridgeError::hardware("test").is_fatal());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "No such device");
        let err = SpeakbridgeError::from(io_err);
        assert!(matches!(err, SpeakbridgeError::Io { .. }));
    }

    #[test]
    fn test_from_errno() {
        let err = SpeakbridgeError::from(nix::errno::Errno::EBADF);
        assert_eq!(err.category(), "io");
    }

    #[test]
    fn test_error_equality() {
        let err1 = SpeakbridgeError::hardware("write failed");
        let err2 = SpeakbridgeError::hardware("write failed");
        let err3 = SpeakbridgeError::hardware("different");

        assert_eq!(err1, err2);
        assert_ne!(err1, err3);
    }
}
