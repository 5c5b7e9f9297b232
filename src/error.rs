//! Engine error taxonomy.

use thiserror::Error;

/// Errors reported by the engine's control plane.
///
/// The rendering clock never produces errors; it degrades to silence.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// No audio subsystem is available. Fatal, surfaced once at init.
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// Resource allocation failed during init. Retrying starts from a clean slate.
    #[error("Engine initialization failed: {0}")]
    InitializationFailed(String),

    /// A command was issued before `init()` completed.
    #[error("Engine is not initialized")]
    NotInitialized,

    /// The rendering context has not been resumed by a user gesture yet.
    #[error("Audio context is suspended; resume it from a user interaction")]
    SuspendedContext,

    /// The effect exists but has no parameter with this id.
    #[error("Unknown parameter '{param}' on effect '{effect}'")]
    InvalidParameter { effect: String, param: String },

    #[error("Unknown effect '{0}'")]
    UnknownEffect(String),

    /// A malformed TimbreConfig / DrumHitConfig or trigger argument.
    #[error("Invalid voice configuration: {0}")]
    InvalidConfig(String),

    #[error("Recording is not active")]
    RecordingNotActive,

    /// The control queue to the rendering clock is saturated.
    #[error("Command queue is full; command dropped")]
    QueueFull,

    #[error("Audio encoding failed: {0}")]
    Encoding(String),

    #[error("Engine configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether the caller can recover (retry, prompt for a gesture, fix input).
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EngineError::UnsupportedPlatform(_))
    }

    /// Whether the engine simply is not ready to make sound yet.
    pub fn is_not_ready(&self) -> bool {
        matches!(
            self,
            EngineError::NotInitialized | EngineError::SuspendedContext
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Config(e.to_string())
    }
}

impl From<hound::Error> for EngineError {
    fn from(e: hound::Error) -> Self {
        EngineError::Encoding(e.to_string())
    }
}
