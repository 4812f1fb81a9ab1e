//! Error types and handling
//!
//! Common error types used across the recorder.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Resource acquisition step that failed while a pipeline was starting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisionStage {
    VideoEncoder,
    InputSurface,
    AudioEncoder,
    AudioCapture,
    ContainerWriter,
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionStage::VideoEncoder => write!(f, "video encoder"),
            ProvisionStage::InputSurface => write!(f, "input surface"),
            ProvisionStage::AudioEncoder => write!(f, "audio encoder"),
            ProvisionStage::AudioCapture => write!(f, "audio capture"),
            ProvisionStage::ContainerWriter => write!(f, "container writer"),
        }
    }
}

/// Recorder-wide error type
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Capture authorization denied")]
    AuthorizationDenied,

    #[error("Capture authorization permanently denied")]
    AuthorizationPermanentlyDenied,

    #[error("An authorization request is already in flight")]
    AuthorizationInFlight,

    #[error("A recording session is already running")]
    AlreadyRunning,

    #[error("No recording session is running")]
    NotRunning,

    #[error("Provisioning failed at {stage}: {source}")]
    Provisioning {
        stage: ProvisionStage,
        #[source]
        source: Box<RecorderError>,
    },

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Muxer error: {0}")]
    Muxer(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RecorderError {
    pub fn provisioning(stage: ProvisionStage, source: RecorderError) -> Self {
        RecorderError::Provisioning {
            stage,
            source: Box::new(source),
        }
    }
}

/// Error response for the UI layer
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<RecorderError> for ErrorResponse {
    fn from(error: RecorderError) -> Self {
        let code = match &error {
            RecorderError::AuthorizationDenied => "AUTHORIZATION_DENIED",
            RecorderError::AuthorizationPermanentlyDenied => "AUTHORIZATION_PERMANENTLY_DENIED",
            RecorderError::AuthorizationInFlight => "AUTHORIZATION_IN_FLIGHT",
            RecorderError::AlreadyRunning => "ALREADY_RUNNING",
            RecorderError::NotRunning => "NOT_RUNNING",
            RecorderError::Provisioning { .. } => "PROVISIONING_FAILED",
            RecorderError::Encoder(_) => "ENCODER_FAULT",
            RecorderError::Capture(_) => "CAPTURE_ERROR",
            RecorderError::Muxer(_) => "MUXER_ERROR",
            RecorderError::Configuration(_) => "CONFIGURATION_ERROR",
            RecorderError::Io(_) => "IO_ERROR",
            RecorderError::Serialization(_) => "SERIALIZATION_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;
