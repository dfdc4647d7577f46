//! Typed errors for the canvas, the capture pipeline and its collaborators.

use thiserror::Error;

use crate::capture::SessionState;
use crate::types::MarkerId;

/// Scene-graph invariant violations and anchor misuse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CanvasError {
    #[error("anchor frame is already initialized")]
    AlreadyInitialized,

    #[error("anchor frame is not initialized")]
    NotInitialized,

    #[error("marker {0} already exists")]
    DuplicateMarker(MarkerId),

    #[error("marker {0} not found")]
    MarkerNotFound(MarkerId),
}

/// Failure reported by a still-image collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageCaptureError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),

    #[error("capture failed: {0}")]
    Failed(String),

    /// The collaborator dropped the reply without answering.
    #[error("image request was dropped without a result")]
    Dropped,
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("persistence unavailable: {0}")]
    Unavailable(String),
}

/// Failure to start a sensor stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("{source_name} is unavailable: {reason}")]
    Unavailable {
        source_name: &'static str,
        reason: String,
    },

    #[error("{0} is already subscribed")]
    AlreadySubscribed(&'static str),
}

#[derive(Error, Debug)]
pub enum CaptureError {
    /// Capture or marker operation requested before an anchor exists.
    #[error("no anchor has been placed")]
    NoAnchor,

    /// A still-image request is already outstanding.
    #[error("a capture is already in progress")]
    Busy,

    /// No pose has been observed yet, so the photo cannot be placed.
    #[error("no device pose available")]
    NoPose,

    #[error("tracking has not mapped enough of the scene to place an anchor")]
    ScanInsufficient,

    #[error("invalid session state: expected {expected}, found {found:?}")]
    InvalidState {
        expected: &'static str,
        found: SessionState,
    },

    #[error("image capture failed: {0}")]
    ImageCapture(#[from] ImageCaptureError),

    #[error("persisting capture failed: {0}")]
    Persistence(#[from] PersistenceError),

    /// The session was reset while the capture was in flight.
    #[error("capture aborted by session reset")]
    Aborted,

    #[error(transparent)]
    Canvas(#[from] CanvasError),

    #[error(transparent)]
    Source(#[from] SourceError),
}

impl CaptureError {
    /// Reset races are cancellations, not failures worth surfacing to the user.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, CaptureError::Aborted)
    }

    /// Errors returned synchronously because the session was not ready.
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            CaptureError::NoAnchor
                | CaptureError::Busy
                | CaptureError::ScanInsufficient
                | CaptureError::InvalidState { .. }
        )
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failures while loading replay traces and image folders.
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("cannot read replay input: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse trace: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot decode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("bad glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("invalid trace sample: {0}")]
    InvalidSample(String),
}
