pub mod canvas;
pub mod capture;
pub mod config;
pub mod error;
pub mod io;
pub mod replay;
pub mod sources;
pub mod types;
pub mod visualization;

pub use canvas::{CanvasObserver, SpatialCanvas};
pub use capture::{CaptureCoordinator, SessionObserver, SessionState};
pub use config::SessionConfig;
pub use error::{CanvasError, CaptureError};
pub use types::{AnchorFrame, MarkerId, PhotoMarker, Pose, PoseSample, RelativePose};
