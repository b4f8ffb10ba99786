//! Error taxonomy for the try-on core.
//!
//! Public contracts return `TryOnError`, a coded error in the same shape as an
//! auditable error: a stable machine code plus a human message. Internal
//! plumbing uses `anyhow` and is classified at the component boundary.

use serde::Serialize;

/// Stable error classes surfaced through `status().last_error`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// User declined camera access. Terminal for the session until retried.
    CameraPermissionDenied,
    /// No device, or the device is busy.
    CameraUnavailable,
    /// Landmark engine failed to load or warm up. Tracking disabled.
    LandmarkEngineInitFailed,
    /// Transient: no wrist in view. Never surfaces to the caller.
    NoLandmarksDetected,
    /// Model fetch or parse failed. Terminal for overlay rendering only.
    ModelLoadFailed,
    /// Capability probe failed before start.
    UnsupportedDevice,
    /// Session API called from a state that does not allow it.
    InvalidTransition,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::CameraPermissionDenied => "CAMERA_PERMISSION_DENIED",
            ErrorKind::CameraUnavailable => "CAMERA_UNAVAILABLE",
            ErrorKind::LandmarkEngineInitFailed => "LANDMARK_ENGINE_INIT_FAILED",
            ErrorKind::NoLandmarksDetected => "NO_LANDMARKS_DETECTED",
            ErrorKind::ModelLoadFailed => "MODEL_LOAD_FAILED",
            ErrorKind::UnsupportedDevice => "UNSUPPORTED_DEVICE",
            ErrorKind::InvalidTransition => "INVALID_TRANSITION",
        }
    }

    /// Transient kinds are absorbed locally and never drive a transition.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::NoLandmarksDetected)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Clone, Debug)]
pub struct TryOnError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TryOnError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify an internal error. A `TryOnError` anywhere in the chain keeps
    /// its own kind; anything else is reported as `fallback`.
    pub fn classify(err: &anyhow::Error, fallback: ErrorKind) -> Self {
        if let Some(inner) = err.chain().find_map(|e| e.downcast_ref::<TryOnError>()) {
            return inner.clone();
        }
        Self::new(fallback, format!("{:#}", err))
    }
}

impl std::fmt::Display for TryOnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for TryOnError {}

pub type TryOnResult<T> = std::result::Result<T, TryOnError>;
