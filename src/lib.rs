//! Wrist Try-On Core
//!
//! Real-time AR try-on for wrist-worn products: a live camera feed is
//! composited with a 3D model anchored to the user's tracked wrist.
//!
//! # Pipeline
//!
//! ```text
//! camera --frames--> detector --landmarks--> pose mapper --transform--> render loop
//!                                                                        ^
//! catalog --locator--> asset loader --------------model-----------------+
//! ```
//!
//! Each stage runs on its own thread and hands off through latest-value
//! slots, so a slow detector or a slow model download never stalls the
//! presented video.
//!
//! # Module Structure
//!
//! - `media`: camera acquisition and capture lifecycle
//! - `landmark`: landmark engines and the off-thread detector adapter
//! - `pose`: landmark frame to placement transform mapping
//! - `asset`: product catalog, model fetch and glTF/GLB parsing
//! - `render`: scene graph and the display-rate render loop
//! - `session`: the session state machine that owns all of the above

pub mod asset;
pub mod config;
pub mod error;
pub mod frame;
pub mod landmark;
pub mod liveness;
pub mod media;
pub mod pose;
pub mod render;
pub mod session;

pub use asset::{AssetLoader, LoadState, ModelAsset, ProductRecord, StaticCatalog};
pub use config::TryOnConfig;
pub use error::{ErrorKind, TryOnError, TryOnResult};
pub use frame::{FrameStamper, PixelFormat, VideoFrame};
pub use landmark::{DetectionEvent, HandLandmark, Landmark, LandmarkEngine, LandmarkFrame};
pub use media::{CameraConstraints, FacingMode, MediaSourceManager};
pub use pose::{PlacementTransform, PoseMapper, RotationMode, ScaleMode};
pub use render::{RecordingTarget, RenderLoop, RenderTarget};
pub use session::{
    SessionController, SessionDeps, SessionState, SessionStats, StateTransition, TryOnSession,
};
