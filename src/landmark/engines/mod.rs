mod scripted;
#[cfg(feature = "landmark-tract")]
mod tract;

pub use scripted::{synthetic_hand, ScriptStep, ScriptedEngine};
#[cfg(feature = "landmark-tract")]
pub use tract::TractHandEngine;

use crate::config::TrackingSettings;
use crate::error::{ErrorKind, TryOnError, TryOnResult};
use crate::landmark::LandmarkEngine;

/// Build the engine named in the tracking settings.
///
/// Construction failures (unknown engine, unreadable model) are reported as
/// `LandmarkEngineInitFailed`.
pub fn engine_for(settings: &TrackingSettings) -> TryOnResult<Box<dyn LandmarkEngine>> {
    match settings.engine.as_str() {
        "scripted" => Ok(Box::new(ScriptedEngine::orbit((0.5, 0.55), 0.15, 240, 0.9))),
        #[cfg(feature = "landmark-tract")]
        "tract" => {
            let path = settings.model_path.as_ref().ok_or_else(|| {
                TryOnError::new(
                    ErrorKind::LandmarkEngineInitFailed,
                    "tract engine requires tracking.model_path",
                )
            })?;
            let engine = TractHandEngine::new(path).map_err(|err| {
                TryOnError::classify(&err, ErrorKind::LandmarkEngineInitFailed)
            })?;
            Ok(Box::new(engine))
        }
        #[cfg(not(feature = "landmark-tract"))]
        "tract" => Err(TryOnError::new(
            ErrorKind::LandmarkEngineInitFailed,
            "the tract engine requires the landmark-tract feature",
        )),
        other => Err(TryOnError::new(
            ErrorKind::LandmarkEngineInitFailed,
            format!("unknown landmark engine '{}'", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TryOnConfig;

    #[test]
    fn default_engine_is_scripted() {
        let cfg = TryOnConfig::default();
        let engine = engine_for(&cfg.tracking).unwrap();
        assert_eq!(engine.name(), "scripted");
    }

    #[test]
    fn unknown_engine_is_init_failure() {
        let mut cfg = TryOnConfig::default();
        cfg.tracking.engine = "mediapipe".to_string();
        let err = engine_for(&cfg.tracking).err().expect("unknown engine must fail");
        assert_eq!(err.kind, ErrorKind::LandmarkEngineInitFailed);
    }
}
