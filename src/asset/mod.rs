//! Asset Loader.
//!
//! Fetches and parses the product model off the presentation path. A
//! `ModelAsset` walks `Unloaded -> Loading -> Ready | Failed`; the only way
//! back is an explicit `reset()`. Completions carry a `LivenessToken` and are
//! dropped when the session that asked for them is gone.

pub mod catalog;
pub mod fetch;
pub mod model;

use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::error::{ErrorKind, TryOnError, TryOnResult};
use crate::liveness::LivenessToken;

pub use catalog::{Catalog, ProductRecord, StaticCatalog};
pub use fetch::{fetcher_for, AssetFetcher, FetchedAsset, FileFetcher, RoutingFetcher};
#[cfg(feature = "asset-http")]
pub use fetch::HttpFetcher;
pub use model::{Bounds, ModelFormat, ModelPayload};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LoadState {
    #[default]
    Unloaded,
    Loading,
    Ready,
    Failed,
}

#[derive(Clone, Debug)]
pub struct ModelAsset {
    pub id: String,
    pub locator: String,
    payload: Option<Arc<ModelPayload>>,
    content_digest: Option<String>,
    load_state: LoadState,
    error: Option<TryOnError>,
}

impl ModelAsset {
    pub fn new(id: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            locator: locator.into(),
            payload: None,
            content_digest: None,
            load_state: LoadState::Unloaded,
            error: None,
        }
    }

    pub fn load_state(&self) -> LoadState {
        self.load_state
    }

    pub fn payload(&self) -> Option<&Arc<ModelPayload>> {
        self.payload.as_ref()
    }

    pub fn bounding_radius(&self) -> Option<f32> {
        self.payload.as_ref().map(|payload| payload.bounds.radius())
    }

    /// Hex SHA-256 of the fetched bytes.
    pub fn content_digest(&self) -> Option<&str> {
        self.content_digest.as_deref()
    }

    pub fn error(&self) -> Option<&TryOnError> {
        self.error.as_ref()
    }

    pub fn begin_loading(&mut self) -> TryOnResult<()> {
        self.expect_state(LoadState::Unloaded, LoadState::Loading)?;
        self.load_state = LoadState::Loading;
        Ok(())
    }

    pub fn mark_ready(&mut self, payload: ModelPayload, digest: String) -> TryOnResult<()> {
        self.expect_state(LoadState::Loading, LoadState::Ready)?;
        self.payload = Some(Arc::new(payload));
        self.content_digest = Some(digest);
        self.load_state = LoadState::Ready;
        Ok(())
    }

    pub fn mark_failed(&mut self, error: TryOnError) -> TryOnResult<()> {
        self.expect_state(LoadState::Loading, LoadState::Failed)?;
        self.error = Some(error);
        self.load_state = LoadState::Failed;
        Ok(())
    }

    /// Drop the payload and return to `Unloaded`.
    pub fn reset(&mut self) {
        self.payload = None;
        self.content_digest = None;
        self.error = None;
        self.load_state = LoadState::Unloaded;
    }

    fn expect_state(&self, required: LoadState, next: LoadState) -> TryOnResult<()> {
        if self.load_state != required {
            return Err(TryOnError::new(
                ErrorKind::InvalidTransition,
                format!(
                    "asset {} cannot go {:?} -> {:?}",
                    self.id, self.load_state, next
                ),
            ));
        }
        Ok(())
    }
}

/// Background model loads.
#[derive(Clone)]
pub struct AssetLoader {
    fetcher: Arc<dyn AssetFetcher>,
    max_bytes: u64,
}

/// Handle to one background load.
pub struct AssetJob {
    join: JoinHandle<()>,
}

impl AssetJob {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn join(self) {
        if self.join.join().is_err() {
            log::error!("AssetLoader: load thread panicked");
        }
    }
}

impl AssetLoader {
    pub fn new(fetcher: Arc<dyn AssetFetcher>, max_bytes: u64) -> Self {
        Self { fetcher, max_bytes }
    }

    /// Load synchronously. The asset ends in `Ready` or `Failed`; the error
    /// is also returned for convenience.
    pub fn load_now(&self, asset: &mut ModelAsset) -> TryOnResult<()> {
        asset.begin_loading()?;
        match self.fetch_and_parse(&asset.locator) {
            Ok((payload, digest)) => {
                log::info!(
                    "AssetLoader: {} ready ({:?}, {} meshes, radius {:.3}, sha256 {})",
                    asset.id,
                    payload.format,
                    payload.mesh_count,
                    payload.bounds.radius(),
                    &digest[..12]
                );
                asset.mark_ready(payload, digest)
            }
            Err(err) => {
                log::warn!("AssetLoader: {} failed: {}", asset.id, err);
                asset.mark_failed(err.clone())?;
                Err(err)
            }
        }
    }

    /// Load on a dedicated thread. `on_done` runs only while `liveness` is
    /// still live.
    pub fn load<F>(&self, mut asset: ModelAsset, liveness: LivenessToken, on_done: F) -> TryOnResult<AssetJob>
    where
        F: FnOnce(ModelAsset) + Send + 'static,
    {
        let loader = self.clone();
        let join = std::thread::Builder::new()
            .name(format!("tryon-asset-{}", asset.id))
            .spawn(move || {
                let _ = loader.load_now(&mut asset);
                if !liveness.is_live() {
                    log::info!(
                        "AssetLoader: discarding {} (session generation {} is gone)",
                        asset.id,
                        liveness.generation()
                    );
                    return;
                }
                on_done(asset);
            })
            .map_err(|e| {
                TryOnError::new(
                    ErrorKind::ModelLoadFailed,
                    format!("failed to spawn asset loader: {}", e),
                )
            })?;
        Ok(AssetJob { join })
    }

    fn fetch_and_parse(&self, locator: &str) -> TryOnResult<(ModelPayload, String)> {
        let is_http = locator.starts_with("http://") || locator.starts_with("https://");
        let locator_format = ModelFormat::from_locator(locator);
        if !is_http && locator_format.is_none() {
            return Err(TryOnError::new(
                ErrorKind::ModelLoadFailed,
                format!("{} is not a .glb or .gltf model", locator),
            ));
        }

        let fetched = self
            .fetcher
            .fetch(locator, self.max_bytes)
            .map_err(|err| TryOnError::classify(&err, ErrorKind::ModelLoadFailed))?;
        let content_format = fetched
            .content_type
            .as_deref()
            .and_then(ModelFormat::from_content_type);
        let hint = content_format.or(locator_format);
        if hint.is_none() {
            return Err(TryOnError::new(
                ErrorKind::ModelLoadFailed,
                format!(
                    "{} served as {} is not a glTF model",
                    fetched.source,
                    fetched.content_type.as_deref().unwrap_or("unknown type")
                ),
            ));
        }

        let payload = model::parse_model(&fetched.bytes, hint).map_err(|err| {
            TryOnError::new(
                ErrorKind::ModelLoadFailed,
                format!("parse {}: {:#}", fetched.source, err),
            )
        })?;
        let digest = hex::encode(Sha256::digest(&fetched.bytes));
        Ok((payload, digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::Builder;

    use crate::liveness::Liveness;

    const CUBE: &str = r#"{"asset": {"version": "2.0"},
        "meshes": [{"primitives": [{"attributes": {"POSITION": 0}}]}],
        "accessors": [{"componentType": 5126, "count": 8, "type": "VEC3",
                       "min": [-0.5, -0.5, -0.5], "max": [0.5, 0.5, 0.5]}]}"#;

    fn temp_model(suffix: &str, bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(bytes).unwrap();
        file
    }

    fn loader() -> AssetLoader {
        AssetLoader::new(Arc::new(FileFetcher::default()), 1024 * 1024)
    }

    #[test]
    fn load_state_is_monotonic_until_reset() {
        let mut asset = ModelAsset::new("w-1", "w1.glb");
        assert!(asset.mark_failed(TryOnError::new(ErrorKind::ModelLoadFailed, "x")).is_err());
        asset.begin_loading().unwrap();
        assert!(asset.begin_loading().is_err());
        asset
            .mark_failed(TryOnError::new(ErrorKind::ModelLoadFailed, "404"))
            .unwrap();
        let err = asset.begin_loading().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidTransition);
        asset.reset();
        assert_eq!(asset.load_state(), LoadState::Unloaded);
        assert!(asset.error().is_none());
        asset.begin_loading().unwrap();
    }

    #[test]
    fn loads_glb_with_digest_and_radius() {
        let glb = model::encode_glb(CUBE.as_bytes(), &[]);
        let file = temp_model(".glb", &glb);
        let mut asset = ModelAsset::new("w-1", file.path().to_str().unwrap());
        loader().load_now(&mut asset).unwrap();
        assert_eq!(asset.load_state(), LoadState::Ready);
        assert_eq!(asset.content_digest().map(str::len), Some(64));
        let radius = asset.bounding_radius().unwrap();
        assert!((radius - 0.75f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn rejects_non_model_extension_without_fetching() {
        let file = temp_model(".png", CUBE.as_bytes());
        let mut asset = ModelAsset::new("w-1", file.path().to_str().unwrap());
        let err = loader().load_now(&mut asset).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ModelLoadFailed);
        assert_eq!(asset.load_state(), LoadState::Failed);
    }

    #[test]
    fn oversized_model_fails() {
        let file = temp_model(".gltf", CUBE.as_bytes());
        let small = AssetLoader::new(Arc::new(FileFetcher::default()), 16);
        let mut asset = ModelAsset::new("w-1", file.path().to_str().unwrap());
        let err = small.load_now(&mut asset).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ModelLoadFailed);
        assert!(err.message.contains("limit"));
    }

    #[test]
    fn background_load_reports_while_live() {
        let file = temp_model(".gltf", CUBE.as_bytes());
        let liveness = Liveness::new();
        let (tx, rx) = mpsc::channel();
        let job = loader()
            .load(
                ModelAsset::new("w-1", file.path().to_str().unwrap()),
                liveness.begin(),
                move |asset| {
                    let _ = tx.send(asset.load_state());
                },
            )
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), LoadState::Ready);
        job.join();
    }

    #[test]
    fn background_load_is_discarded_after_revoke() {
        let file = temp_model(".gltf", CUBE.as_bytes());
        let liveness = Liveness::new();
        let token = liveness.begin();
        liveness.revoke();
        let (tx, rx) = mpsc::channel::<LoadState>();
        let job = loader()
            .load(
                ModelAsset::new("w-1", file.path().to_str().unwrap()),
                token,
                move |asset| {
                    let _ = tx.send(asset.load_state());
                },
            )
            .unwrap();
        job.join();
        assert!(rx.try_recv().is_err());
    }
}
