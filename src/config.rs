use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::landmark::HandLandmark;
use crate::media::{CameraConstraints, FacingMode, PermissionPolicy, SyntheticCameraConfig};
use crate::pose::{MapperConfig, RotationMode, ScaleMode};
use crate::render::SceneConfig;

const DEFAULT_CAMERA_DEVICE: &str = "stub://front_camera";
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_ENGINE: &str = "scripted";
const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;
const DEFAULT_MODEL_SCALE: f32 = 0.5;
const DEFAULT_SPIN_RADIANS: f32 = 0.01;
const DEFAULT_PLANE_DISTANCE: f32 = 2.0;
const DEFAULT_RENDER_FPS: u32 = 60;
const DEFAULT_FOV_DEGREES: f32 = 70.0;
const DEFAULT_NEAR: f32 = 0.01;
const DEFAULT_FAR: f32 = 100.0;
const DEFAULT_CAMERA_Z: f32 = 2.0;
const DEFAULT_ASSET_MAX_BYTES: u64 = 20 * 1024 * 1024;
const DEFAULT_ASSET_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize, Default)]
struct TryOnConfigFile {
    camera: Option<CameraConfigFile>,
    tracking: Option<TrackingConfigFile>,
    placement: Option<PlacementConfigFile>,
    render: Option<RenderConfigFile>,
    assets: Option<AssetConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    facing: Option<FacingMode>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    /// Prompt outcome for `stub://` devices.
    permission: Option<PermissionPolicy>,
    prompt_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    engine: Option<String>,
    model_path: Option<PathBuf>,
    min_confidence: Option<f32>,
    max_hands: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct PlacementConfigFile {
    rotation: Option<RotationMode>,
    scale: Option<ScaleMode>,
    plane_distance: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct RenderConfigFile {
    target_fps: Option<u32>,
    fov_degrees: Option<f32>,
    near: Option<f32>,
    far: Option<f32>,
    camera_z: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct AssetConfigFile {
    root: Option<PathBuf>,
    max_bytes: Option<u64>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct TryOnConfig {
    pub camera: CameraSettings,
    pub tracking: TrackingSettings,
    pub placement: PlacementSettings,
    pub render: RenderSettings,
    pub assets: AssetSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    pub facing: FacingMode,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    /// Behaviour of `stub://` devices; ignored for real ones.
    pub synthetic: SyntheticCameraConfig,
}

#[derive(Debug, Clone)]
pub struct TrackingSettings {
    /// Engine name: `scripted`, or `tract` with the `landmark-tract` feature.
    pub engine: String,
    pub model_path: Option<PathBuf>,
    pub min_confidence: f32,
    /// Only single-hand tracking is supported; validation rejects anything else.
    pub max_hands: u32,
}

#[derive(Debug, Clone)]
pub struct PlacementSettings {
    pub rotation: RotationMode,
    pub scale: ScaleMode,
    pub plane_distance: f32,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub target_fps: u32,
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub camera_z: f32,
}

#[derive(Debug, Clone)]
pub struct AssetSettings {
    /// Base directory for relative model locators.
    pub root: Option<PathBuf>,
    pub max_bytes: u64,
    pub timeout: Duration,
}

impl Default for TryOnConfig {
    fn default() -> Self {
        // An empty file section set yields every default; this cannot fail.
        Self::from_file(TryOnConfigFile::default())
    }
}

impl TryOnConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TRYON_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TryOnConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let tracking = file.tracking.unwrap_or_default();
        let placement = file.placement.unwrap_or_default();
        let render = file.render.unwrap_or_default();
        let assets = file.assets.unwrap_or_default();

        Self {
            camera: CameraSettings {
                device: camera
                    .device
                    .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
                facing: camera.facing.unwrap_or_default(),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
                synthetic: SyntheticCameraConfig {
                    permission: camera.permission.unwrap_or_default(),
                    prompt_delay: Duration::from_millis(camera.prompt_delay_ms.unwrap_or(0)),
                    supported: true,
                },
            },
            tracking: TrackingSettings {
                engine: tracking
                    .engine
                    .unwrap_or_else(|| DEFAULT_ENGINE.to_string()),
                model_path: tracking.model_path,
                min_confidence: tracking.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
                max_hands: tracking.max_hands.unwrap_or(1),
            },
            placement: PlacementSettings {
                rotation: placement.rotation.unwrap_or(RotationMode::Spin {
                    radians_per_tick: DEFAULT_SPIN_RADIANS,
                }),
                scale: placement.scale.unwrap_or(ScaleMode::Fixed {
                    value: DEFAULT_MODEL_SCALE,
                }),
                plane_distance: placement.plane_distance.unwrap_or(DEFAULT_PLANE_DISTANCE),
            },
            render: RenderSettings {
                target_fps: render.target_fps.unwrap_or(DEFAULT_RENDER_FPS),
                fov_degrees: render.fov_degrees.unwrap_or(DEFAULT_FOV_DEGREES),
                near: render.near.unwrap_or(DEFAULT_NEAR),
                far: render.far.unwrap_or(DEFAULT_FAR),
                camera_z: render.camera_z.unwrap_or(DEFAULT_CAMERA_Z),
            },
            assets: AssetSettings {
                root: assets.root,
                max_bytes: assets.max_bytes.unwrap_or(DEFAULT_ASSET_MAX_BYTES),
                timeout: Duration::from_secs(
                    assets.timeout_secs.unwrap_or(DEFAULT_ASSET_TIMEOUT_SECS),
                ),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("TRYON_CAMERA_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(permission) = std::env::var("TRYON_CAMERA_PERMISSION") {
            self.camera.synthetic.permission = match permission.trim().to_lowercase().as_str() {
                "grant" => PermissionPolicy::Grant,
                "deny" => PermissionPolicy::Deny,
                "unavailable" => PermissionPolicy::Unavailable,
                other => {
                    return Err(anyhow!(
                        "TRYON_CAMERA_PERMISSION must be grant, deny or unavailable (got '{}')",
                        other
                    ))
                }
            };
        }
        if let Ok(engine) = std::env::var("TRYON_ENGINE") {
            if !engine.trim().is_empty() {
                self.tracking.engine = engine.trim().to_lowercase();
            }
        }
        if let Ok(path) = std::env::var("TRYON_ENGINE_MODEL") {
            if !path.trim().is_empty() {
                self.tracking.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(threshold) = std::env::var("TRYON_MIN_CONFIDENCE") {
            self.tracking.min_confidence = threshold
                .parse()
                .map_err(|_| anyhow!("TRYON_MIN_CONFIDENCE must be a number in [0, 1]"))?;
        }
        if let Ok(mode) = std::env::var("TRYON_ROTATION_MODE") {
            self.placement.rotation = match mode.trim().to_lowercase().as_str() {
                "fixed" => RotationMode::Fixed {
                    roll: 0.0,
                    pitch: 0.0,
                    yaw: 0.0,
                },
                "spin" => RotationMode::Spin {
                    radians_per_tick: DEFAULT_SPIN_RADIANS,
                },
                "tracked" => RotationMode::Tracked,
                other => {
                    return Err(anyhow!(
                        "TRYON_ROTATION_MODE must be fixed, spin or tracked (got '{}')",
                        other
                    ))
                }
            };
        }
        if let Ok(fps) = std::env::var("TRYON_RENDER_FPS") {
            self.render.target_fps = fps
                .parse()
                .map_err(|_| anyhow!("TRYON_RENDER_FPS must be an integer"))?;
        }
        if let Ok(root) = std::env::var("TRYON_ASSET_ROOT") {
            if !root.trim().is_empty() {
                self.assets.root = Some(PathBuf::from(root));
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.tracking.min_confidence) {
            return Err(anyhow!("tracking.min_confidence must be within [0, 1]"));
        }
        if self.tracking.max_hands != 1 {
            return Err(anyhow!(
                "tracking.max_hands must be 1 (multi-hand tracking is not supported)"
            ));
        }
        if self.camera.target_fps == 0 || self.render.target_fps == 0 {
            return Err(anyhow!("camera and render target_fps must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.placement.plane_distance <= 0.0 {
            return Err(anyhow!("placement.plane_distance must be greater than zero"));
        }
        if self.render.near <= 0.0 || self.render.far <= self.render.near {
            return Err(anyhow!("render clip planes must satisfy 0 < near < far"));
        }
        if !(1.0..180.0).contains(&self.render.fov_degrees) {
            return Err(anyhow!("render.fov_degrees must be within [1, 180)"));
        }
        if self.assets.max_bytes == 0 {
            return Err(anyhow!("assets.max_bytes must be greater than zero"));
        }
        self.placement.scale.validate()?;
        Ok(())
    }

    pub fn camera_constraints(&self) -> CameraConstraints {
        CameraConstraints {
            device: self.camera.device.clone(),
            facing: self.camera.facing,
            width: self.camera.width,
            height: self.camera.height,
            target_fps: self.camera.target_fps,
        }
    }

    pub fn mapper_config(&self) -> MapperConfig {
        MapperConfig {
            min_confidence: self.tracking.min_confidence,
            rotation: self.placement.rotation,
            scale: self.placement.scale,
            plane_z: self.render.camera_z - self.placement.plane_distance,
            anchor: HandLandmark::Wrist,
        }
    }

    pub fn scene_config(&self) -> SceneConfig {
        SceneConfig {
            fov_degrees: self.render.fov_degrees,
            near: self.render.near,
            far: self.render.far,
            camera_z: self.render.camera_z,
            target_fps: self.render.target_fps,
            spin_per_tick: match self.placement.rotation {
                RotationMode::Spin { radians_per_tick } => radians_per_tick,
                _ => 0.0,
            },
        }
    }
}

fn read_config_file(path: &Path) -> Result<TryOnConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_rear_camera_scene() {
        let cfg = TryOnConfig::default();
        assert_eq!(cfg.camera.facing, FacingMode::Environment);
        assert_eq!(cfg.render.fov_degrees, 70.0);
        assert_eq!(cfg.render.camera_z, 2.0);
        assert_eq!(cfg.mapper_config().plane_z, 0.0);
        assert_eq!(cfg.scene_config().spin_per_tick, 0.01);
        assert!(matches!(cfg.placement.scale, ScaleMode::Fixed { value } if value == 0.5));
    }

    #[test]
    fn stub_camera_settings_come_from_the_file() {
        let file: TryOnConfigFile = toml::from_str(
            "[camera]\npermission = \"deny\"\nprompt_delay_ms = 250\n",
        )
        .unwrap();
        let cfg = TryOnConfig::from_file(file);
        assert_eq!(cfg.camera.synthetic.permission, PermissionPolicy::Deny);
        assert_eq!(cfg.camera.synthetic.prompt_delay, Duration::from_millis(250));
        assert_eq!(
            TryOnConfig::default().camera.synthetic.permission,
            PermissionPolicy::Grant
        );
    }

    #[test]
    fn validate_rejects_multi_hand() {
        let mut cfg = TryOnConfig::default();
        cfg.tracking.max_hands = 2;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_threshold() {
        let mut cfg = TryOnConfig::default();
        cfg.tracking.min_confidence = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn non_spin_rotation_disables_render_spin() {
        let mut cfg = TryOnConfig::default();
        cfg.placement.rotation = RotationMode::Tracked;
        assert_eq!(cfg.scene_config().spin_per_tick, 0.0);
    }
}
