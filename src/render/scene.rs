use nalgebra::{Perspective3, Point2, Point3, UnitQuaternion, Vector3};
use std::sync::Arc;

use crate::asset::{LoadState, ModelAsset, ModelPayload};
use crate::error::{ErrorKind, TryOnError, TryOnResult};
use crate::pose::PlacementTransform;

const MIN_ZOOM: f32 = 0.25;
const MAX_ZOOM: f32 = 4.0;

#[derive(Clone, Debug, PartialEq)]
pub struct SceneConfig {
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub camera_z: f32,
    pub target_fps: u32,
    /// Added to the model's roll on every tick (0 disables spinning).
    pub spin_per_tick: f32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            fov_degrees: 70.0,
            near: 0.01,
            far: 100.0,
            camera_z: 2.0,
            target_fps: 60,
            spin_per_tick: 0.01,
        }
    }
}

/// Camera on the +z axis looking down -z.
#[derive(Clone, Debug)]
pub struct PerspectiveCamera {
    pub position: Point3<f32>,
    projection: Perspective3<f32>,
}

impl PerspectiveCamera {
    pub fn new(config: &SceneConfig, aspect: f32) -> Self {
        Self {
            position: Point3::new(0.0, 0.0, config.camera_z),
            projection: Perspective3::new(
                aspect,
                config.fov_degrees.to_radians(),
                config.near,
                config.far,
            ),
        }
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 {
            self.projection.set_aspect(aspect);
        }
    }

    pub fn fov_degrees(&self) -> f32 {
        self.projection.fovy().to_degrees()
    }

    /// Project a world point to pixel coordinates (origin top-left).
    /// `None` when the point is behind the camera or outside the clip range.
    pub fn project(&self, world: &Point3<f32>, width: u32, height: u32) -> Option<Point2<f32>> {
        let view = Point3::from(world - self.position);
        if view.z >= 0.0 {
            return None;
        }
        let ndc = self.projection.project_point(&view);
        if !(-1.0..=1.0).contains(&ndc.z) {
            return None;
        }
        Some(Point2::new(
            (ndc.x + 1.0) * 0.5 * width as f32,
            (1.0 - ndc.y) * 0.5 * height as f32,
        ))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HemisphereLight {
    pub sky_color: u32,
    pub ground_color: u32,
    pub intensity: f32,
}

impl Default for HemisphereLight {
    fn default() -> Self {
        Self {
            sky_color: 0xffffff,
            ground_color: 0x444444,
            intensity: 1.0,
        }
    }
}

/// The overlay model. Its transform is written by the render loop only.
#[derive(Clone, Debug)]
pub struct ModelNode {
    pub asset_id: String,
    pub payload: Arc<ModelPayload>,
    pub(crate) placement: Option<PlacementTransform>,
    pub(crate) spin: f32,
    pub(crate) zoom: f32,
}

impl ModelNode {
    pub fn placement(&self) -> Option<&PlacementTransform> {
        self.placement.as_ref()
    }

    pub fn spin(&self) -> f32 {
        self.spin
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    /// Effective orientation: placement rotation followed by the accumulated spin.
    pub fn world_rotation(&self) -> Option<UnitQuaternion<f32>> {
        let placement = self.placement.as_ref()?;
        Some(placement.rotation * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), self.spin))
    }

    pub fn world_scale(&self) -> Option<Vector3<f32>> {
        self.placement.as_ref().map(|p| p.scale * self.zoom)
    }

    /// Bounding radius in world units.
    pub fn world_radius(&self) -> Option<f32> {
        let scale = self.world_scale()?;
        Some(self.payload.bounds.radius() * scale.max())
    }
}

pub struct Scene {
    pub camera: PerspectiveCamera,
    pub light: HemisphereLight,
    model: Option<ModelNode>,
    disposed: bool,
}

impl Scene {
    pub fn new(config: &SceneConfig) -> Self {
        Self {
            camera: PerspectiveCamera::new(config, 1.0),
            light: HemisphereLight::default(),
            model: None,
            disposed: false,
        }
    }

    pub fn model(&self) -> Option<&ModelNode> {
        self.model.as_ref()
    }

    pub(crate) fn model_mut(&mut self) -> Option<&mut ModelNode> {
        self.model.as_mut()
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Attach a loaded model, replacing any previous one. Refused once the
    /// scene is disposed or when the asset is not `Ready`.
    pub fn install_model(&mut self, asset: &ModelAsset) -> TryOnResult<()> {
        if self.disposed {
            return Err(TryOnError::new(
                ErrorKind::InvalidTransition,
                format!("scene disposed; not installing {}", asset.id),
            ));
        }
        let payload = match (asset.load_state(), asset.payload()) {
            (LoadState::Ready, Some(payload)) => payload.clone(),
            (state, _) => {
                return Err(TryOnError::new(
                    ErrorKind::ModelLoadFailed,
                    format!("asset {} is {:?}, not ready", asset.id, state),
                ))
            }
        };
        self.model = Some(ModelNode {
            asset_id: asset.id.clone(),
            payload,
            placement: None,
            spin: 0.0,
            zoom: 1.0,
        });
        Ok(())
    }

    /// Detach the model node. Returns true if one was attached.
    pub fn remove_model(&mut self) -> bool {
        self.model.take().is_some()
    }

    /// Drop the model and refuse further installs.
    pub fn dispose(&mut self) {
        self.model = None;
        self.disposed = true;
    }
}

pub(crate) fn clamp_zoom(zoom: f32) -> f32 {
    if zoom.is_finite() {
        zoom.clamp(MIN_ZOOM, MAX_ZOOM)
    } else {
        1.0
    }
}
