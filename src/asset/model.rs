//! Model container handling.
//!
//! Reads just enough of a model to place it: the container (binary GLB or
//! JSON glTF), the mesh count, and the bounding box of every POSITION
//! accessor. Vertex data itself is never decoded; `min`/`max` on POSITION
//! accessors are mandatory in glTF 2.0.

use anyhow::{anyhow, bail, Context, Result};
use nalgebra::Vector3;

const GLB_MAGIC: u32 = 0x4654_6C67;
const GLB_VERSION: u32 = 2;
const GLB_HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelFormat {
    /// Binary container (`.glb`, `model/gltf-binary`).
    Glb,
    /// JSON document (`.gltf`, `model/gltf+json`).
    Gltf,
}

impl ModelFormat {
    /// Format implied by a locator's extension. Query strings and fragments
    /// are ignored.
    pub fn from_locator(locator: &str) -> Option<Self> {
        let path = locator.split(['?', '#']).next().unwrap_or(locator);
        let ext = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())?;
        match ext.as_str() {
            "glb" => Some(ModelFormat::Glb),
            "gltf" => Some(ModelFormat::Gltf),
            _ => None,
        }
    }

    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type.split(';').next().unwrap_or("").trim();
        match essence.to_ascii_lowercase().as_str() {
            "model/gltf-binary" => Some(ModelFormat::Glb),
            "model/gltf+json" => Some(ModelFormat::Gltf),
            _ => None,
        }
    }

    /// Sniff the payload itself.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&GLB_MAGIC.to_le_bytes()) {
            return Some(ModelFormat::Glb);
        }
        let first = bytes.iter().find(|b| !b.is_ascii_whitespace())?;
        (*first == b'{').then_some(ModelFormat::Gltf)
    }
}

/// Axis-aligned bounds in model space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
}

impl Bounds {
    pub fn center(&self) -> Vector3<f32> {
        (self.min + self.max) * 0.5
    }

    /// Radius of the sphere around `center` that encloses the box.
    pub fn radius(&self) -> f32 {
        (self.max - self.min).norm() * 0.5
    }

    fn union(self, other: Bounds) -> Bounds {
        Bounds {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }
}

/// Parsed model, ready to attach to a scene node.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelPayload {
    pub format: ModelFormat,
    pub generator: Option<String>,
    pub mesh_count: usize,
    pub primitive_count: usize,
    pub bounds: Bounds,
    /// Length of the embedded BIN chunk (GLB only).
    pub binary_len: usize,
}

/// Parse a model payload. `hint` comes from the locator or content type; the
/// payload's own magic wins when they disagree.
pub fn parse_model(bytes: &[u8], hint: Option<ModelFormat>) -> Result<ModelPayload> {
    let format = ModelFormat::detect(bytes)
        .or(hint)
        .ok_or_else(|| anyhow!("payload is neither GLB nor glTF JSON"))?;
    if let Some(hinted) = hint {
        if hinted != format {
            log::warn!(
                "AssetLoader: payload looks like {:?} but was labelled {:?}",
                format,
                hinted
            );
        }
    }

    let document = gltf::Gltf::from_slice(bytes).context("invalid glTF payload")?;
    let asset = &document.as_json().asset;
    if !asset.version.starts_with("2.") {
        bail!("unsupported glTF version {}", asset.version);
    }

    let mut bounds: Option<Bounds> = None;
    let mut primitive_count = 0;
    for primitive in document.meshes().flat_map(|mesh| mesh.primitives()) {
        primitive_count += 1;
        let Some(accessor) = primitive.get(&gltf::Semantic::Positions) else {
            continue;
        };
        let next = accessor_bounds(&accessor)
            .with_context(|| format!("accessor {} has no usable min/max", accessor.index()))?;
        bounds = Some(match bounds {
            Some(current) => current.union(next),
            None => next,
        });
    }
    let bounds = bounds.ok_or_else(|| anyhow!("model has no mesh positions"))?;

    Ok(ModelPayload {
        format,
        generator: asset.generator.clone(),
        mesh_count: document.meshes().len(),
        primitive_count,
        bounds,
        binary_len: document.blob.as_ref().map_or(0, Vec::len),
    })
}

fn accessor_bounds(accessor: &gltf::Accessor<'_>) -> Option<Bounds> {
    let min = vec3(&accessor.min()?)?;
    let max = vec3(&accessor.max()?)?;
    let bounds = Bounds { min, max };
    let finite = bounds.min.iter().chain(bounds.max.iter()).all(|v| v.is_finite());
    let ordered = bounds.min.iter().zip(bounds.max.iter()).all(|(lo, hi)| lo <= hi);
    (finite && ordered).then_some(bounds)
}

fn vec3(value: &serde_json::Value) -> Option<Vector3<f32>> {
    let values = value.as_array()?;
    if values.len() != 3 {
        return None;
    }
    let mut out = Vector3::zeros();
    for (slot, value) in out.iter_mut().zip(values) {
        *slot = value.as_f64()? as f32;
    }
    Some(out)
}

/// Wrap a glTF JSON document (and optional binary buffer) in a GLB container.
pub fn encode_glb(json: &[u8], bin: &[u8]) -> Vec<u8> {
    fn padded(data: &[u8], pad: u8) -> Vec<u8> {
        let mut out = data.to_vec();
        while out.len() % 4 != 0 {
            out.push(pad);
        }
        out
    }
    let json = padded(json, b' ');
    let bin = padded(bin, 0);
    let mut total = GLB_HEADER_LEN + CHUNK_HEADER_LEN + json.len();
    if !bin.is_empty() {
        total += CHUNK_HEADER_LEN + bin.len();
    }

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&GLB_MAGIC.to_le_bytes());
    out.extend_from_slice(&GLB_VERSION.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&(json.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(&json);
    if !bin.is_empty() {
        out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
        out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
        out.extend_from_slice(&bin);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const WATCH_JSON: &str = r#"{
        "asset": {"version": "2.0", "generator": "unit-test"},
        "meshes": [
            {"primitives": [{"attributes": {"POSITION": 0, "NORMAL": 1}}]},
            {"primitives": [{"attributes": {"POSITION": 2}}]}
        ],
        "accessors": [
            {"componentType": 5126, "count": 8, "type": "VEC3",
             "min": [-1.0, -0.5, -0.1], "max": [1.0, 0.5, 0.1]},
            {"componentType": 5126, "count": 8, "type": "VEC3"},
            {"componentType": 5126, "count": 8, "type": "VEC3",
             "min": [-0.2, -2.0, 0.0], "max": [0.2, 0.0, 0.3]}
        ]
    }"#;

    #[test]
    fn parses_glb_and_unions_position_bounds() {
        let glb = encode_glb(WATCH_JSON.as_bytes(), &[1, 2, 3]);
        let model = parse_model(&glb, Some(ModelFormat::Glb)).unwrap();
        assert_eq!(model.format, ModelFormat::Glb);
        assert_eq!(model.mesh_count, 2);
        assert_eq!(model.primitive_count, 2);
        assert_eq!(model.binary_len, 4);
        assert_eq!(model.bounds.min, Vector3::new(-1.0, -2.0, -0.1));
        assert_eq!(model.bounds.max, Vector3::new(1.0, 0.5, 0.3));
        assert_eq!(model.generator.as_deref(), Some("unit-test"));
    }

    #[test]
    fn parses_json_gltf() {
        let model = parse_model(WATCH_JSON.as_bytes(), None).unwrap();
        assert_eq!(model.format, ModelFormat::Gltf);
        assert!(model.bounds.radius() > 1.0);
    }

    #[test]
    fn rejects_truncated_glb() {
        let glb = encode_glb(WATCH_JSON.as_bytes(), &[]);
        assert!(parse_model(&glb[..glb.len() - 10], None).is_err());
        assert!(parse_model(&glb[..10], Some(ModelFormat::Glb)).is_err());
    }

    #[test]
    fn glb_without_binary_chunk_reports_zero_length() {
        let glb = encode_glb(WATCH_JSON.as_bytes(), &[]);
        let model = parse_model(&glb, None).unwrap();
        assert_eq!(model.format, ModelFormat::Glb);
        assert_eq!(model.binary_len, 0);
    }

    #[test]
    fn position_accessor_without_bounds_is_rejected() {
        let json = r#"{"asset": {"version": "2.0"},
            "meshes": [{"primitives": [{"attributes": {"POSITION": 0}}]}],
            "accessors": [{"componentType": 5126, "count": 3, "type": "VEC3"}]}"#;
        assert!(parse_model(json.as_bytes(), None).is_err());
    }

    #[test]
    fn position_referring_to_a_missing_accessor_is_rejected() {
        let json = r#"{"asset": {"version": "2.0"},
            "meshes": [{"primitives": [{"attributes": {"POSITION": 4}}]}],
            "accessors": []}"#;
        assert!(parse_model(json.as_bytes(), None).is_err());
    }

    #[test]
    fn rejects_model_without_positions() {
        let json = r#"{"asset": {"version": "2.0"}, "meshes": []}"#;
        let err = parse_model(json.as_bytes(), None).unwrap_err();
        assert!(err.to_string().contains("no mesh positions"));
    }

    #[test]
    fn rejects_gltf_1() {
        let json = r#"{"asset": {"version": "1.0"}}"#;
        assert!(parse_model(json.as_bytes(), None).is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_model(b"\x89PNG\r\n", None).is_err());
    }

    #[test]
    fn locator_and_content_type_hints() {
        assert_eq!(
            ModelFormat::from_locator("https://cdn.example/watch.GLB?v=3"),
            Some(ModelFormat::Glb)
        );
        assert_eq!(ModelFormat::from_locator("models/strap.gltf"), Some(ModelFormat::Gltf));
        assert_eq!(ModelFormat::from_locator("models/strap.obj"), None);
        assert_eq!(
            ModelFormat::from_content_type("model/gltf-binary; charset=binary"),
            Some(ModelFormat::Glb)
        );
        assert_eq!(ModelFormat::from_content_type("image/png"), None);
    }

    #[test]
    fn bounds_radius_is_half_diagonal() {
        let bounds = Bounds {
            min: Vector3::new(-1.0, -1.0, -1.0),
            max: Vector3::new(1.0, 1.0, 1.0),
        };
        assert!((bounds.radius() - 3f32.sqrt()).abs() < 1e-6);
        assert_eq!(bounds.center(), Vector3::zeros());
    }
}
