use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use wrist_tryon::config::TryOnConfig;
use wrist_tryon::media::PermissionPolicy;
use wrist_tryon::{FacingMode, RotationMode, ScaleMode};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "TRYON_CONFIG",
        "TRYON_CAMERA_DEVICE",
        "TRYON_CAMERA_PERMISSION",
        "TRYON_ENGINE",
        "TRYON_ENGINE_MODEL",
        "TRYON_MIN_CONFIDENCE",
        "TRYON_ROTATION_MODE",
        "TRYON_RENDER_FPS",
        "TRYON_ASSET_ROOT",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(&mut file, contents.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    let file = config_file(
        ".json",
        r#"{
            "camera": {"device": "/dev/video2", "facing": "user", "width": 1280, "height": 720, "target_fps": 24},
            "tracking": {"engine": "scripted", "min_confidence": 0.7},
            "placement": {"rotation": {"mode": "tracked"}, "scale": {"mode": "wrist_span", "reference_span": 0.08, "base": 0.5}},
            "render": {"target_fps": 30, "fov_degrees": 60.0},
            "assets": {"max_bytes": 1048576, "timeout_secs": 3}
        }"#,
    );
    std::env::set_var("TRYON_CONFIG", file.path());
    std::env::set_var("TRYON_CAMERA_DEVICE", "stub://rear");
    std::env::set_var("TRYON_ASSET_ROOT", "/srv/models");

    let cfg = TryOnConfig::load().expect("load config");

    assert_eq!(cfg.camera.device, "stub://rear");
    assert_eq!(cfg.camera.facing, FacingMode::User);
    assert_eq!((cfg.camera.width, cfg.camera.height), (1280, 720));
    assert_eq!(cfg.camera.target_fps, 24);
    assert_eq!(cfg.tracking.min_confidence, 0.7);
    assert_eq!(cfg.placement.rotation, RotationMode::Tracked);
    assert_eq!(
        cfg.placement.scale,
        ScaleMode::WristSpan {
            reference_span: 0.08,
            base: 0.5
        }
    );
    assert_eq!(cfg.render.target_fps, 30);
    assert_eq!(cfg.render.fov_degrees, 60.0);
    assert_eq!(cfg.assets.max_bytes, 1024 * 1024);
    assert_eq!(cfg.assets.timeout, Duration::from_secs(3));
    assert_eq!(cfg.assets.root, Some(PathBuf::from("/srv/models")));
    assert_eq!(cfg.scene_config().spin_per_tick, 0.0);

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    let file = config_file(
        ".toml",
        r#"
[placement]
plane_distance = 1.5

[placement.rotation]
mode = "spin"
radians_per_tick = 0.02

[render]
camera_z = 3.0
"#,
    );
    std::env::set_var("TRYON_CONFIG", file.path());

    let cfg = TryOnConfig::load().expect("load config");
    assert_eq!(cfg.scene_config().spin_per_tick, 0.02);
    assert_eq!(cfg.mapper_config().plane_z, 1.5);
    assert_eq!(cfg.camera.device, "stub://front_camera");

    clear_env();
}

#[test]
fn env_overrides_apply_without_a_file() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    std::env::set_var("TRYON_ENGINE", " Scripted ");
    std::env::set_var("TRYON_MIN_CONFIDENCE", "0.25");
    std::env::set_var("TRYON_ROTATION_MODE", "fixed");
    std::env::set_var("TRYON_RENDER_FPS", "90");

    let cfg = TryOnConfig::load().expect("load config");
    assert_eq!(cfg.tracking.engine, "scripted");
    assert_eq!(cfg.tracking.min_confidence, 0.25);
    assert!(matches!(cfg.placement.rotation, RotationMode::Fixed { .. }));
    assert_eq!(cfg.render.target_fps, 90);

    clear_env();
}

#[test]
fn stub_camera_permission_comes_from_file_and_env() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    let file = config_file(
        ".toml",
        r#"
[camera]
device = "stub://rear"
permission = "unavailable"
prompt_delay_ms = 40
"#,
    );
    std::env::set_var("TRYON_CONFIG", file.path());
    let cfg = TryOnConfig::load().expect("load config");
    assert_eq!(cfg.camera.synthetic.permission, PermissionPolicy::Unavailable);
    assert_eq!(cfg.camera.synthetic.prompt_delay, Duration::from_millis(40));

    std::env::set_var("TRYON_CAMERA_PERMISSION", "Deny");
    let cfg = TryOnConfig::load().expect("load config");
    assert_eq!(cfg.camera.synthetic.permission, PermissionPolicy::Deny);

    std::env::set_var("TRYON_CAMERA_PERMISSION", "maybe");
    assert!(TryOnConfig::load().is_err());

    clear_env();
}

#[test]
fn invalid_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    std::env::set_var("TRYON_MIN_CONFIDENCE", "1.5");
    assert!(TryOnConfig::load().is_err());
    clear_env();

    std::env::set_var("TRYON_ROTATION_MODE", "wobble");
    assert!(TryOnConfig::load().is_err());
    clear_env();

    let file = config_file(".json", r#"{"tracking": {"max_hands": 2}}"#);
    std::env::set_var("TRYON_CONFIG", file.path());
    let err = TryOnConfig::load().unwrap_err();
    assert!(err.to_string().contains("max_hands"));
    clear_env();

    let file = config_file(".json", r#"{"placement": {"scale": {"mode": "fixed", "value": 0.0}}}"#);
    std::env::set_var("TRYON_CONFIG", file.path());
    assert!(TryOnConfig::load().is_err());

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    std::env::set_var("TRYON_CONFIG", "/nonexistent/tryon.toml");
    let err = TryOnConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
