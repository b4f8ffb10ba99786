//! tryon_demo - headless end-to-end try-on run
//!
//! Drives one session against the configured camera (a synthetic
//! `stub://` device by default), renders into an in-memory target and
//! prints what was presented.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use wrist_tryon::asset::model::encode_glb;
use wrist_tryon::media::PermissionPolicy;
use wrist_tryon::session::SessionDeps;
use wrist_tryon::{
    ProductRecord, RecordingTarget, RenderTarget, SessionController, SessionState, StaticCatalog,
    TryOnConfig,
};

const DEMO_PRODUCT_ID: &str = "demo-watch";

const DEMO_MODEL_JSON: &str = r#"{
  "asset": {"version": "2.0", "generator": "tryon_demo"},
  "meshes": [{"name": "case", "primitives": [{"attributes": {"POSITION": 0}}]}],
  "accessors": [{"componentType": 5126, "count": 8, "type": "VEC3",
                 "min": [-0.2, -0.2, -0.05], "max": [0.2, 0.2, 0.05]}]
}"#;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// How long to run before stopping.
    #[arg(long, default_value_t = 3)]
    seconds: u64,
    /// Product to try on.
    #[arg(long, default_value = DEMO_PRODUCT_ID)]
    product: String,
    /// Product catalog (JSON array of records). A one-product demo catalog
    /// is used when omitted.
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// Model for the demo product. A small generated GLB is used when omitted.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Simulate the user declining the camera prompt (stub devices only).
    #[arg(long)]
    deny_camera: bool,
    /// Simulated permission prompt latency (stub devices only).
    #[arg(long)]
    prompt_delay_ms: Option<u64>,
    /// Zoom factor applied once the overlay is rendering.
    #[arg(long)]
    zoom: Option<f32>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let mut config = TryOnConfig::load()?;
    if args.deny_camera {
        config.camera.synthetic.permission = PermissionPolicy::Deny;
    }
    if let Some(delay) = args.prompt_delay_ms {
        config.camera.synthetic.prompt_delay = Duration::from_millis(delay);
    }

    stage("prepare catalog");
    let catalog = match &args.catalog {
        Some(path) => StaticCatalog::from_json_file(path)?,
        None => {
            let model = match &args.model {
                Some(path) => path.clone(),
                None => write_demo_model()?,
            };
            StaticCatalog::new().with_product(ProductRecord {
                product_id: DEMO_PRODUCT_ID.to_string(),
                model_asset_ref: model.display().to_string(),
                display_name: "Demo Watch".to_string(),
                brand: None,
            })
        }
    };
    if catalog.is_empty() {
        return Err(anyhow!("catalog has no products"));
    }

    let target = RecordingTarget::new(config.camera.width, config.camera.height);
    let surface_target = target.clone();
    let surface = Arc::new(move || Box::new(surface_target.clone()) as Box<dyn RenderTarget>);

    let deps = SessionDeps::from_config(&config, Arc::new(catalog), surface)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let signal = shutdown.clone();
    ctrlc::set_handler(move || {
        signal.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    stage("start session");
    let session = SessionController::new(config, deps, args.product.clone());
    session.start()?;

    let settled = session.wait_for(Duration::from_secs(10), |s| {
        !matches!(s.state, SessionState::Idle | SessionState::Requesting)
    });
    let Some(settled) = settled else {
        session.stop();
        return Err(anyhow!("camera request did not resolve"));
    };
    if settled.state != SessionState::Active {
        stage(&format!(
            "session ended as {:?}: {}",
            settled.state,
            settled.last_error_message.as_deref().unwrap_or("no error")
        ));
    }

    if matches!(settled.state, SessionState::Active | SessionState::Failed) {
        stage("tracking");
        let deadline = Instant::now() + Duration::from_secs(args.seconds);
        let mut zoom = args.zoom;
        while Instant::now() < deadline && !shutdown.load(Ordering::SeqCst) {
            if let Some(factor) = zoom {
                if session.status().model_attached && session.adjust_zoom(factor).is_ok() {
                    zoom = None;
                }
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    stage("stop session");
    let before_stop = session.status();
    session.stop();
    session.join_background();
    let after = session.status();

    let seen = target.snapshot();
    println!("session      {}", after.session_id);
    println!("product      {}", after.product_id);
    println!("states       {:?}", session.transitions());
    if let Some(kind) = before_stop.last_error {
        println!("last error   {}", kind);
    }
    println!("asset        {:?}", before_stop.asset_state);
    println!(
        "presented    {} frames ({} with video, {} with overlay)",
        seen.presented, seen.with_video, seen.with_overlay
    );
    if let Some(overlay) = &seen.last_overlay {
        if let Some(center) = overlay.screen_center {
            println!(
                "last overlay ({:.1}, {:.1}) px, radius {:.1} px",
                center.x,
                center.y,
                overlay.screen_radius.unwrap_or(0.0)
            );
        }
    }
    println!("stats        {}", serde_json::to_string(&after.stats)?);
    println!("streams open {}", after.active_streams);
    Ok(())
}

fn write_demo_model() -> Result<PathBuf> {
    let path = std::env::temp_dir().join(format!("tryon_demo_{}.glb", std::process::id()));
    std::fs::write(&path, encode_glb(DEMO_MODEL_JSON.as_bytes(), &[]))
        .with_context(|| format!("write demo model {}", path.display()))?;
    Ok(path)
}

fn stage(msg: &str) {
    eprintln!("tryon_demo: {}", msg);
}
