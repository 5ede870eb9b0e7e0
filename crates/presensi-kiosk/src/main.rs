use anyhow::{Context, Result};
use presensi_core::{ArcFaceEmbedder, IdentityStore, ScrfdDetector};
use presensi_hw::{Camera, DisplayPower, NullDisplay, RpiDisplay};
use presensi_kiosk::{
    Announcer, AttendanceDesk, AttendanceStore, ButtonLayout, Capture, Config, FrameSlot,
    HeadlessSurface, Kiosk, KioskParts, PowerController, RecognitionScheduler, Spawn,
    ThreadSpawner,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("presensid starting");

    let config = Config::load().context("failed to load configuration")?;

    // Missing catalog, metadata or database is fatal.
    let catalog = IdentityStore::load(&config.catalog_path, &config.metadata_path)
        .context("failed to load identity store")?;
    if catalog.is_empty() {
        tracing::warn!("identity catalog is empty; every face will be unknown");
    }
    let catalog = Arc::new(catalog);

    let spawner: Arc<dyn Spawn> = Arc::new(ThreadSpawner);
    let store = Arc::new(
        AttendanceStore::open(&config.db_path, Arc::clone(&spawner))
            .with_context(|| format!("failed to open {}", config.db_path.display()))?,
    );
    let announcer = Arc::new(
        Announcer::from_config(&config, Arc::clone(&spawner))
            .context("failed to set up speech")?,
    );

    let scrfd_path = config.scrfd_model_path();
    let detector = ScrfdDetector::load(&scrfd_path).context("failed to load SCRFD detector")?;
    tracing::info!(path = %scrfd_path.display(), "SCRFD detector loaded");

    let arcface_path = config.arcface_model_path();
    let embedder = ArcFaceEmbedder::load(&arcface_path).context("failed to load ArcFace embedder")?;
    tracing::info!(path = %arcface_path.display(), "ArcFace embedder loaded");

    let camera = Camera::open(&config.camera_device, config.camera_width, config.camera_height)
        .with_context(|| format!("failed to open camera {}", config.camera_device))?;
    tracing::info!(
        device = %camera.device_path,
        width = camera.width,
        height = camera.height,
        "camera opened"
    );

    let display: Arc<dyn DisplayPower> = if config.display_power {
        Arc::new(RpiDisplay::new(&config.backlight_dir))
    } else {
        tracing::info!("display power control disabled");
        Arc::new(NullDisplay)
    };

    let slot = Arc::new(FrameSlot::new());
    let capture = Capture::start(camera, Arc::clone(&slot)).context("failed to start capture thread")?;

    let buttons = ButtonLayout::for_screen(config.screen_width, config.screen_height);
    let surface = HeadlessSurface::stdin(buttons).context("failed to start input reader")?;

    let mut kiosk = Kiosk::new(KioskParts {
        slot,
        scheduler: RecognitionScheduler::new(
            detector,
            embedder,
            Arc::clone(&catalog),
            config.tolerance,
            config.recognize_every,
            config.process_scale,
        ),
        desk: AttendanceDesk::new(
            catalog,
            store,
            announcer,
            config.status_policy(),
            config.popup_ttl(),
        ),
        power: PowerController::new(config.sleep_after),
        display,
        spawner,
        surface,
        buttons,
        cooldown: config.cooldown(),
    });

    tracing::info!("presensid ready");

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    let mut interactive = tokio::task::spawn_blocking(move || kiosk.run(&flag));

    tokio::select! {
        joined = &mut interactive => {
            if let Err(err) = joined {
                tracing::error!(error = %err, "kiosk loop aborted");
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("presensid shutting down");
            shutdown.store(true, Ordering::Relaxed);
            if let Err(err) = interactive.await {
                tracing::error!(error = %err, "kiosk loop aborted");
            }
        }
    }

    let timeout = config.capture_stop_timeout();
    let released = tokio::task::spawn_blocking(move || capture.stop(timeout)).await?;
    if !released {
        tracing::warn!("camera not released before exit");
    }

    tracing::info!("presensid stopped");
    Ok(())
}
