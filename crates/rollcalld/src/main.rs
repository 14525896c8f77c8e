use anyhow::{Context, Result};
use rollcall_core::{Clock, MemoryKiosk, NearestNeighbor, PatchExtractor, SystemClock};
use rollcalld::config::{BusKind, KioskScope};
use rollcalld::dbus_interface::{RollcallService, BUS_NAME, OBJECT_PATH};
use rollcalld::{AttendanceService, Config, Kiosk, SqliteStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::load().context("loading configuration")?;
    tracing::info!(
        db = %config.db_path.display(),
        metric = config.selected_metric().name(),
        threshold = config.match_threshold,
        utc_offset = %config.day.offset(),
        "configuration loaded"
    );

    let store = Arc::new(
        SqliteStore::open(&config.db_path, config.day)
            .with_context(|| format!("opening {}", config.db_path.display()))?,
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let kiosk = match config.kiosk_scope {
        KioskScope::Shared => Kiosk::Shared(Arc::clone(&store)),
        KioskScope::Process => Kiosk::Process(MemoryKiosk::new(clock.now())),
    };
    let extractor = PatchExtractor::new(config.patch_size, config.min_contrast);
    let matcher = NearestNeighbor::new(config.selected_metric(), config.match_threshold);
    let service = Arc::new(AttendanceService::new(store, extractor, matcher, kiosk, clock));

    // Initial load happens once, before the bus name is claimed.
    let report = {
        let service = Arc::clone(&service);
        tokio::task::spawn_blocking(move || service.refresh_cache()).await??
    };
    tracing::info!(
        loaded = report.loaded,
        skipped = report.skipped.len(),
        "matching cache primed"
    );

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, RollcallService::new(service, &config))?
        .build()
        .await
        .context("registering on D-Bus")?;

    tracing::info!(bus = BUS_NAME, "rollcalld ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
