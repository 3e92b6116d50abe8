use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vigil_core::{CommandMatcher, FaceMatcher};
use vigil_hw::{Alarm, CommandAlarm, TerminalBell, V4l2Provider};

mod config;
mod dbus_interface;
mod engine;

use config::{BusKind, Config};
use dbus_interface::{VigilService, BUS_NAME, OBJECT_PATH};
use engine::Engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("vigild starting");

    let config = Config::from_env();

    let encoder_cmd = config
        .encoder_cmd
        .as_deref()
        .context("VIGIL_ENCODER_CMD is not set; a face encoder command is required")?;
    let matcher: Arc<dyn FaceMatcher> = Arc::new(
        CommandMatcher::parse(encoder_cmd).context("invalid VIGIL_ENCODER_CMD")?,
    );

    let alarm: Arc<dyn Alarm> = match config.alarm_cmd.as_deref() {
        Some(cmd) => Arc::new(CommandAlarm::parse(cmd).context("invalid VIGIL_ALARM_CMD")?),
        None => Arc::new(TerminalBell),
    };

    let engine = Arc::new(
        Engine::new(config.engine_config(), Arc::new(V4l2Provider), matcher, alarm)
            .context("failed to initialise engine")?,
    );

    let service = VigilService::new(Arc::clone(&engine));
    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tokio::spawn(dbus_interface::forward_alerts(
        conn.clone(),
        engine.subscribe_alerts(),
    ));

    tracing::info!(bus = ?config.bus, name = BUS_NAME, "vigild ready");

    if config.autostart {
        let engine = Arc::clone(&engine);
        let index = config.camera_index;
        match tokio::task::spawn_blocking(move || engine.start(index)).await? {
            Ok(()) => tracing::info!(camera_index = index, "surveillance autostarted"),
            Err(e) => tracing::error!(error = %e, camera_index = index, "autostart failed"),
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("vigild shutting down");

    let stopper = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || stopper.stop()).await?;

    drop(conn);
    Ok(())
}
