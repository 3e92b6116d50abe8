use crate::engine::{Engine, EngineError};
use image::ImageFormat;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use vigil_core::Alert;
use zbus::object_server::SignalEmitter;
use zbus::{fdo, interface};

pub const BUS_NAME: &str = "org.freedesktop.Vigil1";
pub const OBJECT_PATH: &str = "/org/freedesktop/Vigil1";

/// D-Bus interface for the Vigil surveillance daemon.
///
/// Bus name: org.freedesktop.Vigil1
/// Object path: /org/freedesktop/Vigil1
pub struct VigilService {
    engine: Arc<Engine>,
}

impl VigilService {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

#[derive(Serialize)]
struct StatusReport {
    version: &'static str,
    surveillance_active: bool,
    alert_active: bool,
    suspects: usize,
    alerts_logged: usize,
    threshold: f32,
}

#[derive(Serialize)]
struct SuspectSummary {
    id: usize,
    name: String,
    details: String,
}

#[interface(name = "org.freedesktop.Vigil1")]
impl VigilService {
    /// Open camera `camera_index` and begin surveillance.
    async fn start(&self, camera_index: u32) -> fdo::Result<()> {
        tracing::info!(camera_index, "start requested");
        let engine = Arc::clone(&self.engine);
        blocking(move || engine.start(camera_index)).await
    }

    /// Stop surveillance. No-op when already stopped.
    async fn stop(&self) -> fdo::Result<()> {
        tracing::info!("stop requested");
        let engine = Arc::clone(&self.engine);
        blocking(move || {
            engine.stop();
            Ok(())
        })
        .await
    }

    /// Return engine status as JSON.
    async fn status(&self) -> fdo::Result<String> {
        let report = StatusReport {
            version: env!("CARGO_PKG_VERSION"),
            surveillance_active: self.engine.is_active(),
            alert_active: self.engine.is_alert_active(),
            suspects: self.engine.suspect_count(),
            alerts_logged: self.engine.alert_count(),
            threshold: self.engine.threshold(),
        };
        to_json(&report)
    }

    /// Register a suspect from an image file readable by the daemon. Returns the suspect id.
    async fn register_suspect(&self, image_path: &str, name: &str, details: &str) -> fdo::Result<u32> {
        tracing::info!(image_path, name, "register_suspect requested");
        let engine = Arc::clone(&self.engine);
        let path = PathBuf::from(image_path);
        let (name, details) = (name.to_string(), details.to_string());
        let id = blocking(move || engine.register_suspect_file(&path, &name, &details)).await?;
        Ok(id.0 as u32)
    }

    /// List registered suspects as JSON (encodings omitted).
    async fn list_suspects(&self) -> fdo::Result<String> {
        let suspects: Vec<SuspectSummary> = self
            .engine
            .suspects()
            .into_iter()
            .map(|s| SuspectSummary {
                id: s.id.0,
                name: s.name,
                details: s.details,
            })
            .collect();
        to_json(&suspects)
    }

    /// Latest `count` alerts, newest first, as a JSON array.
    async fn recent_alerts(&self, count: u32) -> fdo::Result<String> {
        to_json(&self.engine.recent_alerts(count as usize))
    }

    /// Set the match distance threshold, in (0, 1).
    async fn set_threshold(&self, threshold: f64) -> fdo::Result<()> {
        self.engine.set_threshold(threshold as f32).map_err(to_fdo)
    }

    /// Write the alert log to disk; returns the file path.
    async fn persist_log(&self) -> fdo::Result<String> {
        let engine = Arc::clone(&self.engine);
        let path = blocking(move || engine.persist_log()).await?;
        Ok(path.display().to_string())
    }

    /// Most recent frame as JPEG bytes.
    async fn latest_frame(&self) -> fdo::Result<Vec<u8>> {
        let frame = self
            .engine
            .latest_frame()
            .ok_or_else(|| fdo::Error::Failed("no frame captured yet".into()))?;
        frame
            .encode(ImageFormat::Jpeg)
            .map_err(|e| fdo::Error::Failed(format!("frame encoding failed: {e}")))
    }

    /// Emitted once per accepted alert with the alert as JSON.
    #[zbus(signal)]
    async fn alert_raised(emitter: &SignalEmitter<'_>, alert: &str) -> zbus::Result<()>;
}

/// Re-emit every logged alert as an `AlertRaised` signal until the log closes.
pub async fn forward_alerts(conn: zbus::Connection, mut alerts: broadcast::Receiver<Alert>) {
    let emitter = match SignalEmitter::new(&conn, OBJECT_PATH) {
        Ok(emitter) => emitter,
        Err(e) => {
            tracing::error!(error = %e, "cannot create signal emitter; alerts will not be signalled");
            return;
        }
    };

    loop {
        match alerts.recv().await {
            Ok(alert) => {
                let json = match serde_json::to_string(&alert) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to serialize alert");
                        continue;
                    }
                };
                if let Err(e) = VigilService::alert_raised(&emitter, &json).await {
                    tracing::warn!(error = %e, "failed to emit AlertRaised");
                }
            }
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "alert signal forwarder lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Run a blocking engine call off the async executor.
async fn blocking<T, F>(f: F) -> fdo::Result<T>
where
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| fdo::Error::Failed(format!("engine task failed: {e}")))?
        .map_err(to_fdo)
}

fn to_fdo(e: EngineError) -> fdo::Error {
    match e {
        EngineError::InvalidThreshold(_)
        | EngineError::MissingName
        | EngineError::InvalidEncoding(_)
        | EngineError::ImageLoad(_) => fdo::Error::InvalidArgs(e.to_string()),
        other => fdo::Error::Failed(other.to_string()),
    }
}

fn to_json<T: Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(format!("serialization: {e}")))
}
