//! Surveillance engine: owns the capture thread and every piece of shared state.

use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use vigil_core::debounce::DEFAULT_COOLDOWN;
use vigil_core::pipeline::{DEFAULT_DOWNSCALE, DEFAULT_THRESHOLD};
use vigil_core::{
    Alert, AlertDebouncer, AlertLog, AlertLogError, DataLayout, DebounceState, FaceMatcher,
    MatchPipeline, MatcherError, RegistryError, Suspect, SuspectId, SuspectRegistry,
};
use vigil_hw::{Alarm, CameraError, CameraProvider, Frame, FrameError, FrameSource};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(#[from] CameraError),
    #[error("surveillance is already active")]
    AlreadyActive,
    #[error("no face detected in suspect image")]
    NoFaceDetected,
    #[error("suspect name must not be empty")]
    MissingName,
    #[error("invalid suspect encoding: {0}")]
    InvalidEncoding(#[from] RegistryError),
    #[error("detection error: {0}")]
    Detection(#[from] MatcherError),
    #[error("failed to load image: {0}")]
    ImageLoad(#[from] FrameError),
    #[error("persistence error: {0}")]
    Persistence(#[from] AlertLogError),
    #[error("threshold must be within (0, 1), got {0}")]
    InvalidThreshold(f32),
    #[error("failed to prepare data directories under {path}: {source}")]
    Layout {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to spawn capture thread: {0}")]
    Spawn(std::io::Error),
}

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root for `suspects/`, `alerts/` and `logs/`.
    pub data_dir: PathBuf,
    /// Distance bound for accepting a match.
    pub threshold: f32,
    /// Suppression window after an accepted alert.
    pub cooldown: Duration,
    /// Sleep between capture iterations.
    pub capture_interval: Duration,
    /// Linear downsample factor before detection.
    pub downscale: u32,
}

impl EngineConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            threshold: DEFAULT_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
            capture_interval: Duration::from_millis(100),
            downscale: DEFAULT_DOWNSCALE,
        }
    }
}

/// State shared between the engine handle and the capture thread.
struct Shared {
    registry: SuspectRegistry,
    pipeline: MatchPipeline,
    debouncer: AlertDebouncer,
    alert_log: AlertLog,
    alarm: Arc<dyn Alarm>,
    layout: DataLayout,
    /// f32 bits of the distance threshold.
    threshold: AtomicU32,
    surveillance_active: AtomicBool,
    latest_frame: watch::Sender<Option<Arc<Frame>>>,
    capture_interval: Duration,
}

struct CaptureHandle {
    should_run: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// The surveillance engine. One per process; dropping it stops capture.
pub struct Engine {
    shared: Arc<Shared>,
    camera: Arc<dyn CameraProvider>,
    capture: Mutex<Option<CaptureHandle>>,
}

impl Engine {
    /// Build the engine and create the data directories.
    pub fn new(
        config: EngineConfig,
        camera: Arc<dyn CameraProvider>,
        matcher: Arc<dyn FaceMatcher>,
        alarm: Arc<dyn Alarm>,
    ) -> Result<Self, EngineError> {
        validate_threshold(config.threshold)?;

        let layout = DataLayout::create(&config.data_dir).map_err(|source| EngineError::Layout {
            path: config.data_dir.clone(),
            source,
        })?;

        let (latest_frame, _) = watch::channel(None);

        tracing::info!(
            data_dir = %config.data_dir.display(),
            threshold = config.threshold,
            cooldown = ?config.cooldown,
            capture_interval = ?config.capture_interval,
            downscale = config.downscale,
            "engine initialised"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                registry: SuspectRegistry::new(),
                pipeline: MatchPipeline::new(matcher, config.downscale),
                debouncer: AlertDebouncer::new(config.cooldown),
                alert_log: AlertLog::new(),
                alarm,
                layout,
                threshold: AtomicU32::new(config.threshold.to_bits()),
                surveillance_active: AtomicBool::new(false),
                latest_frame,
                capture_interval: config.capture_interval,
            }),
            camera,
            capture: Mutex::new(None),
        })
    }

    /// Open camera `index` and start the capture loop.
    pub fn start(&self, index: u32) -> Result<(), EngineError> {
        let mut capture = self.capture.lock().unwrap_or_else(PoisonError::into_inner);
        if capture.is_some() {
            return Err(EngineError::AlreadyActive);
        }

        let source = self.camera.open(index).map_err(|e| {
            tracing::warn!(index, error = %e, "failed to open camera");
            EngineError::CameraUnavailable(e)
        })?;

        let should_run = Arc::new(AtomicBool::new(true));
        let shared = Arc::clone(&self.shared);
        let flag = Arc::clone(&should_run);

        let thread = std::thread::Builder::new()
            .name("vigil-capture".into())
            .spawn(move || capture_loop(shared, source, flag))
            .map_err(EngineError::Spawn)?;

        self.shared.surveillance_active.store(true, Ordering::Release);
        *capture = Some(CaptureHandle { should_run, thread });
        tracing::info!(index, "surveillance started");
        Ok(())
    }

    /// Stop the capture loop and wait for it to exit. Idempotent.
    ///
    /// Any pending alert cooldown is cancelled before this returns. The
    /// capture lock is held throughout, so a concurrent `start` waits for
    /// teardown to finish.
    pub fn stop(&self) {
        let mut capture = self.capture.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(handle) = capture.take() else {
            return;
        };

        handle.should_run.store(false, Ordering::Release);
        if handle.thread.join().is_err() {
            tracing::error!("capture thread panicked");
        }

        self.shared.debouncer.cancel();
        self.shared.surveillance_active.store(false, Ordering::Release);
        drop(capture);
        tracing::info!("surveillance stopped");
    }

    pub fn is_active(&self) -> bool {
        self.shared.surveillance_active.load(Ordering::Acquire)
    }

    pub fn is_alert_active(&self) -> bool {
        self.shared.debouncer.is_active()
    }

    pub fn suspect_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn suspects(&self) -> Vec<Suspect> {
        self.shared.registry.snapshot().to_vec()
    }

    pub fn threshold(&self) -> f32 {
        self.shared.threshold()
    }

    /// Change the distance threshold; takes effect on the next frame.
    pub fn set_threshold(&self, threshold: f32) -> Result<(), EngineError> {
        validate_threshold(threshold)?;
        self.shared
            .threshold
            .store(threshold.to_bits(), Ordering::Relaxed);
        tracing::info!(threshold, "match threshold updated");
        Ok(())
    }

    /// Encode `image` and register the first detected face.
    pub fn register_suspect(
        &self,
        image: &Frame,
        name: &str,
        details: &str,
    ) -> Result<SuspectId, EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::MissingName);
        }

        let encodings = self.shared.pipeline.matcher().detect_and_encode(image)?;
        let faces = encodings.len();
        let encoding = encodings.into_iter().next().ok_or_else(|| {
            tracing::info!(name, "registration rejected: no face in image");
            EngineError::NoFaceDetected
        })?;

        if faces > 1 {
            tracing::debug!(name, faces, "multiple faces in suspect image; using the first");
        }
        Ok(self.shared.registry.register(encoding, name, details)?)
    }

    /// Load an image file and register it via [`register_suspect`](Self::register_suspect).
    pub fn register_suspect_file(
        &self,
        path: &Path,
        name: &str,
        details: &str,
    ) -> Result<SuspectId, EngineError> {
        let image = Frame::load(path)?;
        self.register_suspect(&image, name, details)
    }

    /// Most recently captured frame, if any.
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.shared.latest_frame.borrow().clone()
    }

    pub fn alert_count(&self) -> usize {
        self.shared.alert_log.len()
    }

    /// Latest `n` alerts, newest first.
    pub fn recent_alerts(&self, n: usize) -> Vec<Alert> {
        self.shared.alert_log.recent(n)
    }

    /// Write the alert log to `logs/` and return the file path.
    pub fn persist_log(&self) -> Result<PathBuf, EngineError> {
        Ok(self.shared.alert_log.persist(&self.shared.layout.logs_dir())?)
    }

    pub fn subscribe_frames(&self) -> watch::Receiver<Option<Arc<Frame>>> {
        self.shared.latest_frame.subscribe()
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
        self.shared.alert_log.subscribe()
    }

    pub fn subscribe_alert_state(&self) -> watch::Receiver<DebounceState> {
        self.shared.debouncer.subscribe()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn validate_threshold(threshold: f32) -> Result<(), EngineError> {
    if threshold > 0.0 && threshold < 1.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidThreshold(threshold))
    }
}

impl Shared {
    fn threshold(&self) -> f32 {
        f32::from_bits(self.threshold.load(Ordering::Relaxed))
    }

    /// Publish a frame and, if anyone is registered, run the match pipeline on it.
    fn process_frame(&self, frame: Frame) {
        let frame = Arc::new(frame);
        self.latest_frame.send_replace(Some(Arc::clone(&frame)));

        let suspects = self.registry.snapshot();
        if suspects.is_empty() {
            return;
        }

        let result = self.pipeline.evaluate(frame, &suspects, self.threshold());
        if let Some(suspect) = &result.suspect {
            self.raise_alert(suspect, result.confidence, &result.frame);
        }
    }

    /// Alert path for an accepted match: gate, snapshot, log, alarm.
    fn raise_alert(&self, suspect: &Suspect, confidence: f32, frame: &Frame) {
        if !self.debouncer.try_trigger() {
            return;
        }

        let now = Local::now();
        let path = self.layout.alert_image_path(&suspect.name, now);
        let image_path = match frame.write_jpeg(&path) {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to save alert frame");
                None
            }
        };

        tracing::warn!(
            suspect = %suspect.name,
            id = suspect.id.0,
            confidence,
            "suspect detected"
        );

        self.alert_log.append(Alert::new(
            now,
            &suspect.name,
            &suspect.details,
            confidence,
            image_path,
        ));

        if let Err(e) = self.alarm.emit() {
            tracing::warn!(error = %e, "audible alarm failed");
        }
    }
}

/// Body of the capture thread. Runs until `should_run` is cleared; the frame
/// source is released when this returns.
fn capture_loop(shared: Arc<Shared>, mut source: Box<dyn FrameSource>, should_run: Arc<AtomicBool>) {
    tracing::info!("capture loop started");
    let mut consecutive_failures = 0u64;

    while should_run.load(Ordering::Acquire) {
        match source.read_frame() {
            Ok(frame) => {
                if consecutive_failures > 0 {
                    tracing::info!(consecutive_failures, "frame reads recovered");
                    consecutive_failures = 0;
                }
                shared.process_frame(frame);
            }
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures == 1 {
                    tracing::warn!(error = %e, "frame read failed; retrying next tick");
                } else {
                    tracing::debug!(error = %e, consecutive_failures, "frame read failed");
                }
            }
        }

        std::thread::sleep(shared.capture_interval);
    }

    drop(source);
    tracing::info!("capture loop exited");
}
