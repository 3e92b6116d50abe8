use crate::engine::EngineConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Which D-Bus bus the service registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Camera index; `/dev/video<N>` (default: 0).
    pub camera_index: u32,
    /// Root for `suspects/`, `alerts/` and `logs/`.
    pub data_dir: PathBuf,
    /// Distance bound for a positive match.
    pub match_threshold: f32,
    /// Seconds during which repeat alerts are suppressed.
    pub cooldown_secs: u64,
    /// Milliseconds slept between frames.
    pub capture_interval_ms: u64,
    /// Linear downsample factor applied before detection.
    pub downscale: u32,
    /// External encoder command line; required to match faces.
    pub encoder_cmd: Option<String>,
    /// External alarm player command line; terminal bell when unset.
    pub alarm_cmd: Option<String>,
    /// Start surveillance as soon as the daemon is up.
    pub autostart: bool,
    pub bus: BusKind,
}

impl Config {
    /// Load configuration from `VIGIL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("VIGIL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("vigil")
            });

        Self {
            camera_index: env_parse("VIGIL_CAMERA_INDEX", 0),
            data_dir,
            match_threshold: env_parse("VIGIL_MATCH_THRESHOLD", 0.6),
            cooldown_secs: env_parse("VIGIL_COOLDOWN_SECS", 5),
            capture_interval_ms: env_parse("VIGIL_CAPTURE_INTERVAL_MS", 100),
            downscale: env_parse("VIGIL_DOWNSCALE", 4),
            encoder_cmd: env_nonempty("VIGIL_ENCODER_CMD"),
            alarm_cmd: env_nonempty("VIGIL_ALARM_CMD"),
            autostart: std::env::var("VIGIL_AUTOSTART")
                .map(|v| v == "1")
                .unwrap_or(false),
            bus: match std::env::var("VIGIL_BUS").as_deref() {
                Ok("system") => BusKind::System,
                _ => BusKind::Session,
            },
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            data_dir: self.data_dir.clone(),
            threshold: self.match_threshold,
            cooldown: Duration::from_secs(self.cooldown_secs),
            capture_interval: Duration::from_millis(self.capture_interval_ms),
            downscale: self.downscale,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
