//! On-disk layout under the data root.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// `YYYYMMDD_HHMMSS`, used in every generated file name.
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    /// Create `suspects/`, `alerts/` and `logs/` under `root` if absent.
    pub fn create(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let layout = Self { root: root.into() };
        for dir in [layout.suspects_dir(), layout.alerts_dir(), layout.logs_dir()] {
            std::fs::create_dir_all(&dir)?;
        }
        tracing::debug!(root = %layout.root.display(), "data directories ready");
        Ok(layout)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserved for persisted suspect images.
    pub fn suspects_dir(&self) -> PathBuf {
        self.root.join("suspects")
    }

    pub fn alerts_dir(&self) -> PathBuf {
        self.root.join("alerts")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// `alerts/alert_<name>_<YYYYMMDD_HHMMSS>.jpg`
    pub fn alert_image_path(&self, suspect_name: &str, at: DateTime<Local>) -> PathBuf {
        self.alerts_dir().join(format!(
            "alert_{}_{}.jpg",
            sanitize_file_component(suspect_name),
            at.format(FILE_TIMESTAMP_FORMAT)
        ))
    }
}

/// Replace anything outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_file_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}
