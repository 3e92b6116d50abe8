//! Append-only alert log with on-demand JSON export.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast;

/// Value of `location` for every alert raised from the live feed.
pub const CAMERA_FEED_LOCATION: &str = "Camera Feed";

const BROADCAST_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum AlertLogError {
    #[error("alert log I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("alert log serialization: {0}")]
    Json(#[from] serde_json::Error),
}

/// One triggered alert. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub timestamp: DateTime<Local>,
    pub suspect_name: String,
    pub suspect_details: String,
    pub confidence: f32,
    pub location: String,
    /// Saved snapshot of the triggering frame; `None` if the write failed.
    pub image_path: Option<PathBuf>,
}

impl Alert {
    pub fn new(
        timestamp: DateTime<Local>,
        suspect_name: &str,
        suspect_details: &str,
        confidence: f32,
        image_path: Option<PathBuf>,
    ) -> Self {
        Self {
            timestamp,
            suspect_name: suspect_name.to_string(),
            suspect_details: suspect_details.to_string(),
            confidence,
            location: CAMERA_FEED_LOCATION.to_string(),
            image_path,
        }
    }
}

pub struct AlertLog {
    alerts: Mutex<Vec<Alert>>,
    tx: broadcast::Sender<Alert>,
}

impl Default for AlertLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertLog {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            alerts: Mutex::new(Vec::new()),
            tx,
        }
    }

    /// Append an alert and notify subscribers.
    pub fn append(&self, alert: Alert) {
        let total = {
            let mut alerts = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
            alerts.push(alert.clone());
            alerts.len()
        };
        tracing::info!(
            suspect = %alert.suspect_name,
            confidence = alert.confidence,
            total,
            "alert logged"
        );
        // No subscribers is fine.
        let _ = self.tx.send(alert);
    }

    /// Receiver for alerts appended from now on. Slow receivers lag, they never block `append`.
    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.tx.subscribe()
    }

    /// The latest `n` alerts, newest first.
    pub fn recent(&self, n: usize) -> Vec<Alert> {
        let alerts = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
        alerts.iter().rev().take(n).cloned().collect()
    }

    /// Every alert, oldest first.
    pub fn all(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the whole log to `dir/alert_log_<YYYYMMDD_HHMMSS>.json` and return the path.
    ///
    /// Existing exports are never overwritten; a second export within the same
    /// second gets a `_<n>` suffix.
    pub fn persist(&self, dir: &Path) -> Result<PathBuf, AlertLogError> {
        let stem = format!(
            "alert_log_{}",
            Local::now().format(crate::layout::FILE_TIMESTAMP_FORMAT)
        );
        let alerts = self.all();
        let json = serde_json::to_vec_pretty(&alerts)?;

        let (path, mut file) = create_unique(dir, &stem)?;
        file.write_all(&json).map_err(|source| AlertLogError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::info!(path = %path.display(), count = alerts.len(), "alert log persisted");
        Ok(path)
    }

    /// Read a previously persisted log.
    pub fn load(path: &Path) -> Result<Vec<Alert>, AlertLogError> {
        let bytes = std::fs::read(path).map_err(|source| AlertLogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Open `dir/<stem>.json`, or the first free `dir/<stem>_<n>.json`, for writing.
fn create_unique(dir: &Path, stem: &str) -> Result<(PathBuf, File), AlertLogError> {
    for n in 0u32.. {
        let path = match n {
            0 => dir.join(format!("{stem}.json")),
            n => dir.join(format!("{stem}_{n}.json")),
        };
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(source) => return Err(AlertLogError::Io { path, source }),
        }
    }
    Err(AlertLogError::Io {
        path: dir.join(format!("{stem}.json")),
        source: std::io::Error::new(ErrorKind::AlreadyExists, "no free export name"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn alert(name: &str, offset_secs: i64, confidence: f32) -> Alert {
        Alert::new(
            Local::now() + Duration::seconds(offset_secs),
            name,
            &format!("{name} details"),
            confidence,
            Some(PathBuf::from(format!("alerts/alert_{name}.jpg"))),
        )
    }

    #[test]
    fn test_recent_newest_first() {
        let log = AlertLog::new();
        for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
            log.append(alert(name, i as i64, 0.7));
        }

        let recent: Vec<_> = log.recent(3).into_iter().map(|a| a.suspect_name).collect();
        assert_eq!(recent, vec!["d", "c", "b"]);
        assert_eq!(log.recent(10).len(), 4);
        assert!(log.recent(0).is_empty());
    }

    #[test]
    fn test_persist_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let log = AlertLog::new();
        log.append(alert("alice", 0, 0.61));
        log.append(alert("bob", 1, 0.873));
        log.append(Alert::new(Local::now(), "carol", "", 0.5, None));

        let path = log.persist(dir.path()).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("alert_log_") && name.ends_with(".json"), "{name}");
        // alert_log_ + YYYYMMDD_HHMMSS + .json
        assert_eq!(name.len(), "alert_log_".len() + 15 + ".json".len());

        assert_eq!(AlertLog::load(&path).unwrap(), log.all());
    }

    #[test]
    fn test_persisted_schema() {
        let dir = tempfile::tempdir().unwrap();
        let log = AlertLog::new();
        log.append(alert("alice", 0, 0.75));

        let path = log.persist(dir.path()).unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        let entry = &value.as_array().unwrap()[0];

        assert_eq!(entry["suspect_name"], "alice");
        assert_eq!(entry["suspect_details"], "alice details");
        assert_eq!(entry["location"], "Camera Feed");
        assert!((entry["confidence"].as_f64().unwrap() - 0.75).abs() < 1e-6);
        let ts = entry["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok(), "{ts}");
    }

    #[test]
    fn test_load_ignores_field_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reordered.json");
        std::fs::write(
            &path,
            r#"[{"location":"Camera Feed","confidence":0.5,"image_path":null,
                "suspect_details":"d","suspect_name":"n",
                "timestamp":"2026-10-19T08:30:00+00:00"}]"#,
        )
        .unwrap();

        let alerts = AlertLog::load(&path).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].suspect_name, "n");
        assert_eq!(alerts[0].confidence, 0.5);
    }

    #[test]
    fn test_persist_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = AlertLog::new().persist(dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "[]");
    }

    #[test]
    fn test_persist_twice_keeps_both_exports() {
        let dir = tempfile::tempdir().unwrap();
        let log = AlertLog::new();
        log.append(alert("alice", 0, 0.8));
        let first = log.persist(dir.path()).unwrap();
        log.append(alert("bob", 1, 0.7));
        let second = log.persist(dir.path()).unwrap();

        assert_ne!(first, second);
        assert_eq!(AlertLog::load(&first).unwrap().len(), 1);
        assert_eq!(AlertLog::load(&second).unwrap().len(), 2);
    }

    #[test]
    fn test_unique_name_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let (a, _) = create_unique(dir.path(), "alert_log_20261019_083000").unwrap();
        let (b, _) = create_unique(dir.path(), "alert_log_20261019_083000").unwrap();
        let (c, _) = create_unique(dir.path(), "alert_log_20261019_083000").unwrap();
        assert_eq!(a.file_name().unwrap(), "alert_log_20261019_083000.json");
        assert_eq!(b.file_name().unwrap(), "alert_log_20261019_083000_1.json");
        assert_eq!(c.file_name().unwrap(), "alert_log_20261019_083000_2.json");
    }

    #[test]
    fn test_persist_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = AlertLog::new().persist(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, AlertLogError::Io { .. }));
    }

    #[test]
    fn test_subscribers_receive_appends() {
        let log = AlertLog::new();
        let mut rx = log.subscribe();
        log.append(alert("alice", 0, 0.9));
        assert_eq!(rx.try_recv().unwrap().suspect_name, "alice");
    }
}
