use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.freedesktop.Vigil1",
    default_service = "org.freedesktop.Vigil1",
    default_path = "/org/freedesktop/Vigil1"
)]
trait Vigil {
    fn start(&self, camera_index: u32) -> zbus::Result<()>;
    fn stop(&self) -> zbus::Result<()>;
    fn status(&self) -> zbus::Result<String>;
    fn register_suspect(&self, image_path: &str, name: &str, details: &str) -> zbus::Result<u32>;
    fn list_suspects(&self) -> zbus::Result<String>;
    fn recent_alerts(&self, count: u32) -> zbus::Result<String>;
    fn set_threshold(&self, threshold: f64) -> zbus::Result<()>;
    fn persist_log(&self) -> zbus::Result<String>;
    fn latest_frame(&self) -> zbus::Result<Vec<u8>>;

    #[zbus(signal)]
    fn alert_raised(&self, alert: String) -> zbus::Result<()>;
}

#[derive(Parser)]
#[command(name = "vigil", about = "Vigil camera surveillance CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start surveillance
    Start {
        /// Camera index (/dev/video<N>)
        #[arg(short, long, default_value_t = 0)]
        camera: u32,
    },
    /// Stop surveillance
    Stop,
    /// Show daemon status
    Status,
    /// Register a suspect from an image containing one face
    Add {
        image: PathBuf,
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value = "")]
        details: String,
    },
    /// List registered suspects
    Suspects,
    /// Show the most recent alerts
    Alerts {
        #[arg(short = 'n', long, default_value_t = 10)]
        count: u32,
    },
    /// Set the match distance threshold, in (0, 1)
    Threshold { value: f64 },
    /// Write the alert log to disk
    SaveLog,
    /// Save the latest camera frame as JPEG
    Snapshot {
        #[arg(default_value = "snapshot.jpg")]
        output: PathBuf,
    },
    /// Print alerts as they are raised
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("failed to connect to D-Bus")?;
    let proxy = VigilProxy::new(&conn)
        .await
        .context("failed to create vigild proxy")?;
    tracing::debug!(system = cli.system, "connected to vigild");

    match cli.command {
        Commands::Start { camera } => {
            proxy.start(camera).await.context("start failed")?;
            println!("Surveillance started on /dev/video{camera}");
        }
        Commands::Stop => {
            proxy.stop().await.context("stop failed")?;
            println!("Surveillance stopped");
        }
        Commands::Status => {
            let status = proxy.status().await.context("is vigild running?")?;
            print_json(&status)?;
        }
        Commands::Add {
            image,
            name,
            details,
        } => {
            // The daemon resolves the path, not us.
            let image = std::fs::canonicalize(&image)
                .with_context(|| format!("cannot resolve {}", image.display()))?;
            let id = proxy
                .register_suspect(&image.to_string_lossy(), &name, &details)
                .await
                .context("registration failed")?;
            println!("Registered {name} as suspect #{id}");
        }
        Commands::Suspects => {
            let suspects = proxy.list_suspects().await?;
            let suspects: Vec<serde_json::Value> = serde_json::from_str(&suspects)?;
            if suspects.is_empty() {
                println!("No suspects registered");
            }
            for s in &suspects {
                println!("#{} {} {}", s["id"], str_field(s, "name"), str_field(s, "details"));
            }
        }
        Commands::Alerts { count } => {
            let alerts = proxy.recent_alerts(count).await?;
            let alerts: Vec<serde_json::Value> = serde_json::from_str(&alerts)?;
            if alerts.is_empty() {
                println!("No alerts");
            }
            for alert in &alerts {
                println!("{}", format_alert(alert));
            }
        }
        Commands::Threshold { value } => {
            proxy.set_threshold(value).await.context("threshold rejected")?;
            println!("Threshold set to {value}");
        }
        Commands::SaveLog => {
            let path = proxy.persist_log().await.context("save failed")?;
            println!("Alert log written to {path}");
        }
        Commands::Snapshot { output } => {
            let jpeg = proxy.latest_frame().await.context("no frame available")?;
            std::fs::write(&output, &jpeg)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!("Saved {} bytes to {}", jpeg.len(), output.display());
        }
        Commands::Watch => {
            let mut alerts = proxy.receive_alert_raised().await?;
            println!("Watching for alerts (Ctrl-C to exit)");
            loop {
                tokio::select! {
                    signal = alerts.next() => {
                        let Some(signal) = signal else { break };
                        let args = signal.args()?;
                        match serde_json::from_str::<serde_json::Value>(args.alert()) {
                            Ok(alert) => println!("{}", format_alert(&alert)),
                            Err(e) => tracing::warn!(error = %e, "malformed alert signal"),
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
    }

    Ok(())
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn str_field<'a>(value: &'a serde_json::Value, key: &str) -> &'a str {
    value[key].as_str().unwrap_or("")
}

fn format_alert(alert: &serde_json::Value) -> String {
    let confidence = alert["confidence"].as_f64().unwrap_or(0.0);
    let mut line = format!(
        "[{}] {} ({:.0}%) at {}",
        str_field(alert, "timestamp"),
        str_field(alert, "suspect_name"),
        confidence * 100.0,
        str_field(alert, "location"),
    );
    if let Some(path) = alert["image_path"].as_str() {
        line.push_str(&format!(" -> {path}"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_alert() {
        let alert = serde_json::json!({
            "timestamp": "2026-10-19T08:30:00+02:00",
            "suspect_name": "alice",
            "suspect_details": "",
            "confidence": 0.72,
            "location": "Camera Feed",
            "image_path": "/data/alerts/alert_alice_20261019_083000.jpg"
        });
        assert_eq!(
            format_alert(&alert),
            "[2026-10-19T08:30:00+02:00] alice (72%) at Camera Feed -> /data/alerts/alert_alice_20261019_083000.jpg"
        );
    }

    #[test]
    fn test_format_alert_without_image() {
        let alert = serde_json::json!({
            "timestamp": "t",
            "suspect_name": "bob",
            "confidence": 0.5,
            "location": "Camera Feed",
            "image_path": null
        });
        assert_eq!(format_alert(&alert), "[t] bob (50%) at Camera Feed");
    }

    #[test]
    fn test_cli_parses_add() {
        let cli = Cli::parse_from(["vigil", "add", "face.jpg", "--name", "alice"]);
        match cli.command {
            Commands::Add { image, name, details } => {
                assert_eq!(image, PathBuf::from("face.jpg"));
                assert_eq!(name, "alice");
                assert!(details.is_empty());
            }
            _ => panic!("expected add"),
        }
        assert!(!cli.system);
    }
}
