//! Face matcher capability.
//!
//! Detection and encoding are delegated. The engine only needs "frame in,
//! zero or more encodings out" plus a distance between two encodings.

use crate::types::Encoding;
use image::ImageFormat;
use std::io::Write;
use std::process::{Command, Stdio};
use thiserror::Error;
use vigil_hw::Frame;

#[derive(Error, Debug)]
pub enum MatcherError {
    #[error("encoder command is empty")]
    EmptyCommand,
    #[error("failed to run encoder `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("encoder I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoder exited with {status}: {stderr}")]
    EncoderFailed { status: String, stderr: String },
    #[error("malformed encoder output: {0}")]
    MalformedOutput(#[from] serde_json::Error),
    #[error("frame encoding failed: {0}")]
    Frame(#[from] vigil_hw::FrameError),
    #[error("detection failed: {0}")]
    Detection(String),
}

/// Detects faces in a frame and compares their encodings.
pub trait FaceMatcher: Send + Sync {
    /// One encoding per detected face, in detector order. Empty when no face is found.
    fn detect_and_encode(&self, frame: &Frame) -> Result<Vec<Encoding>, MatcherError>;

    /// Distance between two encodings; `>= 0`, lower is closer.
    ///
    /// Only called with comparable encodings. Non-finite results are ignored
    /// by the pipeline.
    fn distance(&self, a: &Encoding, b: &Encoding) -> f32 {
        a.euclidean_distance(b).unwrap_or(f32::INFINITY)
    }
}

/// Runs an external encoder program per frame.
///
/// The frame is written to the program's stdin as PNG. The program must print
/// a JSON array of encodings (each an array of numbers) to stdout and exit 0.
#[derive(Debug, Clone)]
pub struct CommandMatcher {
    program: String,
    args: Vec<String>,
}

impl CommandMatcher {
    /// Build from a whitespace-separated command line.
    pub fn parse(command_line: &str) -> Result<Self, MatcherError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(MatcherError::EmptyCommand)?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl FaceMatcher for CommandMatcher {
    fn detect_and_encode(&self, frame: &Frame) -> Result<Vec<Encoding>, MatcherError> {
        let png = frame.encode(ImageFormat::Png)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| MatcherError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Feed stdin from a helper thread so a chatty encoder cannot deadlock on a full stdout pipe.
        let mut stdin = child.stdin.take().ok_or_else(|| {
            MatcherError::Detection("encoder stdin unavailable".to_string())
        })?;
        let writer = std::thread::spawn(move || stdin.write_all(&png));

        let output = child.wait_with_output()?;
        let written = writer
            .join()
            .map_err(|_| MatcherError::Detection("stdin writer panicked".to_string()))?;

        if !output.status.success() {
            return Err(MatcherError::EncoderFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        match written {
            // The encoder may answer before draining stdin; its output stands.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                tracing::debug!(program = %self.program, "encoder closed stdin early");
            }
            other => other?,
        }

        let encodings: Vec<Encoding> = serde_json::from_slice(&output.stdout)?;
        tracing::trace!(
            program = %self.program,
            faces = encodings.len(),
            width = frame.width,
            height = frame.height,
            "encoder finished"
        );
        Ok(encodings)
    }
}
