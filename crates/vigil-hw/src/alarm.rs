//! Audible alarm capability.
//!
//! `emit()` is fire-and-forget: implementations must return quickly and the
//! caller only logs failures.

use std::io::Write;
use std::process::{Command, Stdio};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlarmError {
    #[error("alarm command is empty")]
    EmptyCommand,
    #[error("failed to spawn alarm command `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("failed to ring terminal bell: {0}")]
    Bell(std::io::Error),
}

/// Something that can make a noise.
pub trait Alarm: Send + Sync {
    fn emit(&self) -> Result<(), AlarmError>;
}

/// Writes ASCII BEL to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalBell;

impl Alarm for TerminalBell {
    fn emit(&self) -> Result<(), AlarmError> {
        let mut err = std::io::stderr().lock();
        err.write_all(b"\x07")
            .and_then(|_| err.flush())
            .map_err(AlarmError::Bell)
    }
}

/// Spawns an external player, e.g. `paplay /usr/share/sounds/alarm.oga`.
///
/// The child is reaped on a detached thread so the caller never waits on
/// playback.
#[derive(Debug, Clone)]
pub struct CommandAlarm {
    program: String,
    args: Vec<String>,
}

impl CommandAlarm {
    /// Build from a whitespace-separated command line.
    pub fn parse(command_line: &str) -> Result<Self, AlarmError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(AlarmError::EmptyCommand)?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Alarm for CommandAlarm {
    fn emit(&self) -> Result<(), AlarmError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| AlarmError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let program = self.program.clone();
        std::thread::spawn(move || match child.wait() {
            Ok(status) if !status.success() => {
                tracing::warn!(program = %program, %status, "alarm command exited with failure");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(program = %program, error = %e, "failed to reap alarm command"),
        });

        Ok(())
    }
}
