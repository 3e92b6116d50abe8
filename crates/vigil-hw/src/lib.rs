//! vigil-hw: Hardware abstraction for frame capture and the audible alarm.
//!
//! Provides V4L2-based camera access behind the `CameraProvider`/`FrameSource`
//! traits, grayscale frame helpers, and the `Alarm` capability.

pub mod alarm;
pub mod camera;
pub mod frame;

pub use alarm::{Alarm, AlarmError, CommandAlarm, TerminalBell};
pub use camera::{Camera, CameraError, CameraProvider, FrameSource, PixelFormat, V4l2Provider};
pub use frame::{Frame, FrameError};
