//! Single-slot alert gate with a cancellable cooldown.
//!
//! ```text
//! Idle --try_trigger()--> Active --cooldown expiry--> Idle
//!           Active --try_trigger()--> Active   (discarded)
//! ```
//!
//! The cooldown runs on its own short-lived thread. `cancel()` stops and
//! joins it, so no expiry can fire once `cancel()` has returned.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::watch;

/// Fixed suppression window after an accepted alert.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Active,
}

struct CooldownTimer {
    cancel: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct AlertDebouncer {
    state: Arc<watch::Sender<DebounceState>>,
    cooldown: Duration,
    timer: Mutex<Option<CooldownTimer>>,
}

impl AlertDebouncer {
    pub fn new(cooldown: Duration) -> Self {
        let (tx, _) = watch::channel(DebounceState::Idle);
        Self {
            state: Arc::new(tx),
            cooldown,
            timer: Mutex::new(None),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn state(&self) -> DebounceState {
        *self.state.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.state() == DebounceState::Active
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<DebounceState> {
        self.state.subscribe()
    }

    /// Attempt the `Idle -> Active` transition.
    ///
    /// Returns `true` exactly once per idle period; the caller then owns
    /// emitting the alert. Returns `false` while a cooldown is running.
    pub fn try_trigger(&self) -> bool {
        let accepted = self.state.send_if_modified(|state| {
            if *state == DebounceState::Idle {
                *state = DebounceState::Active;
                true
            } else {
                false
            }
        });

        if !accepted {
            tracing::trace!("alert suppressed during cooldown");
            return false;
        }

        self.schedule_expiry();
        true
    }

    fn schedule_expiry(&self) {
        let mut slot = self.timer.lock().unwrap_or_else(PoisonError::into_inner);

        // The previous timer has already expired (the gate was Idle); reap it.
        if let Some(prev) = slot.take() {
            let _ = prev.handle.join();
        }

        let (cancel, cancelled) = mpsc::channel::<()>();
        let state = Arc::clone(&self.state);
        let cooldown = self.cooldown;

        let spawned = std::thread::Builder::new()
            .name("vigil-cooldown".into())
            .spawn(move || match cancelled.recv_timeout(cooldown) {
                Err(RecvTimeoutError::Timeout) => {
                    state.send_replace(DebounceState::Idle);
                    tracing::debug!(?cooldown, "alert cooldown expired");
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    tracing::debug!("alert cooldown cancelled");
                }
            });

        match spawned {
            Ok(handle) => *slot = Some(CooldownTimer { cancel, handle }),
            Err(e) => {
                // Without a timer the gate would stay shut forever.
                tracing::error!(error = %e, "failed to spawn cooldown timer; reopening alert gate");
                self.state.send_replace(DebounceState::Idle);
            }
        }
    }

    /// Cancel any pending cooldown, wait for its thread, and reopen the gate.
    pub fn cancel(&self) {
        let pending = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(timer) = pending {
            let _ = timer.cancel.send(());
            let _ = timer.handle.join();
        }
        self.state.send_replace(DebounceState::Idle);
    }
}

impl Drop for AlertDebouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(60);

    fn wait_for_idle(d: &AlertDebouncer, limit: Duration) -> bool {
        let deadline = std::time::Instant::now() + limit;
        while std::time::Instant::now() < deadline {
            if !d.is_active() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        !d.is_active()
    }

    #[test]
    fn test_initial_state_idle() {
        let d = AlertDebouncer::new(DEFAULT_COOLDOWN);
        assert_eq!(d.state(), DebounceState::Idle);
        assert_eq!(d.cooldown(), Duration::from_secs(5));
    }

    #[test]
    fn test_single_acceptance_while_active() {
        let d = AlertDebouncer::new(Duration::from_secs(30));
        assert!(d.try_trigger());
        let extra = (0..50).filter(|_| d.try_trigger()).count();
        assert_eq!(extra, 0);
        assert!(d.is_active());
    }

    #[test]
    fn test_reopens_after_cooldown() {
        let d = AlertDebouncer::new(SHORT);
        assert!(d.try_trigger());
        assert!(!d.try_trigger());

        assert!(wait_for_idle(&d, Duration::from_secs(2)));
        assert!(d.try_trigger());
        assert!(!d.try_trigger());
    }

    #[test]
    fn test_cancel_prevents_expiry_callback() {
        let d = AlertDebouncer::new(SHORT);
        let mut rx = d.subscribe();
        assert!(d.try_trigger());
        assert!(rx.has_changed().unwrap());
        rx.mark_unchanged();

        d.cancel();
        assert_eq!(d.state(), DebounceState::Idle);
        rx.mark_unchanged();

        // Nothing touches the state after cancel() returned.
        std::thread::sleep(SHORT * 3);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_cancel_without_timer_is_noop() {
        let d = AlertDebouncer::new(SHORT);
        d.cancel();
        d.cancel();
        assert_eq!(d.state(), DebounceState::Idle);
    }

    #[test]
    fn test_subscriber_sees_transitions() {
        let d = AlertDebouncer::new(SHORT);
        let rx = d.subscribe();
        assert!(d.try_trigger());
        assert_eq!(*rx.borrow(), DebounceState::Active);
        assert!(wait_for_idle(&d, Duration::from_secs(2)));
        assert_eq!(*rx.borrow(), DebounceState::Idle);
    }
}
