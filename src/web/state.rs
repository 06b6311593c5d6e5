//! Shared controller state for the web UI and metrics.
//!
//! The controller worker is the only writer; route handlers read copies.

use nimbus_client::{ShadePolarity, ShadePosition, ShadeStatus};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::shade::countdown::{CountdownState, format_remaining};

#[derive(Debug)]
struct ShadeStateInner {
    start_time: Instant,
    polarity: ShadePolarity,
    /// Last snapshot received from the store.
    status: Option<ShadeStatus>,
    countdown: CountdownState,
    last_error: Option<String>,
    snapshots_received: u64,
}

/// Shared shade state.
///
/// Cheap to clone; every clone points at the same state.
#[derive(Debug, Clone)]
pub struct SharedShadeState {
    inner: Arc<RwLock<ShadeStateInner>>,
}

impl Default for SharedShadeState {
    fn default() -> Self {
        Self::new(ShadePolarity::default())
    }
}

impl SharedShadeState {
    pub fn new(polarity: ShadePolarity) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ShadeStateInner {
                start_time: Instant::now(),
                polarity,
                status: None,
                countdown: CountdownState::Idle,
                last_error: None,
                snapshots_received: 0,
            })),
        }
    }

    pub fn start_time(&self) -> Instant {
        self.inner.read().start_time
    }

    /// Record a snapshot from the store.
    pub fn set_status(&self, status: ShadeStatus) {
        let mut inner = self.inner.write();
        inner.status = Some(status);
        inner.snapshots_received += 1;
    }

    pub fn set_countdown(&self, countdown: CountdownState) {
        self.inner.write().countdown = countdown;
    }

    pub fn set_error(&self, error: Option<String>) {
        self.inner.write().last_error = error;
    }

    pub fn snapshot(&self) -> ShadeSnapshot {
        let inner = self.inner.read();
        let seconds_left = match inner.countdown {
            CountdownState::Running { seconds_left } => Some(seconds_left),
            CountdownState::Finished => Some(0),
            CountdownState::Idle => None,
        };
        ShadeSnapshot {
            uptime_seconds: inner.start_time.elapsed().as_secs(),
            position: inner
                .status
                .as_ref()
                .map(|status| status.position(inner.polarity)),
            status: inner.status.clone(),
            countdown: inner.countdown,
            remaining: seconds_left.map(format_remaining),
            last_error: inner.last_error.clone(),
            snapshots_received: inner.snapshots_received,
        }
    }
}

/// Point-in-time copy of the shared state, as served by `/api/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShadeSnapshot {
    pub uptime_seconds: u64,
    pub status: Option<ShadeStatus>,
    pub position: Option<ShadePosition>,
    pub countdown: CountdownState,
    /// `MM:SS`, absent when no countdown is running.
    pub remaining: Option<String>,
    pub last_error: Option<String>,
    pub snapshots_received: u64,
}

impl ShadeSnapshot {
    pub fn is_available(&self) -> bool {
        self.status.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_new() {
        let state = SharedShadeState::default();
        let snapshot = state.snapshot();
        assert!(!snapshot.is_available());
        assert_eq!(snapshot.countdown, CountdownState::Idle);
        assert_eq!(snapshot.remaining, None);
    }

    #[test]
    fn test_snapshot_decodes_position() {
        let state = SharedShadeState::new(ShadePolarity::ExtendedIsTrue);
        state.set_status(ShadeStatus::default());
        state.set_countdown(CountdownState::Running { seconds_left: 599 });

        let snapshot = state.snapshot();
        assert_eq!(snapshot.position, Some(ShadePosition::Extended));
        assert_eq!(snapshot.remaining.as_deref(), Some("09:59"));
        assert_eq!(snapshot.snapshots_received, 1);
    }

    #[test]
    fn test_clones_share_state() {
        let state = SharedShadeState::default();
        let other = state.clone();
        other.set_error(Some("Database error: offline".into()));
        assert_eq!(
            state.snapshot().last_error.as_deref(),
            Some("Database error: offline")
        );
    }
}
