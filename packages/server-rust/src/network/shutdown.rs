//! Health state and in-flight tracking shared by the HTTP and registry
//! listeners.
//!
//! Health transitions are lock-free through `ArcSwap`. In-flight work is
//! counted with RAII guards; the last guard to drop wakes any drain waiter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Notify;

/// Lifecycle of a listener: Starting -> Ready -> Draining -> Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Bound but not yet serving.
    Starting,
    Ready,
    /// No longer accepting; finishing in-flight work.
    Draining,
    Stopped,
}

impl HealthState {
    /// Lowercase name reported by the health endpoint.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: ArcSwap<HealthState>,
    in_flight: AtomicU64,
    idle: Notify,
}

/// Health and drain bookkeeping for one listener.
///
/// Handlers and registry invocations hold an [`InFlightGuard`] while they
/// run. On shutdown the listener calls [`ShutdownController::begin_drain`],
/// stops accepting, then awaits [`ShutdownController::wait_for_drain`].
#[derive(Debug)]
pub struct ShutdownController {
    shared: Arc<Shared>,
}

impl ShutdownController {
    /// Creates a controller in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: ArcSwap::from_pointee(HealthState::Starting),
                in_flight: AtomicU64::new(0),
                idle: Notify::new(),
            }),
        }
    }

    pub fn set_ready(&self) {
        self.shared.state.store(Arc::new(HealthState::Ready));
    }

    /// Moves to `Draining`; readiness probes fail from here on.
    pub fn begin_drain(&self) {
        self.shared.state.store(Arc::new(HealthState::Draining));
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.shared.state.load()
    }

    /// Counts one unit of in-flight work until the guard drops.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            shared: Arc::clone(&self.shared),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Waits until no work is in flight, then moves to `Stopped`.
    ///
    /// Returns `false` (staying in `Draining`) if `timeout` passes first.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let idle = async {
            loop {
                // Registered before the check so a guard dropping in between
                // still wakes us.
                let notified = self.shared.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.in_flight_count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(timeout, idle).await.is_err() {
            return false;
        }
        self.shared.state.store(Arc::new(HealthState::Stopped));
        true
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases one in-flight slot when dropped, including during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    shared: Arc<Shared>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.shared.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        let controller = ShutdownController::new();
        assert_eq!(controller.health_state(), HealthState::Starting);

        controller.set_ready();
        assert_eq!(controller.health_state(), HealthState::Ready);

        controller.begin_drain();
        assert_eq!(controller.health_state(), HealthState::Draining);
    }

    #[test]
    fn health_state_names() {
        let names: Vec<_> = [
            HealthState::Starting,
            HealthState::Ready,
            HealthState::Draining,
            HealthState::Stopped,
        ]
        .into_iter()
        .map(HealthState::as_str)
        .collect();
        assert_eq!(names, ["starting", "ready", "draining", "stopped"]);
    }

    #[test]
    fn guards_count_in_flight_work() {
        let controller = ShutdownController::new();
        let first = controller.in_flight_guard();
        let second = controller.in_flight_guard();
        assert_eq!(controller.in_flight_count(), 2);

        drop(first);
        assert_eq!(controller.in_flight_count(), 1);
        drop(second);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn idle_controller_drains_at_once() {
        let controller = ShutdownController::new();
        controller.begin_drain();
        assert!(controller.wait_for_drain(Duration::ZERO).await);
        assert_eq!(controller.health_state(), HealthState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn last_guard_wakes_the_drain() {
        let controller = ShutdownController::new();
        controller.set_ready();
        let first = controller.in_flight_guard();
        let second = controller.in_flight_guard();
        controller.begin_drain();

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(first);
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(second);
        });

        assert!(controller.wait_for_drain(Duration::from_secs(2)).await);
        assert_eq!(controller.in_flight_count(), 0);
        assert_eq!(controller.health_state(), HealthState::Stopped);
        release.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn drain_times_out_with_work_outstanding() {
        let controller = ShutdownController::new();
        let _guard = controller.in_flight_guard();
        controller.begin_drain();

        assert!(!controller.wait_for_drain(Duration::from_millis(50)).await);
        assert_eq!(controller.health_state(), HealthState::Draining);
    }
}
