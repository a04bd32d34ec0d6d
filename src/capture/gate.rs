//! Capture readiness gate
//!
//! Permission and device initialisation arrive independently and in any
//! order. Each is an explicit latch; capture is allowed only when both are
//! set.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Snapshot of the two readiness latches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub permission_granted: bool,
    pub device_ready: bool,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.permission_granted && self.device_ready
    }
}

/// Shared handle to the readiness latches
///
/// Clones observe and mutate the same state.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    tx: Arc<watch::Sender<Readiness>>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Readiness::default());
        Self { tx: Arc::new(tx) }
    }

    /// Record the outcome of the permission prompt
    pub fn set_permission(&self, granted: bool) {
        let changed = self.tx.send_if_modified(|r| {
            let changed = r.permission_granted != granted;
            r.permission_granted = granted;
            changed
        });
        if changed {
            debug!(granted, "Camera permission latch changed");
        }
    }

    /// Record whether the capture hardware has finished initialising
    pub fn set_device_ready(&self, ready: bool) {
        let changed = self.tx.send_if_modified(|r| {
            let changed = r.device_ready != ready;
            r.device_ready = ready;
            changed
        });
        if changed {
            debug!(ready, "Camera device latch changed");
        }
    }

    pub fn readiness(&self) -> Readiness {
        *self.tx.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.readiness().is_ready()
    }

    /// Resolve once both latches are set (immediately if they already are)
    pub async fn wait_ready(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(Readiness::is_ready).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_both_latches_required() {
        let gate = ReadinessGate::new();
        assert!(!gate.is_ready());

        gate.set_device_ready(true);
        assert!(!gate.is_ready());

        gate.set_permission(true);
        assert!(gate.is_ready());

        gate.set_permission(false);
        assert!(!gate.is_ready());
        assert!(gate.readiness().device_ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_in_either_order() {
        let gate = ReadinessGate::new();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_ready().await })
        };

        gate.set_device_ready(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        gate.set_permission(true);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should resolve once both latches are set")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_ready_when_already_ready() {
        let gate = ReadinessGate::new();
        gate.set_permission(true);
        gate.set_device_ready(true);
        tokio::time::timeout(Duration::from_secs(1), gate.wait_ready())
            .await
            .expect("already-ready gate should resolve immediately");
    }

    #[test]
    fn test_repeated_signals_are_harmless() {
        let gate = ReadinessGate::new();
        gate.set_permission(true);
        gate.set_permission(true);
        gate.set_device_ready(true);
        gate.set_device_ready(true);
        assert_eq!(
            gate.readiness(),
            Readiness {
                permission_granted: true,
                device_ready: true
            }
        );
    }
}
