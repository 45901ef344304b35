// src/tracking/wake_lock.rs
//! Best-effort "keep the screen on" while tracking.
//!
//! The coordinator is the only owner of the platform handle. Its state moves
//! between `Released`, `Held` and `Unsupported`, driven only by the enable
//! flag, visibility changes and revocations reported by the platform. A held
//! handle can disappear at any moment, so `Held` is left as soon as the
//! platform reports the revocation.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WakeLockError {
    #[error("wake lock is not supported on this platform")]
    Unsupported,
    #[error("wake lock request failed: {0}")]
    AcquisitionFailed(String),
}

/// Opaque platform handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WakeLockHandle(u64);

impl WakeLockHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Sender a platform uses to report that a handle was revoked
pub type RevocationSender = mpsc::UnboundedSender<WakeLockHandle>;

#[async_trait]
pub trait WakeLockPlatform: Send {
    fn is_supported(&self) -> bool;

    /// Request a lock; the platform reports a later loss through `revoked`
    async fn acquire(
        &mut self,
        revoked: RevocationSender,
    ) -> std::result::Result<WakeLockHandle, WakeLockError>;

    /// Give the lock back; must tolerate handles that are already gone
    async fn release(&mut self, handle: WakeLockHandle);
}

/// Platform without any wake lock facility
pub struct NoWakeLock;

#[async_trait]
impl WakeLockPlatform for NoWakeLock {
    fn is_supported(&self) -> bool {
        false
    }

    async fn acquire(
        &mut self,
        _revoked: RevocationSender,
    ) -> std::result::Result<WakeLockHandle, WakeLockError> {
        Err(WakeLockError::Unsupported)
    }

    async fn release(&mut self, _handle: WakeLockHandle) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeLockState {
    Released,
    Held(WakeLockHandle),
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WakeLockStatus {
    pub is_supported: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeLockOutcome {
    Unchanged,
    Acquired(WakeLockHandle),
    Released,
    Failed(WakeLockError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

pub struct WakeLockCoordinator {
    platform: Box<dyn WakeLockPlatform>,
    state: WakeLockState,
    enabled: bool,
    revoked_tx: RevocationSender,
    revoked_rx: mpsc::UnboundedReceiver<WakeLockHandle>,
}

impl WakeLockCoordinator {
    pub fn new(platform: Box<dyn WakeLockPlatform>) -> Self {
        let state = if platform.is_supported() {
            WakeLockState::Released
        } else {
            WakeLockState::Unsupported
        };
        let (revoked_tx, revoked_rx) = mpsc::unbounded_channel();

        Self {
            platform,
            state,
            enabled: false,
            revoked_tx,
            revoked_rx,
        }
    }

    pub fn state(&self) -> WakeLockState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn status(&self) -> WakeLockStatus {
        WakeLockStatus {
            is_supported: self.state != WakeLockState::Unsupported,
            is_active: matches!(self.state, WakeLockState::Held(_)),
        }
    }

    /// React to the enable flag; only transitions do anything
    pub async fn set_enabled(&mut self, enabled: bool) -> WakeLockOutcome {
        if enabled == self.enabled {
            return WakeLockOutcome::Unchanged;
        }
        self.enabled = enabled;

        if enabled {
            self.acquire().await
        } else {
            self.release().await
        }
    }

    /// Reacquire after the application comes back to the foreground
    pub async fn on_visibility(&mut self, visibility: Visibility) -> WakeLockOutcome {
        if visibility == Visibility::Visible
            && self.enabled
            && self.state == WakeLockState::Released
        {
            tracing::debug!("Visible again, reacquiring wake lock");
            self.acquire().await
        } else {
            WakeLockOutcome::Unchanged
        }
    }

    /// The platform dropped a handle. Returns whether it was the live one.
    pub fn on_revoked(&mut self, handle: WakeLockHandle) -> bool {
        if self.state == WakeLockState::Held(handle) {
            tracing::info!(handle = handle.id(), "Wake lock revoked by platform");
            self.state = WakeLockState::Released;
            true
        } else {
            false
        }
    }

    /// Next revocation reported by the platform
    pub async fn next_revocation(&mut self) -> Option<WakeLockHandle> {
        self.revoked_rx.recv().await
    }

    /// Release whatever is held and stop reacting to visibility
    pub async fn teardown(&mut self) {
        self.enabled = false;
        self.release().await;
    }

    async fn acquire(&mut self) -> WakeLockOutcome {
        match self.state {
            WakeLockState::Unsupported => return WakeLockOutcome::Failed(WakeLockError::Unsupported),
            WakeLockState::Held(_) => return WakeLockOutcome::Unchanged,
            WakeLockState::Released => {}
        }

        match self.platform.acquire(self.revoked_tx.clone()).await {
            Ok(handle) => {
                tracing::info!(handle = handle.id(), "Wake lock acquired");
                self.state = WakeLockState::Held(handle);
                WakeLockOutcome::Acquired(handle)
            }
            Err(WakeLockError::Unsupported) => {
                self.state = WakeLockState::Unsupported;
                WakeLockOutcome::Failed(WakeLockError::Unsupported)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Wake lock request failed");
                self.state = WakeLockState::Released;
                WakeLockOutcome::Failed(e)
            }
        }
    }

    async fn release(&mut self) -> WakeLockOutcome {
        match self.state {
            WakeLockState::Held(handle) => {
                self.state = WakeLockState::Released;
                self.platform.release(handle).await;
                tracing::info!(handle = handle.id(), "Wake lock released");
                WakeLockOutcome::Released
            }
            _ => WakeLockOutcome::Unchanged,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Scripted platform recording every call
    #[derive(Clone, Default)]
    pub struct FakePlatform {
        pub inner: Arc<Mutex<FakeState>>,
    }

    #[derive(Default)]
    pub struct FakeState {
        pub unsupported: bool,
        pub fail_next: bool,
        pub acquires: usize,
        pub releases: Vec<WakeLockHandle>,
        pub next_id: u64,
        pub revoker: Option<RevocationSender>,
    }

    impl FakePlatform {
        pub fn unsupported() -> Self {
            let platform = Self::default();
            platform.inner.lock().unwrap().unsupported = true;
            platform
        }

        pub fn acquires(&self) -> usize {
            self.inner.lock().unwrap().acquires
        }

        pub fn releases(&self) -> usize {
            self.inner.lock().unwrap().releases.len()
        }

        pub fn fail_next(&self) {
            self.inner.lock().unwrap().fail_next = true;
        }

        /// Simulate the OS taking the lock away
        pub fn revoke(&self, handle: WakeLockHandle) {
            if let Some(tx) = &self.inner.lock().unwrap().revoker {
                let _ = tx.send(handle);
            }
        }
    }

    #[async_trait]
    impl WakeLockPlatform for FakePlatform {
        fn is_supported(&self) -> bool {
            !self.inner.lock().unwrap().unsupported
        }

        async fn acquire(
            &mut self,
            revoked: RevocationSender,
        ) -> std::result::Result<WakeLockHandle, WakeLockError> {
            let mut state = self.inner.lock().unwrap();
            state.acquires += 1;
            if state.unsupported {
                return Err(WakeLockError::Unsupported);
            }
            if state.fail_next {
                state.fail_next = false;
                return Err(WakeLockError::AcquisitionFailed("denied".to_string()));
            }
            state.next_id += 1;
            state.revoker = Some(revoked);
            Ok(WakeLockHandle::new(state.next_id))
        }

        async fn release(&mut self, handle: WakeLockHandle) {
            self.inner.lock().unwrap().releases.push(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakePlatform;
    use super::*;

    #[tokio::test]
    async fn test_enable_and_disable() {
        let platform = FakePlatform::default();
        let mut coordinator = WakeLockCoordinator::new(Box::new(platform.clone()));
        assert_eq!(
            coordinator.status(),
            WakeLockStatus { is_supported: true, is_active: false }
        );

        let outcome = coordinator.set_enabled(true).await;
        assert!(matches!(outcome, WakeLockOutcome::Acquired(_)));
        assert!(coordinator.status().is_active);

        // Same value again is not a transition
        assert_eq!(coordinator.set_enabled(true).await, WakeLockOutcome::Unchanged);
        assert_eq!(platform.acquires(), 1);

        assert_eq!(coordinator.set_enabled(false).await, WakeLockOutcome::Released);
        assert!(!coordinator.status().is_active);
        assert_eq!(platform.releases(), 1);

        // Releasing with nothing held is a no-op
        coordinator.teardown().await;
        assert_eq!(platform.releases(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_reports_without_calling_platform() {
        let platform = FakePlatform::unsupported();
        let mut coordinator = WakeLockCoordinator::new(Box::new(platform.clone()));

        let outcome = coordinator.set_enabled(true).await;
        assert_eq!(outcome, WakeLockOutcome::Failed(WakeLockError::Unsupported));
        assert_eq!(
            coordinator.status(),
            WakeLockStatus { is_supported: false, is_active: false }
        );
        assert_eq!(platform.acquires(), 0);
    }

    #[tokio::test]
    async fn test_no_wake_lock_platform() {
        let mut coordinator = WakeLockCoordinator::new(Box::new(NoWakeLock));
        assert!(!coordinator.status().is_supported);
        assert!(matches!(
            coordinator.set_enabled(true).await,
            WakeLockOutcome::Failed(WakeLockError::Unsupported)
        ));
        assert!(!coordinator.status().is_active);
    }

    #[tokio::test]
    async fn test_failure_is_not_retried_until_visible_again() {
        let platform = FakePlatform::default();
        platform.fail_next();
        let mut coordinator = WakeLockCoordinator::new(Box::new(platform.clone()));

        let outcome = coordinator.set_enabled(true).await;
        assert!(matches!(
            outcome,
            WakeLockOutcome::Failed(WakeLockError::AcquisitionFailed(_))
        ));
        assert_eq!(coordinator.state(), WakeLockState::Released);
        assert!(coordinator.status().is_supported);
        assert_eq!(platform.acquires(), 1);

        let outcome = coordinator.on_visibility(Visibility::Visible).await;
        assert!(matches!(outcome, WakeLockOutcome::Acquired(_)));
        assert_eq!(platform.acquires(), 2);
    }

    #[tokio::test]
    async fn test_revocation_then_visible_reacquires_once() {
        let platform = FakePlatform::default();
        let mut coordinator = WakeLockCoordinator::new(Box::new(platform.clone()));

        let WakeLockOutcome::Acquired(handle) = coordinator.set_enabled(true).await else {
            panic!("expected acquisition");
        };

        platform.revoke(handle);
        let revoked = coordinator.next_revocation().await.unwrap();
        assert!(coordinator.on_revoked(revoked));
        assert!(!coordinator.status().is_active);

        // Hidden does nothing
        assert_eq!(
            coordinator.on_visibility(Visibility::Hidden).await,
            WakeLockOutcome::Unchanged
        );
        assert_eq!(platform.acquires(), 1);

        assert!(matches!(
            coordinator.on_visibility(Visibility::Visible).await,
            WakeLockOutcome::Acquired(_)
        ));
        assert_eq!(platform.acquires(), 2);

        // Already held: a second regain does not request again
        assert_eq!(
            coordinator.on_visibility(Visibility::Visible).await,
            WakeLockOutcome::Unchanged
        );
        assert_eq!(platform.acquires(), 2);
    }

    #[tokio::test]
    async fn test_visible_while_disabled_does_nothing() {
        let platform = FakePlatform::default();
        let mut coordinator = WakeLockCoordinator::new(Box::new(platform.clone()));

        assert_eq!(
            coordinator.on_visibility(Visibility::Visible).await,
            WakeLockOutcome::Unchanged
        );
        assert_eq!(platform.acquires(), 0);
    }

    #[tokio::test]
    async fn test_stale_revocation_ignored() {
        let platform = FakePlatform::default();
        let mut coordinator = WakeLockCoordinator::new(Box::new(platform.clone()));

        let WakeLockOutcome::Acquired(first) = coordinator.set_enabled(true).await else {
            panic!("expected acquisition");
        };
        coordinator.set_enabled(false).await;
        let WakeLockOutcome::Acquired(second) = coordinator.set_enabled(true).await else {
            panic!("expected acquisition");
        };

        assert!(!coordinator.on_revoked(first));
        assert_eq!(coordinator.state(), WakeLockState::Held(second));
    }
}
