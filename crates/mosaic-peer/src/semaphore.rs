//! Owner-tracked binary semaphore, one per peer.
//!
//! The semaphore guards its peer's board replica across the whole session:
//! whoever wants to change the board everywhere first takes the semaphore of
//! every peer. It is exported for remote calls, so the only notion of "who is
//! asking" is the [`PeerId`] passed in by the caller.
//!
//! ```text
//!            acquire(p)                 release(p)
//!   Free ─────────────────▶ Held(p) ─────────────────▶ Free
//!                           │    ▲
//!                           └────┘ acquire(p): returns at once
//!                           acquire(q), q ≠ p: waits for release
//! ```

use tokio::sync::{Mutex, Notify};
use tracing::trace;

use crate::error::{Error, Result};
use crate::peer::PeerId;

/// State of the permit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    /// Nobody holds the permit.
    Free,
    /// The permit is held by this peer.
    Held(PeerId),
}

/// Binary semaphore that remembers its owner.
#[derive(Debug)]
pub struct RemoteSemaphore {
    state: Mutex<LockState>,
    released: Notify,
}

impl Default for RemoteSemaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteSemaphore {
    /// Create a free semaphore.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState::Free),
            released: Notify::new(),
        }
    }

    /// Take the permit for `requester`, waiting as long as another peer holds it.
    ///
    /// Returns immediately if `requester` already holds the permit. There is no
    /// timeout. Dropping the future before it completes leaves the permit
    /// untouched.
    pub async fn acquire(&self, requester: &PeerId) {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            {
                let mut state = self.state.lock().await;
                match &*state {
                    LockState::Free => {
                        *state = LockState::Held(requester.clone());
                        trace!(%requester, "semaphore acquired");
                        return;
                    }
                    LockState::Held(owner) if owner == requester => return,
                    LockState::Held(owner) => {
                        trace!(%requester, %owner, "semaphore busy, waiting");
                        // Register before unlocking the state so a release in
                        // between cannot be missed.
                        released.as_mut().enable();
                    }
                }
            }
            released.await;
        }
    }

    /// Give the permit back on behalf of `requester`.
    ///
    /// Releasing a free semaphore is a no-op. Releasing a permit held by
    /// another peer fails with [`Error::OwnershipViolation`].
    pub async fn release(&self, requester: &PeerId) -> Result<()> {
        let mut state = self.state.lock().await;
        match &*state {
            LockState::Free => Ok(()),
            LockState::Held(owner) if owner != requester => Err(Error::OwnershipViolation {
                owner: owner.clone(),
                requester: requester.clone(),
            }),
            LockState::Held(_) => {
                *state = LockState::Free;
                drop(state);
                self.released.notify_one();
                trace!(%requester, "semaphore released");
                Ok(())
            }
        }
    }

    /// The current owner, if any.
    pub async fn owner(&self) -> Option<PeerId> {
        match &*self.state.lock().await {
            LockState::Free => None,
            LockState::Held(owner) => Some(owner.clone()),
        }
    }

    /// Snapshot of the permit state.
    pub async fn state(&self) -> LockState {
        self.state.lock().await.clone()
    }
}
