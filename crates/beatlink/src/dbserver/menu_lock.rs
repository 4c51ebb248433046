//! Re-entrant, timed menu lock.
//!
//! A single caller may hold this lock across several nested menu requests
//! without deadlocking itself. Tokio has no built-in task identity or
//! reentrant mutex, so this tracks a caller-supplied [`LockToken`] and a
//! depth counter behind a plain synchronous mutex (the critical section is
//! always a few field reads/writes, never held across an `.await`), with
//! [`Notify`] waking waiters on release.

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::error::ClientError;

/// Opaque identity of a lock holder. Callers derive this from whatever
/// notion of "current task" makes sense for them; the lock itself only
/// compares tokens for equality.
pub type LockToken = u64;

struct Inner {
    holder: Option<LockToken>,
    depth: u32,
}

/// A per-client re-entrant mutex guarding menu request sequences.
pub struct MenuLock {
    state: Mutex<Inner>,
    available: Notify,
}

impl Default for MenuLock {
    fn default() -> Self {
        Self::new()
    }
}

impl MenuLock {
    pub fn new() -> Self {
        MenuLock {
            state: Mutex::new(Inner {
                holder: None,
                depth: 0,
            }),
            available: Notify::new(),
        }
    }

    /// Acquire the lock for `token`, reentrantly if `token` already holds
    /// it, waiting up to `timeout` for another holder to release.
    pub async fn try_lock_for(
        &self,
        token: LockToken,
        timeout: Duration,
    ) -> Result<MenuLockGuard<'_>, ClientError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut inner = self.state.lock().unwrap();
                match inner.holder {
                    None => {
                        inner.holder = Some(token);
                        inner.depth = 1;
                        return Ok(MenuLockGuard { lock: self, token });
                    }
                    Some(holder) if holder == token => {
                        inner.depth += 1;
                        return Ok(MenuLockGuard { lock: self, token });
                    }
                    Some(_) => {}
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ClientError::Timeout {
                    operation: "menu lock acquisition",
                    deadline_ms: timeout.as_millis() as u64,
                });
            }
            let _ = tokio::time::timeout(remaining, self.available.notified()).await;
        }
    }

    fn release(&self, token: LockToken) {
        let mut inner = self.state.lock().unwrap();
        if inner.holder != Some(token) {
            return;
        }
        inner.depth -= 1;
        if inner.depth == 0 {
            inner.holder = None;
            drop(inner);
            self.available.notify_waiters();
        }
    }
}

/// Proof that the current caller holds the menu lock. DbServer Client menu
/// methods require one of these by reference, turning a runtime
/// "is this locked by the current caller?" check into a compile-time one.
pub struct MenuLockGuard<'a> {
    lock: &'a MenuLock,
    token: LockToken,
}

impl Drop for MenuLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn same_token_reenters_without_blocking() {
        let lock = MenuLock::new();
        let guard1 = lock.try_lock_for(1, Duration::from_millis(100)).await.unwrap();
        let guard2 = lock.try_lock_for(1, Duration::from_millis(100)).await.unwrap();
        drop(guard2);
        drop(guard1);
    }

    #[tokio::test]
    async fn different_token_times_out_while_held() {
        let lock = MenuLock::new();
        let _guard = lock.try_lock_for(1, Duration::from_millis(100)).await.unwrap();
        let err = lock.try_lock_for(2, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout { .. }));
    }

    #[tokio::test]
    async fn release_wakes_a_waiting_token() {
        let lock = Arc::new(MenuLock::new());
        let guard = lock.try_lock_for(1, Duration::from_millis(500)).await.unwrap();

        let waiter_lock = lock.clone();
        let waiter = tokio::spawn(async move {
            waiter_lock.try_lock_for(2, Duration::from_secs(2)).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);

        let result = waiter.await.unwrap();
        assert!(result.is_ok());
    }
}
