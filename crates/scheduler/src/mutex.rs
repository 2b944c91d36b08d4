//! FIFO async mutex.
//!
//! Waiters are woken strictly in arrival order. The lock is handed directly
//! from the releasing guard to the next waiter, so a newcomer can never barge
//! in between a release and the wakeup.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};
use tokio::sync::oneshot;

#[derive(Default)]
struct State {
    locked: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

#[derive(Clone, Default)]
pub struct Mutex {
    state: Arc<StdMutex<State>>,
}

impl Mutex {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StdMutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Suspends until the lock is free, then returns a guard that releases on drop.
    pub async fn acquire(&self) -> MutexGuard {
        let rx = {
            let mut state = self.state();
            if !state.locked {
                state.locked = true;
                return MutexGuard { mutex: self.clone() };
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };

        let mut waiter = Waiter {
            mutex: self.clone(),
            rx: Some(rx),
        };
        if let Some(rx) = waiter.rx.as_mut() {
            // The sender is only dropped after the lock was handed to us or
            // when the whole mutex goes away; both mean we own it now.
            let _ = rx.await;
        }
        waiter.rx = None;
        MutexGuard { mutex: self.clone() }
    }

    pub fn is_locked(&self) -> bool {
        self.state().locked
    }

    /// Number of callers currently suspended in `acquire`.
    pub fn waiting(&self) -> usize {
        self.state().waiters.len()
    }

    fn release(&self) {
        let mut state = self.state();
        while let Some(next) = state.waiters.pop_front() {
            if next.send(()).is_ok() {
                // Ownership moves to `next`; `locked` stays true.
                return;
            }
        }
        state.locked = false;
    }
}

/// Holds the lock until dropped or explicitly released.
pub struct MutexGuard {
    mutex: Mutex,
}

impl MutexGuard {
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for MutexGuard {
    fn drop(&mut self) {
        self.mutex.release();
    }
}

/// Pending acquisition. If the acquiring future is dropped after the lock was
/// already handed over, the lock is passed on instead of leaking.
struct Waiter {
    mutex: Mutex,
    rx: Option<oneshot::Receiver<()>>,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if rx.try_recv().is_ok() {
                self.mutex.release();
            }
        }
    }
}
