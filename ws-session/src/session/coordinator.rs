/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Lifecycle bookkeeping shared by every session adapter.

use crate::error::SessionError;
use futures::future::{self, BoxFuture, Shared};
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

/// Lifecycle of a session. Only ever moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    Open,
    /// `close` was invoked and the runtime close is pending
    Closing,
    /// Terminal
    Closed,
}

type CloseOutcome = Shared<BoxFuture<'static, Result<(), SessionError>>>;

/// Owns the session state and guarantees a single runtime close.
///
/// The close future is stored here and shared, so a caller dropping its
/// `close` future does not abandon a close another caller is waiting on.
pub(crate) struct CloseCoordinator {
    state: Arc<watch::Sender<SessionState>>,
    close: Mutex<Option<CloseOutcome>>,
    receiving: Arc<AtomicBool>,
    sending: Arc<AtomicBool>,
}

impl CloseCoordinator {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Open);
        Self {
            state: Arc::new(state),
            close: Mutex::new(None),
            receiving: Arc::new(AtomicBool::new(false)),
            sending: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub(crate) fn handle(&self) -> StateHandle {
        StateHandle(Arc::clone(&self.state))
    }

    /// Run `close_internal` at most once and share its outcome.
    ///
    /// A session already closed by its transport resolves `Ok(())` without
    /// invoking the runtime close.
    pub(crate) fn close_with<F>(&self, close_internal: F) -> BoxFuture<'static, Result<(), SessionError>>
    where
        F: FnOnce() -> BoxFuture<'static, Result<(), SessionError>>,
    {
        let mut slot = self.close.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(outcome) = slot.as_ref() {
            return outcome.clone().boxed();
        }

        let opened = self.state.send_if_modified(|state| {
            if *state == SessionState::Open {
                *state = SessionState::Closing;
                true
            } else {
                false
            }
        });
        if !opened {
            return future::ready(Ok(())).boxed();
        }

        let handle = self.handle();
        let pending = close_internal();
        let outcome = async move {
            let result = pending.await;
            handle.mark_closed();
            result
        }
        .boxed()
        .shared();
        *slot = Some(outcome.clone());
        outcome.boxed()
    }

    pub(crate) fn acquire_receiver(&self) -> Option<ActiveGuard> {
        ActiveGuard::acquire(&self.receiving)
    }

    pub(crate) fn acquire_sender(&self) -> Option<ActiveGuard> {
        ActiveGuard::acquire(&self.sending)
    }
}

/// Cloneable view of the state used by in-flight streams.
#[derive(Clone)]
pub(crate) struct StateHandle(Arc<watch::Sender<SessionState>>);

impl StateHandle {
    /// Transport-observed termination; skips `Closing`.
    pub(crate) fn mark_closed(&self) {
        self.0.send_if_modified(|state| {
            if *state == SessionState::Closed {
                false
            } else {
                *state = SessionState::Closed;
                true
            }
        });
    }

    /// Resolves once the state is at or beyond `target`.
    pub(crate) fn reached(&self, target: SessionState) -> BoxFuture<'static, ()> {
        let mut rx = self.0.subscribe();
        async move {
            // An error means the sender is gone, which also ends the session.
            let _ = rx.wait_for(|state| *state >= target).await;
        }
        .boxed()
    }
}

/// Marks one direction as busy until dropped.
pub(crate) struct ActiveGuard {
    flag: Arc<AtomicBool>,
}

impl ActiveGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_close_runs_once() {
        let coordinator = CloseCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            coordinator
                .close_with(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    future::ready(Ok(())).boxed()
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_close_error_is_shared() {
        let coordinator = CloseCoordinator::new();
        let first = coordinator
            .close_with(|| future::ready(Err(SessionError::Close("refused".into()))).boxed())
            .await;
        let second = coordinator
            .close_with(|| future::ready(Ok(())).boxed())
            .await;
        assert_eq!(first, Err(SessionError::Close("refused".into())));
        assert_eq!(first, second);
        assert_eq!(coordinator.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_close_after_transport_loss_skips_runtime_close() {
        let coordinator = CloseCoordinator::new();
        coordinator.handle().mark_closed();
        let outcome = coordinator
            .close_with(|| panic!("runtime close must not run"))
            .await;
        assert_eq!(outcome, Ok(()));
    }

    #[tokio::test]
    async fn test_dropped_close_future_is_not_abandoned() {
        let coordinator = CloseCoordinator::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let first = coordinator.close_with(move || {
            async move {
                let _ = rx.await;
                Ok(())
            }
            .boxed()
        });
        assert_eq!(coordinator.state(), SessionState::Closing);
        drop(first);

        tx.send(()).unwrap();
        coordinator
            .close_with(|| panic!("runtime close must not run twice"))
            .await
            .unwrap();
        assert_eq!(coordinator.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_reached_resolves_on_transition() {
        let coordinator = CloseCoordinator::new();
        let handle = coordinator.handle();
        let waiter = tokio::spawn(handle.reached(SessionState::Closing));
        handle.mark_closed();
        waiter.await.unwrap();
    }

    #[test]
    fn test_guard_is_exclusive_until_dropped() {
        let coordinator = CloseCoordinator::new();
        let guard = coordinator.acquire_receiver();
        assert!(guard.is_some());
        assert!(coordinator.acquire_receiver().is_none());
        assert!(coordinator.acquire_sender().is_some());
        drop(guard);
        assert!(coordinator.acquire_receiver().is_some());
    }
}
