// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! A bounded pool of server-side sessions with a FIFO waiter queue,
//! prepopulation, a keepalive scheduler, and broken-session eviction.

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::{
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tracing::{debug, trace, warn};

use crate::{
    error::YdbError,
    session::{Session, SessionEvent},
};

/// Creates sessions on behalf of the pool, picking a healthy endpoint per
/// call. Implemented by the driver; tests substitute scripted factories.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn make_session(
        &self,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Arc<Session>, YdbError>;
}

#[derive(Clone, Debug)]
pub struct SessionPoolSettings {
    /// Sessions created eagerly at pool construction.
    pub min_limit: usize,
    /// Hard cap on live plus in-flight sessions.
    pub max_limit: usize,
    /// Interval of the keepalive sweep over all current sessions.
    pub keep_alive_period: Duration,
}

impl Default for SessionPoolSettings {
    fn default() -> Self {
        Self {
            min_limit: 5,
            max_limit: 20,
            keep_alive_period: Duration::from_secs(300),
        }
    }
}

struct Waiter {
    id: u64,
    sender: oneshot::Sender<Arc<Session>>,
}

#[derive(Default)]
struct PoolState {
    sessions: HashMap<String, Arc<Session>>,
    waiters: VecDeque<Waiter>,
    new_sessions_requested: usize,
    sessions_being_deleted: usize,
    next_waiter_id: u64,
}

impl PoolState {
    /// Live plus in-flight sessions, the quantity bounded by `max_limit`.
    fn occupancy(&self) -> usize {
        (self.sessions.len() + self.new_sessions_requested)
            .saturating_sub(self.sessions_being_deleted)
    }

    fn free_session(&self) -> Option<Arc<Session>> {
        self.sessions
            .values()
            .find(|session| session.is_free())
            .cloned()
    }
}

struct PoolInner {
    provider: Arc<dyn SessionProvider>,
    settings: SessionPoolSettings,
    state: Mutex<PoolState>,
    events: mpsc::UnboundedSender<SessionEvent>,
    destroyed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// A bounded pool of [`Session`]s.
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

enum AcquirePlan {
    Ready(Arc<Session>),
    Create,
    Wait(u64, oneshot::Receiver<Arc<Session>>),
}

impl SessionPool {
    pub fn new(provider: Arc<dyn SessionProvider>, settings: SessionPoolSettings) -> Self {
        let (events, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(PoolInner {
            provider,
            settings,
            state: Mutex::new(PoolState::default()),
            events,
            destroyed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        });
        let pool = Self { inner };
        pool.spawn_background_tasks(receiver);
        pool
    }

    fn spawn_background_tasks(&self, receiver: mpsc::UnboundedReceiver<SessionEvent>) {
        let pump = tokio::spawn(Self::run_event_pump(self.inner.clone(), receiver));
        let keepalive = tokio::spawn(Self::run_keepalive(self.inner.clone()));
        let prepopulate = tokio::spawn(Self::prepopulate(self.inner.clone()));
        // Nothing else can hold the lock before construction finishes.
        if let Ok(mut tasks) = self.inner.tasks.try_lock() {
            tasks.extend([pump, keepalive, prepopulate]);
        }
    }

    fn ensure_alive(&self) -> Result<(), YdbError> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            Err(YdbError::Destroyed("session pool"))
        } else {
            Ok(())
        }
    }

    /// Number of sessions currently tracked by the pool.
    pub async fn size(&self) -> usize {
        self.inner.state.lock().await.sessions.len()
    }

    /// Acquires a session: reuses a free one, creates one while below the
    /// limit, or parks in the FIFO waiter queue. With a timeout, a parked
    /// acquirer gives up after that long; without one it waits indefinitely.
    pub async fn acquire(&self, timeout: Option<Duration>) -> Result<Arc<Session>, YdbError> {
        self.ensure_alive()?;

        let plan = {
            let mut state = self.inner.state.lock().await;
            if let Some(session) = state.free_session() {
                session.acquire();
                AcquirePlan::Ready(session)
            } else if state.occupancy() < self.inner.settings.max_limit {
                state.new_sessions_requested += 1;
                AcquirePlan::Create
            } else {
                let (sender, receiver) = oneshot::channel();
                let id = state.next_waiter_id;
                state.next_waiter_id += 1;
                state.waiters.push_back(Waiter { id, sender });
                trace!(waiter = id, "session pool saturated; queueing acquirer");
                AcquirePlan::Wait(id, receiver)
            }
        };

        match plan {
            AcquirePlan::Ready(session) => Ok(session),
            AcquirePlan::Create => {
                let result = self
                    .inner
                    .provider
                    .make_session(self.inner.events.clone())
                    .await;
                let mut state = self.inner.state.lock().await;
                state.new_sessions_requested -= 1;
                let session = result?;
                if self.inner.destroyed.load(Ordering::SeqCst) {
                    // The pool was destroyed while the session was being
                    // created; it must not outlive the pool.
                    drop(state);
                    let _ = session.delete().await;
                    return Err(YdbError::Destroyed("session pool"));
                }
                session.acquire();
                state
                    .sessions
                    .insert(session.id().to_string(), session.clone());
                Ok(session)
            }
            AcquirePlan::Wait(id, mut receiver) => match timeout {
                None => receiver
                    .await
                    .map_err(|_| YdbError::Destroyed("session pool")),
                Some(limit) => match tokio::time::timeout(limit, &mut receiver).await {
                    Ok(Ok(session)) => Ok(session),
                    Ok(Err(_)) => Err(YdbError::Destroyed("session pool")),
                    Err(_elapsed) => {
                        let mut state = self.inner.state.lock().await;
                        let position = state.waiters.iter().position(|waiter| waiter.id == id);
                        match position {
                            Some(index) => {
                                state.waiters.remove(index);
                                Err(YdbError::SessionPoolTimeout(limit.as_millis() as u64))
                            }
                            // Resolved concurrently with the timeout: the
                            // handed-over session wins.
                            None => receiver.try_recv().map_err(|_| {
                                YdbError::SessionPoolTimeout(limit.as_millis() as u64)
                            }),
                        }
                    }
                },
            },
        }
    }

    /// Acquires a session, runs `operation` on it, and returns it to the
    /// pool. A failing operation disposes of the session instead, so that a
    /// possibly poisoned handle never reaches another caller; the error is
    /// rethrown. Retries are not performed at this layer.
    pub async fn with_session<T, F, Fut>(
        &self,
        operation: F,
        timeout: Option<Duration>,
    ) -> Result<T, YdbError>
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T, YdbError>>,
    {
        let session = self.acquire(timeout).await?;
        match operation(session.clone()).await {
            Ok(value) => {
                session.release();
                Ok(value)
            }
            Err(error) => {
                self.discard(&session).await;
                Err(error)
            }
        }
    }

    /// Deletes a session and drops it from the pool.
    async fn discard(&self, session: &Arc<Session>) {
        {
            let mut state = self.inner.state.lock().await;
            if state.sessions.contains_key(session.id()) {
                state.sessions_being_deleted += 1;
            } else {
                return;
            }
        }
        if let Err(error) = session.delete().await {
            warn!(session = session.id(), %error, "failed to delete discarded session");
        }
        let mut state = self.inner.state.lock().await;
        state.sessions.remove(session.id());
        state.sessions_being_deleted -= 1;
    }

    /// Destroys the pool: stops background work, fails queued waiters, and
    /// awaits deletion of every current session. Idempotent.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in self.inner.tasks.lock().await.drain(..) {
            task.abort();
        }
        let (sessions, waiters) = {
            let mut state = self.inner.state.lock().await;
            (
                std::mem::take(&mut state.sessions),
                std::mem::take(&mut state.waiters),
            )
        };
        // Dropping the senders fails the parked acquirers.
        drop(waiters);
        debug!(sessions = sessions.len(), "destroying session pool");
        join_all(sessions.values().map(|session| session.delete())).await;
    }

    async fn run_event_pump(
        inner: Arc<PoolInner>,
        mut receiver: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        while let Some(event) = receiver.recv().await {
            match event {
                SessionEvent::Released(session_id) => {
                    Self::hand_over(&inner, &session_id).await;
                }
                SessionEvent::Broken(session_id) => {
                    Self::evict(&inner, session_id);
                }
            }
        }
    }

    /// Hands a freshly released session to the head waiter, skipping waiters
    /// that vanished (typically by timing out).
    async fn hand_over(inner: &Arc<PoolInner>, session_id: &str) {
        let mut state = inner.state.lock().await;
        let Some(session) = state.sessions.get(session_id).cloned() else {
            return;
        };
        while session.is_free() && !state.waiters.is_empty() {
            let Some(waiter) = state.waiters.pop_front() else {
                return;
            };
            if !session.acquire() {
                return;
            }
            match waiter.sender.send(session.clone()) {
                Ok(()) => {
                    trace!(waiter = waiter.id, session = session_id, "session handed to waiter");
                    return;
                }
                Err(_) => session.unacquire(),
            }
        }
    }

    /// Starts asynchronous deletion of a broken session; the session is
    /// pruned from the pool once the delete completes.
    fn evict(inner: &Arc<PoolInner>, session_id: String) {
        let inner = inner.clone();
        tokio::spawn(async move {
            let session = {
                let mut state = inner.state.lock().await;
                let Some(session) = state.sessions.get(&session_id).cloned() else {
                    return;
                };
                state.sessions_being_deleted += 1;
                session
            };
            debug!(session = %session_id, "evicting broken session");
            if let Err(error) = session.delete().await {
                warn!(session = %session_id, %error, "failed to delete broken session");
            }
            let mut state = inner.state.lock().await;
            state.sessions.remove(&session_id);
            state.sessions_being_deleted -= 1;
        });
    }

    async fn run_keepalive(inner: Arc<PoolInner>) {
        let period = inner.settings.keep_alive_period;
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        loop {
            interval.tick().await;
            let sessions: Vec<Arc<Session>> =
                inner.state.lock().await.sessions.values().cloned().collect();
            trace!(sessions = sessions.len(), "keepalive sweep");
            // Failures surface through broken-session events.
            join_all(sessions.iter().map(|session| session.keep_alive())).await;
        }
    }

    /// Creates the configured minimum of sessions up front. Failures are not
    /// fatal to the pool.
    async fn prepopulate(inner: Arc<PoolInner>) {
        for _ in 0..inner.settings.min_limit {
            if inner.destroyed.load(Ordering::SeqCst) {
                return;
            }
            {
                let mut state = inner.state.lock().await;
                if state.occupancy() >= inner.settings.max_limit {
                    return;
                }
                state.new_sessions_requested += 1;
            }
            let result = inner.provider.make_session(inner.events.clone()).await;
            let mut state = inner.state.lock().await;
            state.new_sessions_requested -= 1;
            match result {
                Ok(session) => {
                    state
                        .sessions
                        .insert(session.id().to_string(), session);
                }
                Err(error) => {
                    warn!(%error, "failed to prepopulate session");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::{
        error::StatusCode,
        session::QueryParams,
        test_utils::{bad_session, ScriptedProvider, ScriptedTableRpc},
    };

    fn pool_with(
        min_limit: usize,
        max_limit: usize,
    ) -> (SessionPool, Arc<ScriptedTableRpc>) {
        let rpc = Arc::new(ScriptedTableRpc::default());
        let provider = Arc::new(ScriptedProvider::new(rpc.clone()));
        let pool = SessionPool::new(
            provider,
            SessionPoolSettings {
                min_limit,
                max_limit,
                keep_alive_period: Duration::from_secs(300),
            },
        );
        (pool, rpc)
    }

    #[tokio::test(start_paused = true)]
    async fn prepopulation_reaches_the_minimum() {
        let (pool, rpc) = pool_with(3, 10);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.size().await, 3);
        assert_eq!(rpc.calls("create_session"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn sessions_are_reused_after_release() {
        let (pool, rpc) = pool_with(0, 5);
        let first = pool.acquire(None).await.expect("acquire");
        let first_id = first.id().to_string();
        first.release();
        tokio::task::yield_now().await;

        let second = pool.acquire(None).await.expect("acquire again");
        assert_eq!(second.id(), first_id);
        assert_eq!(rpc.calls("create_session"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn saturation_times_out_with_the_documented_message() {
        let (pool, _rpc) = pool_with(0, 1);
        let slow = pool.clone();
        let busy = tokio::spawn(async move {
            slow.with_session(
                |_session| async move {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok(())
                },
                Some(Duration::from_millis(100)),
            )
            .await
        });
        // Let the first caller grab the only slot.
        tokio::task::yield_now().await;

        let error = pool
            .with_session(
                |_session| async move { Ok(()) },
                Some(Duration::from_millis(100)),
            )
            .await
            .expect_err("saturated pool");
        assert_eq!(
            error.to_string(),
            "No session became available within timeout of 100 ms"
        );
        busy.await.expect("join").expect("first caller succeeds");
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_are_served_in_fifo_order() {
        let (pool, _rpc) = pool_with(0, 1);
        let session = pool.acquire(None).await.expect("acquire");

        let wake_order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut waiters = Vec::new();
        for index in 0..3 {
            let pool = pool.clone();
            let wake_order = wake_order.clone();
            waiters.push(tokio::spawn(async move {
                let session = pool.acquire(None).await.expect("woken");
                wake_order
                    .lock()
                    .expect("order log lock")
                    .push(index);
                session.release();
            }));
            // Deterministic queue order.
            tokio::task::yield_now().await;
        }

        session.release();
        for waiter in waiters {
            waiter.await.expect("join");
        }
        assert_eq!(*wake_order.lock().expect("order log lock"), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn the_limit_holds_under_concurrent_acquirers() {
        let (pool, rpc) = pool_with(0, 4);
        let callers: Vec<_> = (0..10)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move {
                    pool.with_session(
                        |_session| async move {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(())
                        },
                        None,
                    )
                    .await
                })
            })
            .collect();
        for caller in callers {
            caller.await.expect("join").expect("callback");
        }
        assert!(rpc.calls("create_session") <= 4);
        assert_eq!(pool.size().await, 4);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn broken_sessions_are_evicted_and_replaced() {
        let (pool, rpc) = pool_with(1, 5);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.size().await, 1);

        rpc.enqueue_failure("keep_alive", bad_session());
        // One keepalive period later the broken session is gone.
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(pool.size().await, 0);
        assert_eq!(rpc.calls("delete_session"), 1);

        // The next acquire creates a replacement.
        let session = pool.acquire(None).await.expect("replacement");
        assert!(!session.is_broken());
        assert_eq!(pool.size().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_callbacks_dispose_of_the_session() {
        let (pool, rpc) = pool_with(0, 5);
        let result: Result<(), YdbError> = pool
            .with_session(
                |_session| async move {
                    Err(YdbError::ServerStatus {
                        code: StatusCode::GenericError,
                        message: "callback failed".to_string(),
                    })
                },
                None,
            )
            .await;
        assert_matches!(result, Err(YdbError::ServerStatus { .. }));
        assert_eq!(pool.size().await, 0);
        assert_eq!(rpc.calls("delete_session"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_callbacks_reuse_the_session() {
        let (pool, rpc) = pool_with(0, 5);
        for _ in 0..3 {
            pool.with_session(
                |session| async move {
                    session
                        .execute_query("SELECT 1", QueryParams::new(), None)
                        .await
                },
                None,
            )
            .await
            .expect("query");
        }
        assert_eq!(rpc.calls("create_session"), 1);
        assert_eq!(rpc.calls("execute_query"), 3);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn destroy_deletes_sessions_and_rejects_operations() {
        let (pool, rpc) = pool_with(2, 5);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.size().await, 2);

        pool.destroy().await;
        pool.destroy().await;
        assert_eq!(rpc.calls("delete_session"), 2);
        assert_matches!(pool.acquire(None).await, Err(YdbError::Destroyed(_)));
        assert_matches!(
            pool.with_session(|_session| async move { Ok(()) }, None).await,
            Err(YdbError::Destroyed(_))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_fails_parked_waiters() {
        let (pool, _rpc) = pool_with(0, 1);
        let _held = pool.acquire(None).await.expect("acquire");
        let parked = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(None).await })
        };
        tokio::task::yield_now().await;

        pool.destroy().await;
        assert_matches!(parked.await.expect("join"), Err(YdbError::Destroyed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn creation_failures_propagate_to_the_acquirer() {
        let rpc = Arc::new(ScriptedTableRpc::default());
        rpc.enqueue_failure(
            "create_session",
            YdbError::ServerStatus {
                code: StatusCode::GenericError,
                message: "no capacity".to_string(),
            },
        );
        let pool = SessionPool::new(
            Arc::new(ScriptedProvider::new(rpc)),
            SessionPoolSettings {
                min_limit: 0,
                max_limit: 1,
                keep_alive_period: Duration::from_secs(300),
            },
        );
        assert_matches!(pool.acquire(None).await, Err(YdbError::ServerStatus { .. }));
        // The failed reservation is rolled back; the next acquire succeeds.
        pool.acquire(None).await.expect("second acquire");
    }
}
