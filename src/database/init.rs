//! Startup initialization coordinator
//!
//! Drives the connection manager from the application's point of view: a
//! bounded number of attempts, escalation to a full reset on retries, and
//! listeners that are told whenever the initialization state changes.
//!
//! Each run is driven by its own tokio task. Concurrent calls to
//! [`InitCoordinator::initialize`] attach to that task, so every caller
//! observes the same outcome, and a caller that stops waiting (for example on
//! timeout) does not stall the run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::database::core::{DatabaseError, RetryPolicy, SharedError, REQUIRED_TABLES};
use crate::database::manager::ConnectionManager;

/// Default ceiling for a whole startup sequence
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

type InitFuture = Shared<BoxFuture<'static, Result<(), SharedError>>>;
type Listener = Arc<dyn Fn(Option<&DatabaseError>) + Send + Sync>;

/// Token returned by [`InitCoordinator::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Coarse state of the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStatus {
    Idle,
    Initializing,
    Ready,
    Failed,
}

/// What a front end should render while the database comes up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupView {
    Loading,
    Error,
    Main,
}

impl From<InitStatus> for StartupView {
    fn from(status: InitStatus) -> Self {
        match status {
            InitStatus::Ready => StartupView::Main,
            InitStatus::Failed => StartupView::Error,
            InitStatus::Idle | InitStatus::Initializing => StartupView::Loading,
        }
    }
}

/// Tunables for [`InitCoordinator`]
#[derive(Debug, Clone, Copy)]
pub struct InitOptions {
    pub policy: RetryPolicy,
    pub startup_timeout: Duration,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::initialization(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }
}

#[derive(Default)]
struct InitState {
    initialized: bool,
    initializing: bool,
    last_error: Option<SharedError>,
    init_attempts: u32,
    in_flight: Option<InitFuture>,
    /// Bumped by `reset`/`force_reset` so a sequence that started earlier
    /// cannot overwrite the cleared state when it settles
    epoch: u64,
}

struct Inner {
    manager: Arc<ConnectionManager>,
    options: InitOptions,
    state: Mutex<InitState>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

/// Application-level owner of database startup
///
/// Cloning yields another handle to the same coordinator.
#[derive(Clone)]
pub struct InitCoordinator {
    inner: Arc<Inner>,
}

impl InitCoordinator {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self::with_options(manager, InitOptions::default())
    }

    pub fn with_options(manager: Arc<ConnectionManager>, options: InitOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                manager,
                options,
                state: Mutex::new(InitState::default()),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
            }),
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.inner.manager
    }

    pub fn options(&self) -> InitOptions {
        self.inner.options
    }

    /// Bring the database up, retrying and escalating to a reset as needed
    pub async fn initialize(&self) -> Result<(), SharedError> {
        let future = {
            let mut state = self.inner.state();
            if state.initialized {
                debug!("Database already initialized");
                return Ok(());
            }
            match &state.in_flight {
                Some(future) => {
                    info!("Database initialization already in progress, waiting");
                    future.clone()
                }
                None => {
                    state.initializing = true;
                    state.last_error = None;
                    let epoch = state.epoch;
                    let inner = self.inner.clone();
                    let task = tokio::spawn(inner.clone().run(epoch));
                    let future = async move {
                        match task.await {
                            Ok(outcome) => outcome,
                            Err(e) => inner.task_failed(epoch, e),
                        }
                    }
                    .boxed()
                    .shared();
                    state.in_flight = Some(future.clone());
                    future
                }
            }
        };
        future.await
    }

    /// [`initialize`](Self::initialize) bounded by the configured startup timeout
    pub async fn initialize_with_default_timeout(&self) -> Result<(), SharedError> {
        self.initialize_with_timeout(self.inner.options.startup_timeout)
            .await
    }

    /// [`initialize`](Self::initialize) bounded by `timeout`
    ///
    /// The underlying run keeps going on its own task when the timeout
    /// elapses; a later `initialize` call attaches to it again.
    pub async fn initialize_with_timeout(&self, timeout: Duration) -> Result<(), SharedError> {
        match tokio::time::timeout(timeout, self.initialize()).await {
            Ok(result) => result,
            Err(_) => {
                error!("Database initialization timed out after {:?}", timeout);
                let err: SharedError = Arc::new(DatabaseError::Timeout(timeout));
                self.inner.state().last_error = Some(err.clone());
                self.inner.notify(Some(&err));
                Err(err)
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.state().initialized
    }

    pub fn is_initializing(&self) -> bool {
        self.inner.state().initializing
    }

    pub fn last_error(&self) -> Option<SharedError> {
        self.inner.state().last_error.clone()
    }

    pub fn init_attempts(&self) -> u32 {
        self.inner.state().init_attempts
    }

    pub fn status(&self) -> InitStatus {
        let state = self.inner.state();
        if state.initialized {
            InitStatus::Ready
        } else if state.last_error.is_some() {
            InitStatus::Failed
        } else if state.initializing {
            InitStatus::Initializing
        } else {
            InitStatus::Idle
        }
    }

    pub fn startup_view(&self) -> StartupView {
        self.status().into()
    }

    /// Forget the outcome of previous runs but keep counting attempts
    pub fn reset(&self) {
        self.clear(false);
    }

    /// Like [`reset`](Self::reset), and also give back every attempt
    pub fn force_reset(&self) {
        self.clear(true);
    }

    fn clear(&self, zero_attempts: bool) {
        {
            let mut state = self.inner.state();
            state.initialized = false;
            state.initializing = false;
            state.last_error = None;
            state.in_flight = None;
            state.epoch += 1;
            if zero_attempts {
                state.init_attempts = 0;
            }
        }
        info!(
            "Database initialization state reset{}",
            if zero_attempts { " (attempts cleared)" } else { "" }
        );
        self.inner.notify(None);
    }

    /// Register a callback run on every state change
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(Option<&DatabaseError>) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::SeqCst));
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Returns `false` when `id` was not registered
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }

    /// Invoke every listener in registration order
    pub fn notify_listeners(&self, error: Option<&DatabaseError>) {
        self.inner.notify(error);
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, InitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, error: Option<&DatabaseError>) {
        // Listeners may call back into the coordinator
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(error);
        }
    }

    async fn run(self: Arc<Self>, epoch: u64) -> Result<(), SharedError> {
        let outcome = self.attempts().await;

        {
            let mut state = self.state();
            if state.epoch != epoch {
                debug!("Initialization state was reset while running, discarding outcome");
                return outcome;
            }
            state.initializing = false;
            state.in_flight = None;
            match &outcome {
                Ok(()) => {
                    state.initialized = true;
                    state.last_error = None;
                }
                Err(err) => {
                    state.initialized = false;
                    state.last_error = Some(err.clone());
                }
            }
        }

        self.notify(outcome.as_ref().err().map(|err| err.as_ref()));
        outcome
    }

    /// The run's task panicked or was cancelled before settling
    fn task_failed(&self, epoch: u64, err: tokio::task::JoinError) -> Result<(), SharedError> {
        error!("Database initialization task failed: {}", err);
        let shared: SharedError = {
            let mut state = self.state();
            let shared = Arc::new(DatabaseError::InitFailed {
                attempts: state.init_attempts,
                reason: err.to_string(),
            });
            if state.epoch == epoch {
                state.initializing = false;
                state.in_flight = None;
                state.last_error = Some(shared.clone());
            }
            shared
        };
        self.notify(Some(&shared));
        Err(shared)
    }

    async fn attempts(&self) -> Result<(), SharedError> {
        let max_attempts = self.options.policy.max_attempts.max(1);
        let mut last_error: Option<SharedError> = None;

        loop {
            let attempt = {
                let mut state = self.state();
                if state.init_attempts >= max_attempts {
                    break;
                }
                state.init_attempts += 1;
                state.init_attempts
            };
            self.notify(None);
            info!(
                "Starting database initialization (attempt {}/{})",
                attempt, max_attempts
            );

            let recover = attempt > 1
                && self
                    .manager
                    .recovery_mode()
                    .deletes_on_retry(last_error.as_ref().is_some_and(|e| e.is_corruption()));

            let opened = if recover {
                info!("Resetting database before retrying initialization");
                self.manager.reset_database().await
            } else {
                self.manager.open().await
            };

            match opened.and_then(|_| self.verify_tables(attempt)) {
                Ok(()) => {
                    info!("Database initialization successful");
                    return Ok(());
                }
                Err(err) => {
                    error!("Database initialization attempt {} failed: {}", attempt, err);
                    last_error = Some(err);
                }
            }

            if attempt < max_attempts {
                let delay = self.options.policy.next_delay();
                if !delay.is_zero() {
                    debug!("Waiting {:?} before next initialization attempt", delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        let attempts = self.state().init_attempts;
        let reason = match last_error {
            Some(err) => err.to_string(),
            None => {
                warn!("No database initialization attempts left");
                "no initialization attempts left".to_string()
            }
        };
        Err(Arc::new(DatabaseError::InitFailed { attempts, reason }))
    }

    /// Tables that must exist after a successful open
    fn verify_tables(&self, attempt: u32) -> Result<(), SharedError> {
        let info = self.manager.database_info();
        if !info.is_open {
            return Err(Arc::new(DatabaseError::NotOpen));
        }
        if let Some(err) = info.error {
            return Err(Arc::new(DatabaseError::InitFailed {
                attempts: attempt,
                reason: err,
            }));
        }
        debug!("Tables present after open: {}", info.tables.join(", "));

        let missing: Vec<String> = REQUIRED_TABLES
            .iter()
            .filter(|table| !info.tables.iter().any(|t| t == *table))
            .map(|table| table.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Arc::new(DatabaseError::MissingTables(missing)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::ScriptedDriver;
    use std::sync::atomic::AtomicUsize;

    fn coordinator(driver: ScriptedDriver) -> InitCoordinator {
        let manager = ConnectionManager::new(driver).with_retry_policy(RetryPolicy::once());
        InitCoordinator::new(Arc::new(manager))
    }

    #[tokio::test]
    async fn test_fresh_initialize_uses_one_attempt() {
        let coordinator = coordinator(ScriptedDriver::in_memory());
        assert_eq!(coordinator.status(), InitStatus::Idle);
        assert_eq!(coordinator.startup_view(), StartupView::Loading);

        coordinator.initialize().await.unwrap();

        assert!(coordinator.is_initialized());
        assert!(!coordinator.is_initializing());
        assert!(coordinator.last_error().is_none());
        assert_eq!(coordinator.init_attempts(), 1);
        assert_eq!(coordinator.startup_view(), StartupView::Main);
        assert!(coordinator.manager().get_database().is_ok());
    }

    #[tokio::test]
    async fn test_initialize_twice_is_a_no_op() {
        let driver = ScriptedDriver::in_memory();
        let coordinator = coordinator(driver.clone());

        coordinator.initialize().await.unwrap();
        coordinator.initialize().await.unwrap();

        assert_eq!(coordinator.init_attempts(), 1);
        assert_eq!(driver.open_calls(), 1);
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let driver = ScriptedDriver::in_memory();
        driver.fail_next(2);
        let coordinator = coordinator(driver.clone());

        coordinator.initialize().await.unwrap();

        assert!(coordinator.is_initialized());
        assert_eq!(coordinator.init_attempts(), 3);
        assert_eq!(driver.open_calls(), 3);
        // Plain open failures do not justify deleting the file
        assert_eq!(driver.delete_calls(), 0);
    }

    #[tokio::test]
    async fn test_corruption_escalates_to_reset() {
        let driver = ScriptedDriver::in_memory();
        driver.fail_next(1).corrupt();
        let coordinator = coordinator(driver.clone());

        coordinator.initialize().await.unwrap();

        assert_eq!(coordinator.init_attempts(), 2);
        assert_eq!(driver.delete_calls(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_rejects_and_records_error() {
        let driver = ScriptedDriver::in_memory();
        driver.fail_next(10);
        let coordinator = coordinator(driver.clone());

        let err = coordinator.initialize().await.unwrap_err();

        assert!(matches!(
            err.as_ref(),
            DatabaseError::InitFailed { attempts: 3, .. }
        ));
        assert!(!coordinator.is_initialized());
        assert!(!coordinator.is_initializing());
        assert!(Arc::ptr_eq(&coordinator.last_error().unwrap(), &err));
        assert_eq!(coordinator.status(), InitStatus::Failed);
        assert_eq!(coordinator.startup_view(), StartupView::Error);

        // No attempts left: fails without touching the driver
        let calls = driver.open_calls();
        let err = coordinator.initialize().await.unwrap_err();
        assert!(err.to_string().contains("no initialization attempts left"));
        assert_eq!(driver.open_calls(), calls);
    }

    #[tokio::test]
    async fn test_concurrent_initialize_runs_one_sequence() {
        let driver = ScriptedDriver::in_memory();
        let coordinator = coordinator(driver.clone());

        let (a, b, c) = tokio::join!(
            coordinator.initialize(),
            coordinator.initialize(),
            coordinator.initialize()
        );

        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(coordinator.init_attempts(), 1);
        assert_eq!(driver.open_calls(), 1);
    }

    #[tokio::test]
    async fn test_reset_keeps_attempts_force_reset_clears_them() {
        let driver = ScriptedDriver::in_memory();
        driver.fail_next(10);
        let coordinator = coordinator(driver.clone());
        assert!(coordinator.initialize().await.is_err());
        assert_eq!(coordinator.init_attempts(), 3);

        coordinator.reset();
        assert!(coordinator.last_error().is_none());
        assert_eq!(coordinator.init_attempts(), 3);
        assert!(coordinator.initialize().await.is_err());

        coordinator.force_reset();
        assert_eq!(coordinator.init_attempts(), 0);

        driver.fail_next(0);
        coordinator.initialize().await.unwrap();
        assert_eq!(coordinator.init_attempts(), 1);
    }

    #[tokio::test]
    async fn test_listeners_are_notified_and_removable() {
        let coordinator = coordinator(ScriptedDriver::in_memory());
        let calls = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));

        let id = {
            let (calls, errors) = (calls.clone(), errors.clone());
            coordinator.add_listener(move |err| {
                calls.fetch_add(1, Ordering::SeqCst);
                if err.is_some() {
                    errors.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        coordinator.initialize().await.unwrap();
        // Once when the attempt starts, once on success
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(errors.load(Ordering::SeqCst), 0);

        coordinator.notify_listeners(Some(&DatabaseError::NotOpen));
        assert_eq!(errors.load(Ordering::SeqCst), 1);

        assert!(coordinator.remove_listener(id));
        assert!(!coordinator.remove_listener(id));
        coordinator.reset();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_listeners_see_failure() {
        let driver = ScriptedDriver::in_memory();
        driver.fail_next(10);
        let coordinator = coordinator(driver);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            coordinator.add_listener(move |err| {
                seen.lock().unwrap().push(err.map(|e| e.to_string()));
            });
        }

        assert!(coordinator.initialize().await.is_err());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert!(seen[..3].iter().all(Option::is_none));
        assert!(seen[3]
            .as_deref()
            .unwrap()
            .starts_with("database initialization failed after 3 attempts"));
    }

    #[tokio::test]
    async fn test_timed_out_run_finishes_and_releases_manager() {
        let driver = ScriptedDriver::in_memory();
        driver.fail_next(2);
        let manager = Arc::new(ConnectionManager::new(driver.clone()).with_retry_policy(
            RetryPolicy::connection().with_delay(Duration::from_millis(50)),
        ));
        let coordinator = InitCoordinator::with_options(
            manager.clone(),
            InitOptions {
                policy: RetryPolicy::initialization(),
                startup_timeout: Duration::from_millis(20),
            },
        );

        let err = coordinator
            .initialize_with_default_timeout()
            .await
            .unwrap_err();
        assert!(matches!(err.as_ref(), DatabaseError::Timeout(_)));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(driver.open_calls(), 3);
        assert!(coordinator.is_initialized());
        assert!(!coordinator.is_initializing());
        assert!(coordinator.last_error().is_none());
        assert_eq!(coordinator.init_attempts(), 1);

        tokio::time::timeout(Duration::from_secs(2), manager.close())
            .await
            .expect("close waits on the open lock")
            .unwrap();
        assert!(!manager.is_ready());
    }

    #[tokio::test]
    async fn test_reset_during_run_discards_its_outcome() {
        let driver = ScriptedDriver::in_memory();
        driver.fail_next(1);
        let manager = ConnectionManager::new(driver).with_retry_policy(
            RetryPolicy::connection().with_delay(Duration::from_millis(50)),
        );
        let coordinator = InitCoordinator::new(Arc::new(manager));

        let running = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.initialize().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(coordinator.is_initializing());

        coordinator.reset();
        // The run itself succeeds; only its bookkeeping is dropped
        running.await.unwrap().unwrap();

        assert!(!coordinator.is_initialized());
        assert!(!coordinator.is_initializing());
        assert!(coordinator.last_error().is_none());
        assert_eq!(coordinator.status(), InitStatus::Idle);
        assert!(coordinator.manager().is_ready());
    }

    #[tokio::test]
    async fn test_verify_tables_on_closed_manager_reports_not_open() {
        let coordinator = coordinator(ScriptedDriver::in_memory());

        let err = coordinator.inner.verify_tables(2).unwrap_err();
        assert!(matches!(err.as_ref(), DatabaseError::NotOpen));
    }

    #[tokio::test]
    async fn test_timeout_records_error() {
        let driver = ScriptedDriver::in_memory();
        driver.fail_next(10);
        let manager = ConnectionManager::new(driver).with_retry_policy(
            RetryPolicy::connection().with_delay(Duration::from_millis(200)),
        );
        let coordinator = InitCoordinator::with_options(
            Arc::new(manager),
            InitOptions {
                policy: RetryPolicy::initialization(),
                startup_timeout: Duration::from_millis(20),
            },
        );

        let err = coordinator
            .initialize_with_default_timeout()
            .await
            .unwrap_err();

        assert!(matches!(err.as_ref(), DatabaseError::Timeout(_)));
        assert!(matches!(
            coordinator.last_error().as_deref(),
            Some(DatabaseError::Timeout(_))
        ));
        assert_eq!(coordinator.status(), InitStatus::Failed);
    }
}
