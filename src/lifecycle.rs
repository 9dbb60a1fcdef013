//! Start/stop control for the gateway worker.
//!
//! The supervisor side is synchronous: [`LifecycleBridge::start`] spawns a
//! dedicated thread running a single-threaded tokio runtime, and
//! [`LifecycleBridge::stop`] blocks for at most the given grace period. The only
//! things shared with the worker are the lifecycle state and a set-once
//! [`StopSignal`].
//!
//! ```text
//! Stopped -start()-> Starting -ready-> Running -stop()-> StopRequested
//!     ^                                                      |
//!     +------------- worker exits <-- Stopping <- observed --+
//! ```

use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::error::ArchivistError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    StopRequested,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `stop()` called by the host supervisor.
    Supervisor,
    /// An operator sent the shutdown command in chat.
    OperatorCommand { operator_id: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The worker reached `Stopped` within the grace period.
    Stopped,
    /// The grace period elapsed; the worker was abandoned.
    TimedOut,
    /// Nothing to stop in this state (`Stopped` or `Starting`).
    NotRunning(LifecycleState),
}

#[derive(Default)]
struct StopInner {
    reason: OnceLock<StopReason>,
    notify: Notify,
}

/// Monotonic stop flag: set once, read many times, never cleared.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only for the call that actually set the signal.
    pub fn request(&self, reason: StopReason) -> bool {
        let first = self.inner.reason.set(reason).is_ok();
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    pub fn is_requested(&self) -> bool {
        self.inner.reason.get().is_some()
    }

    pub fn reason(&self) -> Option<StopReason> {
        self.inner.reason.get().copied()
    }

    pub async fn wait(&self) -> StopReason {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(reason) = self.reason() {
                return reason;
            }
            notified.await;
        }
    }
}

struct Inner {
    state: LifecycleState,
    stop: StopSignal,
}

struct Shared {
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        let mut inner = self.lock();
        if inner.state != from {
            return false;
        }
        inner.state = to;
        self.changed.notify_all();
        true
    }

    /// Moves `Running` to `StopRequested` and sets the signal. Returns the prior state.
    fn request_stop(&self, reason: StopReason) -> LifecycleState {
        let mut inner = self.lock();
        let previous = inner.state;
        if previous == LifecycleState::Running {
            inner.state = LifecycleState::StopRequested;
            inner.stop.request(reason);
            self.changed.notify_all();
        }
        previous
    }

    fn mark_stopped(&self) {
        let mut inner = self.lock();
        inner.state = LifecycleState::Stopped;
        self.changed.notify_all();
    }

    fn wait_stopped(&self, timeout: Option<Duration>) -> bool {
        let guard = self.lock();
        let not_stopped = |inner: &mut Inner| inner.state != LifecycleState::Stopped;
        match timeout {
            None => {
                let guard = match self.changed.wait_while(guard, not_stopped) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                guard.state == LifecycleState::Stopped
            }
            Some(timeout) => {
                let (guard, _) = match self.changed.wait_timeout_while(guard, timeout, not_stopped)
                {
                    Ok(result) => result,
                    Err(poisoned) => poisoned.into_inner(),
                };
                guard.state == LifecycleState::Stopped
            }
        }
    }
}

/// The worker's view of the lifecycle for one run.
#[derive(Clone)]
pub struct LifecycleHandle {
    shared: Arc<Shared>,
    stop: StopSignal,
}

impl LifecycleHandle {
    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Gateway session is up.
    pub fn mark_running(&self) {
        if self
            .shared
            .transition(LifecycleState::Starting, LifecycleState::Running)
        {
            info!("Worker running");
        }
    }

    pub fn request_stop(&self, reason: StopReason) -> LifecycleState {
        self.shared.request_stop(reason)
    }

    /// Worker has seen the stop signal and is closing the connection.
    pub fn mark_stopping(&self) {
        self.shared
            .transition(LifecycleState::StopRequested, LifecycleState::Stopping);
    }
}

/// Runs one worker session inside the execution context created by `start()`.
#[async_trait]
pub trait WorkerLauncher: Send + Sync + 'static {
    async fn run(&self, handle: LifecycleHandle);
}

pub struct LifecycleBridge {
    shared: Arc<Shared>,
    launcher: Arc<dyn WorkerLauncher>,
}

struct MarkStoppedOnExit(Arc<Shared>);

impl Drop for MarkStoppedOnExit {
    fn drop(&mut self) {
        self.0.mark_stopped();
    }
}

fn run_worker_thread(launcher: Arc<dyn WorkerLauncher>, handle: LifecycleHandle) {
    let _stopped = MarkStoppedOnExit(handle.shared.clone());
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to build worker runtime: {e}");
            return;
        }
    };
    runtime.block_on(launcher.run(handle));
    // Leftover client tasks are abandoned with the runtime.
    runtime.shutdown_background();
    info!("Worker stopped");
}

impl LifecycleBridge {
    pub fn new(launcher: Arc<dyn WorkerLauncher>) -> Self {
        LifecycleBridge {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: LifecycleState::Stopped,
                    stop: StopSignal::new(),
                }),
                changed: Condvar::new(),
            }),
            launcher,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.shared.lock().state
    }

    /// Spawn a fresh worker with a fresh stop signal. Only valid from `Stopped`.
    pub fn start(&self) -> Result<(), ArchivistError> {
        let mut inner = self.shared.lock();
        if inner.state != LifecycleState::Stopped {
            return Err(ArchivistError::Lifecycle(format!(
                "cannot start worker while {:?}",
                inner.state
            )));
        }

        let stop = StopSignal::new();
        let handle = LifecycleHandle {
            shared: self.shared.clone(),
            stop: stop.clone(),
        };
        let launcher = self.launcher.clone();
        std::thread::Builder::new()
            .name("archivist-worker".into())
            .spawn(move || run_worker_thread(launcher, handle))
            .map_err(|e| ArchivistError::Lifecycle(format!("failed to spawn worker thread: {e}")))?;

        inner.state = LifecycleState::Starting;
        inner.stop = stop;
        self.shared.changed.notify_all();
        info!("Worker starting");
        Ok(())
    }

    /// Set the stop signal without waiting.
    pub fn request_stop(&self) -> LifecycleState {
        self.shared.request_stop(StopReason::Supervisor)
    }

    /// Request a graceful stop and wait up to `grace` for the worker to exit.
    pub fn stop(&self, grace: Duration) -> StopOutcome {
        let previous = self.request_stop();
        match previous {
            LifecycleState::Stopped => return StopOutcome::NotRunning(previous),
            LifecycleState::Starting => {
                warn!("Stop ignored: worker is still connecting");
                return StopOutcome::NotRunning(previous);
            }
            _ => info!("Service stop requested"),
        }

        if self.shared.wait_stopped(Some(grace)) {
            StopOutcome::Stopped
        } else {
            warn!(
                "Worker did not stop within {}s; abandoning it",
                grace.as_secs_f32()
            );
            StopOutcome::TimedOut
        }
    }

    /// Block until the worker has exited.
    pub fn wait_stopped(&self) {
        self.shared.wait_stopped(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    /// Becomes ready immediately, then waits for the stop signal and lingers
    /// for `exit_delay` before returning.
    struct SleepyLauncher {
        exit_delay: Duration,
        ready: bool,
    }

    #[async_trait]
    impl WorkerLauncher for SleepyLauncher {
        async fn run(&self, handle: LifecycleHandle) {
            if self.ready {
                handle.mark_running();
            }
            handle.stop_signal().wait().await;
            handle.mark_stopping();
            tokio::time::sleep(self.exit_delay).await;
        }
    }

    fn bridge(exit_delay: Duration, ready: bool) -> LifecycleBridge {
        LifecycleBridge::new(Arc::new(SleepyLauncher { exit_delay, ready }))
    }

    fn wait_for_state(bridge: &LifecycleBridge, state: LifecycleState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while bridge.state() != state {
            assert!(Instant::now() < deadline, "never reached {state:?}");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_start_then_stop_reaches_stopped() {
        let bridge = bridge(Duration::ZERO, true);
        assert_eq!(bridge.state(), LifecycleState::Stopped);
        bridge.start().unwrap();
        wait_for_state(&bridge, LifecycleState::Running);
        assert_eq!(bridge.stop(Duration::from_secs(5)), StopOutcome::Stopped);
        assert_eq!(bridge.state(), LifecycleState::Stopped);
    }

    #[test]
    fn test_start_rejected_unless_stopped() {
        let bridge = bridge(Duration::ZERO, true);
        bridge.start().unwrap();
        let err = bridge.start().unwrap_err();
        assert!(err.to_string().contains("cannot start worker"));
        wait_for_state(&bridge, LifecycleState::Running);
        bridge.stop(Duration::from_secs(5));
    }

    #[test]
    fn test_stop_when_stopped_is_noop() {
        let bridge = bridge(Duration::ZERO, true);
        assert_eq!(
            bridge.stop(Duration::from_secs(1)),
            StopOutcome::NotRunning(LifecycleState::Stopped)
        );
    }

    #[test]
    fn test_stop_while_starting_is_noop() {
        let bridge = bridge(Duration::ZERO, false);
        bridge.start().unwrap();
        assert_eq!(
            bridge.stop(Duration::from_millis(50)),
            StopOutcome::NotRunning(LifecycleState::Starting)
        );
        assert_eq!(bridge.state(), LifecycleState::Starting);
    }

    #[test]
    fn test_stop_is_bounded_by_grace() {
        let bridge = bridge(Duration::from_secs(30), true);
        bridge.start().unwrap();
        wait_for_state(&bridge, LifecycleState::Running);

        let started = Instant::now();
        let outcome = bridge.stop(Duration::from_millis(200));
        let elapsed = started.elapsed();

        assert_eq!(outcome, StopOutcome::TimedOut);
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_secs(5), "stop took {elapsed:?}");
        assert_eq!(bridge.state(), LifecycleState::Stopping);
        assert!(bridge.start().is_err());
    }

    #[test]
    fn test_restart_after_clean_stop() {
        let bridge = bridge(Duration::ZERO, true);
        bridge.start().unwrap();
        wait_for_state(&bridge, LifecycleState::Running);
        bridge.stop(Duration::from_secs(5));
        bridge.start().unwrap();
        wait_for_state(&bridge, LifecycleState::Running);
        assert_eq!(bridge.stop(Duration::from_secs(5)), StopOutcome::Stopped);
    }

    #[test]
    fn test_stop_signal_is_set_once() {
        let signal = StopSignal::new();
        assert!(!signal.is_requested());
        assert!(signal.request(StopReason::OperatorCommand { operator_id: 7 }));
        assert!(!signal.request(StopReason::Supervisor));
        assert_eq!(
            signal.reason(),
            Some(StopReason::OperatorCommand { operator_id: 7 })
        );
    }

    #[tokio::test]
    async fn test_stop_signal_wakes_waiter() {
        let signal = StopSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };
        tokio::task::yield_now().await;
        signal.request(StopReason::Supervisor);
        assert_eq!(waiter.await.unwrap(), StopReason::Supervisor);
    }

    #[test]
    fn test_panicking_worker_still_reaches_stopped() {
        struct PanicLauncher;

        #[async_trait]
        impl WorkerLauncher for PanicLauncher {
            async fn run(&self, _handle: LifecycleHandle) {
                panic!("worker blew up");
            }
        }

        let bridge = LifecycleBridge::new(Arc::new(PanicLauncher));
        bridge.start().unwrap();
        bridge.wait_stopped();
        assert_eq!(bridge.state(), LifecycleState::Stopped);
    }
}
