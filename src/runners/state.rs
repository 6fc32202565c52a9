//! Runner lifecycle state and run control

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::task::AbortHandle;

use crate::error::EngineError;

/// Lifecycle state of a runner
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunnerState {
    Unloaded,
    Loaded,
    Running,
}

/// Shared between a runner and its execution worker: marks the run in
/// progress, carries the stop request and the handle used to abort the
/// worker on a forced stop.
#[derive(Debug, Default)]
pub struct RunControl {
    running: AtomicBool,
    stop_requested: AtomicBool,
    force_requested: AtomicBool,
    abort: Mutex<Option<AbortHandle>>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a run as started; fails if one is already in progress
    pub fn begin(&self) -> Result<(), EngineError> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| EngineError::RunInProgress)?;
        self.stop_requested.store(false, Ordering::Release);
        self.force_requested.store(false, Ordering::Release);
        Ok(())
    }

    /// Attach the worker's abort handle. A forced stop that arrived before
    /// the handle existed is applied immediately.
    pub fn attach(&self, handle: AbortHandle) {
        let mut slot = self.abort.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // checked under the lock `request_stop` takes after setting the flag
        if self.force_requested.load(Ordering::Acquire) {
            handle.abort();
        }
        *slot = Some(handle);
    }

    pub fn end(&self) {
        if let Ok(mut slot) = self.abort.lock() {
            *slot = None;
        }
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Request a stop. Returns false when no run is in progress.
    pub fn request_stop(&self, force: bool) -> bool {
        if !self.is_running() {
            return false;
        }
        self.stop_requested.store(true, Ordering::Release);
        if force {
            self.force_requested.store(true, Ordering::Release);
            let slot = self.abort.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(handle) = slot.as_ref() {
                handle.abort();
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_rejects_second_run() {
        let control = RunControl::new();
        control.begin().unwrap();
        assert!(matches!(control.begin(), Err(EngineError::RunInProgress)));
        control.end();
        assert!(control.begin().is_ok());
    }

    #[test]
    fn test_stop_is_noop_when_idle() {
        let control = RunControl::new();
        assert!(!control.request_stop(false));
        assert!(!control.stop_requested());
    }

    #[tokio::test]
    async fn test_forced_stop_aborts_worker() {
        let control = RunControl::new();
        control.begin().unwrap();

        let handle = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        });
        control.attach(handle.abort_handle());

        assert!(control.request_stop(true));
        assert!(handle.await.unwrap_err().is_cancelled());
        control.end();
        assert!(!control.is_running());
    }

    #[tokio::test]
    async fn test_forced_stop_before_attach_aborts_worker() {
        let control = RunControl::new();
        control.begin().unwrap();
        assert!(control.request_stop(true));

        let handle = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        });
        control.attach(handle.abort_handle());
        assert!(handle.await.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_forced_stop_racing_attach_always_aborts() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        for _ in 0..200 {
            let control = std::sync::Arc::new(RunControl::new());
            control.begin().unwrap();
            let handle = runtime.spawn(async {
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            });

            let stopper = control.clone();
            let stop = std::thread::spawn(move || stopper.request_stop(true));
            control.attach(handle.abort_handle());
            assert!(stop.join().unwrap());

            let outcome = runtime.block_on(handle);
            assert!(outcome.unwrap_err().is_cancelled());
        }
    }
}
