//! Periodic control loop
//!
//! A loop runs one action at a target frequency on the calling thread.
//! Control is cooperative: the stop and pause flags are checked at
//! iteration boundaries and never interrupt a running action.
//!
//! Key features:
//! - Start-to-start pacing: the action runs once the period has elapsed
//!   since the previous execution began
//! - Pause blocks the loop until resume or stop
//! - Stop wakes a sleeping or paused loop immediately
//! - A failing or panicking action is logged and the loop keeps running

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use driftmap_core::{observe, DriftmapError, LoopConfig, Result};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

/// Stop and pause signals shared between a loop and its controller
#[derive(Debug, Default)]
pub struct ControlFlags {
    stop: AtomicBool,
    paused: Mutex<bool>,
    signal: Condvar,
}

impl ControlFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the loop to exit after its current iteration.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        // Taking the lock orders the store before any waiter's re-check.
        let _paused = self.paused.lock();
        self.signal.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        self.set_paused(true);
    }

    pub fn resume(&self) {
        self.set_paused(false);
    }

    pub fn set_paused(&self, paused: bool) {
        let mut state = self.paused.lock();
        *state = paused;
        self.signal.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock()
    }

    /// Block while paused. Returns `false` if the loop should exit.
    pub fn wait_while_paused(&self) -> bool {
        let mut paused = self.paused.lock();
        while *paused && !self.is_stopped() {
            self.signal.wait(&mut paused);
        }
        !self.is_stopped()
    }

    /// Sleep for up to `timeout`, waking early on stop or a pause change.
    /// Returns `false` if the loop should exit.
    pub fn sleep(&self, timeout: Duration) -> bool {
        let mut paused = self.paused.lock();
        if self.is_stopped() {
            return false;
        }
        self.signal.wait_for(&mut paused, timeout);
        !self.is_stopped()
    }
}

/// Counters returned when a loop exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub iterations: u64,
    pub errors: u64,
}

type LoopAction = Box<dyn FnMut() -> Result<()> + Send>;

/// Runs an action periodically until stopped
pub struct ControlLoop {
    config: LoopConfig,
    flags: Arc<ControlFlags>,
    action: LoopAction,
}

impl std::fmt::Debug for ControlLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlLoop")
            .field("config", &self.config)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl ControlLoop {
    pub fn new<F>(config: LoopConfig, flags: Arc<ControlFlags>, action: F) -> Result<Self>
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        config.validate()?;
        Ok(Self {
            config,
            flags,
            action: Box::new(action),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn flags(&self) -> &Arc<ControlFlags> {
        &self.flags
    }

    /// Run until the stop flag is set.
    pub fn run(mut self) -> LoopStats {
        let period = self.config.period();
        let mut stats = LoopStats::default();
        let mut last: Option<Instant> = None;

        info!(
            loop_name = %self.config.name,
            frequency_hz = self.config.frequency_hz,
            "Control loop starting"
        );

        while !self.flags.is_stopped() {
            if let Some(started) = last {
                let elapsed = started.elapsed();
                if elapsed < period {
                    if !self.flags.sleep(period - elapsed) {
                        break;
                    }
                    continue;
                }
            }

            if !self.flags.wait_while_paused() {
                break;
            }

            last = Some(Instant::now());
            stats.iterations += 1;
            if let Err(e) = self.run_once() {
                stats.errors += 1;
                observe::record_loop_error(&self.config.name);
                error!(loop_name = %self.config.name, error = %e, "Loop iteration failed");
            }
        }

        info!(
            loop_name = %self.config.name,
            iterations = stats.iterations,
            errors = stats.errors,
            "Control loop stopped"
        );
        stats
    }

    /// Execute the action once, converting a panic into an error.
    ///
    /// Lock guards held by the action are released during unwinding, so a
    /// panic never leaves shared state locked.
    pub fn run_once(&mut self) -> Result<()> {
        let action = &mut self.action;
        match catch_unwind(AssertUnwindSafe(|| action())) {
            Ok(result) => result,
            Err(payload) => {
                debug!(loop_name = %self.config.name, "Recovered from action panic");
                Err(DriftmapError::LoopPanicked {
                    name: self.config.name.clone(),
                    message: panic_message(payload.as_ref()),
                })
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn counting_loop(hz: f64) -> (ControlLoop, Arc<ControlFlags>, Arc<AtomicUsize>) {
        let flags = Arc::new(ControlFlags::new());
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let control = ControlLoop::new(LoopConfig::new("test", hz), flags.clone(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        (control, flags, count)
    }

    #[test]
    fn test_rejects_invalid_frequency() {
        let result = ControlLoop::new(
            LoopConfig::new("bad", 0.0),
            Arc::new(ControlFlags::new()),
            || Ok(()),
        );
        assert!(matches!(result, Err(DriftmapError::Config(_))));
    }

    #[test]
    fn test_stop_before_run_executes_nothing() {
        let (control, flags, count) = counting_loop(100.0);
        flags.stop();
        let stats = control.run();
        assert_eq!(stats.iterations, 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_runs_until_stopped() {
        let (control, flags, count) = counting_loop(200.0);
        let handle = thread::spawn(move || control.run());

        thread::sleep(Duration::from_millis(100));
        flags.stop();
        let stats = handle.join().unwrap();

        assert!(stats.iterations > 0);
        assert_eq!(stats.iterations as usize, count.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stop_wakes_long_sleep() {
        let (control, flags, _count) = counting_loop(0.01);
        let handle = thread::spawn(move || control.run());

        thread::sleep(Duration::from_millis(50));
        let stopped_at = Instant::now();
        flags.stop();
        let stats = handle.join().unwrap();

        assert_eq!(stats.iterations, 1);
        assert!(stopped_at.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_stop_while_paused_exits_without_running() {
        let (control, flags, count) = counting_loop(100.0);
        flags.pause();
        let handle = thread::spawn(move || control.run());

        thread::sleep(Duration::from_millis(50));
        flags.stop();
        let stats = handle.join().unwrap();

        assert_eq!(stats.iterations, 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_error_is_counted_and_loop_continues() {
        let flags = Arc::new(ControlFlags::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let control = ControlLoop::new(LoopConfig::new("failing", 500.0), flags.clone(), move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(DriftmapError::Projection("first call fails".into()));
            }
            Ok(())
        })
        .unwrap();

        let handle = thread::spawn(move || control.run());
        while calls.load(Ordering::SeqCst) < 3 {
            thread::sleep(Duration::from_millis(5));
        }
        flags.stop();
        let stats = handle.join().unwrap();

        assert_eq!(stats.errors, 1);
        assert!(stats.iterations >= 3);
    }

    #[test]
    fn test_panic_becomes_error() {
        let mut control = ControlLoop::new(
            LoopConfig::new("panicky", 1.0),
            Arc::new(ControlFlags::new()),
            || panic!("boom"),
        )
        .unwrap();

        match control.run_once() {
            Err(DriftmapError::LoopPanicked { name, message }) => {
                assert_eq!(name, "panicky");
                assert_eq!(message, "boom");
            }
            other => panic!("expected LoopPanicked, got {:?}", other),
        }
    }

    #[test]
    fn test_panic_releases_held_lock() {
        let shared = Arc::new(Mutex::new(0u32));
        let inner = shared.clone();
        let mut control = ControlLoop::new(
            LoopConfig::new("locking", 1.0),
            Arc::new(ControlFlags::new()),
            move || {
                let mut guard = inner.lock();
                *guard += 1;
                panic!("while holding the lock");
            },
        )
        .unwrap();

        assert!(control.run_once().is_err());
        assert_eq!(*shared.try_lock().expect("lock released"), 1);
    }

    #[test]
    fn test_sleep_returns_false_once_stopped() {
        let flags = ControlFlags::new();
        assert!(flags.sleep(Duration::from_millis(1)));
        flags.stop();
        assert!(!flags.sleep(Duration::from_secs(10)));
        assert!(!flags.wait_while_paused());
    }
}
