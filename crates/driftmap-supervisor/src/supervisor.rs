//! Process supervisor
//!
//! Owns a set of named control loops, each on its own thread, and exposes
//! the operator controls: start, stop, pause, resume and interactive mode.
//!
//! Interactive mode pauses every loop while a user works with the plot.
//! Entering it records each loop's own pause state; leaving it restores
//! exactly those states. Pause and resume requests made while interactive
//! update the recorded state and take effect on leaving.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use driftmap_core::{DriftmapError, LoopConfig, Result};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::control_loop::{ControlFlags, ControlLoop, LoopStats};

/// Name of the loop that reads and projects incoming data
pub const PROJECTING_LOOP: &str = "projector_projecting";

/// Name of the loop that refits the projection model
pub const UPDATING_LOOP: &str = "projector_updating";

/// Snapshot of one loop's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopStatus {
    pub name: String,
    pub started: bool,
    pub paused: bool,
    pub stopped: bool,
}

struct LoopEntry {
    flags: Arc<ControlFlags>,
    pending: Option<ControlLoop>,
    handle: Option<JoinHandle<LoopStats>>,
}

#[derive(Default)]
struct SupervisorState {
    loops: BTreeMap<String, LoopEntry>,
    /// Pause state of each loop before interactive mode, while it is on
    retained: Option<BTreeMap<String, bool>>,
}

impl SupervisorState {
    fn entry(&self, name: &str) -> Result<&LoopEntry> {
        self.loops
            .get(name)
            .ok_or_else(|| DriftmapError::NotFound(format!("loop '{}'", name)))
    }

    fn entry_mut(&mut self, name: &str) -> Result<&mut LoopEntry> {
        self.loops
            .get_mut(name)
            .ok_or_else(|| DriftmapError::NotFound(format!("loop '{}'", name)))
    }
}

/// Supervises named control loops
#[derive(Default)]
pub struct ProcessSupervisor {
    state: Mutex<SupervisorState>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a loop without starting it.
    ///
    /// A loop registered during interactive mode starts out paused and is
    /// released when interactive mode ends.
    pub fn register<F>(&self, config: LoopConfig, action: F) -> Result<Arc<ControlFlags>>
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.loops.contains_key(&config.name) {
            return Err(DriftmapError::InvalidState(format!(
                "loop '{}' is already registered",
                config.name
            )));
        }

        let flags = Arc::new(ControlFlags::new());
        let name = config.name.clone();
        let control = ControlLoop::new(config, flags.clone(), action)?;

        if let Some(retained) = state.retained.as_mut() {
            retained.insert(name.clone(), false);
            flags.pause();
        }

        debug!(loop_name = %name, "Registered control loop");
        state.loops.insert(
            name,
            LoopEntry {
                flags: flags.clone(),
                pending: Some(control),
                handle: None,
            },
        );
        Ok(flags)
    }

    /// Spawn the thread of a registered loop.
    pub fn start(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state.entry_mut(name)?;
        let control = entry.pending.take().ok_or_else(|| {
            DriftmapError::InvalidState(format!("loop '{}' has already been started", name))
        })?;

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || control.run())?;
        entry.handle = Some(handle);

        info!(loop_name = %name, "Started control loop");
        Ok(())
    }

    /// Start every registered loop that has not been started yet.
    pub fn start_all(&self) -> Result<()> {
        let pending: Vec<String> = {
            let state = self.state.lock();
            state
                .loops
                .iter()
                .filter(|(_, entry)| entry.pending.is_some())
                .map(|(name, _)| name.clone())
                .collect()
        };
        for name in pending {
            self.start(&name)?;
        }
        Ok(())
    }

    /// Signal a loop to exit after its current iteration.
    pub fn stop(&self, name: &str) -> Result<()> {
        let state = self.state.lock();
        state.entry(name)?.flags.stop();
        info!(loop_name = %name, "Stop requested");
        Ok(())
    }

    pub fn pause(&self, name: &str) -> Result<()> {
        self.set_paused(name, true)
    }

    pub fn resume(&self, name: &str) -> Result<()> {
        self.set_paused(name, false)
    }

    fn set_paused(&self, name: &str, paused: bool) -> Result<()> {
        let mut state = self.state.lock();
        let flags = state.entry(name)?.flags.clone();

        match state.retained.as_mut() {
            Some(retained) => {
                retained.insert(name.to_string(), paused);
                debug!(loop_name = %name, paused, "Recorded pause state for after interactive mode");
            }
            None => {
                flags.set_paused(paused);
                info!(loop_name = %name, paused, "Pause state changed");
            }
        }
        Ok(())
    }

    /// Whether a loop is currently held paused.
    pub fn is_paused(&self, name: &str) -> Result<bool> {
        let state = self.state.lock();
        Ok(state.entry(name)?.flags.is_paused())
    }

    /// Whether a loop's thread is alive.
    pub fn is_running(&self, name: &str) -> Result<bool> {
        let state = self.state.lock();
        let entry = state.entry(name)?;
        Ok(entry
            .handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false))
    }

    /// Enter or leave interactive mode. Repeating the current mode is a no-op.
    pub fn set_interactive(&self, interactive: bool) {
        let mut state = self.state.lock();
        match (interactive, state.retained.is_some()) {
            (true, false) => {
                let retained: BTreeMap<String, bool> = state
                    .loops
                    .iter()
                    .map(|(name, entry)| (name.clone(), entry.flags.is_paused()))
                    .collect();
                for entry in state.loops.values() {
                    entry.flags.pause();
                }
                state.retained = Some(retained);
                info!(loops = state.loops.len(), "Entered interactive mode");
            }
            (false, true) => {
                let retained = state.retained.take().unwrap_or_default();
                for (name, entry) in &state.loops {
                    let paused = retained.get(name).copied().unwrap_or(false);
                    entry.flags.set_paused(paused);
                }
                info!("Left interactive mode");
            }
            _ => debug!(interactive, "Interactive mode unchanged"),
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.state.lock().retained.is_some()
    }

    pub fn loop_names(&self) -> Vec<String> {
        self.state.lock().loops.keys().cloned().collect()
    }

    pub fn status(&self) -> Vec<LoopStatus> {
        let state = self.state.lock();
        state
            .loops
            .iter()
            .map(|(name, entry)| LoopStatus {
                name: name.clone(),
                started: entry.pending.is_none(),
                paused: entry.flags.is_paused(),
                stopped: entry.flags.is_stopped(),
            })
            .collect()
    }

    /// Stop every loop and wait for their threads to exit.
    pub fn shutdown(&self) -> Vec<(String, LoopStats)> {
        let handles: Vec<(String, JoinHandle<LoopStats>)> = {
            let mut state = self.state.lock();
            state
                .loops
                .iter_mut()
                .filter_map(|(name, entry)| {
                    entry.flags.stop();
                    entry.handle.take().map(|handle| (name.clone(), handle))
                })
                .collect()
        };

        let mut stats = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            match handle.join() {
                Ok(loop_stats) => stats.push((name, loop_stats)),
                Err(_) => error!(loop_name = %name, "Loop thread panicked outside its action"),
            }
        }
        if !stats.is_empty() {
            info!(loops = stats.len(), "Supervisor shut down");
        }
        stats
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        let running = self
            .state
            .get_mut()
            .loops
            .values()
            .filter(|entry| entry.handle.is_some())
            .count();
        if running > 0 {
            warn!(loops = running, "Supervisor dropped with running loops, shutting down");
            self.shutdown();
        }
    }
}
