//! Driftmap Supervisor
//!
//! Runs the projector's periodic work on dedicated threads and lets an
//! operator steer it.
//!
//! # Overview
//!
//! - [`ControlFlags`]: cooperative stop and pause signals for one loop
//! - [`ControlLoop`]: runs an action at a target frequency, checking its
//!   flags at iteration boundaries and surviving action failures
//! - [`ProcessSupervisor`]: owns named loops and their threads, and toggles
//!   interactive mode, which pauses every loop and later restores each
//!   loop's own pause state
//!
//! # Example
//!
//! ```no_run
//! use driftmap_core::LoopConfig;
//! use driftmap_supervisor::{ProcessSupervisor, UPDATING_LOOP};
//!
//! # fn main() -> driftmap_core::Result<()> {
//! let supervisor = ProcessSupervisor::new();
//! supervisor.register(LoopConfig::new(UPDATING_LOOP, 1.0), || {
//!     // refit the model
//!     Ok(())
//! })?;
//! supervisor.start(UPDATING_LOOP)?;
//!
//! supervisor.set_interactive(true);
//! supervisor.set_interactive(false);
//! supervisor.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod control_loop;
pub mod supervisor;

pub use control_loop::{ControlFlags, ControlLoop, LoopStats};
pub use supervisor::{LoopStatus, ProcessSupervisor, PROJECTING_LOOP, UPDATING_LOOP};
