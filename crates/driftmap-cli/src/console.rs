//! Operator console
//!
//! One command per stdin line. Commands act on the supervisor's loops and
//! on the projector directly.

use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use driftmap_core::{PlotSink, ProjectionModel, SampleId};
use driftmap_projector::Projector;
use driftmap_supervisor::{ProcessSupervisor, PROJECTING_LOOP, UPDATING_LOOP};
use tracing::info;

/// A parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start,
    Stop,
    Pause(String),
    Resume(String),
    Interactive(bool),
    Activate,
    Label { id: SampleId, label: String },
    Status,
    Help,
    Exit,
}

impl FromStr for ConsoleCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default().to_lowercase();
        let args: Vec<&str> = words.collect();

        let parsed = match (command.as_str(), args.as_slice()) {
            ("start", []) => ConsoleCommand::Start,
            ("stop", []) => ConsoleCommand::Stop,
            ("pause", [name]) => ConsoleCommand::Pause(loop_name(name)),
            ("resume", [name]) => ConsoleCommand::Resume(loop_name(name)),
            ("interactive", [mode]) => match mode.to_lowercase().as_str() {
                "on" => ConsoleCommand::Interactive(true),
                "off" => ConsoleCommand::Interactive(false),
                other => bail!("interactive expects 'on' or 'off', got '{}'", other),
            },
            ("activate", []) => ConsoleCommand::Activate,
            ("label", [id, label]) => ConsoleCommand::Label {
                id: id
                    .parse()
                    .with_context(|| format!("'{}' is not a sample id", id))?,
                label: label.to_string(),
            },
            ("status", []) => ConsoleCommand::Status,
            ("help", []) => ConsoleCommand::Help,
            ("exit" | "quit", []) => ConsoleCommand::Exit,
            ("", _) => bail!("empty command"),
            (other, _) => bail!("unknown command or arguments: '{}' (try 'help')", other),
        };
        Ok(parsed)
    }
}

/// Expand the short loop names.
fn loop_name(name: &str) -> String {
    match name {
        "projecting" => PROJECTING_LOOP.to_string(),
        "updating" => UPDATING_LOOP.to_string(),
        other => other.to_string(),
    }
}

const HELP: &str = "\
commands:
  start                    start or resume both loops
  stop                     stop both loops
  pause <loop>             pause 'projecting' or 'updating'
  resume <loop>            resume a paused loop
  interactive on|off       freeze every loop while inspecting the plot
  activate                 serve the most recently trained model
  label <id> <name>        relabel a sample
  status                   show loop and dataset state
  exit                     quit";

/// Whether the console should keep reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Console<M: ProjectionModel, P: PlotSink> {
    supervisor: Arc<ProcessSupervisor>,
    projector: Arc<Projector<M, P>>,
}

impl<M: ProjectionModel, P: PlotSink> Clone for Console<M, P> {
    fn clone(&self) -> Self {
        Self {
            supervisor: self.supervisor.clone(),
            projector: self.projector.clone(),
        }
    }
}

impl<M: ProjectionModel, P: PlotSink + 'static> Console<M, P> {
    /// Run one line on the blocking pool.
    ///
    /// `activate` re-embeds the whole history and `stop` joins loop
    /// threads, so neither may run on a runtime worker.
    pub async fn dispatch(&self, line: String) -> Result<(Flow, String)> {
        let console = self.clone();
        tokio::task::spawn_blocking(move || console.handle_line(&line))
            .await
            .context("Console command task failed")?
    }
}

impl<M: ProjectionModel, P: PlotSink> Console<M, P> {
    pub fn new(supervisor: Arc<ProcessSupervisor>, projector: Arc<Projector<M, P>>) -> Self {
        Self {
            supervisor,
            projector,
        }
    }

    /// Parse and run one line, returning the text to show the operator.
    pub fn handle_line(&self, line: &str) -> Result<(Flow, String)> {
        let command: ConsoleCommand = line.parse()?;
        self.execute(command)
    }

    pub fn execute(&self, command: ConsoleCommand) -> Result<(Flow, String)> {
        info!(?command, "Console command");
        let reply = match command {
            ConsoleCommand::Start => {
                self.supervisor.start_all()?;
                for name in self.supervisor.loop_names() {
                    self.supervisor.resume(&name)?;
                }
                "Projector started".to_string()
            }
            ConsoleCommand::Stop => {
                for name in self.supervisor.loop_names() {
                    self.supervisor.stop(&name)?;
                }
                "Projector stopped".to_string()
            }
            ConsoleCommand::Pause(name) => {
                self.supervisor.pause(&name)?;
                format!("Paused {}", name)
            }
            ConsoleCommand::Resume(name) => {
                self.supervisor.resume(&name)?;
                format!("Resumed {}", name)
            }
            ConsoleCommand::Interactive(on) => {
                self.supervisor.set_interactive(on);
                format!("Interactive mode {}", if on { "on" } else { "off" })
            }
            ConsoleCommand::Activate => {
                self.projector.activate_latest()?;
                format!(
                    "Serving the model from refit {}",
                    self.projector.promoted_update()
                )
            }
            ConsoleCommand::Label { id, label } => {
                self.projector.update_label(id, &label)?;
                format!("Sample {} labeled '{}'", id, label)
            }
            ConsoleCommand::Status => self.status(),
            ConsoleCommand::Help => HELP.to_string(),
            ConsoleCommand::Exit => return Ok((Flow::Exit, "Exiting".to_string())),
        };
        Ok((Flow::Continue, reply))
    }

    fn status(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Projector {}", self.projector.id());
        for status in self.supervisor.status() {
            let state = if status.stopped {
                "stopped"
            } else if !status.started {
                "not started"
            } else if status.paused {
                "paused"
            } else {
                "running"
            };
            let _ = writeln!(out, "  {:<22} {}", status.name, state);
        }
        if self.supervisor.is_interactive() {
            let _ = writeln!(out, "  interactive mode on");
        }
        let _ = writeln!(
            out,
            "  refits: {} (serving refit {})",
            self.projector.update_count(),
            self.projector.promoted_update()
        );
        let _ = write!(
            out,
            "  samples: {} historic, {} staged, {} embedded",
            self.projector.history_len(),
            self.projector.staged_len(),
            self.projector.cache_len()
        );
        out
    }
}
