//! Interactive console.
//!
//! Reads commands line by line, applies them to the [`Supervisor`] and
//! prints the outcome. Replica output is printed by a separate task draining
//! the supervisor's live log sink, so a slow terminal never blocks command
//! handling.

mod command;

pub use command::Command;

use std::io::{BufRead, Write};

use colored::Colorize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::constants;
use crate::supervisor::{LogRecord, ReplicaInfo, StreamKind, Supervisor};

/// Help box shown by `help`.
pub fn help_text() -> &'static str {
    "\
┌─────────────────────────────────────────────────┐
│                Available Commands               │
├─────────────────────────────────────────────────┤
│  help              Show this help message       │
│  list              List all running replicas    │
│  isolate <name>    Show logs from one replica   │
│  showall           Show logs from all replicas  │
│  kill <name>       Stop a specific replica      │
│  quit              Shutdown and exit            │
└─────────────────────────────────────────────────┘"
}

/// Render the replica list shown by `list`.
pub fn format_replica_list(replicas: &[ReplicaInfo]) -> String {
    if replicas.is_empty() {
        return "No replicas running.".to_string();
    }

    let mut sorted: Vec<&ReplicaInfo> = replicas.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut out = format!("Running replicas ({}):", sorted.len());
    for replica in sorted {
        out.push_str(&format!("\n  • {} (port {})", replica.name, replica.port));
    }
    out
}

/// Result of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing to print.
    Silent,
    /// Plain output.
    Info(String),
    /// The command took effect.
    Success(String),
    /// The command failed; nothing changed.
    Failure(String),
    /// The filter now isolates a replica; its retained history follows.
    Isolated {
        replica: String,
        history: Vec<LogRecord>,
    },
    /// Shut everything down.
    Quit,
}

impl Outcome {
    /// Text to print for this outcome, if any.
    pub fn render(&self) -> Option<String> {
        match self {
            Self::Silent => None,
            Self::Info(text) => Some(text.clone()),
            Self::Success(text) => Some(format!("✓ {text}").green().bold().to_string()),
            Self::Failure(text) => Some(format!("✗ {text}").red().bold().to_string()),
            Self::Isolated { replica, history } => {
                let mut out = format!("✓ Now showing logs only from: {replica}")
                    .green()
                    .bold()
                    .to_string();
                for record in history {
                    out.push('\n');
                    out.push_str(&record.to_string());
                }
                Some(out)
            },
            Self::Quit => Some("Shutting down...".to_string()),
        }
    }
}

/// Apply one parsed command.
///
/// `Quit` is only reported here; the caller owns the shutdown.
pub fn dispatch(supervisor: &Supervisor, command: Command) -> Outcome {
    match command {
        Command::Empty => Outcome::Silent,
        Command::Help => Outcome::Info(help_text().to_string()),
        Command::List => Outcome::Info(format_replica_list(&supervisor.replicas())),
        Command::Isolate(name) => {
            if !supervisor.contains(&name) {
                return Outcome::Failure(format!("Replica '{name}' not found"));
            }
            supervisor.set_isolated_replica(&name);
            let history = supervisor.log_stream().records_for(&name);
            Outcome::Isolated {
                replica: name,
                history,
            }
        },
        Command::ShowAll => {
            supervisor.set_isolated_replica("");
            Outcome::Success("Now showing logs from all replicas".to_string())
        },
        Command::Kill(name) => match supervisor.stop_replica(&name) {
            Ok(()) => Outcome::Success(format!("Stopped replica: {name}")),
            Err(e) => Outcome::Failure(e.to_string()),
        },
        Command::Quit => Outcome::Quit,
    }
}

/// Parse and apply one line of input.
pub fn handle_line(supervisor: &Supervisor, line: &str) -> Outcome {
    match Command::parse(line) {
        Ok(command) => dispatch(supervisor, command),
        Err(e) => Outcome::Failure(e.to_string()),
    }
}

/// Forward stdin lines into a channel from a dedicated thread.
///
/// Tokio's async stdin reads on the blocking pool, and a read that never
/// completes holds up runtime shutdown. A plain thread can simply be left
/// behind at exit. The channel closes at end of input.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(constants::CONSOLE_INPUT_CAPACITY);
    let spawned = std::thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "Failed to start console input thread");
    }
    rx
}

/// Command loop over lines of input.
#[derive(Debug, Clone)]
pub struct Console {
    supervisor: Supervisor,
}

impl Console {
    pub fn new(supervisor: Supervisor) -> Self {
        Self { supervisor }
    }

    /// Handle commands until `quit`, end of input, or cancellation.
    ///
    /// `quit` cancels `cancel`. End of input only stops reading commands;
    /// the orchestrator keeps running until it is signalled.
    pub async fn run<W: Write>(
        &self,
        mut input: mpsc::Receiver<String>,
        mut out: W,
        cancel: CancellationToken,
    ) {
        loop {
            let line = tokio::select! {
                () = cancel.cancelled() => break,
                line = input.recv() => line,
            };
            let Some(line) = line else {
                tracing::debug!("Console input closed");
                break;
            };

            let outcome = handle_line(&self.supervisor, &line);
            if let Some(text) = outcome.render() {
                // A closed stdout is not worth stopping the orchestrator for.
                let _ = writeln!(out, "{text}");
                let _ = out.flush();
            }
            if outcome == Outcome::Quit {
                cancel.cancel();
                break;
            }
        }
    }
}

/// Print live replica output until the sink is closed.
pub fn spawn_log_printer(mut records: mpsc::Receiver<LogRecord>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(record) = records.recv().await {
            let stream = match record.stream {
                StreamKind::Stdout => record.stream.tag().cyan(),
                StreamKind::Stderr => record.stream.tag().yellow(),
            };
            println!("[{stream}][{}] {}", record.replica, record.message);
        }
    })
}
