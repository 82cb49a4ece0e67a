//! Command interpreter
//!
//! Reads operator lines from a channel, parses them into [`Command`]s and
//! executes them against a [`Session`]. Parse and execution failures are
//! printed and the loop carries on; only `q`, a raised [`ShutdownSignal`]
//! or the end of input stops it.

use crate::dispatch::SaveOutcome;
use crate::periodic::{Period, PeriodicTask};
use crate::presenter::{format_value, Presenter, SharedOutput};
use crate::session::Session;
use crate::signals::{MessageSchema, SchemaAdapter, SignalSchema};
use crate::types::{CanifError, Result};
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, PoisonError};
use std::thread;
use std::time::Duration;

/// How often the loop re-checks the shutdown signal while waiting for input
const INPUT_POLL: Duration = Duration::from_millis(100);

const HELP: &str = "Command list:
\th Print help menu
\ts <msg_id|msg_name> <signal_name val signal_name val ...>
\t\tSend message (all signals must be given, values may be choice labels)
\tsa Send all config messages with current values
\testop Send the emergency-stop message
\td Print database
\tp <msg_id|msg_name> Print message details
\tpp <#> Periodic measurement print period in seconds (0 disables)
\tdc Print all config messages from database
\tdm Print all measurement messages from database
\tstats Print receive statistics
\tsave Save config with current values
\tq Quit";

/// Cooperative shutdown flag shared by every long-running loop
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One parsed operator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    ListAll,
    ListConfiguration,
    ListMeasurement,
    Print(String),
    PeriodicPrint(u64),
    Send {
        message: String,
        pairs: Vec<(String, String)>,
    },
    SendAll,
    Estop,
    Stats,
    Save,
    Quit,
    Empty,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&head, args)) = tokens.split_first() else {
            return Ok(Command::Empty);
        };

        let command = match head {
            "h" => Command::Help,
            "d" => Command::ListAll,
            "dc" => Command::ListConfiguration,
            "dm" => Command::ListMeasurement,
            "p" => {
                let id = args.first().ok_or_else(|| {
                    CanifError::InvalidArgument("Insufficient arguments: p <msg_id|msg_name>".into())
                })?;
                Command::Print(id.to_string())
            }
            "pp" => {
                let raw = args.first().ok_or_else(|| {
                    CanifError::InvalidArgument("Insufficient arguments: pp <seconds>".into())
                })?;
                let secs = raw
                    .parse::<u64>()
                    .map_err(|_| CanifError::InvalidArgument(format!("Invalid period: '{}'", raw)))?;
                Command::PeriodicPrint(secs)
            }
            "s" => {
                if args.len() < 3 {
                    return Err(CanifError::InvalidArgument(
                        "Insufficient arguments: s <msg_id|msg_name> <signal val ...>".into(),
                    ));
                }
                let rest = &args[1..];
                if rest.len() % 2 != 0 {
                    return Err(CanifError::InvalidArgument(
                        "Expected <signal_name> <value> pairs".into(),
                    ));
                }
                Command::Send {
                    message: args[0].to_string(),
                    pairs: rest
                        .chunks(2)
                        .map(|pair| (pair[0].to_string(), pair[1].to_string()))
                        .collect(),
                }
            }
            "sa" => Command::SendAll,
            "estop" => Command::Estop,
            "stats" => Command::Stats,
            "save" => Command::Save,
            "q" => Command::Quit,
            other => return Err(CanifError::InvalidCommand(other.to_string())),
        };
        Ok(command)
    }
}

/// Resolve a decimal or `0x` frame id, falling back to a message name.
/// A numeric id matches a standard frame first, then an extended one.
pub fn resolve_message<'a>(schema: &'a dyn SchemaAdapter, id: &str) -> Result<&'a MessageSchema> {
    if let Some(frame_id) = parse_frame_id(id) {
        let found = schema
            .message_by_frame_id(frame_id, false)
            .or_else(|_| schema.message_by_frame_id(frame_id, true));
        if let Ok(message) = found {
            return Ok(message);
        }
    }
    schema
        .message_by_name(id)
        .map_err(|_| CanifError::InvalidMessageId(id.to_string()))
}

fn parse_frame_id(id: &str) -> Option<u32> {
    match id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => id.parse().ok(),
    }
}

/// Numeric value, or a choice label of `signal`
fn parse_value(message: &MessageSchema, signal: &str, raw: &str) -> Result<f64> {
    if let Ok(value) = raw.parse::<f64>() {
        return Ok(value);
    }
    let schema = message.signal(signal).ok_or_else(|| CanifError::UnknownSignal {
        message: message.name.clone(),
        signal: signal.to_string(),
    })?;
    schema.choice_value(raw).ok_or_else(|| {
        CanifError::InvalidArgument(format!(
            "Invalid value '{}' for {}.{}",
            raw, message.name, signal
        ))
    })
}

/// What the bracketed column of a listing shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Detail {
    /// Choice table, or the range when the signal has none
    Choices,
    /// Always the numeric range
    Range,
}

fn signal_detail(signal: &SignalSchema, detail: Detail) -> String {
    match &signal.choices {
        Some(choices) if detail == Detail::Choices && !choices.is_empty() => choices
            .iter()
            .map(|(value, label)| format!("{}: \"{}\"", value, label))
            .collect::<Vec<_>>()
            .join(", "),
        _ => format!("{}, {}", signal.min, signal.max),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

pub struct CommandInterpreter {
    session: Arc<Session>,
    presenter: Arc<dyn Presenter>,
    out: SharedOutput,
    shutdown: ShutdownSignal,
    initial_period: Period,
}

impl CommandInterpreter {
    pub fn new(
        session: Arc<Session>,
        presenter: Arc<dyn Presenter>,
        out: SharedOutput,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            session,
            presenter,
            out,
            shutdown,
            initial_period: Period::Idle,
        }
    }

    /// Start periodic vitals rendering right away
    pub fn with_initial_period(mut self, period: Period) -> Self {
        self.initial_period = period;
        self
    }

    /// Process lines until `q`, shutdown or end of input. The periodic
    /// renderer is stopped and joined before returning.
    pub fn run(&self, input: Receiver<String>) -> Result<()> {
        let periodic = {
            let session = Arc::clone(&self.session);
            let presenter = Arc::clone(&self.presenter);
            let out = Arc::clone(&self.out);
            PeriodicTask::spawn_with(self.initial_period, move || {
                let mut out = out.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(e) = presenter.render_vitals(&session, &mut *out) {
                    log::warn!("Periodic render failed: {}", e);
                }
            })
        };

        self.write(|out| write!(out, "> "))?;
        loop {
            if self.shutdown.is_raised() {
                log::info!("Shutdown requested");
                break;
            }
            let line = match input.recv_timeout(INPUT_POLL) {
                Ok(line) => line,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    log::info!("Input closed");
                    break;
                }
            };

            match Command::parse(&line).and_then(|command| self.execute(command, &periodic)) {
                Ok(Flow::Quit) => {
                    self.shutdown.raise();
                    break;
                }
                Ok(Flow::Continue) => {}
                Err(e) => {
                    log::debug!("Command '{}' failed: {}", line.trim(), e);
                    self.write(|out| writeln!(out, "Error: {}", e))?;
                }
            }
            self.write(|out| write!(out, "> "))?;
        }

        periodic.shutdown();
        Ok(())
    }

    fn write(&self, f: impl FnOnce(&mut dyn Write) -> io::Result<()>) -> Result<()> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *out)?;
        out.flush()?;
        Ok(())
    }

    fn execute(&self, command: Command, periodic: &PeriodicTask) -> Result<Flow> {
        let session = self.session.as_ref();

        match command {
            Command::Empty => {}
            Command::Help => self.write(|out| writeln!(out, "{}", HELP))?,
            Command::ListAll => {
                self.list(true)?;
                self.list(false)?;
            }
            Command::ListConfiguration => self.list(true)?,
            Command::ListMeasurement => self.list(false)?,
            Command::Print(id) => {
                let message = resolve_message(session.schema(), &id)?;
                self.print_message(message, Detail::Choices)?;
            }
            Command::PeriodicPrint(secs) => {
                let period = Period::from_secs(secs);
                periodic.set_period(period);
                self.write(|out| match period {
                    Period::Every(_) => writeln!(out, "Periodic print every {} s", secs),
                    _ => writeln!(out, "Periodic print disabled"),
                })?;
            }
            Command::Send { message, pairs } => {
                let schema = resolve_message(session.schema(), &message)?;
                let requested = pairs
                    .iter()
                    .map(|(signal, raw)| parse_value(schema, signal, raw).map(|v| (signal.clone(), v)))
                    .collect::<Result<Vec<_>>>()?;
                session.dispatcher().send_message(&schema.name, &requested)?;
                self.write(|out| writeln!(out, "Sent {} (0x{:X})", schema.name, schema.frame_id))?;
            }
            Command::SendAll => {
                let report = session.dispatcher().send_all();
                self.write(|out| {
                    writeln!(out, "Sent {} messages", report.sent.len())?;
                    for (name, e) in &report.failed {
                        writeln!(out, "Failed {}: {}", name, e)?;
                    }
                    Ok(())
                })?;
            }
            Command::Estop => {
                session.dispatcher().send_estop()?;
                let directive = session
                    .dispatcher()
                    .estop()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                self.write(|out| writeln!(out, "ESTOP sent: {}", directive))?;
            }
            Command::Stats => {
                let presenter = Arc::clone(&self.presenter);
                self.write(|out| presenter.render_stats(session, out))?;
            }
            Command::Save => {
                let outcome = session.dispatcher().save_configuration()?;
                self.write(|out| match &outcome {
                    SaveOutcome::Bus => writeln!(out, "Save requested on the bus"),
                    SaveOutcome::File(path) => writeln!(out, "Saved to {}", path.display()),
                })?;
            }
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    /// Configuration messages show choice tables, measurement messages
    /// their ranges
    fn list(&self, configuration: bool) -> Result<()> {
        let roles = self.session.roles();
        let (entries, detail) = if configuration {
            (roles.configuration(), Detail::Choices)
        } else {
            (roles.measurement(), Detail::Range)
        };
        for entry in entries {
            let message = self.session.schema().message_by_name(&entry.name)?;
            self.print_message(message, detail)?;
        }
        Ok(())
    }

    /// Header line, then one line per signal with its choices or range
    fn print_message(&self, message: &MessageSchema, detail: Detail) -> Result<()> {
        let values = self.session.store().get(&message.name)?;
        self.write(|out| {
            writeln!(
                out,
                "{}: ID={}:0x{:x} Signals={}",
                message.name,
                message.frame_id,
                message.frame_id,
                message.signals.len()
            )?;
            for signal in &message.signals {
                let value = values.get(&signal.name).copied().unwrap_or(0.0);
                writeln!(
                    out,
                    "\t{} \"{}\" [{}]",
                    signal.name,
                    format_value(signal, value),
                    signal_detail(signal, detail)
                )?;
            }
            Ok(())
        })
    }
}

/// Forward stdin lines to a channel. The reader thread is detached: a
/// blocking read cannot be interrupted, and the channel closing at end of
/// input ends the interpreter loop.
pub fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("canif-stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::error!("stdin: {}", e);
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        log::error!("Failed to spawn stdin reader: {}", e);
    }
    rx
}
