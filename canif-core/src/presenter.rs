//! Rendering of vitals and receive statistics
//!
//! Two presenters share one interface: [`TextPresenter`] prints plain lines
//! for an interactive terminal, [`DashboardPresenter`] redraws a full
//! screen of tables on every render.

use crate::session::Session;
use crate::signals::SignalSchema;
use crate::types::{format_clock, Timestamp};
use chrono::Utc;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Output shared by the command loop and the periodic renderer. Holding
/// the lock for a whole render keeps outputs from interleaving.
pub type SharedOutput = Arc<Mutex<dyn Write + Send>>;

pub trait Presenter: Send + Sync {
    /// Current values of every vitals message
    fn render_vitals(&self, session: &Session, out: &mut dyn Write) -> io::Result<()>;

    /// Receive statistics of every measurement message
    fn render_stats(&self, session: &Session, out: &mut dyn Write) -> io::Result<()>;
}

/// `value` with its choice label when the signal has one
pub fn format_value(signal: &SignalSchema, value: f64) -> String {
    match signal.choice_label(value) {
        Some(label) => format!("{} ({})", value, label),
        None => value.to_string(),
    }
}

fn format_unit(signal: &SignalSchema) -> &str {
    signal.unit.as_deref().unwrap_or("")
}

fn stamp(ts: Option<Timestamp>) -> String {
    ts.as_ref().map(format_clock).unwrap_or_else(|| "-".to_string())
}

/// Line-oriented presenter for the interactive terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct TextPresenter;

impl Presenter for TextPresenter {
    fn render_vitals(&self, session: &Session, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out)?;
        for name in session.vitals() {
            let Ok(message) = session.schema().message_by_name(name) else {
                continue;
            };
            let values = session.store().get(name).unwrap_or_default();
            writeln!(out, "{}:", message.name)?;
            for signal in &message.signals {
                let value = values.get(&signal.name).copied().unwrap_or(0.0);
                writeln!(
                    out,
                    "  {}: {} {}",
                    signal.name,
                    format_value(signal, value),
                    format_unit(signal)
                )?;
            }
        }
        write!(out, "> ")?;
        out.flush()
    }

    fn render_stats(&self, session: &Session, out: &mut dyn Write) -> io::Result<()> {
        for (name, stats) in session.store().rx_stats_all() {
            writeln!(
                out,
                "{:<24} count={:<8} cycle={:.3}s last={}",
                name,
                stats.count,
                stats.cycle_time,
                stats.last_received_label()
            )?;
        }
        let counters = session.tracker().counters();
        writeln!(
            out,
            "frames: {} decoded, {} unknown, {} failed",
            counters.decoded, counters.unknown, counters.failed
        )?;
        out.flush()
    }
}

/// Full-screen tables, redrawn on every render
#[derive(Debug, Clone)]
pub struct DashboardPresenter {
    title: String,
    clear_screen: bool,
}

impl DashboardPresenter {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            clear_screen: true,
        }
    }

    /// Skip the ANSI clear sequence (for logs and tests)
    pub fn without_clear(mut self) -> Self {
        self.clear_screen = false;
        self
    }

    fn header(&self, out: &mut dyn Write) -> io::Result<()> {
        if self.clear_screen {
            write!(out, "\x1b[2J\x1b[H")?;
        }
        writeln!(out, "═══════════════════════════════════════════════")?;
        writeln!(out, "  {}  {}", self.title, format_clock(&Utc::now()))?;
        writeln!(out, "═══════════════════════════════════════════════")
    }

    fn stats_table(&self, session: &Session, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "\n{:<24} {:>8} {:>10} {:>14}", "Message", "Count", "Cycle [s]", "Last")?;
        writeln!(out, "───────────────────────────────────────────────────────────")?;
        for (name, stats) in session.store().rx_stats_all() {
            writeln!(
                out,
                "{:<24} {:>8} {:>10.3} {:>14}",
                name,
                stats.count,
                stats.cycle_time,
                stats.last_received_label()
            )?;
        }
        Ok(())
    }
}

impl Presenter for DashboardPresenter {
    fn render_vitals(&self, session: &Session, out: &mut dyn Write) -> io::Result<()> {
        self.header(out)?;

        for name in session.vitals() {
            let Ok(message) = session.schema().message_by_name(name) else {
                continue;
            };
            let values = session.store().get(name).unwrap_or_default();
            let last = session
                .store()
                .rx_stats(name)
                .map(|s| s.last_received_label())
                .unwrap_or_else(|| "-".to_string());

            writeln!(out, "\n{} (0x{:X})  last {}", message.name, message.frame_id, last)?;
            for signal in &message.signals {
                let value = values.get(&signal.name).copied().unwrap_or(0.0);
                writeln!(
                    out,
                    "  {:<24} {:>16} {}",
                    signal.name,
                    format_value(signal, value),
                    format_unit(signal)
                )?;
            }
        }

        self.stats_table(session, out)?;

        let last = session.dispatcher().last_actions();
        writeln!(
            out,
            "\nsend {}  send all {}  estop {}  save {}",
            stamp(last.send),
            stamp(last.send_all),
            stamp(last.estop),
            stamp(last.save)
        )?;
        out.flush()
    }

    fn render_stats(&self, session: &Session, out: &mut dyn Write) -> io::Result<()> {
        self.stats_table(session, out)?;
        out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::persist::PersistedConfig;
    use crate::signals::{SchemaAdapter, SignalDatabase};
    use crate::transport::VirtualBus;
    use crate::types::CanFrame;
    use chrono::TimeZone;

    const DBC: &str = r#"
VERSION ""

NS_ :

BS_:

BU_: HOST DEV

BO_ 16 Command: 1 HOST
 SG_ Run : 0|8@1+ (1,0) [0|1] "" DEV

BO_ 32 Status: 2 DEV
 SG_ State : 0|8@1+ (1,0) [0|2] "" HOST
 SG_ Voltage : 8|8@1+ (0.5,0) [0|120] "V" HOST

VAL_ 32 State 0 "Idle" 1 "Running" 2 "Fault" ;
"#;

    fn session() -> Session {
        let schema: Arc<dyn SchemaAdapter> = Arc::new(SignalDatabase::from_dbc_str(DBC).unwrap());
        Session::with_persisted(
            schema,
            Arc::new(VirtualBus::new("vcan0")),
            &SessionConfig::new().with_node("HOST").with_vitals(["Status"]),
            &PersistedConfig::new(),
        )
        .unwrap()
    }

    fn render(f: impl FnOnce(&mut Vec<u8>) -> io::Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_text_vitals_show_labels_and_units() {
        let session = session();
        session.tracker().handle_frame(&CanFrame::new(32, false, &[1, 24]));

        let text = render(|out| TextPresenter.render_vitals(&session, out));
        assert!(text.contains("Status:"));
        assert!(text.contains("  State: 1 (Running)"));
        assert!(text.contains("  Voltage: 12 V"));
        assert!(!text.contains("Command"));
        assert!(text.ends_with("> "));
    }

    #[test]
    fn test_text_stats() {
        let session = session();
        let t0 = Utc.timestamp_millis_opt(0).unwrap();
        session.tracker().handle_frame(&CanFrame::at(t0, 32, false, &[0, 0]));
        session
            .tracker()
            .handle_frame(&CanFrame::at(t0 + chrono::Duration::milliseconds(100), 32, false, &[0, 0]));

        let text = render(|out| TextPresenter.render_stats(&session, out));
        assert!(text.contains("count=2"));
        assert!(text.contains("cycle=0.100s"));
        assert!(text.contains("frames: 2 decoded, 0 unknown, 0 failed"));
    }

    #[test]
    fn test_dashboard_tables() {
        let session = session();
        let presenter = DashboardPresenter::new("canif vcan0").without_clear();

        let text = render(|out| presenter.render_vitals(&session, out));
        assert!(text.starts_with("═"));
        assert!(text.contains("canif vcan0"));
        assert!(text.contains("Status (0x20)  last -"));
        assert!(text.contains("State"));
        assert!(text.contains("Cycle [s]"));
        assert!(text.contains("send -  send all -  estop -  save -"));
    }

    #[test]
    fn test_format_value_without_choices() {
        let db = SignalDatabase::from_dbc_str(DBC).unwrap();
        let message = db.message_by_name("Status").unwrap();
        let voltage = message.signal("Voltage").unwrap();
        assert_eq!(format_value(voltage, 12.5), "12.5");
        let state = message.signal("State").unwrap();
        assert_eq!(format_value(state, 7.0), "7");
    }
}
