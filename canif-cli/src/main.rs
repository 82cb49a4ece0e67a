//! canif CLI Application
//!
//! Interactive terminal for a CAN node described by a DBC file. It uses the
//! canif-core library and adds:
//! - Command line and TOML configuration
//! - Logging setup (stderr or log file)
//! - Transport selection (virtual bus or SocketCAN)
//! - A test-traffic generator standing in for the far end of the bus

use anyhow::{bail, Context, Result};
use canif_core::{
    spawn_stdin_reader, CommandInterpreter, DashboardPresenter, EstopDirective, Period, Presenter,
    SchemaAdapter, Session, SessionConfig, SharedOutput, ShutdownSignal, SignalDatabase,
    TextPresenter, Transport, VirtualBus,
};
use clap::Parser;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod config;
mod traffic;

use config::AppConfig;
use traffic::TrafficGenerator;

/// canif - Interactive CAN bus interface
#[derive(Parser, Debug)]
#[command(name = "canif")]
#[command(about = "Send configuration messages and watch measurements on a CAN bus", long_about = None)]
#[command(version)]
struct Args {
    /// Path to the DBC file
    #[arg(short, long, value_name = "FILE")]
    dbc: Option<PathBuf>,

    /// Bus interface and channel [default: virtual vcan0]
    #[arg(short = 'c', long, num_args = 2, value_names = ["INTERFACE", "CHANNEL"])]
    canbusif: Option<Vec<String>>,

    /// Write the application log to a file (default name when FILE is omitted)
    #[arg(short, long, value_name = "FILE", num_args = 0..=1)]
    log: Option<Option<PathBuf>>,

    /// Measurement messages to print periodically
    #[arg(short = 'm', long, value_name = "MESSAGE", num_args = 1..)]
    vitals: Vec<String>,

    /// Node name; messages it sends are configuration messages
    #[arg(short, long)]
    node: Option<String>,

    /// Frame ids of measurement messages (decimal or 0x hex)
    #[arg(short, long, value_name = "ID", num_args = 1.., value_parser = parse_frame_id)]
    rx_ids: Vec<u32>,

    /// Emergency-stop override sent by `estop`
    #[arg(short, long, num_args = 3, value_names = ["MESSAGE", "SIGNAL", "VALUE"])]
    estop: Option<Vec<String>>,

    /// Generate test traffic for messages the node receives
    #[arg(short, long)]
    test: bool,

    /// Full-screen dashboard instead of the plain terminal output
    #[arg(long)]
    dashboard: bool,

    /// Persisted configuration values
    #[arg(long, value_name = "FILE")]
    params: Option<PathBuf>,

    /// Path to configuration file (canif.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn parse_frame_id(s: &str) -> std::result::Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid frame id '{}': {}", s, e))
}

/// Effective settings after merging the config file under the CLI flags
#[derive(Debug)]
struct Settings {
    dbc: PathBuf,
    interface: String,
    channel: String,
    log_file: Option<PathBuf>,
    node: Option<String>,
    session: SessionConfig,
    dashboard: bool,
    test_traffic: bool,
}

impl Settings {
    fn resolve(args: &Args, app: AppConfig) -> Result<Self> {
        let dbc = match args.dbc.clone().or(app.session.dbc) {
            Some(path) => path,
            None => bail!("No DBC file given (use --dbc or [session] dbc in the config file)"),
        };

        let (interface, channel) = match &args.canbusif {
            Some(pair) if pair.len() == 2 => (pair[0].clone(), pair[1].clone()),
            _ => (
                app.bus.interface.unwrap_or_else(|| "virtual".to_string()),
                app.bus.channel.unwrap_or_else(|| "vcan0".to_string()),
            ),
        };

        let log_file = match &args.log {
            Some(Some(path)) => Some(path.clone()),
            Some(None) => Some(default_log_path()),
            None => app.logging.file,
        };

        let node = args.node.clone().or(app.session.node);
        let rx_ids = if args.rx_ids.is_empty() {
            app.session.rx_ids
        } else {
            args.rx_ids.clone()
        };
        let vitals = if args.vitals.is_empty() {
            app.session.vitals
        } else {
            args.vitals.clone()
        };

        let estop = match &args.estop {
            Some(parts) => Some(parse_estop(parts)?),
            None => app.estop,
        };

        let mut session = SessionConfig::new().with_vitals(vitals);
        if !rx_ids.is_empty() {
            session = session.with_receive_ids(rx_ids);
        } else if let Some(node) = &node {
            session = session.with_node(node.clone());
        }
        if let Some(directive) = estop {
            session = session.with_estop(directive);
        }
        if let Some(params) = args.params.clone().or(app.session.params) {
            session = session.with_params_path(params);
        }

        Ok(Self {
            dbc,
            interface,
            channel,
            log_file,
            node,
            session,
            dashboard: args.dashboard || app.session.dashboard,
            test_traffic: args.test || app.session.test_traffic,
        })
    }
}

fn parse_estop(parts: &[String]) -> Result<EstopDirective> {
    let [message, signal, value] = parts else {
        bail!("--estop expects <MESSAGE> <SIGNAL> <VALUE>");
    };
    let value: f64 = value
        .parse()
        .with_context(|| format!("Invalid estop value '{}'", value))?;
    Ok(EstopDirective::new(message.clone(), signal.clone(), value))
}

fn default_log_path() -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    PathBuf::from("logs").join(format!("{}-canif.log", stamp))
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    let app = match &args.config {
        Some(path) => config::load_config(path)?,
        None => AppConfig::default(),
    };
    let settings = Settings::resolve(&args, app)?;

    // Initialize logging
    init_logging(args.verbose, args.quiet, settings.log_file.as_deref())?;

    log::info!("canif CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using canif-core library v{}", canif_core::VERSION);

    run(settings)
}

fn run(settings: Settings) -> Result<()> {
    let db = SignalDatabase::from_dbc_file(&settings.dbc)
        .with_context(|| format!("Error loading DBC: {:?}", settings.dbc))?;
    let stats = db.stats();
    log::info!(
        "Signal database: {} messages, {} signals",
        stats.num_messages,
        stats.num_signals
    );
    let schema: Arc<dyn SchemaAdapter> = Arc::new(db);

    let transport = open_transport(&settings.interface, &settings.channel)?;
    let session = Arc::new(
        Session::new(Arc::clone(&schema), Arc::clone(&transport), &settings.session)
            .context("Failed to set up session")?,
    );
    let mut notifier = session
        .listen(transport.as_ref())
        .context("Failed to subscribe to the bus")?;

    let shutdown = ShutdownSignal::new();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.raise()).context("Failed to install Ctrl-C handler")?;
    }

    let traffic = match (&settings.node, settings.test_traffic) {
        (Some(node), true) => Some(TrafficGenerator::start(
            Arc::clone(&schema),
            Arc::clone(&transport),
            node,
            Duration::from_secs(1),
        )?),
        (None, true) => {
            log::warn!("Test traffic needs --node, not started");
            None
        }
        _ => None,
    };

    let presenter: Arc<dyn Presenter> = if settings.dashboard {
        Arc::new(DashboardPresenter::new(format!("canif {}", transport.describe())))
    } else {
        Arc::new(TextPresenter)
    };
    let out: SharedOutput = Arc::new(Mutex::new(io::stdout()));
    {
        let mut out = out.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(out, "canif on {} (h for help)", transport.describe())?;
    }

    let mut interpreter = CommandInterpreter::new(Arc::clone(&session), presenter, out, shutdown);
    if settings.dashboard {
        interpreter = interpreter.with_initial_period(Period::Every(Duration::from_secs(1)));
    }
    let result = interpreter.run(spawn_stdin_reader());

    // Cleanup
    if let Some(traffic) = traffic {
        traffic.stop();
    }
    notifier.stop();
    log::info!("canif stopped");

    result.context("Command loop failed")
}

fn open_transport(interface: &str, channel: &str) -> Result<Arc<dyn Transport>> {
    match interface {
        "virtual" => Ok(Arc::new(VirtualBus::new(channel))),
        #[cfg(all(target_os = "linux", feature = "socketcan"))]
        "socketcan" => {
            let transport = canif_core::SocketCanTransport::open(channel)
                .with_context(|| format!("Failed to open {} {}", interface, channel))?;
            Ok(Arc::new(transport))
        }
        other => bail!("Unsupported bus interface '{}'", other),
    }
}

/// Initialize logging based on verbosity flags
fn init_logging(verbose: u8, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    let mut builder = Builder::new();
    builder.filter_level(level).format(|buf, record| {
        writeln!(
            buf,
            "[{} {}] {}",
            record.level(),
            record.target(),
            record.args()
        )
    });

    if let Some(path) = log_file {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {:?}", parent))?;
        }
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create log file {:?}", path))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use canif_core::RoleSource;

    fn args(argv: &[&str]) -> Args {
        Args::parse_from(std::iter::once("canif").chain(argv.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::resolve(&args(&["-d", "node.dbc"]), AppConfig::default()).unwrap();
        assert_eq!(settings.dbc, PathBuf::from("node.dbc"));
        assert_eq!((settings.interface.as_str(), settings.channel.as_str()), ("virtual", "vcan0"));
        assert!(settings.log_file.is_none());
        assert_eq!(settings.session.roles, RoleSource::Unassigned);
        assert!(!settings.dashboard);
    }

    #[test]
    fn test_missing_dbc_is_an_error() {
        assert!(Settings::resolve(&args(&[]), AppConfig::default()).is_err());
    }

    #[test]
    fn test_cli_flags() {
        let settings = Settings::resolve(
            &args(&[
                "-d", "node.dbc", "-c", "socketcan", "can0", "-n", "HOST", "-m", "Status", "Faults",
                "-e", "Control", "Enable", "0", "-l", "run.log", "-t",
            ]),
            AppConfig::default(),
        )
        .unwrap();

        assert_eq!(settings.interface, "socketcan");
        assert_eq!(settings.channel, "can0");
        assert_eq!(settings.session.roles, RoleSource::Node("HOST".into()));
        assert_eq!(settings.session.vitals, vec!["Status".to_string(), "Faults".to_string()]);
        assert_eq!(
            settings.session.estop,
            Some(EstopDirective::new("Control", "Enable", 0.0))
        );
        assert_eq!(settings.log_file, Some(PathBuf::from("run.log")));
        assert!(settings.test_traffic);
    }

    #[test]
    fn test_rx_ids_win_over_node() {
        let settings = Settings::resolve(
            &args(&["-d", "x.dbc", "-n", "HOST", "-r", "0x100", "512"]),
            AppConfig::default(),
        )
        .unwrap();
        assert_eq!(
            settings.session.roles,
            RoleSource::ReceiveIds([256, 512].into_iter().collect())
        );
        assert_eq!(settings.node.as_deref(), Some("HOST"));
    }

    #[test]
    fn test_log_flag_without_path_uses_default_name() {
        let settings = Settings::resolve(&args(&["-d", "x.dbc", "-l"]), AppConfig::default()).unwrap();
        let path = settings.log_file.unwrap();
        assert!(path.starts_with("logs"));
        assert!(path.to_string_lossy().ends_with("-canif.log"));
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let app: AppConfig = toml::from_str(
            r#"
            [bus]
            interface = "socketcan"
            channel = "can1"

            [session]
            dbc = "from_file.dbc"
            node = "DEV"
            dashboard = true
            params = "cfg/params.json"
            "#,
        )
        .unwrap();

        let settings = Settings::resolve(&args(&["-n", "HOST"]), app).unwrap();
        assert_eq!(settings.dbc, PathBuf::from("from_file.dbc"));
        assert_eq!(settings.channel, "can1");
        assert_eq!(settings.session.roles, RoleSource::Node("HOST".into()));
        assert_eq!(settings.session.params_path, PathBuf::from("cfg/params.json"));
        assert!(settings.dashboard);
    }

    #[test]
    fn test_invalid_estop_value() {
        let result = Settings::resolve(
            &args(&["-d", "x.dbc", "-e", "Control", "Enable", "off"]),
            AppConfig::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_frame_id() {
        assert_eq!(parse_frame_id("0x7FF"), Ok(0x7FF));
        assert_eq!(parse_frame_id("42"), Ok(42));
        assert!(parse_frame_id("zz").is_err());
    }

    #[test]
    fn test_unsupported_interface() {
        assert!(open_transport("pcan", "PCAN_USBBUS1").is_err());
        assert!(open_transport("virtual", "vcan0").is_ok());
    }
}
