//! canif Core Library
//!
//! Interactive CAN bus interface: load a DBC signal database, split its
//! messages into configuration (transmitted by this node) and measurement
//! (received and displayed) roles, keep one shared table of current signal
//! values, and send configuration messages on operator request.
//!
//! # Architecture
//!
//! - [`signals`] parses DBC files into an immutable [`SignalDatabase`]
//! - [`roles`] decides once which messages this node may transmit
//! - [`store`] holds current values plus receive statistics behind one lock
//! - [`tracker`] decodes inbound frames into the store
//! - [`dispatch`] validates, encodes and sends outbound requests
//! - [`interpreter`] parses operator commands and drives a [`Session`]
//!
//! Frames arrive on a [`Notifier`] thread and operator commands on the
//! interpreter thread; both meet only in the [`SignalStore`].
//!
//! # Example Usage
//!
//! ```no_run
//! use canif_core::{Session, SessionConfig, SignalDatabase, VirtualBus};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let db = SignalDatabase::from_dbc_file(Path::new("controller.dbc")).unwrap();
//! let bus = Arc::new(VirtualBus::new("vcan0"));
//!
//! let config = SessionConfig::new()
//!     .with_node("HOST")
//!     .with_vitals(["Status"]);
//! let session = Session::new(Arc::new(db), bus.clone(), &config).unwrap();
//! let _notifier = session.listen(bus.as_ref()).unwrap();
//!
//! session
//!     .dispatcher()
//!     .send_message("Command", &[("Mode".to_string(), 1.0)])
//!     .unwrap();
//! ```

// Public modules
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod interpreter;
pub mod periodic;
pub mod persist;
pub mod presenter;
pub mod roles;
pub mod session;
pub mod signals;
pub mod store;
pub mod tracker;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use config::{EstopDirective, SessionConfig};
pub use dispatch::{ConfigSaveHook, Dispatcher, LastActions, SaveOutcome, SendReport};
pub use interpreter::{spawn_stdin_reader, Command, CommandInterpreter, ShutdownSignal};
pub use periodic::{Period, PeriodicTask};
pub use persist::{default_params_path, PersistedConfig, DEFAULT_PARAMS_PATH};
pub use presenter::{DashboardPresenter, Presenter, SharedOutput, TextPresenter};
pub use roles::{MessageRef, MessageRoles, RoleSource};
pub use session::Session;
pub use signals::{DatabaseStats, MessageSchema, SchemaAdapter, SignalDatabase, SignalSchema};
pub use store::{RxStats, SignalStore};
pub use tracker::{ReceptionTracker, TrackerCounters};
pub use transport::{FrameListener, FrameSource, Notifier, Transport, VirtualBus};
#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub use transport::SocketCanTransport;
pub use types::{CanFrame, CanifError, ErrorKind, Result, SignalMap, Timestamp};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
