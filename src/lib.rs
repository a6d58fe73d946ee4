//! Client and control layer for a Gazepoint-style eye tracker: a line codec
//! for the XML-ish TCP protocol, the connection that carries it, id-keyed
//! acknowledgement tracking, and the timed, user-gated calibration sequence.
//!
//! Everything runs on one thread. Create the pieces inside a
//! [`tokio::task::LocalSet`] on a current-thread runtime.

pub mod ack;
pub mod calibration;
pub mod config;
pub mod connection;
pub mod host;
pub mod proto;
pub mod session;
pub mod stats;
pub mod telemetry;

pub use ack::{AckOutcome, AckTracker, SendOutcome};
pub use config::{CalibrationTiming, ClientConfig};
pub use connection::{Connection, ConnectionError, ConnectionState};
pub use host::{ContextHandle, Host, HostError, TerminalHost};
pub use session::{Session, SessionOutcome};
