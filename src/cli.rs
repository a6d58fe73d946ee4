use clap::{Args, Parser, Subcommand};
use std::time::Duration;

use gazelink::ClientConfig;
use gazelink::config::{DEFAULT_ACK_POLLS, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_TELEMETRY_EVERY};

#[derive(Parser, Debug, Clone)]
#[command(name = "gazelink", about = "Eye tracker control client (streaming & calibration)")]
pub struct Cli {
    #[command(flatten)]
    pub conn: ConnOpts,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Enable the gaze streams and log sampled frames until Ctrl-C
    Stream,
    /// Run the device calibration only (no prompts)
    Calibrate,
    /// Interactive two-point screen calibration
    Session,
}

#[derive(Args, Debug, Clone)]
pub struct ConnOpts {
    /// Tracker server host
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,
    /// Tracker server port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Log every raw line sent and received
    #[arg(long, default_value_t = false)]
    pub debug: bool,
    /// How long to wait for an acknowledgement
    #[arg(long, default_value_t = 2_000)]
    pub ack_timeout_ms: u64,
    /// Forward one telemetry frame in this many
    #[arg(long, default_value_t = DEFAULT_TELEMETRY_EVERY)]
    pub telemetry_every: u64,
}

impl ConnOpts {
    pub fn to_config(&self) -> ClientConfig {
        ClientConfig {
            host: self.host.clone(),
            port: self.port,
            debug: self.debug,
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            ack_polls: DEFAULT_ACK_POLLS,
            telemetry_every: self.telemetry_every,
            ..ClientConfig::default()
        }
    }
}
