use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 4242;

/// Checks performed across an acknowledgement timeout window.
pub const DEFAULT_ACK_POLLS: u32 = 5;
/// Only telemetry frames whose counter is a multiple of this reach the sink.
pub const DEFAULT_TELEMETRY_EVERY: u64 = 180;

/// Wall-clock choreography of a calibration run. These are device-tuning
/// values; the defaults match what the tracker needs to sample its points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationTiming {
    /// Overlay shown -> calibration started.
    pub start_delay: Duration,
    /// Overlay shown -> overlay hidden.
    pub hide_after: Duration,
    /// How long the user stares at each screen point.
    pub stare_window: Duration,
}

impl Default for CalibrationTiming {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_secs(1),
            hide_after: Duration::from_secs(11),
            stare_window: Duration::from_secs(6),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Log every raw line sent and received.
    pub debug: bool,
    pub ack_timeout: Duration,
    pub ack_polls: u32,
    pub telemetry_every: u64,
    /// Interval between receive-statistics summaries.
    pub stats_interval: Duration,
    pub calibration: CalibrationTiming,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            debug: false,
            ack_timeout: Duration::from_secs(2),
            ack_polls: DEFAULT_ACK_POLLS,
            telemetry_every: DEFAULT_TELEMETRY_EVERY,
            stats_interval: Duration::from_secs(5),
            calibration: CalibrationTiming::default(),
        }
    }
}
