use tracing::{info, warn};

use crate::ack::{AckOutcome, AckTracker};
use crate::calibration::{
    DeviceCalibration, DeviceCalibrationOutcome, ScreenCalibration, ScreenCalibrationOutcome,
};
use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionError};
use crate::host::Host;
use crate::proto::{Command, CommandId};
use crate::telemetry::{TelemetrySink, attach_sink};

/// Shown in place of the user's work while the two screen points are sampled.
pub const CALIBRATION_SHEET: &str = "\
+--------------------------------------------------------------+
| (1)                                                          |
|                                                              |
|                     eye tracker calibration                  |
|                                                              |
|        look at marker (1), then at marker (2) when asked     |
|                                                              |
|                                                          (2) |
+--------------------------------------------------------------+";

/// Streams switched on by [`Session::start_streaming`], data last.
pub const STREAMS: [CommandId; 5] = [
    CommandId::EnableSendCounter,
    CommandId::EnableSendCursor,
    CommandId::EnableSendPogBest,
    CommandId::EnableSendPogFix,
    CommandId::EnableSendData,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Cancelled,
    PreconditionFailed,
    NotConnected,
}

/// Owns the link to the tracker and drives the user-facing workflows on it.
pub struct Session<H: Host> {
    config: ClientConfig,
    host: H,
    conn: Connection,
    tracker: AckTracker,
}

impl<H: Host> Session<H> {
    pub fn new(config: ClientConfig, host: H) -> Self {
        let conn = Connection::new(&config);
        // First handler: acknowledgements must be matched before anything else sees records.
        let tracker = AckTracker::attach(&conn, config.ack_polls);
        Self {
            config,
            host,
            conn,
            tracker,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn tracker(&self) -> &AckTracker {
        &self.tracker
    }

    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.conn.connect().await
    }

    /// Route decimated gaze frames to `sink`.
    pub fn attach_telemetry(&self, sink: impl TelemetrySink + 'static) {
        attach_sink(&self.conn, self.config.telemetry_every, sink);
    }

    /// Switch on the gaze streams, one acknowledged command at a time.
    pub async fn start_streaming(&self) -> Vec<(CommandId, AckOutcome)> {
        let mut outcomes = Vec::with_capacity(STREAMS.len());
        for id in STREAMS {
            let cmd = Command::set(id).with_state(true);
            let outcome = self
                .tracker
                .send_with_ack(&cmd, self.config.ack_timeout)
                .await;
            if outcome != AckOutcome::Acknowledged {
                warn!("[session] {} -> {:?}", id, outcome);
            }
            outcomes.push((id, outcome));
            if outcome == AckOutcome::NotConnected {
                break;
            }
        }
        outcomes
    }

    pub async fn set_tracker_display(&self, on: bool) -> AckOutcome {
        let cmd = Command::set(CommandId::TrackerDisplay).with_state(on);
        self.tracker
            .send_with_ack(&cmd, self.config.ack_timeout)
            .await
    }

    /// Device-level calibration only, without prompts or context swapping.
    pub async fn calibrate_device(&self) -> DeviceCalibrationOutcome {
        DeviceCalibration::new(self.config.calibration)
            .run(&self.tracker)
            .await
    }

    /// The full user-gated calibration: swap in the calibration sheet, run the
    /// two-point sequence, then put the user's context back whatever happened.
    pub async fn begin_calibration(&self) -> SessionOutcome {
        let Some(prior) = self.host.active_context() else {
            self.host
                .notify("Open a document first; calibration needs an active editor.", &[])
                .await;
            return SessionOutcome::PreconditionFailed;
        };
        if !self.conn.is_connected() {
            self.host
                .notify("The eye tracker is not connected.", &[])
                .await;
            return SessionOutcome::NotConnected;
        }

        let open = "Open";
        let answer = self
            .host
            .notify("Open the calibration sheet?", &[open])
            .await;
        if answer.as_deref() != Some(open) {
            self.host.log("calibration cancelled");
            return SessionOutcome::Cancelled;
        }

        let material = match self.host.open_material(CALIBRATION_SHEET) {
            Ok(material) => material,
            Err(e) => {
                self.host.notify(&e.to_string(), &[]).await;
                return SessionOutcome::PreconditionFailed;
            }
        };

        let outcome = ScreenCalibration::new(self.config.calibration)
            .run(&self.host, &self.tracker)
            .await;

        self.host.restore_material(prior);
        self.host.release_material(material);

        match outcome {
            ScreenCalibrationOutcome::Done => {
                info!("[session] calibration complete");
                self.host.log("calibration complete");
                SessionOutcome::Completed
            }
            ScreenCalibrationOutcome::Cancelled => {
                info!("[session] calibration cancelled by user");
                self.host.log("calibration cancelled");
                SessionOutcome::Cancelled
            }
            ScreenCalibrationOutcome::NotConnected => {
                self.host
                    .notify("Lost the connection to the eye tracker.", &[])
                    .await;
                SessionOutcome::NotConnected
            }
        }
    }

    /// Switch the data stream off and close the link.
    pub async fn stop(&self) {
        if self.conn.is_connected() {
            let cmd = Command::set(CommandId::EnableSendData).with_state(false);
            self.tracker
                .send_with_ack(&cmd, self.config.ack_timeout)
                .await;
        }
        self.conn.close();
    }
}
