use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::ack::{AckTracker, SendOutcome};
use crate::config::CalibrationTiming;
use crate::proto::{Command, CommandId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationPhase {
    Idle,
    Reset,
    ShowOverlay,
    CountdownToStart,
    Started,
    CountdownToHide,
    HideOverlay,
    Complete,
}

/// Side effect owed when leaving a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStep {
    Send(Command),
    Wait(Duration),
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCalibrationOutcome {
    Complete,
    NotConnected,
}

/// One transition of the device-level run. Purely time-driven: nothing here
/// waits on an acknowledgement.
pub fn next_step(
    phase: CalibrationPhase,
    timing: &CalibrationTiming,
) -> (CalibrationPhase, DeviceStep) {
    use CalibrationPhase::*;
    match phase {
        Idle => (Reset, DeviceStep::Send(Command::set(CommandId::CalibrateReset))),
        Reset => (
            ShowOverlay,
            DeviceStep::Send(Command::set(CommandId::CalibrateShow).with_state(true)),
        ),
        // Give the overlay time to render before capture starts.
        ShowOverlay => (CountdownToStart, DeviceStep::Wait(timing.start_delay)),
        CountdownToStart => (
            Started,
            DeviceStep::Send(Command::set(CommandId::CalibrateStart).with_state(true)),
        ),
        // hide_after counts from the overlay being shown, not from the start.
        Started => (
            CountdownToHide,
            DeviceStep::Wait(timing.hide_after.saturating_sub(timing.start_delay)),
        ),
        CountdownToHide => (
            HideOverlay,
            DeviceStep::Send(Command::set(CommandId::CalibrateShow).with_state(false)),
        ),
        HideOverlay | Complete => (Complete, DeviceStep::Finished),
    }
}

pub struct DeviceCalibration {
    timing: CalibrationTiming,
    phase: CalibrationPhase,
}

impl DeviceCalibration {
    pub fn new(timing: CalibrationTiming) -> Self {
        Self {
            timing,
            phase: CalibrationPhase::Idle,
        }
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    /// Resolves once the overlay-hide command has gone out.
    pub async fn run(&mut self, tracker: &AckTracker) -> DeviceCalibrationOutcome {
        info!("[cal] device calibration starting");
        loop {
            let (next, step) = next_step(self.phase, &self.timing);
            debug!("[cal] {:?} -> {:?}", self.phase, next);
            match step {
                DeviceStep::Send(cmd) => {
                    if tracker.send_without_ack(&cmd) == SendOutcome::NotConnected {
                        warn!("[cal] aborted in {:?}: not connected", self.phase);
                        return DeviceCalibrationOutcome::NotConnected;
                    }
                }
                DeviceStep::Wait(d) => tokio::time::sleep(d).await,
                DeviceStep::Finished => {
                    self.phase = next;
                    info!("[cal] device calibration complete");
                    return DeviceCalibrationOutcome::Complete;
                }
            }
            self.phase = next;
        }
    }
}
