use tokio::time::Duration;
use tracing::{debug, info};

use super::device::{DeviceCalibration, DeviceCalibrationOutcome};
use crate::ack::AckTracker;
use crate::config::CalibrationTiming;
use crate::host::Host;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenPhase {
    AwaitUserStart,
    AwaitFirstPointStare,
    AwaitSecondPointStare,
    Done,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenEvent {
    Confirmed,
    Declined,
    DeviceCalibrated,
    StareElapsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prompt {
    pub message: &'static str,
    pub confirm: &'static str,
}

pub const START_PROMPT: Prompt = Prompt {
    message: "Calibrate the eye tracker? Sit as you normally would and follow the dots on screen.",
    confirm: "Start calibration",
};
pub const FIRST_POINT_PROMPT: Prompt = Prompt {
    message: "Look at the first marker (top left of the sheet). Press the button and keep staring at it.",
    confirm: "5 seconds",
};
pub const SECOND_POINT_PROMPT: Prompt = Prompt {
    message: "Now look at the second marker (bottom right of the sheet). Press the button and keep staring at it.",
    confirm: "5 seconds",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenEffect {
    Prompt(Prompt),
    RunDeviceCalibration,
    Stare(Duration),
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenCalibrationOutcome {
    Done,
    Cancelled,
    NotConnected,
}

/// `(phase, event) -> (phase, effect)` for the two-point screen calibration.
/// `None` means the event has no meaning in that phase.
pub fn transition(
    phase: ScreenPhase,
    event: ScreenEvent,
    timing: &CalibrationTiming,
) -> Option<(ScreenPhase, ScreenEffect)> {
    use ScreenEvent::*;
    use ScreenPhase::*;
    match (phase, event) {
        (Done | Cancelled, _) => None,
        (_, Declined) => Some((Cancelled, ScreenEffect::Finish)),

        (AwaitUserStart, Confirmed) => Some((AwaitUserStart, ScreenEffect::RunDeviceCalibration)),
        (AwaitUserStart, DeviceCalibrated) => Some((
            AwaitFirstPointStare,
            ScreenEffect::Prompt(FIRST_POINT_PROMPT),
        )),

        (AwaitFirstPointStare, Confirmed) => {
            Some((AwaitFirstPointStare, ScreenEffect::Stare(timing.stare_window)))
        }
        (AwaitFirstPointStare, StareElapsed) => Some((
            AwaitSecondPointStare,
            ScreenEffect::Prompt(SECOND_POINT_PROMPT),
        )),

        (AwaitSecondPointStare, Confirmed) => {
            Some((AwaitSecondPointStare, ScreenEffect::Stare(timing.stare_window)))
        }
        (AwaitSecondPointStare, StareElapsed) => Some((Done, ScreenEffect::Finish)),

        _ => None,
    }
}

/// The user-gated wrapper around a device calibration run.
pub struct ScreenCalibration {
    timing: CalibrationTiming,
    phase: ScreenPhase,
}

impl ScreenCalibration {
    pub fn new(timing: CalibrationTiming) -> Self {
        Self {
            timing,
            phase: ScreenPhase::AwaitUserStart,
        }
    }

    pub fn phase(&self) -> ScreenPhase {
        self.phase
    }

    pub async fn run<H: Host>(
        &mut self,
        host: &H,
        tracker: &AckTracker,
    ) -> ScreenCalibrationOutcome {
        let mut effect = ScreenEffect::Prompt(START_PROMPT);
        loop {
            let event = match effect {
                ScreenEffect::Prompt(prompt) => {
                    let answer = host.notify(prompt.message, &[prompt.confirm]).await;
                    if answer.as_deref() == Some(prompt.confirm) {
                        ScreenEvent::Confirmed
                    } else {
                        ScreenEvent::Declined
                    }
                }
                ScreenEffect::RunDeviceCalibration => {
                    let mut device = DeviceCalibration::new(self.timing);
                    match device.run(tracker).await {
                        DeviceCalibrationOutcome::Complete => ScreenEvent::DeviceCalibrated,
                        DeviceCalibrationOutcome::NotConnected => {
                            return ScreenCalibrationOutcome::NotConnected;
                        }
                    }
                }
                ScreenEffect::Stare(window) => {
                    tokio::time::sleep(window).await;
                    ScreenEvent::StareElapsed
                }
                ScreenEffect::Finish => {
                    info!("[screen] finished in {:?}", self.phase);
                    return match self.phase {
                        ScreenPhase::Done => ScreenCalibrationOutcome::Done,
                        _ => ScreenCalibrationOutcome::Cancelled,
                    };
                }
            };

            // Every effect above produces an event its phase accepts.
            let Some((next, next_effect)) = transition(self.phase, event, &self.timing) else {
                debug!("[screen] {:?} ignored in {:?}", event, self.phase);
                return ScreenCalibrationOutcome::Cancelled;
            };
            debug!("[screen] {:?} --{:?}--> {:?}", self.phase, event, next);
            self.phase = next;
            effect = next_effect;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::connection::Connection;
    use crate::host::scripted::ScriptedHost;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::task::LocalSet;
    use tokio::time::Instant;

    #[test]
    fn decline_cancels_from_any_open_phase() {
        let t = CalibrationTiming::default();
        for phase in [
            ScreenPhase::AwaitUserStart,
            ScreenPhase::AwaitFirstPointStare,
            ScreenPhase::AwaitSecondPointStare,
        ] {
            assert_eq!(
                transition(phase, ScreenEvent::Declined, &t),
                Some((ScreenPhase::Cancelled, ScreenEffect::Finish))
            );
        }
        assert_eq!(transition(ScreenPhase::Done, ScreenEvent::Declined, &t), None);
    }

    #[test]
    fn happy_path_transitions() {
        let t = CalibrationTiming::default();
        let mut phase = ScreenPhase::AwaitUserStart;
        let mut effects = Vec::new();
        for event in [
            ScreenEvent::Confirmed,
            ScreenEvent::DeviceCalibrated,
            ScreenEvent::Confirmed,
            ScreenEvent::StareElapsed,
            ScreenEvent::Confirmed,
            ScreenEvent::StareElapsed,
        ] {
            let (next, effect) = transition(phase, event, &t).unwrap();
            phase = next;
            effects.push(effect);
        }
        assert_eq!(phase, ScreenPhase::Done);
        assert_eq!(
            effects,
            vec![
                ScreenEffect::RunDeviceCalibration,
                ScreenEffect::Prompt(FIRST_POINT_PROMPT),
                ScreenEffect::Stare(t.stare_window),
                ScreenEffect::Prompt(SECOND_POINT_PROMPT),
                ScreenEffect::Stare(t.stare_window),
                ScreenEffect::Finish,
            ]
        );
    }

    #[test]
    fn out_of_order_events_are_rejected() {
        let t = CalibrationTiming::default();
        assert_eq!(
            transition(ScreenPhase::AwaitUserStart, ScreenEvent::StareElapsed, &t),
            None
        );
        assert_eq!(
            transition(ScreenPhase::AwaitFirstPointStare, ScreenEvent::DeviceCalibrated, &t),
            None
        );
    }

    fn connected_tracker() -> (AckTracker, tokio::io::DuplexStream) {
        let conn = Connection::new(&ClientConfig::default());
        let (client, device) = tokio::io::duplex(4096);
        conn.attach(client);
        (AckTracker::attach(&conn, 5), device)
    }

    #[tokio::test(start_paused = true)]
    async fn all_confirmed_ends_done() {
        LocalSet::new()
            .run_until(async {
                let (tracker, device) = connected_tracker();
                let host = ScriptedHost::new(
                    None,
                    &[Some("Start calibration"), Some("5 seconds"), Some("5 seconds")],
                );
                let t0 = Instant::now();
                let mut cal = ScreenCalibration::new(CalibrationTiming::default());
                assert_eq!(cal.run(&host, &tracker).await, ScreenCalibrationOutcome::Done);
                assert_eq!(cal.phase(), ScreenPhase::Done);
                // 11s device run + two 6s stares.
                assert!(t0.elapsed() >= Duration::from_secs(23));
                assert_eq!(host.prompts.borrow().len(), 3);

                drop(tracker);
                let mut lines = BufReader::new(device).lines();
                let mut sent = 0;
                while let Ok(Some(_)) = lines.next_line().await {
                    sent += 1;
                }
                assert_eq!(sent, 4);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn decline_at_start_sends_nothing() {
        LocalSet::new()
            .run_until(async {
                let (tracker, _device) = connected_tracker();
                let host = ScriptedHost::new(None, &[None]);
                let mut cal = ScreenCalibration::new(CalibrationTiming::default());
                assert_eq!(
                    cal.run(&host, &tracker).await,
                    ScreenCalibrationOutcome::Cancelled
                );
                assert_eq!(cal.phase(), ScreenPhase::Cancelled);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_choice_counts_as_decline() {
        LocalSet::new()
            .run_until(async {
                let (tracker, _device) = connected_tracker();
                let host = ScriptedHost::new(None, &[Some("Start calibration"), Some("later")]);
                let mut cal = ScreenCalibration::new(CalibrationTiming::default());
                assert_eq!(
                    cal.run(&host, &tracker).await,
                    ScreenCalibrationOutcome::Cancelled
                );
                assert_eq!(host.prompts.borrow().len(), 2);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_device_run_is_reported() {
        LocalSet::new()
            .run_until(async {
                let conn = Connection::new(&ClientConfig::default());
                let tracker = AckTracker::attach(&conn, 5);
                let host = ScriptedHost::new(None, &[Some("Start calibration")]);
                let mut cal = ScreenCalibration::new(CalibrationTiming::default());
                assert_eq!(
                    cal.run(&host, &tracker).await,
                    ScreenCalibrationOutcome::NotConnected
                );
            })
            .await;
    }
}
