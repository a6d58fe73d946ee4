use std::collections::BTreeMap;

/// Outgoing verb. The device answers both with an `<ACK .../>` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Set,
    Get,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandId {
    // ---- Calibration lifecycle ----
    CalibrateReset,
    CalibrateShow,
    CalibrateStart,
    CalibrateTimeout,
    CalibrateDelay,
    CalibrateResultSummary,

    // ---- Data stream switches ----
    EnableSendData,
    EnableSendCounter,
    EnableSendCursor,
    EnableSendPogBest,
    EnableSendPogFix,

    // ---- Display ----
    TrackerDisplay,
}

impl CommandId {
    pub const ALL: [CommandId; 12] = [
        CommandId::CalibrateReset,
        CommandId::CalibrateShow,
        CommandId::CalibrateStart,
        CommandId::CalibrateTimeout,
        CommandId::CalibrateDelay,
        CommandId::CalibrateResultSummary,
        CommandId::EnableSendData,
        CommandId::EnableSendCounter,
        CommandId::EnableSendCursor,
        CommandId::EnableSendPogBest,
        CommandId::EnableSendPogFix,
        CommandId::TrackerDisplay,
    ];
}

/// A single outgoing instruction. Parameters keep insertion order on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    mode: Mode,
    id: CommandId,
    params: Vec<(String, String)>,
}

impl Command {
    pub fn set(id: CommandId) -> Self {
        Self {
            mode: Mode::Set,
            id,
            params: Vec::new(),
        }
    }

    pub fn get(id: CommandId) -> Self {
        Self {
            mode: Mode::Get,
            id,
            params: Vec::new(),
        }
    }

    /// Append a parameter. Setting a key twice keeps the first position and the last value.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        let key = key.into();
        let value = value.to_string();
        match self.params.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.params.push((key, value)),
        }
        self
    }

    /// `STATE="1"` / `STATE="0"`, the switch used by every enable/show command.
    pub fn with_state(self, on: bool) -> Self {
        self.with("STATE", if on { 1 } else { 0 })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

/// `<ACK ID="..." .../>`: confirmation for a SET/GET. Attributes exclude `ID`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRecord {
    pub id: CommandId,
    pub attributes: BTreeMap<String, String>,
}

/// `<CAL ID="..." .../>`: calibration progress reported by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationRecord {
    pub id: String,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazePoint {
    pub x: f64,
    pub y: f64,
    pub valid: bool,
}

/// `<REC .../>`: one gaze frame, kept as the flat attribute map the device sent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TelemetryRecord {
    pub fields: BTreeMap<String, String>,
}

impl TelemetryRecord {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|s| s.as_str())
    }

    /// Frame counter (`CNT`), present once `ENABLE_SEND_COUNTER` is on.
    pub fn counter(&self) -> Option<u64> {
        self.get("CNT").and_then(|v| v.parse().ok())
    }

    /// Fixation point of gaze.
    pub fn fixation(&self) -> Option<GazePoint> {
        self.point("FPOGX", "FPOGY", "FPOGV")
    }

    /// Best point of gaze.
    pub fn best_point(&self) -> Option<GazePoint> {
        self.point("BPOGX", "BPOGY", "BPOGV")
    }

    /// Cursor position; `CS` is the cursor state rather than a validity flag,
    /// so any reported position counts as valid.
    pub fn cursor(&self) -> Option<GazePoint> {
        let x = self.get("CX")?.parse().ok()?;
        let y = self.get("CY")?.parse().ok()?;
        Some(GazePoint { x, y, valid: true })
    }

    fn point(&self, x: &str, y: &str, valid: &str) -> Option<GazePoint> {
        Some(GazePoint {
            x: self.get(x)?.parse().ok()?,
            y: self.get(y)?.parse().ok()?,
            valid: self.get(valid).is_some_and(|v| v == "1"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Ack(AckRecord),
    Telemetry(TelemetryRecord),
    Calibration(CalibrationRecord),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_keeps_insertion_order_and_overwrites() {
        let cmd = Command::set(CommandId::CalibrateShow)
            .with("B", 2)
            .with("A", 1)
            .with("B", 3);
        assert_eq!(
            cmd.params(),
            &[("B".to_string(), "3".to_string()), ("A".to_string(), "1".to_string())]
        );
    }

    #[test]
    fn telemetry_accessors() {
        let mut rec = TelemetryRecord::default();
        for (k, v) in [
            ("CNT", "360"),
            ("FPOGX", "0.25"),
            ("FPOGY", "0.75"),
            ("FPOGV", "1"),
            ("BPOGX", "0.5"),
            ("BPOGY", "0.5"),
            ("BPOGV", "0"),
        ] {
            rec.fields.insert(k.into(), v.into());
        }
        assert_eq!(rec.counter(), Some(360));
        assert_eq!(
            rec.fixation(),
            Some(GazePoint {
                x: 0.25,
                y: 0.75,
                valid: true
            })
        );
        assert!(!rec.best_point().unwrap().valid);
        assert_eq!(rec.cursor(), None);
    }
}
