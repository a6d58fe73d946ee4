use tracing::{debug, info};

use crate::connection::Connection;
use crate::proto::{GazePoint, Record, TelemetryRecord};

pub trait TelemetrySink {
    fn on_telemetry(&mut self, record: &TelemetryRecord);
}

impl<F: FnMut(&TelemetryRecord)> TelemetrySink for F {
    fn on_telemetry(&mut self, record: &TelemetryRecord) {
        self(record)
    }
}

/// Writes a one-line gaze summary through `tracing`.
#[derive(Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn on_telemetry(&mut self, record: &TelemetryRecord) {
        info!("[gaze] {}", summarize(record));
    }
}

pub fn summarize(record: &TelemetryRecord) -> String {
    fn point(p: Option<GazePoint>) -> String {
        match p {
            Some(p) => format!("({:.3},{:.3}){}", p.x, p.y, if p.valid { "" } else { "?" }),
            None => "-".into(),
        }
    }
    format!(
        "cnt={} fix={} best={} cursor={}",
        record
            .counter()
            .map_or_else(|| "-".to_string(), |c| c.to_string()),
        point(record.fixation()),
        point(record.best_point()),
        point(record.cursor()),
    )
}

/// Lets one frame in `every` through, keyed on the device's frame counter.
/// Frames without a counter are numbered locally from zero.
#[derive(Debug, Clone)]
pub struct Decimator {
    every: u64,
    seen: u64,
}

impl Decimator {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            seen: 0,
        }
    }

    pub fn admit(&mut self, record: &TelemetryRecord) -> bool {
        let n = record.counter().unwrap_or(self.seen);
        self.seen = self.seen.wrapping_add(1);
        n % self.every == 0
    }
}

/// Every frame is decoded; only decimated ones reach `sink`. Calibration
/// progress frames are logged and otherwise dropped.
pub fn attach_sink(conn: &Connection, every: u64, mut sink: impl TelemetrySink + 'static) {
    let mut decimator = Decimator::new(every);
    conn.on_record(move |record| match record {
        Record::Telemetry(frame) => {
            if decimator.admit(frame) {
                sink.on_telemetry(frame);
            }
        }
        Record::Calibration(cal) => debug!("[cal] {} {:?}", cal.id, cal.attributes),
        Record::Ack(_) => {}
    });
}
