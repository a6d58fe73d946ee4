use tokio::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RxStats {
    pub records: u64,
    pub malformed: u64,
    /// Empty-record markers, blank lines, unknown ids and stray commands.
    pub ignored: u64,
    pub bytes: u64,
    window_records: u64,
    window_bytes: u64,
    t0: Instant,
    last: Instant,
}

impl Default for RxStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RxStats {
    pub fn new() -> Self {
        Self {
            records: 0,
            malformed: 0,
            ignored: 0,
            bytes: 0,
            window_records: 0,
            window_bytes: 0,
            t0: Instant::now(),
            last: Instant::now(),
        }
    }
    pub fn add_bytes(&mut self, n: usize) {
        self.bytes += n as u64;
        self.window_bytes += n as u64;
    }
    pub fn inc_record(&mut self) {
        self.records += 1;
        self.window_records += 1;
    }
    pub fn inc_malformed(&mut self) {
        self.malformed += 1;
    }
    pub fn inc_ignored(&mut self) {
        self.ignored += 1;
    }

    /// Totals plus the rate since the previous report.
    pub fn maybe_log(&mut self, interval: Duration) {
        if self.last.elapsed() >= interval {
            let (rate, byte_rate, dur) = self.take_window();
            debug!(
                records = self.records,
                malformed = self.malformed,
                ignored = self.ignored,
                bytes = self.bytes,
                "[rx] {:.1} records/s, {:.1} kB/s over {:.1}s",
                rate,
                byte_rate / 1000.0,
                dur
            );
            self.last = Instant::now();
        }
    }

    fn take_window(&mut self) -> (f64, f64, f64) {
        let dur = self.t0.elapsed().as_secs_f64().max(1e-3);
        let rates = (
            self.window_records as f64 / dur,
            self.window_bytes as f64 / dur,
            dur,
        );
        self.t0 = Instant::now();
        self.window_records = 0;
        self.window_bytes = 0;
        rates
    }
}
