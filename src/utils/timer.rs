//! Timing of suites, cases and whole runs

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use crate::results::ResultNode;

/// Wall-clock start plus a monotonic clock for the duration
#[derive(Debug)]
pub struct Timer {
    label: String,
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }

    /// Write `start-time`, `end-time` and `duration`
    pub fn stamp(&self, node: &mut ResultNode) {
        node.set_attr("start-time", format_time(self.started_at));
        self.stamp_end(node);
    }

    /// Write `end-time` and `duration` only, for nodes that already carry
    /// their own start attributes
    pub fn stamp_end(&self, node: &mut ResultNode) {
        let elapsed = self.elapsed();
        node.set_attr("end-time", format_time(Utc::now()));
        node.set_attr("duration", format!("{:.6}", elapsed.as_secs_f64()));
        tracing::trace!("{}: {}ms", self.label, elapsed.as_millis());
    }
}

/// Timestamp format used for start and end times
pub fn format_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_stamp() {
        let timer = Timer::start("suite");
        sleep(Duration::from_millis(10));

        let mut node = ResultNode::new("test-suite");
        timer.stamp(&mut node);

        assert!(node.attr("start-time").unwrap().ends_with('Z'));
        assert!(node.attr("end-time").is_some());
        let duration: f64 = node.attr("duration").unwrap().parse().unwrap();
        assert!(duration >= 0.01);
        assert_eq!(node.attr("duration").unwrap().split('.').nth(1).unwrap().len(), 6);
    }

    #[test]
    fn test_format_time() {
        let time = DateTime::parse_from_rfc3339("2024-03-05T07:08:09Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_time(time), "2024-03-05 07:08:09Z");
    }
}
