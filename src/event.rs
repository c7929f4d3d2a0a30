// BAWM EVENT LOG
// ONE LINE PER REGIME TRANSITION, APPENDED TO A PER-HOST FILE:
//
//   [2025-11-20T01:23:45.123Z] load=CPU
//
// UTC, MILLISECOND PRECISION, Z SUFFIX: LINES SORT LEXICOGRAPHICALLY.
// THE FILE IS OPENED PER RECORD SO ROTATION OR DELETION IS PICKED UP.
// A WRITE FAILURE IS LOGGED AND DROPPED. IT MUST NEVER STOP DISPATCH.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::warn;

use crate::regime::Regime;

pub const DETAIL_SUFFIX: &str = "-test_detail.txt";

pub fn format_line(ts: DateTime<Utc>, regime: Regime) -> String {
    format!(
        "[{}] load={}\n",
        ts.to_rfc3339_opts(SecondsFormat::Millis, true),
        regime.label()
    )
}

// <dir>/<host>-test_detail.txt
pub fn host_log_path(dir: impl AsRef<Path>, host: &str) -> PathBuf {
    dir.as_ref().join(format!("{}{}", host, DETAIL_SUFFIX))
}

pub struct EventLog {
    path: PathBuf,
    written: u64,
    dropped: u64,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            written: 0,
            dropped: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, regime: Regime) {
        self.record_at(Utc::now(), regime);
    }

    pub fn record_at(&mut self, ts: DateTime<Utc>, regime: Regime) {
        let line = format_line(ts, regime);
        let res = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        match res {
            Ok(()) => self.written += 1,
            Err(e) => {
                self.dropped += 1;
                warn!(path = %self.path.display(), %regime, error = %e,
                      "regime event not recorded");
            }
        }
    }

    // (WRITTEN, DROPPED)
    pub fn summary(&self) -> (u64, u64) {
        (self.written, self.dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn line_format_is_fixed_precision_utc() {
        let ts = Utc.with_ymd_and_hms(2025, 11, 20, 1, 23, 45).unwrap();
        assert_eq!(
            format_line(ts, Regime::Parallel),
            "[2025-11-20T01:23:45.000Z] load=PARALLEL\n"
        );
    }

    #[test]
    fn lines_sort_chronologically() {
        let a = format_line(Utc.with_ymd_and_hms(2025, 1, 9, 23, 59, 59).unwrap(), Regime::Cpu);
        let b = format_line(Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap(), Regime::Cpu);
        assert!(a < b);
    }

    #[test]
    fn record_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = host_log_path(dir.path(), "vm2");
        let mut log = EventLog::new(&path);
        log.record(Regime::Cpu);
        log.record(Regime::Io);
        let body = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] load=CPU"));
        assert!(lines[1].ends_with("] load=IO"));
        assert_eq!(log.summary(), (2, 0));
    }

    #[test]
    fn unwritable_target_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        // PARENT DIRECTORY DOES NOT EXIST
        let mut log = EventLog::new(dir.path().join("missing").join("x.txt"));
        log.record(Regime::Mem); // SHOULD NOT PANIC
        assert_eq!(log.summary(), (0, 1));
    }

    #[test]
    fn host_path_naming() {
        assert_eq!(
            host_log_path("/var/log/bawm", "vm2"),
            PathBuf::from("/var/log/bawm/vm2-test_detail.txt")
        );
    }
}
