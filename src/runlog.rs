// BAWM HISTORICAL LOG READERS
// RUN LOGS (BENCHMARK HARNESS) AND REGIME EVENT LOGS (event.rs), ONE HOST EACH.
//
//   RUN:   2025-11-20T01:23:45-06:00 iter=1 name=sysbench_cpu status=0 elapsed_ms=4213
//   EVENT: [2025-11-20T07:23:41.000Z] load=CPU
//
// BOTH FILES ARE APPENDED BY ANOTHER PROCESS WHILE WE READ. A FINAL LINE
// WITHOUT ITS NEWLINE IS STILL BEING WRITTEN AND IS DROPPED. A MISSING FILE
// IS AN EMPTY LOG. A BAD LINE IS SKIPPED.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use regex::Regex;
use tracing::{debug, warn};

use crate::regime::Regime;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunRecord {
    pub name: String,
    pub iter: u64,
    // SYNTHETIC: end - elapsed
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub elapsed_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegimeEvent {
    pub ts: DateTime<Utc>,
    pub regime: Regime,
}

// RFC 3339 WITH ANY OFFSET. NO OFFSET MEANS UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn parse_run_line(line: &str) -> Option<RunRecord> {
    let mut parts = line.split_whitespace();
    let end = parse_timestamp(parts.next()?)?;

    let mut name = None;
    let mut iter = 0u64;
    let mut elapsed_ms = 0u64;
    for frag in parts {
        let Some((k, v)) = frag.split_once('=') else {
            continue;
        };
        match k {
            "name" => name = Some(v.to_string()),
            "iter" => iter = v.parse().ok()?,
            "elapsed_ms" => elapsed_ms = v.parse().ok()?,
            _ => {}
        }
    }

    // OUT-OF-RANGE ELAPSED DROPS THE LINE
    let elapsed = Duration::try_milliseconds(i64::try_from(elapsed_ms).ok()?)?;
    let start = end.checked_sub_signed(elapsed)?;
    Some(RunRecord {
        name: name?,
        iter,
        start,
        end,
        elapsed_ms,
    })
}

fn event_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[([^\]]+)\]\s*load=(\S+)$").expect("event regex"))
}

pub fn parse_event_line(line: &str) -> Option<RegimeEvent> {
    let caps = event_re().captures(line)?;
    Some(RegimeEvent {
        ts: parse_timestamp(&caps[1])?,
        regime: caps[2].parse().ok()?,
    })
}

// COMPLETE (NEWLINE-TERMINATED) LINES ONLY
fn complete_lines(path: &Path) -> Vec<String> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "log not found, treating as empty");
            return Vec::new();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "log unreadable, treating as empty");
            return Vec::new();
        }
    };
    let text = String::from_utf8_lossy(&bytes);
    let body = match text.rfind('\n') {
        Some(i) => &text[..i],
        None => "",
    };
    body.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn read_with<T>(path: &Path, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Vec<T> {
    let mut out = Vec::new();
    let mut skipped = 0usize;
    for line in complete_lines(path) {
        match parse(&line) {
            Some(rec) => out.push(rec),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(path = %path.display(), skipped, kind, "skipped malformed lines");
    }
    out
}

pub fn read_runs(path: impl AsRef<Path>) -> Vec<RunRecord> {
    read_with(path.as_ref(), "run", parse_run_line)
}

pub fn read_events(path: impl AsRef<Path>) -> Vec<RegimeEvent> {
    read_with(path.as_ref(), "event", parse_event_line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn run_line_with_offset() {
        let r = parse_run_line(
            "2025-11-20T01:23:45-06:00 iter=1 name=sysbench_cpu status=0 elapsed_ms=4213",
        )
        .unwrap();
        assert_eq!(r.name, "sysbench_cpu");
        assert_eq!(r.iter, 1);
        assert_eq!(r.elapsed_ms, 4213);
        assert_eq!(r.end, Utc.with_ymd_and_hms(2025, 11, 20, 7, 23, 45).unwrap());
        assert_eq!(r.end - r.start, Duration::milliseconds(4213));
    }

    #[test]
    fn run_line_defaults_and_rejects() {
        // NO iter / elapsed_ms: BOTH DEFAULT TO 0
        let r = parse_run_line("2025-11-20T01:00:00 name=x").unwrap();
        assert_eq!(r.iter, 0);
        assert_eq!(r.start, r.end);
        // NO NAME
        assert!(parse_run_line("2025-11-20T01:00:00 iter=1 elapsed_ms=5").is_none());
        // BAD TIMESTAMP
        assert!(parse_run_line("yesterday name=x elapsed_ms=5").is_none());
        // NON-NUMERIC ELAPSED
        assert!(parse_run_line("2025-11-20T01:00:00 name=x elapsed_ms=fast").is_none());
        // TIMESTAMP ONLY
        assert!(parse_run_line("2025-11-20T01:00:00").is_none());
    }

    #[test]
    fn run_line_elapsed_out_of_range_is_rejected() {
        // FITS i64 MILLIS BUT START WOULD PRECEDE THE REPRESENTABLE RANGE
        assert!(parse_run_line(
            "2025-11-20T10:00:05Z iter=1 name=X status=0 elapsed_ms=9223372036854775807"
        )
        .is_none());
        // u64::MAX DOES NOT FIT i64
        assert!(parse_run_line(
            "2025-11-20T10:00:05Z iter=1 name=X status=0 elapsed_ms=18446744073709551615"
        )
        .is_none());
    }

    #[test]
    fn huge_elapsed_line_skipped_rest_kept() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("vm2-test.txt");
        fs::write(
            &p,
            "2025-11-20T10:00:05Z iter=1 name=X status=0 elapsed_ms=18446744073709551615\n\
             2025-11-20T10:00:05Z iter=1 name=X status=0 elapsed_ms=9223372036854775807\n\
             2025-11-20T10:01:05Z iter=2 name=X status=0 elapsed_ms=5000\n",
        )
        .unwrap();
        let runs = read_runs(&p);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].elapsed_ms, 5000);
        assert!(runs[0].start <= runs[0].end);
    }

    #[test]
    fn event_line_roundtrip_with_logger_format() {
        let ts = Utc.with_ymd_and_hms(2025, 11, 20, 1, 23, 45).unwrap();
        let line = crate::event::format_line(ts, Regime::Io);
        let ev = parse_event_line(line.trim_end()).unwrap();
        assert_eq!(ev.ts, ts);
        assert_eq!(ev.regime, Regime::Io);
    }

    #[test]
    fn event_line_rejects_garbage() {
        assert!(parse_event_line("2025-11-20T01:23:45Z load=CPU").is_none());
        assert!(parse_event_line("[2025-11-20T01:23:45Z] regime=CPU").is_none());
        assert!(parse_event_line("[2025-11-20T01:23:45Z] load=GPU").is_none());
        assert!(parse_event_line("[not-a-time] load=CPU").is_none());
        let ev = parse_event_line("[2025-11-20T01:23:45+00:00] load=NET").unwrap();
        assert_eq!(ev.regime, Regime::Net);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_runs(dir.path().join("vm1-test.txt")).is_empty());
        assert!(read_events(dir.path().join("vm2-test_detail.txt")).is_empty());
    }

    #[test]
    fn partial_final_line_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("vm2-test_detail.txt");
        fs::write(
            &p,
            "[2025-11-20T01:00:00.000Z] load=CPU\n\
             garbage line\n\
             \n\
             [2025-11-20T01:00:03.000Z] load=IO\n\
             [2025-11-20T01:00:06.000Z] load=ME",
        )
        .unwrap();
        let evs = read_events(&p);
        assert_eq!(evs.len(), 2);
        assert_eq!(evs[1].regime, Regime::Io);
    }
}
