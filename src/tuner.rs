// BAWM OFFLINE TUNER
// ONE-SHOT: COMPARE TWO HOSTS' BENCHMARK RUNS, FIND WHICH REGIMES THE FASTER
// SECONDARY HOST WAS IN WHILE IT WON, PROMOTE THOSE SECONDARY ASSIGNMENTS
// TO PRIMARY, THEN RANDOMIZE ONE SECONDARY ASSIGNMENT FOR THE NEXT ROUND.
//
// ANY UNMET PRECONDITION ABORTS BEFORE A SINGLE FILE IS WRITTEN.
//
// AN EXPLORED SECONDARY VALUE IS "UNTESTED" UNTIL A SECONDARY RUN FINISHES
// AFTER THE EXPLORATION. UNTESTED VALUES ARE NEVER PROMOTED. THIS KEEPS TWO
// BACK-TO-BACK INVOCATIONS ON THE SAME DATA FROM PROMOTING A RANDOM PICK.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, SecondsFormat, TimeZone, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use tracing::{info, warn};

use crate::config::{self, Config};
use crate::regime::Regime;
use crate::runlog::{self, parse_timestamp, RegimeEvent, RunRecord};

// SCHEDULERS THE EXPLORATION STEP DRAWS FROM (RELATIVE TO SCHED_PATH)
pub const EXPLORE_CHOICES: [&str; 5] = [
    "build/scheds/c/scx_simple",
    "target/release/scx_bpfland",
    "build/scheds/c/scx_central",
    "build/scheds/c/scx_prev",
    "target/release/scx_flash",
];

pub const PRIMARY_RUNS: &str = "vm1-test.txt";
pub const SECONDARY_RUNS: &str = "vm2-test.txt";
pub const SECONDARY_EVENTS: &str = "vm2-test_detail.txt";
pub const AUDIT_LOG: &str = "results.log";

#[derive(Clone, Debug)]
pub struct TunerPaths {
    pub primary_runs: PathBuf,
    pub secondary_runs: PathBuf,
    pub secondary_events: PathBuf,
    pub primary_config: PathBuf,
    pub secondary_config: PathBuf,
    pub audit_log: PathBuf,
}

impl TunerPaths {
    pub fn new(data_dir: impl AsRef<Path>, config_dir: impl AsRef<Path>) -> Self {
        let data = data_dir.as_ref();
        Self {
            primary_runs: data.join(PRIMARY_RUNS),
            secondary_runs: data.join(SECONDARY_RUNS),
            secondary_events: data.join(SECONDARY_EVENTS),
            primary_config: config::main_path(&config_dir),
            secondary_config: config::alt_path(&config_dir),
            audit_log: data.join(AUDIT_LOG),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Abort {
    NoRuns,
    NoSecondaryBetter,
    NoEvents,
    NoCandidates,
}

impl fmt::Display for Abort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoRuns => "no runs found in primary/secondary run logs; exiting",
            Self::NoSecondaryBetter => "no benchmarks where secondary is faster than primary; no config changes",
            Self::NoEvents => "no regime events for secondary host; cannot infer workloads",
            Self::NoCandidates => "no regimes observed within secondary-better run intervals; nothing to sync",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Exploration {
    pub key: Regime,
    pub old: String,
    pub new: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    pub secondary_better: Vec<String>,
    pub candidates: BTreeSet<Regime>,
    pub changed: Vec<Regime>,
    pub untested: Vec<Regime>,
    pub exploration: Option<Exploration>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Aborted(Abort),
    Applied(Report),
}

// --- ANALYSIS (PURE) ---

pub fn averages(runs: &[RunRecord]) -> BTreeMap<String, f64> {
    // u128 SUM: u64 DURATIONS CANNOT OVERFLOW IT
    let mut acc: BTreeMap<&str, (u128, u64)> = BTreeMap::new();
    for r in runs {
        let e = acc.entry(r.name.as_str()).or_insert((0, 0));
        e.0 += u128::from(r.elapsed_ms);
        e.1 += 1;
    }
    acc.into_iter()
        .map(|(name, (sum, n))| (name.to_string(), sum as f64 / n as f64))
        .collect()
}

// BENCHMARKS PRESENT ON BOTH HOSTS WHERE SECONDARY AVERAGES STRICTLY FASTER
pub fn secondary_better(
    primary: &BTreeMap<String, f64>,
    secondary: &BTreeMap<String, f64>,
) -> BTreeSet<String> {
    secondary
        .iter()
        .filter(|(name, avg2)| primary.get(*name).is_some_and(|avg1| *avg2 < avg1))
        .map(|(name, _)| name.clone())
        .collect()
}

// INTERVAL JOIN. EVENTS SORTED ONCE, EACH RUN BINARY-SEARCHES ITS [start, end].
pub fn candidate_regimes(
    runs: &[RunRecord],
    better: &BTreeSet<String>,
    events: &[RegimeEvent],
) -> BTreeSet<Regime> {
    let mut sorted = events.to_vec();
    sorted.sort_by_key(|e| e.ts);

    let mut out = BTreeSet::new();
    for run in runs.iter().filter(|r| better.contains(&r.name)) {
        let lo = sorted.partition_point(|e| e.ts < run.start);
        out.extend(
            sorted[lo..]
                .iter()
                .take_while(|e| e.ts <= run.end)
                .map(|e| e.regime),
        );
    }
    out
}

// COPY DIFFERING SECONDARY ASSIGNMENTS INTO A NEW PRIMARY.
// RETURNS (NEW PRIMARY, CHANGED KEYS, UNTESTED KEYS LEFT ALONE).
pub fn sync_primary(
    primary: &Config,
    secondary: &Config,
    candidates: &BTreeSet<Regime>,
    untested: &BTreeSet<Regime>,
) -> (Config, Vec<Regime>, Vec<Regime>) {
    let mut next = primary.clone();
    let mut changed = Vec::new();
    let mut skipped = Vec::new();
    for &key in candidates {
        let (Some(mine), Some(theirs)) = (primary.scheds.get(&key), secondary.scheds.get(&key)) else {
            continue;
        };
        if mine == theirs {
            continue;
        }
        if untested.contains(&key) {
            skipped.push(key);
            continue;
        }
        next.scheds.insert(key, theirs.clone());
        changed.push(key);
    }
    (next, changed, skipped)
}

// PICK ONE SECONDARY KEY AND ONE CANDIDATE BINARY. MAY PICK THE CURRENT VALUE.
pub fn explore<R: Rng + ?Sized>(secondary: &Config, rng: &mut R) -> Option<(Config, Exploration)> {
    let keys: Vec<Regime> = secondary.scheds.keys().copied().collect();
    let key = *keys.choose(rng)?;
    let new = EXPLORE_CHOICES.choose(rng)?.to_string();
    let mut next = secondary.clone();
    let old = next.scheds.insert(key, new.clone()).unwrap_or_default();
    Some((next, Exploration { key, old, new }))
}

// --- AUDIT LOG ---

const TAG: &str = "[decision]";

fn explore_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\[([^\]]+)\] \[decision\] Alt sched randomized for key '([A-Z]+)'")
            .expect("audit regex")
    })
}

// LATEST EXPLORATION TIME PER KEY, FROM PREVIOUS AUDIT BLOCKS
pub fn read_explorations(path: impl AsRef<Path>) -> BTreeMap<Regime, DateTime<Utc>> {
    let path = path.as_ref();
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(_) => return BTreeMap::new(),
    };
    let mut out: BTreeMap<Regime, DateTime<Utc>> = BTreeMap::new();
    for caps in text.lines().filter_map(|l| explore_re().captures(l)) {
        let (Some(ts), Ok(key)) = (parse_timestamp(&caps[1]), caps[2].parse::<Regime>()) else {
            continue;
        };
        let slot = out.entry(key).or_insert(ts);
        if ts > *slot {
            *slot = ts;
        }
    }
    out
}

// KEYS EXPLORED AFTER THE NEWEST SECONDARY RUN ENDED
pub fn untested_keys(
    explorations: &BTreeMap<Regime, DateTime<Utc>>,
    runs: &[RunRecord],
) -> BTreeSet<Regime> {
    let newest = runs.iter().map(|r| r.end).max();
    explorations
        .iter()
        .filter(|(_, &at)| newest.map_or(true, |end| at > end))
        .map(|(&k, _)| k)
        .collect()
}

// AUDIT RENDERING ORDER: BY NAME
fn join_sorted<'a>(regimes: impl IntoIterator<Item = &'a Regime>) -> String {
    let mut labels: Vec<&str> = regimes.into_iter().map(|r| r.label()).collect();
    labels.sort_unstable();
    join(labels)
}

fn join<T: fmt::Display>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn audit_lines<Tz: TimeZone>(now: &DateTime<Tz>, report: &Report) -> Vec<String>
where
    Tz::Offset: fmt::Display,
{
    let ts = now.to_rfc3339_opts(SecondsFormat::Micros, false);
    let mut lines = vec![
        format!("[{}] {} vm2-better benchmarks: {}", ts, TAG, join(&report.secondary_better)),
        format!("[{}] {} workload keys considered: {}", ts, TAG, join_sorted(&report.candidates)),
    ];
    if report.changed.is_empty() {
        lines.push(format!("[{}] {} No changes made to main scheds.", ts, TAG));
    } else {
        lines.push(format!("[{}] {} Updated main scheds for keys: {}", ts, TAG, join_sorted(&report.changed)));
    }
    if !report.untested.is_empty() {
        lines.push(format!("[{}] {} Skipped untested alt keys: {}", ts, TAG, join_sorted(&report.untested)));
    }
    match &report.exploration {
        Some(ex) => lines.push(format!(
            "[{}] {} Alt sched randomized for key '{}': '{}' -> '{}'",
            ts, TAG, ex.key, ex.old, ex.new
        )),
        None => lines.push(format!("[{}] {} No changes made to alt scheds.", ts, TAG)),
    }
    lines
}

fn append_audit(path: &Path, lines: &[String]) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open audit log {}", path.display()))?;
    let mut block = lines.join("\n");
    block.push('\n');
    f.write_all(block.as_bytes())
        .with_context(|| format!("failed to append to {}", path.display()))?;
    Ok(())
}

// --- DRIVER ---

pub fn run<R: Rng + ?Sized>(paths: &TunerPaths, rng: &mut R) -> Result<Outcome> {
    let primary_runs = runlog::read_runs(&paths.primary_runs);
    let secondary_runs = runlog::read_runs(&paths.secondary_runs);
    if primary_runs.is_empty() || secondary_runs.is_empty() {
        return Ok(Outcome::Aborted(Abort::NoRuns));
    }

    let better = secondary_better(&averages(&primary_runs), &averages(&secondary_runs));
    if better.is_empty() {
        return Ok(Outcome::Aborted(Abort::NoSecondaryBetter));
    }

    let events = runlog::read_events(&paths.secondary_events);
    if events.is_empty() {
        return Ok(Outcome::Aborted(Abort::NoEvents));
    }

    let candidates = candidate_regimes(&secondary_runs, &better, &events);
    if candidates.is_empty() {
        return Ok(Outcome::Aborted(Abort::NoCandidates));
    }

    let primary = Config::load(&paths.primary_config)?;
    let secondary = Config::load(&paths.secondary_config)?;

    let untested = untested_keys(&read_explorations(&paths.audit_log), &secondary_runs);
    let (next_primary, changed, skipped) = sync_primary(&primary, &secondary, &candidates, &untested);
    if !changed.is_empty() {
        next_primary.save(&paths.primary_config)?;
        info!(keys = %join(&changed), "primary config updated");
    }
    if !skipped.is_empty() {
        warn!(keys = %join(&skipped), "secondary values not yet benchmarked, left out of primary");
    }

    let exploration = match explore(&secondary, rng) {
        Some((next_secondary, ex)) => {
            next_secondary.save(&paths.secondary_config)?;
            info!(key = %ex.key, old = %ex.old, new = %ex.new, "secondary config randomized");
            Some(ex)
        }
        None => None,
    };

    let report = Report {
        secondary_better: better.into_iter().collect(),
        candidates,
        changed,
        untested: skipped,
        exploration,
    };
    append_audit(&paths.audit_log, &audit_lines(&Local::now(), &report))?;
    Ok(Outcome::Applied(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cfg(pairs: &[(Regime, &str)]) -> Config {
        Config {
            sched_path: "/opt/scx".into(),
            scheds: pairs.iter().map(|(r, s)| (*r, s.to_string())).collect(),
        }
    }

    #[test]
    fn sync_skips_missing_and_equal() {
        let primary = cfg(&[(Regime::Cpu, "a"), (Regime::Io, "same"), (Regime::Mem, "m")]);
        let secondary = cfg(&[(Regime::Cpu, "b"), (Regime::Io, "same"), (Regime::Net, "n")]);
        let cands: BTreeSet<Regime> = [Regime::Cpu, Regime::Io, Regime::Mem, Regime::Net].into();
        let (next, changed, skipped) = sync_primary(&primary, &secondary, &cands, &BTreeSet::new());
        assert_eq!(changed, vec![Regime::Cpu]);
        assert!(skipped.is_empty());
        assert_eq!(next.scheds[&Regime::Cpu], "b");
        assert_eq!(next.scheds[&Regime::Mem], "m");
        assert!(!next.scheds.contains_key(&Regime::Net));
    }

    #[test]
    fn sync_leaves_untested_keys() {
        let primary = cfg(&[(Regime::Cpu, "a")]);
        let secondary = cfg(&[(Regime::Cpu, "b")]);
        let cands: BTreeSet<Regime> = [Regime::Cpu].into();
        let untested: BTreeSet<Regime> = [Regime::Cpu].into();
        let (next, changed, skipped) = sync_primary(&primary, &secondary, &cands, &untested);
        assert!(changed.is_empty());
        assert_eq!(skipped, vec![Regime::Cpu]);
        assert_eq!(next, primary);
    }

    #[test]
    fn averages_survive_huge_durations() {
        let t = Utc.with_ymd_and_hms(2025, 11, 20, 10, 0, 0).unwrap();
        let rec = |ms: u64| RunRecord {
            name: "X".into(),
            iter: 0,
            start: t,
            end: t,
            elapsed_ms: ms,
        };
        let avg = averages(&[rec(u64::MAX), rec(u64::MAX), rec(2)]);
        assert!(avg["X"] > u64::MAX as f64 / 2.0);
    }

    #[test]
    fn audit_lists_regimes_by_name() {
        let now = Utc.with_ymd_and_hms(2025, 11, 20, 12, 0, 0).unwrap();
        let report = Report {
            secondary_better: vec!["X".into()],
            candidates: [Regime::Net, Regime::Mem, Regime::Cpu].into(),
            changed: vec![Regime::Net, Regime::Cpu],
            untested: vec![Regime::Mem, Regime::Idle],
            exploration: None,
        };
        let lines = audit_lines(&now, &report);
        assert!(lines[1].ends_with("workload keys considered: CPU, MEM, NET"));
        assert!(lines[2].ends_with("Updated main scheds for keys: CPU, NET"));
        assert!(lines[3].ends_with("Skipped untested alt keys: IDLE, MEM"));
        assert!(lines[4].ends_with("No changes made to alt scheds."));
    }

    #[test]
    fn explore_empty_config_is_none() {
        let mut rng = rand::thread_rng();
        assert!(explore(&cfg(&[]), &mut rng).is_none());
    }

    #[test]
    fn audit_block_shape() {
        let now = Utc.with_ymd_and_hms(2025, 11, 20, 12, 0, 0).unwrap();
        let report = Report {
            secondary_better: vec!["fio".into(), "iperf".into()],
            candidates: [Regime::Io, Regime::Net].into(),
            changed: vec![],
            untested: vec![],
            exploration: Some(Exploration {
                key: Regime::Mem,
                old: "build/scheds/c/scx_prev".into(),
                new: "target/release/scx_flash".into(),
            }),
        };
        let lines = audit_lines(&now, &report);
        assert_eq!(lines.len(), 4);
        assert!(lines[0].ends_with("[decision] vm2-better benchmarks: fio, iperf"));
        assert!(lines[1].ends_with("workload keys considered: IO, NET"));
        assert!(lines[2].ends_with("No changes made to main scheds."));
        assert!(lines[3].ends_with(
            "Alt sched randomized for key 'MEM': 'build/scheds/c/scx_prev' -> 'target/release/scx_flash'"
        ));
        // THE EXPLORATION LINE MUST BE READABLE BY THE NEXT INVOCATION
        let caps = explore_re().captures(&lines[3]).unwrap();
        assert_eq!(parse_timestamp(&caps[1]), Some(now));
    }
}
