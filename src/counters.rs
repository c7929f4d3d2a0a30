// BAWM COUNTER SOURCE
// READS THE PINNED KEYED COUNTER TABLE FED BY THE KERNEL INSTRUMENTATION
//
// KEYS ARE REGIME INDICES (regime.rs). VALUES GROW UNTIL WE DELETE THEM.
// THE INSTRUMENTATION WRITES CONCURRENTLY: EVERY READ IS A SNAPSHOT RACE AND
// NOTHING HERE PRETENDS OTHERWISE. A KEY DELETED BETWEEN keys() AND get()
// SIMPLY READS AS ZERO.
//
// SLOT 4 (PARALLEL) IS A RUNNABLE-TASK GAUGE, NOT AN EVENT COUNTER.
// THE INSTRUMENTATION INCREMENTS IT ON WAKEUP AND DECREMENTS IT WHEN A TASK
// BLOCKS. DELETING IT WOULD LOSE THE GAUGE, SO RESET SKIPS IT.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use libbpf_rs::{MapCore, MapFlags, MapHandle};
use tracing::debug;

use crate::regime::{Regime, COUNTED};

pub const PIN_PATH: &str = "/sys/fs/bpf/ba_bawm";

pub trait CounterSource {
    // ABSENT KEY READS AS ZERO
    fn get(&self, key: u64) -> u64;
    fn keys(&self) -> Vec<u64>;
    fn delete(&mut self, key: u64);
    fn clear(&mut self);
}

// --- PINNED BPF HASH MAP (u64 KEY, s64 VALUE) ---

pub struct PinnedCounters {
    map: MapHandle,
}

impl PinnedCounters {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let map = MapHandle::from_pinned_path(path)
            .with_context(|| format!("no pinned counter table at {}", path.display()))?;
        Ok(Self { map })
    }
}

impl CounterSource for PinnedCounters {
    fn get(&self, key: u64) -> u64 {
        match self.map.lookup(&key.to_ne_bytes(), MapFlags::ANY) {
            Ok(Some(val)) if val.len() >= 8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&val[..8]);
                // GAUGE MAY DIP BELOW ZERO BETWEEN DECREMENT AND CLAMP IN BPF
                i64::from_ne_bytes(raw).max(0) as u64
            }
            Ok(_) => 0,
            Err(e) => {
                debug!(key, error = %e, "counter lookup failed");
                0
            }
        }
    }

    fn keys(&self) -> Vec<u64> {
        self.map
            .keys()
            .filter(|k| k.len() >= 8)
            .map(|k| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&k[..8]);
                u64::from_ne_bytes(raw)
            })
            .collect()
    }

    fn delete(&mut self, key: u64) {
        // ENOENT IS EXPECTED WHEN THE KEY WAS NEVER WRITTEN THIS CYCLE
        let _ = self.map.delete(&key.to_ne_bytes());
    }

    fn clear(&mut self) {
        for key in self.keys() {
            self.delete(key);
        }
    }
}

// --- IN-MEMORY TABLE (OFFLINE TESTS, DRY RUNS) ---

#[derive(Default, Debug, Clone)]
pub struct MemoryCounters {
    table: HashMap<u64, u64>,
}

impl MemoryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: u64, value: u64) {
        self.table.insert(key, value);
    }

    pub fn add(&mut self, regime: Regime, n: u64) {
        *self.table.entry(regime.index()).or_insert(0) += n;
    }
}

impl CounterSource for MemoryCounters {
    fn get(&self, key: u64) -> u64 {
        self.table.get(&key).copied().unwrap_or(0)
    }

    fn keys(&self) -> Vec<u64> {
        self.table.keys().copied().collect()
    }

    fn delete(&mut self, key: u64) {
        self.table.remove(&key);
    }

    fn clear(&mut self) {
        self.table.clear();
    }
}

// --- SNAPSHOT ---

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    counts: BTreeMap<Regime, u64>,
    // PARALLEL SLOT: RUNNABLE TASKS RIGHT NOW
    pub runnable: u64,
}

impl Snapshot {
    pub fn read(source: &impl CounterSource) -> Self {
        let counts = COUNTED
            .iter()
            .map(|&r| (r, source.get(r.index())))
            .collect();
        Self {
            counts,
            runnable: source.get(Regime::Parallel.index()),
        }
    }

    pub fn from_counts(counts: &[(Regime, u64)], runnable: u64) -> Self {
        Self {
            counts: counts
                .iter()
                .filter(|(r, _)| r.is_counted())
                .copied()
                .collect(),
            runnable,
        }
    }

    pub fn count(&self, regime: Regime) -> u64 {
        self.counts.get(&regime).copied().unwrap_or(0)
    }
}

// DELETE EVERY KEY EXCEPT THE PARALLEL GAUGE
pub fn reset(source: &mut impl CounterSource) {
    let keep = Regime::Parallel.index();
    for key in source.keys() {
        if key != keep {
            source.delete(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_missing_keys_read_zero() {
        let src = MemoryCounters::new();
        let snap = Snapshot::read(&src);
        for r in COUNTED {
            assert_eq!(snap.count(r), 0);
        }
        assert_eq!(snap.runnable, 0);
    }

    #[test]
    fn snapshot_reads_by_index() {
        let mut src = MemoryCounters::new();
        src.set(0, 1500); // CPU
        src.set(3, 20); // NET
        src.set(4, 9); // PARALLEL GAUGE
        let snap = Snapshot::read(&src);
        assert_eq!(snap.count(Regime::Cpu), 1500);
        assert_eq!(snap.count(Regime::Net), 20);
        assert_eq!(snap.count(Regime::Io), 0);
        assert_eq!(snap.runnable, 9);
    }

    #[test]
    fn reset_keeps_parallel_slot() {
        let mut src = MemoryCounters::new();
        for r in COUNTED {
            src.add(r, 5000);
        }
        src.set(Regime::Parallel.index(), 12);
        src.set(99, 1); // STRAY KEY FROM A NEWER PROBE
        reset(&mut src);
        for r in COUNTED {
            assert_eq!(src.get(r.index()), 0);
        }
        assert_eq!(src.get(Regime::Parallel.index()), 12);
        assert_eq!(src.keys(), vec![Regime::Parallel.index()]);
    }

    #[test]
    fn clear_drops_everything() {
        let mut src = MemoryCounters::new();
        src.set(4, 3);
        src.set(0, 3);
        src.clear();
        assert!(src.keys().is_empty());
    }

    #[test]
    fn from_counts_ignores_uncounted() {
        let snap = Snapshot::from_counts(&[(Regime::Idle, 7), (Regime::Mem, 3)], 0);
        assert_eq!(snap.count(Regime::Idle), 0);
        assert_eq!(snap.count(Regime::Mem), 3);
    }
}
