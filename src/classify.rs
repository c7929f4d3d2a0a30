// BAWM LOAD CLASSIFIER
// PURE-RUST MODULE: ZERO BPF DEPENDENCIES, TESTABLE OFFLINE
//
// ONE SNAPSHOT IN, ONE REGIME OUT. EACH COUNTED REGIME IS "HIGH" WHEN ITS
// COUNT REACHES ITS THRESHOLD. PRECEDENCE IS ABSOLUTE:
//   NET > IO > CPU (REFINED TO PARALLEL) > MEM > IDLE
// A HIGHER SIGNAL MASKS EVERY LOWER ONE REGARDLESS OF MAGNITUDE.

use crate::counters::Snapshot;
use crate::regime::Regime;

// EVENTS PER SAMPLING INTERVAL
pub const CPU_THRESHOLD: u64 = 1000;
pub const IO_THRESHOLD: u64 = 1000;
pub const MEM_THRESHOLD: u64 = 2000;
pub const NET_THRESHOLD: u64 = 1000;

// PARALLEL THRESHOLD WHEN THE CPU COUNT CANNOT BE DETERMINED
pub const DEFAULT_NR_CPUS: u64 = 1;

pub const NR_CPUS_ENV: &str = "NUM_CPUS";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Thresholds {
    pub cpu: u64,
    pub io: u64,
    pub mem: u64,
    pub net: u64,
    // RUNNABLE TASKS NEEDED TO CALL CPU LOAD PARALLEL
    pub parallel: u64,
}

impl Thresholds {
    pub fn with_parallel(parallel: u64) -> Self {
        Self { parallel, ..Self::default() }
    }

    // IDLE HAS NO THRESHOLD
    pub fn get(&self, regime: Regime) -> Option<u64> {
        match regime {
            Regime::Cpu => Some(self.cpu),
            Regime::Io => Some(self.io),
            Regime::Mem => Some(self.mem),
            Regime::Net => Some(self.net),
            Regime::Parallel => Some(self.parallel),
            Regime::Idle => None,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: CPU_THRESHOLD,
            io: IO_THRESHOLD,
            mem: MEM_THRESHOLD,
            net: NET_THRESHOLD,
            parallel: DEFAULT_NR_CPUS,
        }
    }
}

// PARALLEL THRESHOLD RESOLUTION: FLAG > ENV > DETECTED > DEFAULT
pub fn resolve_nr_cpus(cli_override: Option<u64>) -> u64 {
    let env = std::env::var(NR_CPUS_ENV).ok();
    let detected = libbpf_rs::num_possible_cpus().ok().map(|n| n as u64);
    pick_nr_cpus(cli_override, env.as_deref(), detected)
}

pub fn pick_nr_cpus(cli_override: Option<u64>, env: Option<&str>, detected: Option<u64>) -> u64 {
    // ZERO AT ANY LAYER FALLS THROUGH TO THE NEXT
    let positive = |n: &u64| *n > 0;
    cli_override
        .filter(positive)
        .or_else(|| env.and_then(|v| v.trim().parse::<u64>().ok()).filter(positive))
        .or_else(|| detected.filter(positive))
        .unwrap_or(DEFAULT_NR_CPUS)
}

// PER-REGIME HIGH FLAGS FOR ONE SAMPLE
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flags {
    pub net: bool,
    pub io: bool,
    pub cpu: bool,
    pub parallel: bool,
    pub mem: bool,
}

impl Flags {
    pub fn compute(snap: &Snapshot, th: &Thresholds) -> Self {
        let cpu = snap.count(Regime::Cpu) >= th.cpu;
        // PARALLEL IS A REFINEMENT OF CPU, NEVER AN INDEPENDENT SIGNAL
        let parallel_signal = snap.runnable >= th.parallel;
        Self {
            net: snap.count(Regime::Net) >= th.net,
            io: snap.count(Regime::Io) >= th.io,
            cpu,
            parallel: cpu && parallel_signal,
            mem: snap.count(Regime::Mem) >= th.mem,
        }
    }

    // IDLE HAS NO SIGNAL AND ALWAYS READS FALSE
    pub fn is_high(&self, regime: Regime) -> bool {
        match regime {
            Regime::Net => self.net,
            Regime::Io => self.io,
            Regime::Cpu => self.cpu,
            Regime::Parallel => self.parallel,
            Regime::Mem => self.mem,
            Regime::Idle => false,
        }
    }

    pub fn resolve(&self) -> Regime {
        if self.net {
            Regime::Net
        } else if self.io {
            Regime::Io
        } else if self.cpu {
            if self.parallel {
                Regime::Parallel
            } else {
                Regime::Cpu
            }
        } else if self.mem {
            Regime::Mem
        } else {
            Regime::Idle
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification {
    pub regime: Regime,
    pub flags: Flags,
}

pub fn classify(snap: &Snapshot, th: &Thresholds) -> Classification {
    let flags = Flags::compute(snap, th);
    Classification { regime: flags.resolve(), flags }
}

// RE-ASSERTION RULE
// LAUNCH UNLESS WE STAY IN THE SAME REGIME *AND* ITS OWN FLAG IS STILL HIGH.
// IDLE NEVER HAS A HIGH FLAG, SO STAYING IDLE RELAUNCHES EVERY CYCLE.
// PINNED BY tests/classify.rs -- DO NOT "FIX" WITHOUT UPDATING THAT TEST.
pub fn needs_launch(current: Regime, c: &Classification) -> bool {
    !(current == c.regime && c.flags.is_high(c.regime))
}
