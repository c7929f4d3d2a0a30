// BAWM DISPATCH LOOP
// SAMPLE -> CLASSIFY -> SUPERVISE -> RESET -> SLEEP, FOREVER.
//
// SINGLE THREAD. THE ONLY EXIT IS THE SHUTDOWN FLAG (SET BY THE SIGNAL
// HANDLER IN main.rs) OR A FATAL ERROR. EITHER WAY THE ACTIVE SCHEDULER
// IS KILLED BEFORE RETURNING.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info};

use crate::classify::{self, Classification, Thresholds};
use crate::config::ConfigStore;
use crate::counters::{self, CounterSource, Snapshot};
use crate::error::BawmError;
use crate::regime::Regime;
use crate::supervisor::Supervisor;

pub const SLEEP_INTERVAL: Duration = Duration::from_secs(3);
pub const INITIAL_REGIME: Regime = Regime::Cpu;

// SHUTDOWN IS CHECKED THIS OFTEN WHILE SLEEPING
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

pub struct Dispatcher<C: CounterSource> {
    store: ConfigStore,
    counters: C,
    thresholds: Thresholds,
    supervisor: Supervisor,
    current: Regime,
    interval: Duration,
    cycles: u64,
}

impl<C: CounterSource> Dispatcher<C> {
    pub fn new(store: ConfigStore, counters: C, thresholds: Thresholds, supervisor: Supervisor) -> Self {
        Self {
            store,
            counters,
            thresholds,
            supervisor,
            current: INITIAL_REGIME,
            interval: SLEEP_INTERVAL,
            cycles: 0,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn current(&self) -> Regime {
        self.current
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn counters_mut(&mut self) -> &mut C {
        &mut self.counters
    }

    fn binary_for(&self, regime: Regime) -> Result<std::path::PathBuf, BawmError> {
        self.store
            .current()
            .binary(regime)
            .ok_or_else(|| BawmError::ConfigMissingRegime {
                path: self.store.path().to_path_buf(),
                regime,
            })
    }

    // LAUNCH THE SCHEDULER FOR THE INITIAL REGIME
    pub fn start(&mut self) -> Result<()> {
        let binary = self.binary_for(self.current)?;
        self.supervisor.ensure(self.current, &binary, false)?;
        Ok(())
    }

    pub fn cycle(&mut self) -> Result<Classification> {
        self.store.poll();

        let snap = Snapshot::read(&self.counters);
        let c = classify::classify(&snap, &self.thresholds);
        debug!(
            cpu = snap.count(Regime::Cpu),
            io = snap.count(Regime::Io),
            mem = snap.count(Regime::Mem),
            net = snap.count(Regime::Net),
            runnable = snap.runnable,
            regime = %c.regime,
            "sample"
        );

        if classify::needs_launch(self.current, &c) {
            if c.regime != self.current {
                info!(from = %self.current, to = %c.regime, "regime change");
            }
            self.current = c.regime;
            let binary = self.binary_for(self.current)?;
            self.supervisor.ensure(self.current, &binary, true)?;
        } else {
            // NO RE-ASSERTION DUE. STILL RELAUNCH IF THE BINARY WAS
            // REASSIGNED BY A RELOAD OR THE CHILD DIED.
            let binary = self.binary_for(self.current)?;
            self.supervisor.ensure(self.current, &binary, false)?;
        }

        counters::reset(&mut self.counters);
        self.cycles += 1;
        Ok(c)
    }

    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        let res = self.run_inner(shutdown);
        let stop = self.supervisor.shutdown();
        let (written, dropped) = self.supervisor.log().summary();
        info!(
            cycles = self.cycles,
            launches = self.supervisor.launches(),
            events_written = written,
            events_dropped = dropped,
            "dispatcher stopped"
        );
        res?;
        stop?;
        Ok(())
    }

    fn run_inner(&mut self, shutdown: &AtomicBool) -> Result<()> {
        self.start()?;
        while !shutdown.load(Ordering::Relaxed) {
            self.cycle()?;
            sleep_unless(shutdown, self.interval);
        }
        Ok(())
    }
}

fn sleep_unless(shutdown: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(SHUTDOWN_POLL));
    }
}
