// BAWM -- REGIME-ADAPTIVE SCHED_EXT DISPATCHER
// PICKS WHICH EXTERNAL SCHEDULER RUNS BASED ON OBSERVED LOAD, AND TUNES
// THE REGIME -> SCHEDULER TABLE FROM CROSS-HOST BENCHMARK HISTORY
//
// run       ONLINE LOOP: SAMPLE COUNTERS, CLASSIFY, SUPERVISE ONE SCHEDULER
// tune      OFFLINE ONE-SHOT: PROMOTE WINNING ALT ASSIGNMENTS, EXPLORE ONE
// check     PREFLIGHT: KERNEL, COUNTER TABLE, CONFIGS, BINARIES
// counters  READ-ONLY DUMP OF THE COUNTER TABLE AND ITS CLASSIFICATION

mod cli;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use bawm::classify::{self, Thresholds};
use bawm::config::{self, ConfigStore};
use bawm::counters::{PinnedCounters, PIN_PATH};
use bawm::dispatch::Dispatcher;
use bawm::event::{self, EventLog};
use bawm::supervisor::Supervisor;
use bawm::tuner::{self, Outcome, TunerPaths};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "bawm")]
#[command(about = "BAWM -- REGIME-ADAPTIVE SCHED_EXT DISPATCHER")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dispatch loop until interrupted.
    Run {
        // USE dispatcher_config_alt.json INSTEAD OF dispatcher_config_main.json
        #[arg(long)]
        alt: bool,

        // DIRECTORY HOLDING BOTH CONFIG FILES
        #[arg(long, default_value = ".")]
        config_dir: PathBuf,

        // DIRECTORY FOR THE PER-HOST REGIME EVENT LOG
        #[arg(long, default_value = ".")]
        log_dir: PathBuf,

        // HOST ID IN THE EVENT LOG NAME (DEFAULT: HOSTNAME)
        #[arg(long)]
        host: Option<String>,

        // SECONDS BETWEEN SAMPLES (AT LEAST 1)
        #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u64).range(1..))]
        interval: u64,

        // PARALLEL THRESHOLD OVERRIDE (ELSE $NUM_CPUS, ELSE DETECTED)
        #[arg(long)]
        nr_cpus: Option<u64>,

        // PINNED COUNTER TABLE
        #[arg(long, default_value = PIN_PATH)]
        pin_path: String,
    },

    /// Analyze benchmark history once and update configs.
    Tune {
        // DIRECTORY HOLDING RUN LOGS, THE SECONDARY EVENT LOG AND results.log
        #[arg(long, default_value = ".")]
        data_dir: PathBuf,

        // DIRECTORY HOLDING BOTH CONFIG FILES
        #[arg(long, default_value = ".")]
        config_dir: PathBuf,

        #[arg(long)]
        primary_runs: Option<PathBuf>,

        #[arg(long)]
        secondary_runs: Option<PathBuf>,

        #[arg(long)]
        secondary_events: Option<PathBuf>,

        #[arg(long)]
        audit_log: Option<PathBuf>,
    },

    /// Verify kernel support, counter table, configs and scheduler binaries.
    Check {
        #[arg(long, default_value = ".")]
        config_dir: PathBuf,

        #[arg(long, default_value = PIN_PATH)]
        pin_path: String,
    },

    /// Print the current counter table without resetting it.
    Counters {
        #[arg(long)]
        nr_cpus: Option<u64>,

        #[arg(long, default_value = PIN_PATH)]
        pin_path: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { alt, config_dir, log_dir, host, interval, nr_cpus, pin_path } => {
            run_dispatcher(alt, config_dir, log_dir, host, interval, nr_cpus, &pin_path)
        }
        Command::Tune {
            data_dir,
            config_dir,
            primary_runs,
            secondary_runs,
            secondary_events,
            audit_log,
        } => {
            let mut paths = TunerPaths::new(&data_dir, &config_dir);
            if let Some(p) = primary_runs {
                paths.primary_runs = p;
            }
            if let Some(p) = secondary_runs {
                paths.secondary_runs = p;
            }
            if let Some(p) = secondary_events {
                paths.secondary_events = p;
            }
            if let Some(p) = audit_log {
                paths.audit_log = p;
            }
            run_tuner(&paths)
        }
        Command::Check { config_dir, pin_path } => cli::check::run_check(&config_dir, &pin_path),
        Command::Counters { nr_cpus, pin_path } => {
            let th = Thresholds::with_parallel(classify::resolve_nr_cpus(nr_cpus));
            cli::counters::run_counters(&pin_path, &th)
        }
    }
}

fn run_dispatcher(
    alt: bool,
    config_dir: PathBuf,
    log_dir: PathBuf,
    host: Option<String>,
    interval: u64,
    nr_cpus: Option<u64>,
    pin_path: &str,
) -> Result<()> {
    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
    })?;

    let cfg_path = if alt {
        config::alt_path(&config_dir)
    } else {
        config::main_path(&config_dir)
    };
    let store = ConfigStore::open(&cfg_path)?;
    let counters = PinnedCounters::open(pin_path)?;

    let parallel = classify::resolve_nr_cpus(nr_cpus);
    let thresholds = Thresholds::with_parallel(parallel);

    let host = host.unwrap_or_else(cli::hostname);
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create {}", log_dir.display()))?;
    let log = EventLog::new(event::host_log_path(&log_dir, &host));

    println!("BAWM DISPATCHER");
    println!("CONFIG:          {}", cfg_path.display());
    println!("SCHED_PATH:      {}", store.current().sched_path);
    println!("COUNTERS:        {}", pin_path);
    println!("EVENT LOG:       {}", log.path().display());
    println!("THRESHOLDS:      cpu={} io={} mem={} net={} parallel={}",
             thresholds.cpu, thresholds.io, thresholds.mem, thresholds.net, thresholds.parallel);
    println!("INTERVAL:        {}s", interval);
    println!();

    let mut dispatcher = Dispatcher::new(store, counters, thresholds, Supervisor::new(log))
        .with_interval(Duration::from_secs(interval));

    info!("dispatcher active (ctrl+c to exit)");
    dispatcher.run(&SHUTDOWN)?;
    println!("BAWM OUT.");
    Ok(())
}

fn run_tuner(paths: &TunerPaths) -> Result<()> {
    let mut rng = rand::thread_rng();
    match tuner::run(paths, &mut rng)? {
        Outcome::Aborted(reason) => println!("[decision] {}", reason),
        Outcome::Applied(report) => {
            if report.changed.is_empty() {
                println!("[decision] main config unchanged");
            } else {
                println!("[decision] main config updated for {} key(s)", report.changed.len());
            }
            if let Some(ex) = &report.exploration {
                println!("[decision] alt {} : {} -> {}", ex.key, ex.old, ex.new);
            }
            println!("[decision] audit appended to {}", paths.audit_log.display());
        }
    }
    Ok(())
}
