// COUNTER TABLE READER -- READS THE PINNED ba_bawm MAP WITHOUT RESETTING IT
// PRINTS EACH REGIME'S COUNT AGAINST ITS THRESHOLD AND THE RESULTING CLASSIFICATION

use anyhow::Result;

use bawm::classify::{self, Thresholds};
use bawm::counters::{CounterSource, PinnedCounters, Snapshot};
use bawm::regime::{self, Regime};

pub fn run_counters(pin_path: &str, thresholds: &Thresholds) -> Result<()> {
    let table = match PinnedCounters::open(pin_path) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("counter table not available ({:#})", e);
            eprintln!("is the ba_bawm instrumentation loaded?");
            std::process::exit(1);
        }
    };

    print_table(&table, thresholds);
    Ok(())
}

fn print_table(table: &impl CounterSource, thresholds: &Thresholds) {
    let snap = Snapshot::read(table);
    let c = classify::classify(&snap, thresholds);

    println!("{:<10} {:>5} {:>12} {:>12}  {}", "REGIME", "KEY", "COUNT", "THRESHOLD", "STATUS");
    println!("{}", "-".repeat(50));
    for r in regime::ALL {
        let Some(th) = thresholds.get(r) else {
            continue;
        };
        let count = if r == Regime::Parallel { snap.runnable } else { snap.count(r) };
        let status = if c.flags.is_high(r) { "HIGH" } else { "LOW" };
        println!("{:<10} {:>5} {:>12} {:>12}  {}", r.label(), r.index(), count, th, status);
    }

    let stray: Vec<u64> = table
        .keys()
        .into_iter()
        .filter(|&k| Regime::from_index(k).is_none())
        .collect();
    if !stray.is_empty() {
        println!("UNKNOWN KEYS: {:?}", stray);
    }
    println!();
    println!("CLASSIFICATION: {}", c.regime);
}
