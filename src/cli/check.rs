use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{bail, Result};

use bawm::config::Config;
use bawm::regime;

fn check_kernel_config() -> bool {
    let file = match std::fs::File::open("/proc/config.gz") {
        Ok(f) => f,
        Err(_) => {
            println!("  /proc/config.gz       NOT FOUND (SKIPPED)");
            return true;
        }
    };
    let mut decoder = flate2::read::GzDecoder::new(file);
    let mut config = String::new();
    if decoder.read_to_string(&mut config).is_err() {
        println!("  /proc/config.gz       UNREADABLE (SKIPPED)");
        return true;
    }
    let mut ok = true;
    for opt in ["CONFIG_SCHED_CLASS_EXT=y", "CONFIG_BPF_SYSCALL=y"] {
        let name = opt.trim_end_matches("=y");
        if config.lines().any(|l| l == opt) {
            println!("  {:<24}OK", name);
        } else {
            println!("  {:<24}NOT SET", name);
            ok = false;
        }
    }
    ok
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

// LOAD ONE CONFIG, VALIDATE IT, AND CHECK EVERY BINARY IT NAMES
fn check_config(label: &str, path: &Path) -> bool {
    let cfg = match Config::load_complete(path) {
        Ok(c) => c,
        Err(e) => {
            println!("  {:<24}FAILED: {}", label, e);
            return false;
        }
    };
    println!("  {:<24}OK ({})", label, path.display());

    let mut ok = true;
    for r in regime::ALL {
        if let Some(bin) = cfg.binary(r) {
            if is_executable(&bin) {
                println!("    {:<22}{}", r.label(), bin.display());
            } else {
                println!("    {:<22}{} NOT EXECUTABLE", r.label(), bin.display());
                ok = false;
            }
        }
    }
    ok
}

pub fn run_check(config_dir: &Path, pin_path: &str) -> Result<()> {
    println!("BAWM DISPATCHER CHECK");
    println!();

    let mut ok = true;

    if unsafe { libc::geteuid() } == 0 {
        println!("  {:<24}OK", "root");
    } else {
        println!("  {:<24}NOT ROOT (schedulers will fail to attach)", "root");
        ok = false;
    }
    println!();

    println!("KERNEL CONFIG:");
    if !check_kernel_config() {
        ok = false;
    }
    println!();

    let scx_path = Path::new("/sys/kernel/sched_ext/root/ops");
    if scx_path.exists() {
        let active = std::fs::read_to_string(scx_path).unwrap_or_default();
        let active = active.trim();
        if active.is_empty() {
            println!("  sched_ext             AVAILABLE (no scheduler active)");
        } else {
            println!("  sched_ext             ACTIVE ({})", active);
        }
    } else {
        println!("  sched_ext             NOT AVAILABLE (sysfs path missing)");
        ok = false;
    }

    if Path::new(pin_path).exists() {
        println!("  counter table         PINNED ({})", pin_path);
    } else {
        println!("  counter table         MISSING ({}) -- load the instrumentation first", pin_path);
        ok = false;
    }
    println!();

    println!("CONFIGS:");
    ok &= check_config("main", &bawm::config::main_path(config_dir));
    ok &= check_config("alt", &bawm::config::alt_path(config_dir));
    println!();

    if !ok {
        bail!("SOME CHECKS FAILED");
    }
    println!("ALL CHECKS PASSED");
    Ok(())
}
