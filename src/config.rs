// BAWM CONFIG STORE
// REGIME -> SCHEDULER BINARY MAPPING, PERSISTED AS JSON
//
//   { "SCHED_PATH": "/opt/scx", "scheds": { "CPU": "target/release/scx_bpfland", ... } }
//
// TWO INSTANCES: PRIMARY ("main", AUTHORITATIVE) AND SECONDARY ("alt", EXPERIMENTAL).
// THE TUNER REWRITES THEM WHILE A DISPATCHER IS READING. NO LOCKS:
//   WRITERS SAVE TO A SIBLING TEMP FILE AND RENAME OVER THE TARGET.
//   READERS POLL MTIME AND TREAT A FAILED PARSE AS "NO CHANGE THIS CYCLE".
// A LOADED CONFIG IS NEVER MUTATED. RELOAD SWAPS THE Arc.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::BawmError;
use crate::regime::{self, Regime};

pub const MAIN_CONFIG: &str = "dispatcher_config_main.json";
pub const ALT_CONFIG: &str = "dispatcher_config_alt.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "SCHED_PATH")]
    pub sched_path: String,
    pub scheds: BTreeMap<Regime, String>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BawmError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => BawmError::ConfigMissing(path.to_path_buf()),
            _ => BawmError::ConfigRead { path: path.to_path_buf(), source: e },
        })?;
        serde_json::from_str(&raw).map_err(|e| BawmError::ConfigMalformed {
            path: path.to_path_buf(),
            source: e,
        })
    }

    // EVERY REGIME THE CLASSIFIER CAN EMIT NEEDS A SCHEDULER
    pub fn validate(&self, path: impl AsRef<Path>) -> Result<(), BawmError> {
        match regime::ALL.iter().find(|r| !self.scheds.contains_key(*r)) {
            Some(&regime) => Err(BawmError::ConfigMissingRegime {
                path: path.as_ref().to_path_buf(),
                regime,
            }),
            None => Ok(()),
        }
    }

    pub fn load_complete(path: impl AsRef<Path>) -> Result<Self, BawmError> {
        let path = path.as_ref();
        let cfg = Self::load(path)?;
        cfg.validate(path)?;
        Ok(cfg)
    }

    // SCHED_PATH/<relative binary>
    pub fn binary(&self, regime: Regime) -> Option<PathBuf> {
        self.scheds
            .get(&regime)
            .map(|rel| Path::new(&self.sched_path).join(rel))
    }

    // PRETTY-PRINTED, 2-SPACE INDENT. TEMP + RENAME SO POLLERS NEVER SEE A HALF FILE.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut body = serde_json::to_string_pretty(self)?;
        body.push('\n');

        let mut tmp_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);

        fs::write(&tmp, body)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }
}

pub fn main_path(dir: impl AsRef<Path>) -> PathBuf {
    dir.as_ref().join(MAIN_CONFIG)
}

pub fn alt_path(dir: impl AsRef<Path>) -> PathBuf {
    dir.as_ref().join(ALT_CONFIG)
}

fn mtime(path: &Path) -> std::io::Result<SystemTime> {
    fs::metadata(path)?.modified()
}

// HOT-RELOADING HOLDER FOR ONE CONFIG FILE
pub struct ConfigStore {
    path: PathBuf,
    current: Arc<Config>,
    seen_mtime: Option<SystemTime>,
}

impl ConfigStore {
    // FATAL ON MISSING FILE, MISSING KEYS, OR MISSING REGIMES
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, BawmError> {
        let path = path.into();
        let seen_mtime = mtime(&path).ok();
        let current = Arc::new(Config::load_complete(&path)?);
        Ok(Self { path, current, seen_mtime })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> Arc<Config> {
        Arc::clone(&self.current)
    }

    // RETURNS TRUE WHEN A NEW CONFIG WAS SWAPPED IN.
    // ANY FAILURE LEAVES THE OLD CONFIG AND THE OLD MTIME, SO THE NEXT POLL RETRIES.
    pub fn poll(&mut self) -> bool {
        let modified = match mtime(&self.path) {
            Ok(m) => m,
            Err(e) => {
                // RENAME IN FLIGHT OR FILE BRIEFLY GONE
                debug!(path = %self.path.display(), error = %e, "config stat failed");
                return false;
            }
        };
        if self.seen_mtime == Some(modified) {
            return false;
        }

        match Config::load_complete(&self.path) {
            Ok(cfg) => {
                self.seen_mtime = Some(modified);
                if *self.current != cfg {
                    info!(path = %self.path.display(), "config reloaded");
                    self.current = Arc::new(cfg);
                    true
                } else {
                    false
                }
            }
            Err(e) => {
                warn!(error = %e, "config reload failed, keeping previous config");
                false
            }
        }
    }
}
