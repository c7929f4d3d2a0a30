// BAWM FATAL ERRORS
// ANYTHING HERE STOPS THE DISPATCHER. RECOVERABLE CONDITIONS ARE LOGGED
// WHERE THEY HAPPEN AND NEVER REACH THIS TYPE.

use std::path::PathBuf;

use thiserror::Error;

use crate::regime::Regime;

#[derive(Debug, Error)]
pub enum BawmError {
    #[error("config file not found: {}", .0.display())]
    ConfigMissing(PathBuf),

    #[error("failed to read config file {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {} is malformed: {source}", .path.display())]
    ConfigMalformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("config file {} has no scheduler for regime {regime}", .path.display())]
    ConfigMissingRegime { path: PathBuf, regime: Regime },

    #[error("failed to terminate scheduler pid {pid} ({regime}): {source}")]
    Terminate {
        pid: u32,
        regime: Regime,
        #[source]
        source: std::io::Error,
    },
}
