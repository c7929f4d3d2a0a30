// BAWM -- REGIME-ADAPTIVE SCHED_EXT DISPATCHER
// PURE-RUST LIBRARY: CLASSIFICATION, SUPERVISION, HOT RELOAD, OFFLINE TUNING.
// THE BINARY (main.rs) ONLY WIRES THESE TOGETHER.

pub mod classify;
pub mod config;
pub mod counters;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod regime;
pub mod runlog;
pub mod supervisor;
pub mod tuner;

pub use error::BawmError;
pub use regime::Regime;
