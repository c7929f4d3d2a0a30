// BAWM REGIME
// WORKLOAD CATEGORY DRIVING SCHEDULER CHOICE
//
// TWO ORDERINGS LIVE HERE AND MUST NOT BE CONFUSED:
//   PRECEDENCE: NET > IO > CPU > PARALLEL > MEM > IDLE (CLASSIFIER TIE-BREAK)
//   INDEX:      CPU=0 IO=1 MEM=2 NET=3 PARALLEL=4 IDLE=5 (COUNTER TABLE KEYS)
// THE INDEX IS AN EXTERNAL ABI SHARED WITH THE INSTRUMENTATION. IT IS SPELLED
// OUT EXPLICITLY BELOW, NEVER DERIVED FROM DECLARATION ORDER.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum Regime {
    #[serde(rename = "NET")]
    Net,
    #[serde(rename = "IO")]
    Io,
    #[serde(rename = "CPU")]
    Cpu,
    #[serde(rename = "PARALLEL")]
    Parallel,
    #[serde(rename = "MEM")]
    Mem,
    #[serde(rename = "IDLE")]
    Idle,
}

// DECLARATION ORDER == PRECEDENCE ORDER (Ord IS DERIVED FROM IT)
pub const ALL: [Regime; 6] = [
    Regime::Net,
    Regime::Io,
    Regime::Cpu,
    Regime::Parallel,
    Regime::Mem,
    Regime::Idle,
];

// REGIMES WITH A DEDICATED EVENT COUNTER. RESET EVERY CYCLE.
pub const COUNTED: [Regime; 4] = [Regime::Cpu, Regime::Io, Regime::Mem, Regime::Net];

impl Regime {
    // COUNTER TABLE KEY
    pub fn index(self) -> u64 {
        match self {
            Self::Cpu => 0,
            Self::Io => 1,
            Self::Mem => 2,
            Self::Net => 3,
            Self::Parallel => 4,
            Self::Idle => 5,
        }
    }

    pub fn from_index(idx: u64) -> Option<Self> {
        match idx {
            0 => Some(Self::Cpu),
            1 => Some(Self::Io),
            2 => Some(Self::Mem),
            3 => Some(Self::Net),
            4 => Some(Self::Parallel),
            5 => Some(Self::Idle),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Net => "NET",
            Self::Io => "IO",
            Self::Cpu => "CPU",
            Self::Parallel => "PARALLEL",
            Self::Mem => "MEM",
            Self::Idle => "IDLE",
        }
    }

    // TRUE FOR REGIMES BACKED BY AN EVENT COUNTER WITH A FIXED THRESHOLD
    pub fn is_counted(self) -> bool {
        COUNTED.contains(&self)
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown regime '{0}'")]
pub struct UnknownRegime(pub String);

impl FromStr for Regime {
    type Err = UnknownRegime;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL.iter()
            .copied()
            .find(|r| r.label() == s)
            .ok_or_else(|| UnknownRegime(s.to_string()))
    }
}
