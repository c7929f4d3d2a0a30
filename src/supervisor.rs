// BAWM PROCESS SUPERVISOR
// OWNS AT MOST ONE EXTERNAL SCHEDULER PROCESS. ensure() IS THE ONLY WAY IN.
//
// EACH CHILD RUNS IN ITS OWN PROCESS GROUP SO A WRAPPER SCRIPT AND WHATEVER
// IT FORKS DIE TOGETHER. TERMINATION IS SIGKILL TO THE GROUP FOLLOWED BY A
// BLOCKING REAP: THE OLD SCHEDULER IS GONE BEFORE THE NEW ONE IS SPAWNED.
// TWO SCHED_EXT SCHEDULERS CANNOT COEXIST, SO A FAILED KILL IS FATAL.

use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use tracing::{error, info, warn};

use crate::error::BawmError;
use crate::event::EventLog;
use crate::regime::Regime;

struct Active {
    regime: Regime,
    binary: PathBuf,
    child: Child,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ensure {
    // SAME REGIME, SAME BINARY, STILL ALIVE
    Kept,
    Launched,
    // PREVIOUS PROCESS (IF ANY) IS GONE, NEW ONE DID NOT START. RETRIED NEXT CALL.
    SpawnFailed,
}

pub struct Supervisor {
    active: Option<Active>,
    log: EventLog,
    launches: u64,
}

impl Supervisor {
    pub fn new(log: EventLog) -> Self {
        Self {
            active: None,
            log,
            launches: 0,
        }
    }

    pub fn active_regime(&self) -> Option<Regime> {
        self.active.as_ref().map(|a| a.regime)
    }

    pub fn active_pid(&self) -> Option<u32> {
        self.active.as_ref().map(|a| a.child.id())
    }

    pub fn launches(&self) -> u64 {
        self.launches
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    // GUARANTEE ONE LIVE PROCESS FOR `regime` RUNNING `binary`.
    // force=true REPLACES THE PROCESS EVEN WHEN NOTHING CHANGED.
    pub fn ensure(&mut self, regime: Regime, binary: &Path, force: bool) -> Result<Ensure, BawmError> {
        if !force && self.is_current(regime, binary) {
            return Ok(Ensure::Kept);
        }

        self.terminate()?;
        self.log.record(regime);

        match spawn(binary) {
            Ok(child) => {
                info!(%regime, binary = %binary.display(), pid = child.id(), "scheduler launched");
                self.launches += 1;
                self.active = Some(Active {
                    regime,
                    binary: binary.to_path_buf(),
                    child,
                });
                Ok(Ensure::Launched)
            }
            Err(e) => {
                error!(%regime, binary = %binary.display(), error = %e, "scheduler failed to start");
                Ok(Ensure::SpawnFailed)
            }
        }
    }

    // KILL AND REAP THE ACTIVE PROCESS, IF ANY
    pub fn shutdown(&mut self) -> Result<(), BawmError> {
        self.terminate()
    }

    fn is_current(&mut self, regime: Regime, binary: &Path) -> bool {
        let active = match self.active.as_mut() {
            Some(a) if a.regime == regime && a.binary == binary => a,
            _ => return false,
        };
        match active.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                warn!(%regime, %status, "scheduler exited on its own, relaunching");
                false
            }
            Err(e) => {
                warn!(%regime, error = %e, "scheduler status unknown, relaunching");
                false
            }
        }
    }

    fn terminate(&mut self) -> Result<(), BawmError> {
        let mut active = match self.active.take() {
            Some(a) => a,
            None => return Ok(()),
        };
        let pid = active.child.id();
        let regime = active.regime;

        // CHILD IS ITS OWN GROUP LEADER: PGID == PID
        let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            // ESRCH: GROUP ALREADY EMPTY. ANYTHING ELSE: TRY THE LEADER DIRECTLY.
            if err.raw_os_error() != Some(libc::ESRCH) {
                if let Err(source) = active.child.kill() {
                    if source.kind() != io::ErrorKind::InvalidInput {
                        self.active = Some(active);
                        return Err(BawmError::Terminate { pid, regime, source });
                    }
                }
            }
        }

        active
            .child
            .wait()
            .map_err(|source| BawmError::Terminate { pid, regime, source })?;
        info!(%regime, pid, "scheduler terminated");
        Ok(())
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            error!(error = %e, "scheduler left running at exit");
        }
    }
}

fn spawn(binary: &Path) -> io::Result<Child> {
    Command::new(binary)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .process_group(0)
        .spawn()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_supervisor_shutdown_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = Supervisor::new(EventLog::new(dir.path().join("e.txt")));
        assert!(sup.shutdown().is_ok());
        assert_eq!(sup.active_regime(), None);
        assert!(!dir.path().join("e.txt").exists());
    }

    #[test]
    fn spawn_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = Supervisor::new(EventLog::new(dir.path().join("e.txt")));
        let res = sup.ensure(Regime::Cpu, &dir.path().join("no-such-binary"), false);
        assert_eq!(res.unwrap(), Ensure::SpawnFailed);
        assert_eq!(sup.active_regime(), None);
        assert_eq!(sup.launches(), 0);
        // TRANSITION IS STILL RECORDED
        assert_eq!(sup.log().summary(), (1, 0));
    }
}
