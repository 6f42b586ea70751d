use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::{self, Pid};
use std::io::{self, Write};
use std::os::unix::io::RawFd;
use tracing::{debug, warn};

use crate::common::{ok, CliResult, ShellError};
use crate::jobs::{self, JobState};
use crate::signal::{self as relay, Outcome, SignalGuard};

/// The controlling terminal, handed to foreground jobs in interactive mode.
#[derive(Clone, Copy, Debug)]
pub struct Terminal {
    fd: RawFd,
    shell_pgid: Pid,
}

impl Terminal {
    pub fn detect(interactive: bool) -> Option<Terminal> {
        let fd = libc::STDIN_FILENO;
        if !interactive || !unistd::isatty(fd).unwrap_or(false) {
            return None;
        }
        Some(Terminal {
            fd,
            shell_pgid: unistd::getpgrp(),
        })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn give_to(&self, pgid: Pid) {
        if let Err(e) = unistd::tcsetpgrp(self.fd, pgid) {
            debug!("tcsetpgrp({}): {}", pgid, e);
        }
    }

    pub fn reclaim(&self) {
        if let Err(e) = unistd::tcsetpgrp(self.fd, self.shell_pgid) {
            warn!("could not take the terminal back: {}", e);
        }
    }
}

/// Blocks the main loop on one job until it exits or stops.
#[derive(Debug, Default)]
pub struct Foreground {
    terminal: Option<Terminal>,
}

impl Foreground {
    pub fn new(terminal: Option<Terminal>) -> Foreground {
        Foreground { terminal }
    }

    pub fn terminal(&self) -> Option<Terminal> {
        self.terminal
    }

    /// Waits on a process the launcher just forked. `guard` must have been
    /// taken before the fork so that the relay cannot reap the child first.
    pub fn run(&self, guard: &SignalGuard, pgid: Pid, cmdline: &str) -> CliResult {
        relay::set_foreground(pgid);
        if let Some(term) = self.terminal {
            term.give_to(pgid);
        }
        self.finish(guard, pgid, cmdline)
    }

    /// Continues a tracked job and waits on it as the foreground job.
    pub fn resume(&self, guard: &SignalGuard, pgid: Pid, cmdline: &str) -> CliResult {
        relay::set_foreground(pgid);
        if let Some(term) = self.terminal {
            term.give_to(pgid);
        }
        if let Err(e) = signal::killpg(pgid, Signal::SIGCONT) {
            debug!("SIGCONT to {}: {}", pgid, e);
        }
        self.finish(guard, pgid, cmdline)
    }

    fn finish(&self, guard: &SignalGuard, pgid: Pid, cmdline: &str) -> CliResult {
        let waited = wait_for(guard, pgid);
        relay::clear_foreground();
        if let Some(term) = self.terminal {
            term.reclaim();
        }
        match waited? {
            Some(outcome) => {
                debug!(pgid = pgid.as_raw(), ?outcome, "foreground job settled");
                settle(pgid, cmdline, outcome);
                ok(outcome.status())
            }
            None => {
                debug!(pgid = pgid.as_raw(), "foreground job reaped elsewhere");
                jobs::with_jobs(|t| t.remove(pgid));
                ok(0)
            }
        }
    }
}

/// Polls the child, sleeping in `sigsuspend` between polls. The SIGCHLD
/// handler may win the race and reap the child during the sleep; its
/// recorded outcome is then used instead, and a later ECHILD is not an error.
fn wait_for(guard: &SignalGuard, pgid: Pid) -> Result<Option<Outcome>, ShellError> {
    loop {
        if let Some(outcome) = relay::take_reaped() {
            return Ok(Some(outcome));
        }
        match wait::waitpid(pgid, Some(WaitPidFlag::WUNTRACED | WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => guard.suspend(),
            Ok(status) => {
                if let Some((_, outcome)) = Outcome::from_wait(status) {
                    return Ok(Some(outcome));
                }
            }
            Err(e) if e.as_errno() == Some(Errno::EINTR) => continue,
            Err(e) if e.as_errno() == Some(Errno::ECHILD) => return Ok(relay::take_reaped()),
            Err(e) => return Err(ShellError::Wait(e)),
        }
    }
}

fn settle(pgid: Pid, cmdline: &str, outcome: Outcome) {
    match outcome {
        Outcome::Stopped(_) => match jobs::with_jobs(|t| t.add(pgid, JobState::Stopped, cmdline)) {
            Ok(id) => {
                let _ = io::stdout().flush();
                relay::notify_stopped(id, cmdline);
            }
            Err(e) => {
                eprintln!("icsh: {}: continuing {} in the background", e, pgid);
                let _ = signal::killpg(pgid, Signal::SIGCONT);
            }
        },
        Outcome::Exited(_) | Outcome::Signaled(_) => {
            jobs::with_jobs(|t| t.remove(pgid));
        }
    }
}
