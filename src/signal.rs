extern crate libc;
extern crate nix;

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::{self, Pid};
use std::fmt::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};

use crate::config::PROMPT;
use crate::jobs::{self, JobState};

/// Signals whose handlers touch the job table or the foreground cell.
const RELAYED: [Signal; 3] = [Signal::SIGCHLD, Signal::SIGINT, Signal::SIGTSTP];

/// Process group of the foreground job; 0 while the shell itself is in front.
static FOREGROUND: AtomicI32 = AtomicI32::new(0);
/// Outcome of the foreground process when the SIGCHLD handler reaped it.
static REAPED_KIND: AtomicU8 = AtomicU8::new(REAPED_NONE);
static REAPED_CODE: AtomicI32 = AtomicI32::new(0);
static INTERACTIVE: AtomicBool = AtomicBool::new(false);

const REAPED_NONE: u8 = 0;
const REAPED_EXITED: u8 = 1;
const REAPED_SIGNALED: u8 = 2;
const REAPED_STOPPED: u8 = 3;

/// How a waited-for process changed state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Outcome {
    Exited(i32),
    Signaled(i32),
    Stopped(i32),
}

impl Outcome {
    pub fn from_wait(status: WaitStatus) -> Option<(Pid, Outcome)> {
        match status {
            WaitStatus::Exited(pid, code) => Some((pid, Outcome::Exited(code))),
            WaitStatus::Signaled(pid, sig, _) => Some((pid, Outcome::Signaled(sig as i32))),
            WaitStatus::Stopped(pid, sig) => Some((pid, Outcome::Stopped(sig as i32))),
            _ => None,
        }
    }

    /// Value of `$?`: the exit code, or 128 plus the signal number.
    pub fn status(self) -> i32 {
        match self {
            Outcome::Exited(code) => code & 0xff,
            Outcome::Signaled(sig) | Outcome::Stopped(sig) => 128 + sig,
        }
    }

    fn record(self) {
        let (kind, code) = match self {
            Outcome::Exited(code) => (REAPED_EXITED, code),
            Outcome::Signaled(sig) => (REAPED_SIGNALED, sig),
            Outcome::Stopped(sig) => (REAPED_STOPPED, sig),
        };
        REAPED_CODE.store(code, Ordering::SeqCst);
        REAPED_KIND.store(kind, Ordering::SeqCst);
    }
}

/// Makes `pgid` the foreground job and forgets any earlier reaped outcome.
pub fn set_foreground(pgid: Pid) {
    REAPED_KIND.store(REAPED_NONE, Ordering::SeqCst);
    FOREGROUND.store(pgid.as_raw(), Ordering::SeqCst);
}

pub fn clear_foreground() {
    FOREGROUND.store(0, Ordering::SeqCst);
}

pub fn foreground() -> Option<Pid> {
    match FOREGROUND.load(Ordering::SeqCst) {
        0 => None,
        pgid => Some(Pid::from_raw(pgid)),
    }
}

/// Takes the foreground outcome recorded by the SIGCHLD handler, if any.
pub fn take_reaped() -> Option<Outcome> {
    let kind = REAPED_KIND.swap(REAPED_NONE, Ordering::SeqCst);
    let code = REAPED_CODE.load(Ordering::SeqCst);
    match kind {
        REAPED_EXITED => Some(Outcome::Exited(code)),
        REAPED_SIGNALED => Some(Outcome::Signaled(code)),
        REAPED_STOPPED => Some(Outcome::Stopped(code)),
        _ => None,
    }
}

/// Blocks the relayed signals until dropped, so the main loop and the
/// handlers never mutate the job table at the same time.
pub struct SignalGuard {
    saved: SigSet,
}

impl SignalGuard {
    pub fn new() -> SignalGuard {
        let mut saved = SigSet::empty();
        let _ = signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&relayed()), Some(&mut saved));
        SignalGuard { saved }
    }

    /// Sleeps until a signal is handled, with the relayed signals unblocked
    /// for the duration of the wait.
    pub fn suspend(&self) {
        let mut mask = self.saved.clone();
        for sig in RELAYED.iter() {
            mask.remove(*sig);
        }
        unsafe {
            libc::sigsuspend(mask.as_ref());
        }
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        let _ = signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.saved), None);
    }
}

fn relayed() -> SigSet {
    let mut set = SigSet::empty();
    for sig in RELAYED.iter() {
        set.add(*sig);
    }
    set
}

/// Installs the relay. Interactive shells also ignore terminal stop signals
/// so they can hand the terminal to their jobs.
pub fn install(interactive: bool) -> nix::Result<()> {
    INTERACTIVE.store(interactive, Ordering::SeqCst);
    jobs::init();

    let handlers: [(Signal, extern "C" fn(libc::c_int)); 3] = [
        (Signal::SIGCHLD, handle_sigchld),
        (Signal::SIGINT, handle_sigint),
        (Signal::SIGTSTP, handle_sigtstp),
    ];
    for &(sig, handler) in handlers.iter() {
        let action = SigAction::new(SigHandler::Handler(handler), SaFlags::SA_RESTART, relayed());
        unsafe { signal::sigaction(sig, &action) }?;
    }
    if interactive {
        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        for &sig in [Signal::SIGTTOU, Signal::SIGTTIN].iter() {
            unsafe { signal::sigaction(sig, &ignore) }?;
        }
    }
    Ok(())
}

/// Puts every disposition the shell changed back to default and clears the
/// signal mask. Runs in a freshly forked child.
pub fn reset_for_child() {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for &sig in RELAYED.iter().chain([Signal::SIGTTOU, Signal::SIGTTIN].iter()) {
        let _ = unsafe { signal::sigaction(sig, &default) };
    }
    let _ = signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None);
}

pub extern "C" fn handle_sigchld(_signal: libc::c_int) {
    // waitpid ends the drain by failing, which would clobber the errno of
    // whatever call this handler interrupted
    let _errno = ErrnoGuard::save();
    loop {
        let status = match wait::waitpid(
            Pid::from_raw(-1),
            Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED),
        ) {
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(status) => status,
        };
        let (pid, outcome) = match Outcome::from_wait(status) {
            Some(reaped) => reaped,
            None => continue,
        };

        // the foreground controller settles its own job
        if foreground() == Some(pid) {
            outcome.record();
            clear_foreground();
            continue;
        }

        let mut table = jobs::lock();
        match outcome {
            Outcome::Stopped(_) => {
                if let Some(id) = table.set_state(pid, JobState::Stopped) {
                    if let Some(job) = table.find_by_id(id) {
                        notify_stopped(id, job.command_line());
                    }
                }
            }
            Outcome::Exited(_) | Outcome::Signaled(_) => {
                if let Some(job) = table.find_by_group(pid) {
                    if job.state() == JobState::Running {
                        notify_done(job.id(), job.command_line());
                    }
                }
                table.remove(pid);
            }
        }
    }
}

pub extern "C" fn handle_sigint(_signal: libc::c_int) {
    let _errno = ErrnoGuard::save();
    match foreground() {
        Some(pgid) => {
            let _ = signal::killpg(pgid, Signal::SIGINT);
        }
        None => {
            if INTERACTIVE.load(Ordering::SeqCst) {
                let mut out = RawWriter::new();
                let _ = write!(out, "\n{}", PROMPT);
                out.flush();
            }
        }
    }
}

pub extern "C" fn handle_sigtstp(_signal: libc::c_int) {
    let _errno = ErrnoGuard::save();
    if let Some(pgid) = foreground() {
        let _ = signal::killpg(pgid, Signal::SIGTSTP);
    }
}

pub fn notify_stopped(id: u32, cmdline: &str) {
    let mut out = RawWriter::new();
    let _ = write!(out, "\n[{}]+ Stopped                 {}\n", id, cmdline);
    out.flush();
}

pub fn notify_done(id: u32, cmdline: &str) {
    let mut out = RawWriter::new();
    let _ = write!(out, "[{}]+ Done                    {}\n", id, cmdline);
    out.flush();
}

/// Puts the interrupted code's `errno` back when a handler returns.
struct ErrnoGuard(libc::c_int);

impl ErrnoGuard {
    fn save() -> ErrnoGuard {
        ErrnoGuard(nix::errno::errno())
    }
}

impl Drop for ErrnoGuard {
    fn drop(&mut self) {
        unsafe { *errno_location() = self.0 };
    }
}

#[cfg(any(target_os = "linux", target_os = "redox"))]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::__errno_location()
}

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly"
))]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::__error()
}

#[cfg(any(target_os = "android", target_os = "netbsd", target_os = "openbsd"))]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::__errno()
}

/// Formats into a stack buffer and writes it straight to stdout, bypassing
/// std's buffered and locked handle. Safe to use from a signal handler.
struct RawWriter {
    buf: [u8; jobs::MAXLINE + 64],
    len: usize,
}

impl RawWriter {
    fn new() -> RawWriter {
        RawWriter {
            buf: [0; jobs::MAXLINE + 64],
            len: 0,
        }
    }

    fn flush(&mut self) {
        let mut written = 0;
        while written < self.len {
            match unistd::write(libc::STDOUT_FILENO, &self.buf[written..self.len]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if e.as_errno() == Some(nix::errno::Errno::EINTR) => continue,
                Err(_) => break,
            }
        }
        self.len = 0;
    }
}

impl fmt::Write for RawWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let n = s.len().min(self.buf.len() - self.len);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}
