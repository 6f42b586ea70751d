use nix::errno::Errno;
use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{self, ForkResult};
use std::ffi::{CStr, CString};
use std::io::{self, Write};
use std::os::unix::io::RawFd;
use std::path::Path;
use tracing::debug;

use crate::common::{ok, CliResult, ShellError, EXIT_FAILURE};
use crate::foreground::Foreground;
use crate::jobs::{self, JobState};
use crate::parse::Command;
use crate::signal::{self as relay, SignalGuard};

/// Forks `cmd` into its own process group. Background jobs are registered
/// and reported; foreground jobs are handed to `fg` and waited on.
pub fn launch(cmd: &Command, fg: &Foreground) -> CliResult {
    let argv = c_args(cmd)?;

    // the relay stays off until the job is recorded somewhere it can see
    let guard = SignalGuard::new();
    let _ = io::stdout().flush();
    // Safety: the shell is single-threaded, no lock can be held across the fork.
    let child = match unsafe { unistd::fork() } {
        Ok(ForkResult::Child) => {
            let terminal = if cmd.background { None } else { fg.terminal() };
            exec_child(cmd, &argv, terminal.map(|t| t.fd()))
        }
        Ok(ForkResult::Parent { child, .. }) => child,
        Err(e) => return Err(ShellError::Fork(e)),
    };
    // the child may have set its group, or even exec'd, already
    if let Err(e) = unistd::setpgid(child, child) {
        debug!("setpgid({}): {}", child, e);
    }
    debug!(
        pid = child.as_raw(),
        background = cmd.background,
        "launched {}",
        cmd.text()
    );

    if !cmd.background {
        return fg.run(&guard, child, cmd.text());
    }
    match jobs::with_jobs(|t| t.add(child, JobState::Running, cmd.text())) {
        Ok(id) => println!("[{}] {}", id, child),
        Err(e) => eprintln!("icsh: {}: {} runs untracked", e, child),
    }
    ok(0)
}

fn c_args(cmd: &Command) -> Result<Vec<CString>, ShellError> {
    cmd.argv
        .iter()
        .map(|arg| {
            CString::new(arg.as_bytes()).map_err(|_| ShellError::Exec {
                program: cmd.argv[0].clone(),
                source: Errno::EINVAL.into(),
            })
        })
        .collect()
}

fn exec_child(cmd: &Command, argv: &[CString], terminal: Option<RawFd>) -> ! {
    let pid = unistd::getpid();
    let _ = unistd::setpgid(pid, pid);
    if let Some(fd) = terminal {
        // still ignoring SIGTTOU here, so this cannot stop us
        let _ = unistd::tcsetpgrp(fd, pid);
    }
    relay::reset_for_child();

    if let Err(e) = redirect(cmd) {
        eprintln!("icsh: {}", e);
        unsafe { libc::_exit(EXIT_FAILURE) }
    }

    let args: Vec<&CStr> = argv.iter().map(|a| a.as_c_str()).collect();
    let e = match unistd::execvp(&argv[0], &args) {
        Ok(never) => match never {},
        Err(e) => e,
    };
    let e = if e.as_errno() == Some(Errno::ENOENT) {
        ShellError::CommandNotFound(cmd.argv[0].clone())
    } else {
        ShellError::Exec {
            program: cmd.argv[0].clone(),
            source: e,
        }
    };
    eprintln!("icsh: {}", e);
    let _ = io::stderr().flush();
    unsafe { libc::_exit(EXIT_FAILURE) }
}

fn redirect(cmd: &Command) -> Result<(), ShellError> {
    if let Some(path) = &cmd.input {
        dup_onto(path, OFlag::O_RDONLY, libc::STDIN_FILENO)?;
    }
    if let Some(path) = &cmd.output {
        let flags = OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC;
        dup_onto(path, flags, libc::STDOUT_FILENO)?;
    }
    Ok(())
}

fn dup_onto(path: &Path, flags: OFlag, target: RawFd) -> Result<(), ShellError> {
    let err = |source| ShellError::Redirect {
        path: path.to_path_buf(),
        source,
    };
    let fd = fcntl::open(path, flags, Mode::from_bits_truncate(0o666)).map_err(err)?;
    unistd::dup2(fd, target).map_err(err)?;
    if fd != target {
        let _ = unistd::close(fd);
    }
    Ok(())
}
