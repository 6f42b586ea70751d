extern crate nix;

use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use tracing::debug;

use crate::common::*;
use crate::config::{Config, PROMPT};
use crate::foreground::{Foreground, Terminal};
use crate::jobs::{self, JobState};
use crate::launch;
use crate::parse::Command;
use crate::sh::Shell;
use crate::signal::SignalGuard;

const HELP: &str = "Built-in commands:
  echo <text>   print text ($? prints the last status)
  !!            repeat last command
  exit [n]      exit shell with code n
  cd [dir]      change directory
  jobs          list jobs
  fg %<n>       continue job n in the foreground
  bg %<n>       continue job n in the background
  help          show this help";

#[derive(Debug)]
pub struct Icsh {
    interactive: bool,
    status: i32,
    foreground: Foreground,
}

impl Icsh {
    pub fn new(config: &Config) -> Icsh {
        let interactive = config.interactive();
        Icsh {
            interactive,
            status: 0,
            foreground: Foreground::new(Terminal::detect(interactive)),
        }
    }

    /// Looks up job `id` and marks it running; returns its group and text.
    fn take_job(&self, builtin: &'static str, id: u32) -> Result<(Pid, String), ShellError> {
        jobs::with_jobs(|t| -> Result<(Pid, String), ShellError> {
            let (pgid, cmdline) = t
                .find_by_id(id)
                .map(|job| (job.pgid(), job.command_line().to_string()))
                .ok_or(ShellError::NoSuchJob { builtin, id })?;
            t.set_state(pgid, JobState::Running);
            Ok((pgid, cmdline))
        })
    }
}

impl Shell for Icsh {
    fn prompt(&self) {
        if self.interactive {
            print!("{}", PROMPT);
            let _ = io::stdout().flush();
        }
    }

    fn status(&self) -> i32 {
        self.status
    }

    fn set_status(&mut self, status: i32) {
        self.status = status & 0xff;
    }

    fn echo(&self, text: &str) -> CliResult {
        if text == "$?" {
            println!("{}", self.status);
        } else {
            println!("{}", text);
        }
        ok(0)
    }

    fn help(&self) -> CliResult {
        println!("{}", HELP);
        ok(0)
    }

    fn cd(&self, args: &[&str]) -> CliResult {
        let target = match args.first() {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir().unwrap_or_else(|| PathBuf::from("/")),
        };
        std::env::set_current_dir(&target).map_err(|source| ShellError::Cd {
            path: target.display().to_string(),
            source,
        })?;
        ok(0)
    }

    fn exit(&self, args: &[&str]) -> ! {
        let code = args
            .first()
            .and_then(|n| n.parse::<i32>().ok())
            .unwrap_or(0)
            & 0xff;
        if self.interactive {
            println!("bye");
        }
        let _ = io::stdout().flush();
        process::exit(code)
    }

    fn list_jobs(&self) -> CliResult {
        for line in jobs::with_jobs(|t| t.listing()) {
            println!("{}", line);
        }
        ok(0)
    }

    fn bg(&mut self, args: &[&str]) -> CliResult {
        let id = parse_job_id("bg", args)?;
        let _guard = SignalGuard::new();
        let (pgid, cmdline) = self.take_job("bg", id)?;
        let resumed = jobs::with_jobs(|t| {
            t.find_by_group(pgid)
                .map(|job| job.signal_group(Signal::SIGCONT))
        });
        if let Some(Err(e)) = resumed {
            debug!("SIGCONT to {}: {}", pgid, e);
        }
        println!("[{}]+ {} &", id, cmdline);
        ok(0)
    }

    fn fg(&mut self, args: &[&str]) -> CliResult {
        let id = parse_job_id("fg", args)?;
        let guard = SignalGuard::new();
        let (pgid, cmdline) = self.take_job("fg", id)?;
        println!("{}", cmdline);
        self.foreground.resume(&guard, pgid, &cmdline)
    }

    fn run(&mut self, cmd: &Command) -> CliResult {
        launch::launch(cmd, &self.foreground)
    }
}

/// Parses the `%N` (or bare `N`) argument of `bg` and `fg`.
pub fn parse_job_id(builtin: &'static str, args: &[&str]) -> Result<u32, ShellError> {
    let arg = match args.first() {
        Some(arg) => *arg,
        None => return Err(ShellError::Usage { builtin }),
    };
    let digits = arg.strip_prefix('%').unwrap_or(arg);
    match digits.parse::<u32>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ShellError::InvalidJobId {
            builtin,
            arg: arg.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn script_shell() -> Icsh {
        Icsh::new(&Config {
            script: Some(PathBuf::from("test.sh")),
            verbose: false,
        })
    }

    #[test]
    fn job_id_arguments() {
        assert_eq!(parse_job_id("fg", &["%3"]).unwrap(), 3);
        assert_eq!(parse_job_id("fg", &["12"]).unwrap(), 12);
        match parse_job_id("bg", &[]) {
            Err(ShellError::Usage { builtin }) => assert_eq!(builtin, "bg"),
            other => panic!("unexpected {:?}", other),
        }
        for bad in &["%", "%x", "%0", "-1", "%1x"] {
            match parse_job_id("bg", &[*bad]) {
                Err(ShellError::InvalidJobId { arg, .. }) => assert_eq!(arg, *bad),
                other => panic!("unexpected {:?} for {}", other, bad),
            }
        }
    }

    #[test]
    #[serial]
    fn bg_and_fg_on_missing_job() {
        jobs::init();
        let before = jobs::with_jobs(|t| t.listing());
        let mut sh = script_shell();
        match sh.bg(&["%9"]) {
            Err(e) => {
                assert_eq!(e.to_string(), "bg: %9: no such job");
                assert_ne!(e.status(), 0);
            }
            Ok(_) => panic!("bg on a missing job succeeded"),
        }
        match sh.fg(&["%9"]) {
            Err(e) => assert_eq!(e.to_string(), "fg: %9: no such job"),
            Ok(_) => panic!("fg on a missing job succeeded"),
        }
        assert_eq!(jobs::with_jobs(|t| t.listing()), before);
    }

    #[test]
    fn status_is_masked() {
        let mut sh = script_shell();
        sh.set_status(300);
        assert_eq!(sh.status(), 300 & 0xff);
    }
}
