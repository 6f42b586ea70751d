use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result of a built-in or an external command; `Ok` carries the new `$?`.
pub type CliResult = Result<i32, ShellError>;

pub const EXIT_FAILURE: i32 = 1;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("job table full")]
    TableFull,
    #[error("fork: {0}")]
    Fork(#[source] nix::Error),
    #[error("{0}: command not found")]
    CommandNotFound(String),
    #[error("{program}: {source}")]
    Exec {
        program: String,
        #[source]
        source: nix::Error,
    },
    #[error("{}: {}", .path.display(), .source)]
    Redirect {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },
    #[error("waitpid: {0}")]
    Wait(#[source] nix::Error),
    #[error("{builtin}: %{id}: no such job")]
    NoSuchJob { builtin: &'static str, id: u32 },
    #[error("{builtin}: invalid job id: {arg}")]
    InvalidJobId { builtin: &'static str, arg: String },
    #[error("{builtin}: usage: {builtin} %<job_id>")]
    Usage { builtin: &'static str },
    #[error("cd: {path}: {source}")]
    Cd {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("cannot open {}: {}", .path.display(), .source)]
    Script {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ShellError {
    /// Shell status recorded in `$?` after the error is reported.
    pub fn status(&self) -> i32 {
        EXIT_FAILURE
    }
}

pub fn ok(status: i32) -> CliResult {
    Ok(status & 0xff)
}
