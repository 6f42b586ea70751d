mod cli;
mod common;
mod config;
mod foreground;
mod icsh;
mod jobs;
mod launch;
mod parse;
mod sh;
mod signal;

use std::env;
use std::fs::File;
use std::io::{self, BufReader};
use std::process;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;
use common::ShellError;
use config::{Config, Invocation, USAGE};

fn main() {
    let config = match Config::from_args(env::args().skip(1)) {
        Invocation::Run(config) => config,
        Invocation::Help => {
            println!("{}", USAGE);
            return;
        }
        Invocation::Usage => {
            eprintln!("{}", USAGE);
            process::exit(1);
        }
    };

    // RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_directive()));
    let ansi = nix::unistd::isatty(libc::STDERR_FILENO).unwrap_or(false);
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_ansi(ansi))
        .with(filter)
        .init();

    if let Err(e) = signal::install(config.interactive()) {
        eprintln!("icsh: sigaction: {}", e);
        process::exit(1);
    }

    let mut client = Cli::new(&config);
    let code = match &config.script {
        Some(path) => match File::open(path) {
            Ok(file) => client.go(BufReader::new(file)),
            Err(source) => {
                let e = ShellError::Script {
                    path: path.clone(),
                    source,
                };
                eprintln!("icsh: {}", e);
                process::exit(1);
            }
        },
        None => {
            let stdin = io::stdin();
            let input = stdin.lock();
            client.go(input)
        }
    };
    process::exit(code);
}
