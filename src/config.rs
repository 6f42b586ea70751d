use std::path::PathBuf;

pub const PROMPT: &str = "icsh $ ";
pub const USAGE: &str = "Usage: icsh [-v] [script-file]";

#[derive(Debug, Default, PartialEq)]
pub struct Config {
    /// Script to read commands from; `None` means interactive.
    pub script: Option<PathBuf>,
    pub verbose: bool,
}

#[derive(Debug, PartialEq)]
pub enum Invocation {
    Run(Config),
    Help,
    Usage,
}

impl Config {
    pub fn from_args<I, S>(args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = Config::default();
        for arg in args.into_iter().map(Into::into) {
            match arg.as_str() {
                "-v" | "--verbose" => config.verbose = true,
                "-h" | "--help" => return Invocation::Help,
                flag if flag.starts_with('-') && flag.len() > 1 => return Invocation::Usage,
                _ if config.script.is_some() => return Invocation::Usage,
                _ => config.script = Some(PathBuf::from(arg)),
            }
        }
        Invocation::Run(config)
    }

    pub fn interactive(&self) -> bool {
        self.script.is_none()
    }

    /// Default tracing directive when `RUST_LOG` is unset.
    pub fn log_directive(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "warn"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_arguments_is_interactive() {
        match Config::from_args(Vec::<String>::new()) {
            Invocation::Run(c) => {
                assert!(c.interactive());
                assert_eq!(c.log_directive(), "warn");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn script_and_verbose() {
        match Config::from_args(vec!["-v", "run.sh"]) {
            Invocation::Run(c) => {
                assert!(!c.interactive());
                assert_eq!(c.script, Some(PathBuf::from("run.sh")));
                assert_eq!(c.log_directive(), "debug");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejects_extra_arguments() {
        assert_eq!(Config::from_args(vec!["a.sh", "b.sh"]), Invocation::Usage);
        assert_eq!(Config::from_args(vec!["--bogus"]), Invocation::Usage);
        assert_eq!(Config::from_args(vec!["-h"]), Invocation::Help);
    }
}
