use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use tracing::debug;

use crate::common::*;
use crate::config::Config;
use crate::icsh::Icsh;
use crate::parse::Command;
use crate::sh::Shell;

pub struct Cli<'a> {
    shell: Icsh,
    interactive: bool,
    last_line: Option<String>,
    builtins: HashMap<String, Box<dyn Fn(&mut dyn Shell, &[&str], &str) -> CliResult + 'a>>,
}

impl<'a> Cli<'a> {
    pub fn new(config: &Config) -> Cli<'a> {
        let mut cli = Cli {
            shell: Icsh::new(config),
            interactive: config.interactive(),
            last_line: None,
            builtins: HashMap::new(),
        };
        // register builtins
        {
            cli.builtin("echo", |sh, _, text| sh.echo(text));
            cli.builtin("help", |sh, _, _| sh.help());
            cli.builtin("cd", |sh, args, _| sh.cd(args));
            cli.builtin("exit", |sh, args, _| sh.exit(args));
            cli.builtin("jobs", |sh, _, _| sh.list_jobs());
            cli.builtin("bg", |sh, args, _| sh.bg(args));
            cli.builtin("fg", |sh, args, _| sh.fg(args));
        }
        cli
    }

    fn builtin<F>(&mut self, name: &str, builtin: F)
    where
        F: Fn(&mut dyn Shell, &[&str], &str) -> CliResult + 'a,
    {
        self.builtins.insert(name.to_owned(), Box::new(builtin));
    }

    fn dispatch(&mut self, line: &str) -> CliResult {
        let parts: Vec<_> = line.split_whitespace().collect();
        if parts.is_empty() {
            return ok(0);
        }
        match self.builtins.get(parts[0]) {
            Some(f) => f(&mut self.shell, &parts[1..], arguments(line)),
            None => match Command::parse(line) {
                Some(cmd) => self.shell.run(&cmd),
                None => ok(0),
            },
        }
    }

    /// Resolves `!!` to the previous command and remembers everything else.
    fn recall(&mut self, line: &str) -> Option<String> {
        if line != "!!" {
            if !line.is_empty() {
                self.last_line = Some(line.to_owned());
            }
            return Some(line.to_owned());
        }
        let last = self.last_line.clone()?;
        if self.interactive {
            println!("{}", last);
        }
        Some(last)
    }

    /// Reads and runs commands until end of input. Returns the exit code.
    pub fn go<R: BufRead>(&mut self, mut input: R) -> i32 {
        let mut buf = String::new();
        loop {
            self.shell.prompt();
            buf.clear();
            match input.read_line(&mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("read error: {}", e);
                    eprintln!("icsh: {}", e);
                    break;
                }
            }
            let status = match self.recall(buf.trim()) {
                Some(line) => match self.dispatch(&line) {
                    Ok(status) => status,
                    Err(e) => {
                        eprintln!("{}", e);
                        e.status()
                    }
                },
                None => 0,
            };
            self.shell.set_status(status);
            let _ = io::stdout().flush();
        }

        if self.interactive {
            println!();
            0
        } else {
            self.shell.status()
        }
    }
}

/// Everything after the command word, spacing intact.
fn arguments(line: &str) -> &str {
    let line = line.trim_start();
    match line.find(char::is_whitespace) {
        Some(end) => line[end..].trim_start(),
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn script_cli() -> Cli<'static> {
        Cli::new(&Config {
            script: Some(PathBuf::from("t.sh")),
            verbose: false,
        })
    }

    #[test]
    fn recall_repeats_last_command() {
        let mut cli = script_cli();
        assert_eq!(cli.recall("!!"), None);
        assert_eq!(cli.recall("echo hi").as_deref(), Some("echo hi"));
        assert_eq!(cli.recall("").as_deref(), Some(""));
        assert_eq!(cli.recall("!!").as_deref(), Some("echo hi"));
    }

    #[test]
    fn script_exit_status_is_last_status() {
        let mut cli = script_cli();
        let code = cli.go("bg\necho done\n".as_bytes());
        assert_eq!(code, 0);
        let code = cli.go("echo ok\nfg %42\n".as_bytes());
        assert_eq!(code, 1);
    }

    #[test]
    fn arguments_keep_their_spacing() {
        assert_eq!(arguments("echo hi  there"), "hi  there");
        assert_eq!(arguments("  echo \t a   b "), "a   b ");
        assert_eq!(arguments("echo"), "");
        assert_eq!(arguments("echo $?"), "$?");
    }

    #[test]
    fn blank_lines_reset_status() {
        let mut cli = script_cli();
        assert_eq!(cli.go("fg\n\n".as_bytes()), 0);
    }
}
