use std::path::PathBuf;

/// A simple command: words, optional `<`/`>` files and a trailing `&`.
#[derive(Debug, Default, PartialEq)]
pub struct Command {
    pub argv: Vec<String>,
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub background: bool,
    text: String,
}

impl Command {
    pub fn parse(line: &str) -> Option<Command> {
        let mut words: Vec<&str> = line.split_whitespace().collect();
        let mut background = false;
        match words.last().copied() {
            Some("&") => {
                words.pop();
                background = true;
            }
            Some(last) if last.len() > 1 && last.ends_with('&') => {
                let n = words.len();
                words[n - 1] = &last[..last.len() - 1];
                background = true;
            }
            _ => {}
        }

        let mut cmd = Command {
            background,
            text: words.join(" "),
            ..Command::default()
        };
        let mut iter = words.into_iter();
        while let Some(word) = iter.next() {
            match word {
                "<" | ">" => {
                    // a dangling operator stays a plain word
                    match iter.next() {
                        Some(path) => cmd.redirect(word, path),
                        None => cmd.argv.push(word.to_string()),
                    }
                }
                w if w.len() > 1 && (w.starts_with('<') || w.starts_with('>')) => {
                    cmd.redirect(&w[..1], &w[1..])
                }
                w => cmd.argv.push(w.to_string()),
            }
        }
        if cmd.argv.is_empty() {
            None
        } else {
            Some(cmd)
        }
    }

    fn redirect(&mut self, op: &str, path: &str) {
        if op == "<" {
            self.input = Some(PathBuf::from(path));
        } else {
            self.output = Some(PathBuf::from(path));
        }
    }

    /// The command line as shown by `jobs`, `fg` and notifications.
    pub fn text(&self) -> &str {
        &self.text
    }
}
