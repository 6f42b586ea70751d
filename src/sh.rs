use crate::common::CliResult;
use crate::parse::Command;

pub trait Shell {
    fn prompt(&self);
    fn status(&self) -> i32;
    fn set_status(&mut self, status: i32);
    fn echo(&self, text: &str) -> CliResult;
    fn help(&self) -> CliResult;
    fn cd(&self, args: &[&str]) -> CliResult;
    fn exit(&self, args: &[&str]) -> !;
    fn list_jobs(&self) -> CliResult;
    fn bg(&mut self, args: &[&str]) -> CliResult;
    fn fg(&mut self, args: &[&str]) -> CliResult;
    fn run(&mut self, cmd: &Command) -> CliResult;
}
