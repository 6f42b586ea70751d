use lazy_static::lazy_static;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::common::ShellError;
use crate::signal::SignalGuard;

pub const MAXJOBS: usize = 16;
pub const MAXLINE: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum JobState {
    Undefined,
    Running,
    Stopped,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Undefined => "Undefined",
            JobState::Running => "Running",
            JobState::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One slot of the job table. The command text lives inline so that the
/// table never touches the heap, which keeps it usable from the SIGCHLD
/// handler.
#[derive(Clone, Copy)]
pub struct Job {
    id: u32,
    pgid: libc::pid_t,
    state: JobState,
    cmdline: [u8; MAXLINE],
    len: usize,
}

impl Job {
    const EMPTY: Job = Job {
        id: 0,
        pgid: 0,
        state: JobState::Undefined,
        cmdline: [0; MAXLINE],
        len: 0,
    };

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn pgid(&self) -> Pid {
        Pid::from_raw(self.pgid)
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn command_line(&self) -> &str {
        std::str::from_utf8(&self.cmdline[..self.len]).unwrap_or("")
    }

    /// Delivers `sig` to every process in the job's group.
    pub fn signal_group(&self, sig: Signal) -> nix::Result<()> {
        signal::killpg(self.pgid(), sig)
    }

    fn is_live(&self) -> bool {
        self.state != JobState::Undefined
    }

    fn fill(&mut self, id: u32, pgid: Pid, state: JobState, cmdline: &str) {
        let mut len = cmdline.len().min(MAXLINE);
        while !cmdline.is_char_boundary(len) {
            len -= 1;
        }
        self.id = id;
        self.pgid = pgid.as_raw();
        self.state = state;
        self.cmdline[..len].copy_from_slice(&cmdline.as_bytes()[..len]);
        self.len = len;
    }

    fn clear(&mut self) {
        self.id = 0;
        self.pgid = 0;
        self.state = JobState::Undefined;
        self.len = 0;
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("pgid", &self.pgid)
            .field("state", &self.state)
            .field("cmdline", &self.command_line())
            .finish()
    }
}

/// Fixed-capacity registry of the shell's jobs.
///
/// Ids are handed out sequentially. Removing a job never renumbers the
/// others; the next id becomes one past the highest live id, so ids come
/// back only once their slot has been freed.
#[derive(Debug)]
pub struct JobTable {
    slots: [Job; MAXJOBS],
    next_id: u32,
}

impl Default for JobTable {
    fn default() -> Self {
        JobTable {
            slots: [Job::EMPTY; MAXJOBS],
            next_id: 1,
        }
    }
}

impl JobTable {
    pub fn new() -> JobTable {
        JobTable::default()
    }

    /// Registers a process group and returns its job id.
    ///
    /// A group that is already tracked keeps its id and only takes the new
    /// state, so one group never owns two records.
    pub fn add(&mut self, pgid: Pid, state: JobState, cmdline: &str) -> Result<u32, ShellError> {
        debug_assert!(pgid.as_raw() > 0 && state != JobState::Undefined);
        if let Some(id) = self.set_state(pgid, state) {
            return Ok(id);
        }
        let id = self.next_id;
        let slot = self
            .slots
            .iter_mut()
            .find(|j| !j.is_live())
            .ok_or(ShellError::TableFull)?;
        slot.fill(id, pgid, state, cmdline);
        self.next_id += 1;
        Ok(id)
    }

    /// Frees the slot of `pgid`. Returns false when it was not tracked.
    pub fn remove(&mut self, pgid: Pid) -> bool {
        match self
            .slots
            .iter_mut()
            .find(|j| j.is_live() && j.pgid == pgid.as_raw())
        {
            Some(job) => {
                job.clear();
                self.next_id = self.max_id() + 1;
                true
            }
            None => false,
        }
    }

    /// Updates the state of a tracked group and returns its id.
    pub fn set_state(&mut self, pgid: Pid, state: JobState) -> Option<u32> {
        let job = self
            .slots
            .iter_mut()
            .find(|j| j.is_live() && j.pgid == pgid.as_raw())?;
        job.state = state;
        Some(job.id)
    }

    pub fn find_by_group(&self, pgid: Pid) -> Option<&Job> {
        self.live().find(|j| j.pgid == pgid.as_raw())
    }

    pub fn find_by_id(&self, id: u32) -> Option<&Job> {
        self.live().find(|j| j.id == id)
    }

    /// Live jobs in the order they were added.
    pub fn list(&self) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self.live().collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    /// Lines printed by `jobs`; the most recent job carries the `+`.
    pub fn listing(&self) -> Vec<String> {
        let current = self.max_id();
        self.list()
            .into_iter()
            .map(|job| {
                format!(
                    "[{}]{} {:<20} {}{}",
                    job.id,
                    if job.id == current { '+' } else { '-' },
                    job.state,
                    job.command_line(),
                    if job.state == JobState::Running { " &" } else { "" }
                )
            })
            .collect()
    }

    fn live(&self) -> impl Iterator<Item = &Job> {
        self.slots.iter().filter(|j| j.is_live())
    }

    fn max_id(&self) -> u32 {
        self.live().map(|j| j.id).max().unwrap_or(0)
    }
}

lazy_static! {
    static ref JOBS: Mutex<JobTable> = Mutex::new(JobTable::new());
}

/// Builds the shared table before any handler can reach it.
pub fn init() {
    lazy_static::initialize(&JOBS);
}

/// Runs `f` on the shared table with the relay's signals blocked.
pub fn with_jobs<R, F>(f: F) -> R
where
    F: FnOnce(&mut JobTable) -> R,
{
    let _guard = SignalGuard::new();
    let mut table = lock();
    f(&mut *table)
}

/// Raw access for the signal handlers, which already run with the relay's
/// signals masked. Everything else goes through `with_jobs`.
pub(crate) fn lock() -> MutexGuard<'static, JobTable> {
    JOBS.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn pid(n: i32) -> Pid {
        Pid::from_raw(n)
    }

    #[test]
    fn ids_are_sequential() {
        let mut table = JobTable::new();
        assert_eq!(table.add(pid(100), JobState::Running, "sleep 1").unwrap(), 1);
        assert_eq!(table.add(pid(200), JobState::Running, "sleep 2").unwrap(), 2);
        assert_eq!(table.add(pid(300), JobState::Stopped, "cat").unwrap(), 3);
        assert_eq!(table.list().len(), 3);
        assert_eq!(table.find_by_group(pid(200)).unwrap().id(), 2);
        assert_eq!(table.find_by_id(3).unwrap().command_line(), "cat");
        assert_eq!(table.find_by_id(3).unwrap().state(), JobState::Stopped);
        assert!(table.find_by_id(4).is_none());
    }

    #[test]
    fn removal_keeps_other_ids() {
        let mut table = JobTable::new();
        table.add(pid(100), JobState::Running, "a").unwrap();
        table.add(pid(200), JobState::Running, "b").unwrap();
        table.add(pid(300), JobState::Running, "c").unwrap();
        assert!(table.remove(pid(200)));
        assert_eq!(table.find_by_group(pid(300)).unwrap().id(), 3);
        assert_eq!(table.add(pid(400), JobState::Running, "d").unwrap(), 4);

        assert!(table.remove(pid(400)));
        assert!(table.remove(pid(300)));
        // highest id is gone, numbering continues after the survivors
        assert_eq!(table.add(pid(500), JobState::Running, "e").unwrap(), 2);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut table = JobTable::new();
        table.add(pid(42), JobState::Running, "sleep 100").unwrap();
        assert!(table.remove(pid(42)));
        assert!(!table.remove(pid(42)));
        assert!(table.list().is_empty());
        assert_eq!(table.add(pid(43), JobState::Running, "sleep 1").unwrap(), 1);
    }

    #[test]
    fn full_table() {
        let mut table = JobTable::new();
        for n in 0..MAXJOBS {
            table.add(pid(1000 + n as i32), JobState::Running, "sleep 5").unwrap();
        }
        match table.add(pid(9999), JobState::Running, "one too many") {
            Err(ShellError::TableFull) => {}
            other => panic!("expected TableFull, got {:?}", other),
        }
        assert!(table.remove(pid(1003)));
        assert!(table.add(pid(9999), JobState::Running, "fits now").is_ok());
    }

    #[test]
    fn re_adding_a_group_updates_it() {
        let mut table = JobTable::new();
        let id = table.add(pid(7), JobState::Running, "vi").unwrap();
        assert_eq!(table.add(pid(7), JobState::Stopped, "vi").unwrap(), id);
        assert_eq!(table.list().len(), 1);
        assert_eq!(table.find_by_id(id).unwrap().state(), JobState::Stopped);
    }

    #[test]
    fn ids_and_groups_stay_unique() {
        let mut table = JobTable::new();
        // deterministic mix of adds and removes over a small pid space
        let mut seed: u32 = 12345;
        for _ in 0..2000 {
            seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
            let group = pid(1 + (seed >> 16) as i32 % 24);
            if seed & 1 == 0 {
                let _ = table.add(group, JobState::Running, "x");
            } else {
                table.remove(group);
            }
            let jobs = table.list();
            for (i, a) in jobs.iter().enumerate() {
                assert_ne!(a.id(), 0);
                for b in &jobs[i + 1..] {
                    assert_ne!(a.id(), b.id());
                    assert_ne!(a.pgid(), b.pgid());
                }
            }
        }
    }

    #[test]
    fn long_command_lines_are_truncated() {
        let mut table = JobTable::new();
        let line = "é".repeat(MAXLINE);
        table.add(pid(5), JobState::Running, &line).unwrap();
        let stored = table.find_by_group(pid(5)).unwrap().command_line();
        assert!(stored.len() <= MAXLINE);
        assert!(line.starts_with(stored));
        assert!(!stored.is_empty());
    }

    #[test]
    fn listing_format() {
        let mut table = JobTable::new();
        table.add(pid(10), JobState::Stopped, "cat").unwrap();
        table.add(pid(11), JobState::Running, "sleep 100").unwrap();
        assert_eq!(
            table.listing(),
            vec![
                "[1]- Stopped              cat".to_string(),
                "[2]+ Running              sleep 100 &".to_string(),
            ]
        );
    }

    #[test]
    #[serial]
    fn shared_table_round_trip() {
        init();
        let id = with_jobs(|t| t.add(pid(31337), JobState::Running, "sleep 9")).unwrap();
        assert_eq!(
            with_jobs(|t| t.find_by_id(id).map(|j| j.command_line().to_string())),
            Some("sleep 9".to_string())
        );
        assert!(with_jobs(|t| t.remove(pid(31337))));
        assert!(!with_jobs(|t| t.remove(pid(31337))));
    }
}
