#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! Process management for profiled commands

use crate::clock::Clock;
use crate::tree::ProcessTreeSnapshot;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Shell used to interpret command strings
const SHELL: &str = "sh";

/// Offset added to a signal number to form an exit code, as shells do
const SIGNAL_EXIT_OFFSET: i32 = 128;

/// Build the `sh -c <command>` invocation shared by measured runs and hooks
pub(crate) fn shell_command(command: &str, working_dir: &Path) -> Command {
    let mut cmd = Command::new(SHELL);
    cmd.arg("-c")
        .arg(command)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    cmd
}

/// Exit code of a finished process; signal deaths map to `128 + signal`
#[must_use]
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| SIGNAL_EXIT_OFFSET.saturating_add(sig)))
        .unwrap_or(-1)
}

/// How a watched process finished
#[derive(Debug)]
pub enum WatchOutcome {
    /// The process exited on its own with this code
    Exited(i32),
    /// The deadline passed; the process tree has been killed
    TimedOut,
    /// The process status could not be read; the process tree has been killed
    PollFailed(io::Error),
}

/// A running command under measurement
///
/// The command runs through `sh -c` in its own process group with all standard
/// streams discarded. Dropping a process that is still running kills its tree.
pub struct ProfiledProcess {
    /// The child process handle
    child: Child,

    /// Process ID
    pid: u32,

    /// Exit code once observed
    exit_code: Option<i32>,
}

impl ProfiledProcess {
    /// Spawn `command` in `working_dir`
    ///
    /// # Errors
    ///
    /// Returns error if the shell cannot be spawned.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use toolchain_profiler::process::ProfiledProcess;
    /// let process = ProfiledProcess::spawn("mago lint src/", std::path::Path::new("/tmp"));
    /// ```
    pub fn spawn(command: &str, working_dir: &Path) -> io::Result<Self> {
        let process = Self::spawn_program(shell_command(command, working_dir))?;
        debug!(pid = process.pid, command, "spawned profiled process");
        Ok(process)
    }

    /// Spawn a prepared [`Command`] in its own process group.
    ///
    /// Stdio and working directory are left as the caller configured them.
    ///
    /// # Errors
    ///
    /// Returns error if the program cannot be spawned.
    pub fn spawn_program(mut program: Command) -> io::Result<Self> {
        let child = program.process_group(0).spawn()?;
        let pid = child.id();

        Ok(Self {
            child,
            pid,
            exit_code: None,
        })
    }

    /// Take the piped stderr handle, if stderr was piped and not yet taken
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Get the process ID
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Non-blocking exit check; `Some(code)` once the process has exited
    ///
    /// # Errors
    ///
    /// Returns error if the process status cannot be determined
    pub fn try_exit_code(&mut self) -> io::Result<Option<i32>> {
        if self.exit_code.is_none() {
            self.exit_code = self.child.try_wait()?.map(exit_code);
        }
        Ok(self.exit_code)
    }

    /// Sleep-poll-check until the process exits or `timeout` (measured from
    /// `started`) elapses. `on_tick` runs with the pid before every sleep.
    pub fn watch(
        &mut self,
        clock: &dyn Clock,
        started: Instant,
        interval: Duration,
        timeout: Option<Duration>,
        mut on_tick: impl FnMut(u32),
    ) -> WatchOutcome {
        loop {
            match self.try_exit_code() {
                Ok(Some(code)) => return WatchOutcome::Exited(code),
                Ok(None) => {}
                Err(e) => {
                    self.kill_tree();
                    return WatchOutcome::PollFailed(e);
                }
            }

            if timeout.is_some_and(|limit| clock.since(started) >= limit) {
                debug!(pid = self.pid, "deadline reached, killing process tree");
                self.kill_tree();
                return WatchOutcome::TimedOut;
            }

            on_tick(self.pid);
            clock.sleep(interval);
        }
    }

    /// Forcibly terminate the process and every descendant, then reap it
    ///
    /// The tree is captured before the root dies, since orphans are reparented
    /// and can no longer be found from the root afterwards.
    pub fn kill_tree(&mut self) {
        if self.exit_code.is_some() {
            return;
        }

        let descendants = ProcessTreeSnapshot::capture()
            .map(|snapshot| snapshot.descendants(self.pid))
            .unwrap_or_default();

        if let Ok(raw) = i32::try_from(self.pid) {
            let group = Pid::from_raw(raw);
            if let Err(e) = signal::killpg(group, Signal::SIGKILL) {
                debug!(pid = self.pid, error = %e, "process group kill failed");
            }
        }

        for pid in descendants {
            if let Ok(raw) = i32::try_from(pid) {
                // ESRCH is expected for processes already taken down with the group
                let _ = signal::kill(Pid::from_raw(raw), Signal::SIGKILL);
            }
        }

        // Ignore error if already exited
        let _ = self.child.kill();
        match self.child.wait() {
            Ok(status) => self.exit_code = Some(exit_code(status)),
            Err(e) => warn!(pid = self.pid, error = %e, "failed to reap killed process"),
        }
    }
}

impl Drop for ProfiledProcess {
    fn drop(&mut self) {
        if !matches!(self.try_exit_code(), Ok(Some(_))) {
            self.kill_tree();
        }
    }
}
