//! Best-effort setup command run before each measurement

use crate::process::shell_command;
use std::path::Path;
use tracing::{debug, warn};

/// Runs the optional prepare command (typically a cache wipe).
///
/// Failures never abort the measurement: a cache directory that does not exist
/// yet is the common case on the first run.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrepareHook;

impl PrepareHook {
    /// Run `command` synchronously in `working_dir`; no-op when `None`.
    /// Returns whether the command ran and exited successfully.
    pub fn run(command: Option<&str>, working_dir: &Path) -> bool {
        let Some(command) = command else {
            return false;
        };

        match shell_command(command, working_dir).status() {
            Ok(status) if status.success() => {
                debug!(command, "prepare command finished");
                true
            }
            Ok(status) => {
                warn!(command, %status, "prepare command failed, continuing");
                false
            }
            Err(e) => {
                warn!(command, error = %e, "prepare command could not start, continuing");
                false
            }
        }
    }
}
