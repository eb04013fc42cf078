#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! Process-tree RSS sampling
//!
//! One `ps` query lists every process on the host with its parent and resident
//! size. The snapshot is indexed by parent so a tree can be walked without any
//! per-process lookups.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::process::{Command, Stdio};
use tracing::warn;

/// A process as seen in one snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProcessEntry {
    parent: u32,
    rss_kb: u64,
}

/// Point-in-time view of the host process table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessTreeSnapshot {
    processes: HashMap<u32, ProcessEntry>,
    children: HashMap<u32, Vec<u32>>,
}

impl ProcessTreeSnapshot {
    /// Query the process table once
    ///
    /// # Errors
    ///
    /// Returns error if `ps` cannot be run or exits unsuccessfully.
    pub fn capture() -> io::Result<Self> {
        let output = Command::new("ps")
            .args(["-A", "-o", "pid=", "-o", "ppid=", "-o", "rss="])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()?;

        if !output.status.success() {
            return Err(io::Error::other(format!("ps exited with {}", output.status)));
        }

        Ok(Self::parse(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Build a snapshot from `pid ppid rss` lines; unparseable lines are skipped
    #[must_use]
    pub fn parse(table: &str) -> Self {
        table
            .lines()
            .filter_map(Self::parse_line)
            .filter(|(pid, _)| *pid != 0)
            .fold(Self::default(), |mut snapshot, (pid, entry)| {
                snapshot.children.entry(entry.parent).or_default().push(pid);
                snapshot.processes.insert(pid, entry);
                snapshot
            })
    }

    /// Parse one line: "  1234   1  20480"
    fn parse_line(line: &str) -> Option<(u32, ProcessEntry)> {
        let mut fields = line.split_whitespace();
        let pid = fields.next()?.parse().ok()?;
        let parent = fields.next()?.parse().ok()?;
        let rss_kb = fields.next()?.parse().ok()?;
        Some((pid, ProcessEntry { parent, rss_kb }))
    }

    /// Number of processes in the snapshot
    #[must_use]
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// Whether the snapshot is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Whether `pid` was alive when the snapshot was taken
    #[must_use]
    pub fn contains(&self, pid: u32) -> bool {
        self.processes.contains_key(&pid)
    }

    /// Resident size of a single process, without its children
    #[must_use]
    pub fn rss_kb(&self, pid: u32) -> Option<u64> {
        self.processes.get(&pid).map(|entry| entry.rss_kb)
    }

    /// Every transitive descendant of `root`, breadth first, excluding `root`
    #[must_use]
    pub fn descendants(&self, root: u32) -> Vec<u32> {
        let mut seen = HashSet::from([root]);
        let mut queue = VecDeque::from([root]);
        let mut found = Vec::new();

        while let Some(current) = queue.pop_front() {
            for &child in self.children.get(&current).into_iter().flatten() {
                if seen.insert(child) {
                    found.push(child);
                    queue.push_back(child);
                }
            }
        }

        found
    }

    /// Summed RSS of `root` and all its descendants; 0 if `root` is gone
    #[must_use]
    pub fn tree_rss_kb(&self, root: u32) -> u64 {
        self.sample(root).rss_kb
    }

    /// Summed RSS and descendant list of `root`; empty if `root` is gone
    #[must_use]
    pub fn sample(&self, root: u32) -> TreeSample {
        let Some(root_rss) = self.rss_kb(root) else {
            return TreeSample::default();
        };

        let descendants = self.descendants(root);
        let rss_kb = root_rss.saturating_add(self.sum_rss_kb(&descendants));
        TreeSample { rss_kb, descendants }
    }

    /// Summed RSS of whichever of `pids` are present; missing pids add nothing
    #[must_use]
    pub fn sum_rss_kb(&self, pids: &[u32]) -> u64 {
        pids.iter()
            .filter_map(|&pid| self.rss_kb(pid))
            .fold(0, u64::saturating_add)
    }
}

/// One reading of a process tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeSample {
    /// Summed resident memory of the root and its descendants (KB)
    pub rss_kb: u64,
    /// Descendants present in this reading, excluding the root
    pub descendants: Vec<u32>,
}

/// Source of process-tree memory samples
pub trait RssSampler: Send + Sync {
    /// Summed resident memory (KB) of `root_pid` and its descendants right now.
    /// Returns 0 when there is nothing to measure.
    fn sample_kb(&self, root_pid: u32) -> u64;

    /// Like [`sample_kb`](Self::sample_kb), also reporting the descendants seen
    fn sample_tree(&self, root_pid: u32) -> TreeSample {
        TreeSample {
            rss_kb: self.sample_kb(root_pid),
            descendants: Vec::new(),
        }
    }

    /// Summed resident memory (KB) of whichever `pids` are still alive.
    /// Used once the root has been reaped and can no longer anchor a tree walk.
    fn survivors_kb(&self, _pids: &[u32]) -> u64 {
        0
    }
}

/// [`RssSampler`] backed by one `ps` query per sample
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessTreeRssSampler;

impl ProcessTreeRssSampler {
    fn snapshot() -> Option<ProcessTreeSnapshot> {
        ProcessTreeSnapshot::capture()
            .inspect_err(|e| warn!(error = %e, "process table query failed, sampling 0"))
            .ok()
    }
}

impl RssSampler for ProcessTreeRssSampler {
    fn sample_kb(&self, root_pid: u32) -> u64 {
        self.sample_tree(root_pid).rss_kb
    }

    fn sample_tree(&self, root_pid: u32) -> TreeSample {
        Self::snapshot()
            .map(|snapshot| snapshot.sample(root_pid))
            .unwrap_or_default()
    }

    fn survivors_kb(&self, pids: &[u32]) -> u64 {
        if pids.is_empty() {
            return 0;
        }
        Self::snapshot().map_or(0, |snapshot| snapshot.sum_rss_kb(pids))
    }
}
