//! Process-tree inspection.
//!
//! Used to confirm that a running tree is fully visible from outside: give it
//! the root's pid and it reports every live descendant.

use std::collections::HashMap;
use std::fmt::Write as _;

use serde::Serialize;

use crate::error::{Error, Result};

/// Guard against pid reuse producing a cycle.
const MAX_TREE_DEPTH: usize = 64;

/// One process and its live descendants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessTree {
    pub pid: u32,
    pub name: String,
    pub children: Vec<Self>,
}

impl ProcessTree {
    /// Every process below this one.
    pub fn descendant_count(&self) -> usize {
        self.children
            .iter()
            .map(|c| 1 + c.descendant_count())
            .sum()
    }

    /// Levels below this process (0 for a childless process).
    pub fn height(&self) -> usize {
        self.children
            .iter()
            .map(|c| 1 + c.height())
            .max()
            .unwrap_or(0)
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.pid == pid || self.children.iter().any(|c| c.contains(pid))
    }

    /// Indented, one process per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, indent: usize) {
        let _ = writeln!(out, "{:indent$}{} {}", "", self.pid, self.name, indent = indent * 2);
        for child in &self.children {
            child.render_into(out, indent + 1);
        }
    }
}

#[derive(Debug, Clone)]
struct ProcEntry {
    name: String,
    ppid: u32,
}

/// Snapshot the tree rooted at `root_pid`.
pub fn capture(root_pid: u32) -> Result<ProcessTree> {
    let table = read_process_table()?;
    let root = table
        .get(&root_pid)
        .ok_or_else(|| Error::Inspect(format!("process {root_pid} not found")))?;

    let mut by_parent: HashMap<u32, Vec<u32>> = HashMap::new();
    for (&pid, entry) in &table {
        by_parent.entry(entry.ppid).or_default().push(pid);
    }
    for children in by_parent.values_mut() {
        children.sort_unstable();
    }

    Ok(build(root_pid, root.name.clone(), &table, &by_parent, 0))
}

fn build(
    pid: u32,
    name: String,
    table: &HashMap<u32, ProcEntry>,
    by_parent: &HashMap<u32, Vec<u32>>,
    depth: usize,
) -> ProcessTree {
    let children = if depth >= MAX_TREE_DEPTH {
        Vec::new()
    } else {
        by_parent
            .get(&pid)
            .into_iter()
            .flatten()
            .filter(|&&child| child != pid)
            .filter_map(|&child| {
                let entry = table.get(&child)?;
                Some(build(child, entry.name.clone(), table, by_parent, depth + 1))
            })
            .collect()
    };
    ProcessTree {
        pid,
        name,
        children,
    }
}

#[cfg(target_os = "linux")]
fn read_process_table() -> Result<HashMap<u32, ProcEntry>> {
    let entries = std::fs::read_dir("/proc")
        .map_err(|e| Error::Inspect(format!("cannot read /proc: {e}")))?;
    let mut table = HashMap::new();
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        // processes can exit between read_dir and read
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
            continue;
        };
        if let Some(parsed) = parse_stat(&stat) {
            table.insert(pid, parsed);
        }
    }
    Ok(table)
}

#[cfg(not(target_os = "linux"))]
fn read_process_table() -> Result<HashMap<u32, ProcEntry>> {
    Err(Error::Inspect(
        "process-tree inspection is only supported on Linux".to_string(),
    ))
}

/// Parse `/proc/<pid>/stat`: "pid (comm) state ppid ...".
///
/// `comm` may itself contain spaces and parentheses, so split at the last `)`.
fn parse_stat(stat: &str) -> Option<ProcEntry> {
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    let name = stat.get(open + 1..close)?.to_string();
    let mut fields = stat.get(close + 1..)?.split_whitespace();
    let _state = fields.next()?;
    let ppid = fields.next()?.parse().ok()?;
    Some(ProcEntry { name, ppid })
}
