//! Process-tree reporting for the `psvis` built-in.
//!
//! The report is a DOT digraph rooted at one PID. It normally comes from the
//! kernel module's pseudo-file; when that file is absent the same text is
//! produced from `/proc` in userspace.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Something that can answer "give me the process tree under this PID".
pub trait ProcessTreeSource {
    /// Write the report for `pid` to `out`. `pid` is passed through as typed.
    fn report(&self, pid: &str, out: &mut dyn Write) -> Result<()>;
}

/// Line-oriented pseudo-file protocol: write a PID, read back the report.
pub struct KernelBridge {
    endpoint: PathBuf,
}

impl KernelBridge {
    pub fn new(endpoint: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

impl ProcessTreeSource for KernelBridge {
    fn report(&self, pid: &str, out: &mut dyn Write) -> Result<()> {
        let mut request = OpenOptions::new()
            .write(true)
            .open(&self.endpoint)
            .with_context(|| format!("error opening {} for writing", self.endpoint.display()))?;
        writeln!(request, "{pid}")
            .with_context(|| format!("error writing to {}", self.endpoint.display()))?;
        drop(request);

        let mut response = File::open(&self.endpoint)
            .with_context(|| format!("error opening {} for reading", self.endpoint.display()))?;
        io::copy(&mut response, out)
            .with_context(|| format!("error reading {}", self.endpoint.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ProcessEntry {
    pid: i64,
    ppid: i64,
    comm: String,
}

/// Userspace rendition of the kernel report, built from `<root>/<pid>/stat`.
pub struct ProcfsTree {
    root: PathBuf,
    stat_line: Regex,
}

impl ProcfsTree {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            root: root.into(),
            // The command name may itself contain parentheses; the last `)` ends it.
            stat_line: Regex::new(r"(?s)^(\d+) \((.*)\) \S+ (-?\d+)")?,
        })
    }

    fn read_entry(&self, dir: &Path) -> Option<ProcessEntry> {
        let stat = fs::read_to_string(dir.join("stat")).ok()?;
        let caps = self.stat_line.captures(&stat)?;
        Some(ProcessEntry {
            pid: caps[1].parse().ok()?,
            comm: caps[2].to_string(),
            ppid: caps[3].parse().ok()?,
        })
    }

    fn scan(&self) -> Result<Vec<ProcessEntry>> {
        let mut entries = Vec::new();
        let dir = fs::read_dir(&self.root)
            .with_context(|| format!("error reading {}", self.root.display()))?;
        for entry in dir.filter_map(|e| e.ok()) {
            let numeric = entry
                .file_name()
                .to_str()
                .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
            if !numeric {
                continue;
            }
            // Processes can exit between listing and reading.
            if let Some(process) = self.read_entry(&entry.path()) {
                entries.push(process);
            }
        }
        entries.sort_by_key(|p| p.pid);
        Ok(entries)
    }
}

impl ProcessTreeSource for ProcfsTree {
    fn report(&self, pid: &str, out: &mut dyn Write) -> Result<()> {
        let processes = self.scan()?;
        render(leading_pid(pid), &processes, out)?;
        Ok(())
    }
}

/// Interpret the leading decimal digits of `text` the way `strtol` does;
/// anything unparsable is 0.
fn leading_pid(text: &str) -> i64 {
    let text = text.trim_start();
    let (sign, digits) = match text.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, text.strip_prefix('+').unwrap_or(text)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().map(|n| sign * n).unwrap_or(0)
}

fn node(p: &ProcessEntry) -> String {
    format!("\"{}\\n{}\"", p.pid, p.comm)
}

fn write_subtree(
    out: &mut dyn Write,
    parent: &ProcessEntry,
    children: &BTreeMap<i64, Vec<&ProcessEntry>>,
) -> io::Result<()> {
    writeln!(out, "{};", node(parent))?;
    for child in children.get(&parent.pid).into_iter().flatten() {
        writeln!(out, "{} -> {};", node(parent), node(child))?;
        write_subtree(out, child, children)?;
    }
    Ok(())
}

/// Render the subtree rooted at `pid`: depth-first, each parent before its
/// children, siblings in list order.
fn render(pid: i64, processes: &[ProcessEntry], out: &mut dyn Write) -> io::Result<()> {
    let Some(root) = processes.iter().find(|p| p.pid == pid) else {
        return writeln!(out, "PID {pid} not found.");
    };

    let mut children: BTreeMap<i64, Vec<&ProcessEntry>> = BTreeMap::new();
    for p in processes {
        if p.pid != p.ppid {
            children.entry(p.ppid).or_default().push(p);
        }
    }

    writeln!(out, "digraph ProcessTree {{")?;
    write_subtree(out, root, &children)?;
    writeln!(out, "}}")
}

/// Pick the kernel endpoint when it exists, the procfs walk otherwise.
pub fn source_for(endpoint: &Path, procfs_root: &Path) -> Result<Box<dyn ProcessTreeSource>> {
    if endpoint.exists() {
        Ok(Box::new(KernelBridge::new(endpoint)))
    } else {
        tracing::info!(
            endpoint = %endpoint.display(),
            "process-tree module not loaded, reading {}",
            procfs_root.display()
        );
        Ok(Box::new(ProcfsTree::new(procfs_root)?))
    }
}
