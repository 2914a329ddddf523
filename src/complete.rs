//! Tab completion against the search list and the working directory.

use crate::env::Session;
use crate::path::search_dirs;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Outcome of completing a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    None,
    One(String),
    Many {
        matches: Vec<String>,
        common_prefix: String,
    },
}

impl Completion {
    /// Apply the outcome to the edited line and report it on `out`, then
    /// reprint the short prompt with the (possibly updated) buffer.
    pub fn apply(&self, buffer: &mut Vec<u8>, out: &mut dyn Write, tag: &str) -> io::Result<()> {
        match self {
            Completion::None => {
                write!(out, "\nNo matches found.")?;
            }
            Completion::One(name) => {
                *buffer = name.as_bytes().to_vec();
            }
            Completion::Many {
                matches,
                common_prefix,
            } => {
                if common_prefix.len() > buffer.len() {
                    *buffer = common_prefix.as_bytes().to_vec();
                }
                write!(out, "\nPossible matches:\n")?;
                for m in matches {
                    write!(out, "{m}  ")?;
                }
            }
        }
        write!(out, "\n{tag}> ")?;
        out.write_all(buffer)?;
        out.flush()
    }
}

/// Completion source: the executable directories plus the working directory.
#[derive(Debug, Clone)]
pub struct Autocomplete {
    dirs: Vec<PathBuf>,
    cwd: PathBuf,
}

impl Autocomplete {
    pub fn new(dirs: Vec<PathBuf>, cwd: PathBuf) -> Self {
        Self { dirs, cwd }
    }

    pub fn for_session(session: &Session) -> Self {
        let list = session.env.search_list(&session.config);
        Self::new(search_dirs(&list), session.env.current_dir.clone())
    }

    /// Every entry starting with `prefix`, search-list directories first and
    /// the working directory last, without duplicates.
    pub fn candidates(&self, prefix: &str) -> Vec<String> {
        let mut matches: Vec<String> = Vec::new();
        for dir in self.dirs.iter().chain(std::iter::once(&self.cwd)) {
            for name in dir_entries(dir) {
                if name.starts_with(prefix) && !matches.contains(&name) {
                    matches.push(name);
                }
            }
        }
        matches
    }

    pub fn complete(&self, prefix: &str) -> Completion {
        let mut matches = self.candidates(prefix);
        match matches.len() {
            0 => Completion::None,
            1 => Completion::One(matches.remove(0)),
            _ => {
                let common_prefix = longest_common_prefix(&matches);
                Completion::Many {
                    matches,
                    common_prefix,
                }
            }
        }
    }

    /// Working-directory entries that are not hidden.
    pub fn visible_entries(&self) -> Vec<String> {
        dir_entries(&self.cwd)
            .into_iter()
            .filter(|name| !name.starts_with('.'))
            .collect()
    }

    /// Print the working-directory listing used on repeated tab presses.
    /// The edited line is left alone.
    pub fn list_directory(&self, buffer: &[u8], out: &mut dyn Write, tag: &str) -> io::Result<()> {
        write!(out, "\nFiles in current directory:\n")?;
        for name in self.visible_entries() {
            write!(out, "{name}  ")?;
        }
        write!(out, "\n{tag}> ")?;
        out.write_all(buffer)?;
        out.flush()
    }
}

/// Sorted entry names of a directory; unreadable directories yield nothing.
fn dir_entries(dir: &Path) -> Vec<String> {
    let Ok(read) = fs::read_dir(dir) else {
        tracing::trace!(dir = %dir.display(), "skipping unreadable directory");
        return Vec::new();
    };
    let mut names: Vec<String> = read
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Longest prefix shared by every word, cut on a character boundary.
pub fn longest_common_prefix(words: &[String]) -> String {
    let Some((first, rest)) = words.split_first() else {
        return String::new();
    };
    let mut len = first.len();
    for word in rest {
        len = first
            .char_indices()
            .zip(word.chars())
            .take_while(|((_, a), b)| a == b)
            .map(|((i, a), _)| i + a.len_utf8())
            .last()
            .unwrap_or(0)
            .min(len);
    }
    first[..len].to_string()
}
