use crate::command::Stdin;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Result as IoResult};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::process::Stdio;

/// Permission bits for files created by `>` and `>>`.
const CREATE_MODE: u32 = 0o644;

/// The shell's own standard input, handed to the first stage of a pipeline.
pub struct InheritedStdin(io::Stdin);

impl InheritedStdin {
    pub fn new() -> Self {
        Self(io::stdin())
    }
}

impl Default for InheritedStdin {
    fn default() -> Self {
        Self::new()
    }
}

impl Read for InheritedStdin {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        self.0.read(buf)
    }
}

impl Stdin for InheritedStdin {
    fn stdio(self: Box<Self>) -> Stdio {
        Stdio::inherit()
    }
}

/// Input of a stage whose upstream wrote somewhere else (a file, or nowhere
/// because it failed to start). Reads as immediate end of file.
pub struct ClosedInput;

impl Read for ClosedInput {
    fn read(&mut self, _buf: &mut [u8]) -> IoResult<usize> {
        Ok(0)
    }
}

impl Stdin for ClosedInput {
    fn stdio(self: Box<Self>) -> Stdio {
        Stdio::null()
    }
}

/// `<file`
pub fn open_input(path: &Path) -> IoResult<File> {
    File::open(path)
}

/// `>file`
pub fn open_truncate(path: &Path) -> IoResult<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(CREATE_MODE)
        .open(path)
}

/// `>>file`
pub fn open_append(path: &Path) -> IoResult<File> {
    OpenOptions::new()
        .append(true)
        .create(true)
        .mode(CREATE_MODE)
        .open(path)
}
