//! Raw-mode line editing.
//!
//! [`LineEditor`] is the keystroke state machine; it works on any byte source so
//! it can be driven from tests. [`read_line`] wires it to the real terminal,
//! holding raw mode for exactly the duration of one read.

use crate::complete::Autocomplete;
use crate::env::Session;
use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
use std::fs::File;
use std::io::{self, IsTerminal, Read, Write};
use std::os::fd::AsFd;

const EOT: u8 = 4;
const TAB: u8 = 9;
const NEWLINE: u8 = 10;
const ESC: u8 = 27;
const BACKSPACE: u8 = 127;

/// Result of reading one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineStatus {
    Line(String),
    /// Ctrl-D or end of input.
    Eof,
}

/// Terminal held in non-canonical, no-echo mode until dropped.
pub struct RawMode {
    saved: Termios,
}

impl RawMode {
    pub fn acquire() -> io::Result<Self> {
        let saved = termios::tcgetattr(io::stdin())?;
        let mut raw = saved.clone();
        raw.local_flags.remove(LocalFlags::ICANON | LocalFlags::ECHO);
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        termios::tcsetattr(io::stdin(), SetArg::TCSANOW, &raw)?;
        Ok(Self { saved })
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if let Err(e) = termios::tcsetattr(io::stdin(), SetArg::TCSANOW, &self.saved) {
            tracing::warn!("failed to restore terminal mode: {e}");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyState {
    Editing,
    /// Saw ESC.
    Escape,
    /// Saw ESC `[`; the next byte selects the arrow key.
    Csi,
}

/// Keystroke state machine for one line.
pub struct LineEditor<'a, W: Write> {
    out: W,
    completer: &'a Autocomplete,
    tag: &'a str,
    max_line: usize,
}

impl<'a, W: Write> LineEditor<'a, W> {
    pub fn new(out: W, completer: &'a Autocomplete, tag: &'a str, max_line: usize) -> Self {
        Self {
            out,
            completer,
            tag,
            max_line,
        }
    }

    /// Read and edit one line from `input`.
    ///
    /// `last_line` is the single-slot history: it is recalled with the Up arrow
    /// and overwritten with the finished line.
    pub fn read_line<R: Read>(
        &mut self,
        input: &mut R,
        last_line: &mut String,
    ) -> io::Result<LineStatus> {
        let mut buffer: Vec<u8> = Vec::new();
        let mut tab_streak = 0usize;
        let mut state = KeyState::Editing;

        loop {
            let Some(byte) = next_byte(input)? else {
                return Ok(LineStatus::Eof);
            };

            match state {
                KeyState::Escape => {
                    state = if byte == b'[' {
                        KeyState::Csi
                    } else {
                        KeyState::Editing
                    };
                    continue;
                }
                KeyState::Csi => {
                    state = KeyState::Editing;
                    tab_streak = 0;
                    // Down, Right and Left are swallowed.
                    if byte == b'A' {
                        self.recall(&mut buffer, last_line)?;
                    }
                    continue;
                }
                KeyState::Editing => {}
            }

            match byte {
                TAB => {
                    tab_streak += 1;
                    if tab_streak == 1 {
                        let prefix = String::from_utf8_lossy(&buffer).into_owned();
                        self.completer
                            .complete(&prefix)
                            .apply(&mut buffer, &mut self.out, self.tag)?;
                    } else {
                        self.completer
                            .list_directory(&buffer, &mut self.out, self.tag)?;
                    }
                }
                BACKSPACE => {
                    tab_streak = 0;
                    if pop_char(&mut buffer) {
                        self.out.write_all(b"\x08 \x08")?;
                    }
                }
                ESC => state = KeyState::Escape,
                NEWLINE => {
                    self.out.write_all(b"\n")?;
                    self.out.flush()?;
                    return Ok(commit(buffer, last_line));
                }
                EOT => return Ok(LineStatus::Eof),
                _ => {
                    tab_streak = 0;
                    buffer.push(byte);
                    self.out.write_all(&[byte])?;
                    if buffer.len() >= self.max_line {
                        self.out.write_all(b"\n")?;
                        self.out.flush()?;
                        return Ok(commit(buffer, last_line));
                    }
                }
            }
            self.out.flush()?;
        }
    }

    /// Erase the visible line, show the history slot, and swap the two.
    fn recall(&mut self, buffer: &mut Vec<u8>, last_line: &mut String) -> io::Result<()> {
        let shown = String::from_utf8_lossy(buffer).chars().count();
        for _ in 0..shown {
            self.out.write_all(b"\x08 \x08")?;
        }
        self.out.write_all(last_line.as_bytes())?;
        let current = String::from_utf8_lossy(buffer).into_owned();
        *buffer = std::mem::replace(last_line, current).into_bytes();
        self.out.flush()
    }
}

fn next_byte<R: Read>(input: &mut R) -> io::Result<Option<u8>> {
    let mut byte = [0u8; 1];
    loop {
        match input.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Remove the last character, including all bytes of a multi-byte sequence.
fn pop_char(buffer: &mut Vec<u8>) -> bool {
    let Some(mut last) = buffer.pop() else {
        return false;
    };
    while last & 0b1100_0000 == 0b1000_0000 {
        match buffer.pop() {
            Some(b) => last = b,
            None => break,
        }
    }
    true
}

fn commit(buffer: Vec<u8>, last_line: &mut String) -> LineStatus {
    let line = String::from_utf8_lossy(&buffer).into_owned();
    last_line.clone_from(&line);
    LineStatus::Line(line)
}

/// `user@host:cwd tag> `
pub fn prompt(session: &Session) -> String {
    let user = session
        .env
        .get_var("USER")
        .unwrap_or_else(|| "unknown".to_string());
    let host = nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string());
    format!(
        "{}@{}:{} {}> ",
        user,
        host,
        session.env.current_dir.display(),
        session.config.tag
    )
}

/// Print the prompt and read one line from standard input.
///
/// On a terminal the line is edited in raw mode, which is restored on every
/// return path. Any other stdin (a pipe, a file) is read line by line as is.
pub fn read_line(session: &mut Session) -> io::Result<LineStatus> {
    let mut out = io::stdout().lock();
    write!(out, "{}", prompt(session))?;
    out.flush()?;

    let stdin = io::stdin();
    if !stdin.is_terminal() {
        // Unbuffered: bytes after the newline belong to whichever child inherits fd 0 next.
        let mut input = File::from(stdin.as_fd().try_clone_to_owned()?);
        return read_cooked(&mut input, &mut session.last_line);
    }

    let _raw = RawMode::acquire()?;
    let completer = Autocomplete::for_session(session);
    let mut editor = LineEditor::new(
        out,
        &completer,
        &session.config.tag,
        session.config.max_line,
    );
    editor.read_line(&mut stdin.lock(), &mut session.last_line)
}

/// Read up to and including the next newline, one byte per read call, so
/// nothing past the line is consumed.
fn read_cooked<R: Read>(input: &mut R, last_line: &mut String) -> io::Result<LineStatus> {
    let mut buffer = Vec::new();
    loop {
        match next_byte(input)? {
            Some(NEWLINE) => break,
            Some(byte) => buffer.push(byte),
            None if buffer.is_empty() => return Ok(LineStatus::Eof),
            None => break,
        }
    }
    if buffer.last() == Some(&b'\r') {
        buffer.pop();
    }
    Ok(commit(buffer, last_line))
}
