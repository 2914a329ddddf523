use crate::parser::ParsingError;
use crate::env::Session;
use std::fmt;
use std::io::{Read, Write};
use std::process::Stdio;

/// Control signal returned to the read-eval loop after a line has been executed.
///
/// These are internal signals, not process exit statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitSignal {
    /// Keep looping.
    Continue,
    /// Leave the REPL (`exit`).
    Terminate,
    /// A stage could not be spawned; the rest of the line was abandoned.
    Fault,
}

/// Direction of an explicit redirection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// `<file`: read standard input from a file.
    Input,
    /// `>file`: write standard output to a file, truncating it.
    Truncate,
    /// `>>file`: write standard output to a file, appending to it.
    Append,
}

impl RedirectKind {
    pub const ALL: [RedirectKind; 3] = [Self::Input, Self::Truncate, Self::Append];

    /// The operator text as it is written on a command line.
    pub fn operator(self) -> &'static str {
        match self {
            Self::Input => "<",
            Self::Truncate => ">",
            Self::Append => ">>",
        }
    }

    fn slot(self) -> usize {
        match self {
            Self::Input => 0,
            Self::Truncate => 1,
            Self::Append => 2,
        }
    }
}

/// The three independently optional redirection targets of a stage.
///
/// Nothing prevents both output slots from being set; when a stage is spawned
/// they are applied truncate-then-append, so append wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Redirects([Option<String>; 3]);

impl Redirects {
    pub fn get(&self, kind: RedirectKind) -> Option<&str> {
        self.0[kind.slot()].as_deref()
    }

    pub fn set(&mut self, kind: RedirectKind, target: impl Into<String>) {
        self.0[kind.slot()] = Some(target.into());
    }

    /// Whether either output slot is set.
    pub fn redirects_output(&self) -> bool {
        self.get(RedirectKind::Truncate).is_some() || self.get(RedirectKind::Append).is_some()
    }
}

/// One pipeline stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    /// Executable name or path.
    pub name: String,
    /// `args[0]` is always a copy of `name`.
    pub args: Vec<String>,
    pub redirects: Redirects,
    /// The line ended with `&`.
    pub background: bool,
    /// The line ended with `?`. Recorded only; execution never looks at it.
    pub auto_complete: bool,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            args: vec![name.clone()],
            name,
            ..Self::default()
        }
    }

    /// Arguments after the name slot.
    pub fn arguments(&self) -> &[String] {
        self.args.get(1..).unwrap_or_default()
    }

    /// Length of the exec-style argument vector: the name slot, the real
    /// arguments, and the terminating sentinel.
    pub fn arg_count(&self) -> usize {
        self.args.len() + 1
    }
}

/// A line ending in one of these characters is read as background or
/// auto-complete, whatever token the character belongs to.
fn ends_with_marker(text: &str) -> bool {
    text.ends_with('&') || text.ends_with('?')
}

/// Quote an argument that would otherwise be read back as an operator or a
/// trailing marker.
fn render_arg(arg: &str) -> String {
    let operator_like = matches!(arg, "|" | "&")
        || arg.starts_with('<')
        || arg.starts_with('>')
        || ends_with_marker(arg);
    let already_quoted = arg.len() > 2
        && ((arg.starts_with('"') && arg.ends_with('"'))
            || (arg.starts_with('\'') && arg.ends_with('\'')));
    if operator_like || already_quoted {
        format!("\"{arg}\"")
    } else {
        arg.to_string()
    }
}

/// Renders `name <redirects> args`. Redirect targets are never unquoted when
/// parsed, so a target ending in `&` or `?` is kept away from the end of the
/// line instead: such targets come first, and arguments always come last.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        let mut redirects: Vec<(RedirectKind, &str)> = RedirectKind::ALL
            .into_iter()
            .filter_map(|kind| self.redirects.get(kind).map(|target| (kind, target)))
            .collect();
        redirects.sort_by_key(|(_, target)| !ends_with_marker(target));
        for (kind, target) in redirects {
            write!(f, " {} {}", kind.operator(), target)?;
        }
        for arg in self.arguments() {
            write!(f, " {}", render_arg(arg))?;
        }
        Ok(())
    }
}

/// An ordered sequence of stages built from one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub stages: Vec<Command>,
    /// Set when a stage could not be parsed. Such a pipeline is never executed.
    pub error: Option<ParsingError>,
}

impl Pipeline {
    pub fn first(&self) -> &Command {
        &self.stages[0]
    }

    pub fn is_background(&self) -> bool {
        self.first().background
    }

    pub fn is_empty(&self) -> bool {
        self.first().name.is_empty()
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{stage}")?;
        }
        if self.is_background() {
            write!(f, " &")?;
        } else if self.first().auto_complete {
            write!(f, "?")?;
        }
        Ok(())
    }
}

/// Abstraction over a readable input stream that can also be converted into
/// a [`Stdio`] handle for spawning external processes.
///
/// Implementors wrap the inherited standard input, a redirect file or the read
/// end of the previous stage's pipe.
pub trait Stdin: Read {
    /// Convert this input into a [`Stdio`] handle suitable for `std::process::Command`.
    fn stdio(self: Box<Self>) -> Stdio;
}

impl<T: Read + Into<Stdio>> Stdin for T {
    fn stdio(self: Box<Self>) -> Stdio {
        (*self).into()
    }
}

/// Abstraction over a writable output stream that can also be converted into
/// a [`Stdio`] handle for spawning external processes.
pub trait Stdout: Write {
    /// Convert this output into a [`Stdio`] handle suitable for `std::process::Command`.
    fn stdio(self: Box<Self>) -> Stdio;
}

impl<T: Write + Into<Stdio>> Stdout for T {
    fn stdio(self: Box<Self>) -> Stdio {
        (*self).into()
    }
}

/// A command that runs inside the shell process.
pub trait ExecutableCommand {
    /// Run the command, writing any output to `stdout`.
    fn execute(self: Box<Self>, stdout: Box<dyn Stdout>, session: &mut Session) -> ExitSignal;
}

/// Creates [`ExecutableCommand`] instances by name.
pub trait CommandFactory {
    /// Returns `None` when `name` is not handled by this factory.
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>>;
}
