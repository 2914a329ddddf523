//! `dash`: a small interactive Unix shell.
//!
//! A line is split into `|`-separated stages, each with optional `<`, `>` and
//! `>>` redirections and an optional trailing `&`. Stages are spawned as
//! child processes connected by pipes. `cd`, `exit`, `psvis` and `kuhex` run
//! inside the shell.
//!
//! On a terminal, input is read in raw mode. That gives a one-line history on
//! the Up arrow and tab completion against the search list and the working
//! directory.
//!
//! The main entry point is [`Interpreter`]. The public modules [`command`],
//! [`env`] and [`parser`] expose the parsed-line model, the session state and
//! the line parser.

mod builtin;
pub mod command;
mod complete;
pub mod env;
mod external;
mod hexdump;
mod interpreter;
mod io_adapters;
pub mod parser;
mod path;
mod psvis;
mod terminal;

/// Just a convenient re-export of the interactive shell.
///
/// See [`Interpreter`] for the high-level API.
pub use interpreter::Interpreter;
