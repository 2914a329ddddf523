use crate::command::{Command, CommandFactory, ExitSignal, Pipeline, RedirectKind, Stdout};
use crate::env::Session;
use crate::external::{self, exit_code};
use crate::io_adapters::{open_append, open_truncate};
use crate::parser;
use crate::terminal::{self, LineStatus};
use std::io;

/// Factory allows creating instances of ExecutableCommand.
///
/// Only supports the builtins defined in this crate.
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

/// The read-eval loop: built-ins run in-process, everything else becomes a
/// pipeline of child processes.
///
/// The interpreter owns a [`Session`] and a list of [`CommandFactory`] objects
/// that are queried, by the first stage's name, before falling back to
/// external programs. See [`Default`] for the built-ins included out of the box.
///
/// Example
/// ```no_run
/// use dash_shell::Interpreter;
/// use dash_shell::command::ExitSignal;
/// let mut sh = Interpreter::default();
/// assert_eq!(sh.run_line("ls -l | wc -l > count.txt"), ExitSignal::Continue);
/// ```
pub struct Interpreter {
    session: Session,
    commands: Vec<Box<dyn CommandFactory>>,
}

impl Interpreter {
    /// Create a new interpreter with a custom set of built-in factories.
    pub fn new(session: Session, commands: Vec<Box<dyn CommandFactory>>) -> Self {
        Self { session, commands }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Parse and execute one line.
    pub fn run_line(&mut self, line: &str) -> ExitSignal {
        let pipeline = parser::parse(line);
        self.execute(&pipeline)
    }

    /// Execute a parsed line.
    ///
    /// A pipeline carrying a parse error is reported and dropped. A built-in
    /// named by the first stage takes over the whole line.
    pub fn execute(&mut self, pipeline: &Pipeline) -> ExitSignal {
        if let Some(err) = &pipeline.error {
            eprintln!("-{}: {err}", self.session.config.tag);
            return ExitSignal::Continue;
        }
        if pipeline.is_empty() {
            return ExitSignal::Continue;
        }

        let first = pipeline.first();
        let args: Vec<&str> = first.arguments().iter().map(String::as_str).collect();
        for factory in &self.commands {
            if let Some(cmd) = factory.try_create(&first.name, &args) {
                tracing::debug!(builtin = %first.name, "running built-in");
                let stdout = match builtin_stdout(first, &self.session) {
                    Ok(stdout) => stdout,
                    Err(e) => {
                        eprintln!("-{}: {e}", self.session.config.tag);
                        return ExitSignal::Continue;
                    }
                };
                return cmd.execute(stdout, &mut self.session);
            }
        }

        self.run_external(pipeline)
    }

    fn run_external(&mut self, pipeline: &Pipeline) -> ExitSignal {
        let spawned =
            external::spawn_pipeline(&pipeline.stages, &self.session.env, &self.session.config);
        for e in &spawned.errors {
            eprintln!("-{}: {e}", self.session.config.tag);
        }

        if pipeline.is_background() {
            for job in spawned.jobs {
                println!("[{}] {}", job.pid, job.name);
                self.session.jobs.detach(job);
            }
            tracing::debug!(running = self.session.jobs.len(), "background pipeline started");
        } else {
            for job in spawned.jobs {
                let (pid, name) = (job.pid, job.name.clone());
                match job.wait() {
                    Ok(status) => tracing::debug!(pid, %name, code = exit_code(status), "exited"),
                    Err(e) => tracing::warn!(pid, %name, "wait failed: {e}"),
                }
            }
        }

        if spawned.fault {
            ExitSignal::Fault
        } else {
            ExitSignal::Continue
        }
    }

    /// Announce background children that have finished since the last prompt.
    fn reap_jobs(&mut self) {
        for (pid, name, status) in self.session.jobs.reap() {
            tracing::debug!(pid, %name, code = exit_code(status), "reaped");
            println!("[{pid}] Done {name}");
        }
    }

    /// Prompt, read, execute, until `exit` or end of input.
    pub fn repl(&mut self) -> anyhow::Result<()> {
        loop {
            self.reap_jobs();
            let line = match terminal::read_line(&mut self.session)? {
                LineStatus::Line(line) => line,
                LineStatus::Eof => {
                    println!();
                    break;
                }
            };
            match self.run_line(&line) {
                ExitSignal::Terminate => break,
                ExitSignal::Fault => tracing::warn!(%line, "pipeline aborted"),
                ExitSignal::Continue => {}
            }
        }
        Ok(())
    }
}

/// Where a built-in writes: its own `>`/`>>` target (append wins), else the
/// shell's stdout.
fn builtin_stdout(stage: &Command, session: &Session) -> io::Result<Box<dyn Stdout>> {
    let mut stdout: Box<dyn Stdout> = Box::new(io::stdout());
    if let Some(target) = stage.redirects.get(RedirectKind::Truncate) {
        stdout = Box::new(open_truncate(&session.env.resolve(target)).map_err(|e| {
            io::Error::new(e.kind(), format!("error opening {target}: {e}"))
        })?);
    }
    if let Some(target) = stage.redirects.get(RedirectKind::Append) {
        stdout = Box::new(open_append(&session.env.resolve(target)).map_err(|e| {
            io::Error::new(e.kind(), format!("error opening {target}: {e}"))
        })?);
    }
    Ok(stdout)
}

impl Default for Interpreter {
    /// Create an interpreter with the default set of built-ins:
    /// `cd`, `exit`, `psvis` and `kuhex`.
    fn default() -> Self {
        use crate::builtin::*;
        Self::new(
            Session::default(),
            vec![
                Box::new(Factory::<Cd>::default()),
                Box::new(Factory::<Exit>::default()),
                Box::new(Factory::<Psvis>::default()),
                Box::new(Factory::<Kuhex>::default()),
            ],
        )
    }
}
