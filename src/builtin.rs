use crate::command::{CommandFactory, ExecutableCommand, ExitSignal, Stdout};
use crate::env::Session;
use crate::hexdump::{self, GroupSize};
use crate::interpreter::Factory;
use crate::psvis;
use anyhow::{Context, Result, anyhow};
use argh::{EarlyExit, FromArgs};
use std::env;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and run inside the
/// shell process. They only ever appear as the first stage of a line.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "cd" or "kuhex".
    fn name() -> &'static str;

    /// Runs the command against the session.
    ///
    /// An error is reported by the caller and never ends the shell.
    fn execute(self, stdout: &mut dyn Write, session: &mut Session) -> Result<ExitSignal>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(self: Box<Self>, mut stdout: Box<dyn Stdout>, session: &mut Session) -> ExitSignal {
        let result = <T as BuiltinCommand>::execute(*self, &mut stdout, session).and_then(|signal| {
            stdout.flush()?;
            Ok(signal)
        });
        match result {
            Ok(signal) => signal,
            Err(e) => {
                tracing::debug!(builtin = T::name(), "failed: {e:?}");
                eprintln!("-{}: {e:#}", session.config.tag);
                ExitSignal::Continue
            }
        }
    }
}

/// Usage text or argument errors produced by argh.
struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(self: Box<Self>, mut stdout: Box<dyn Stdout>, _session: &mut Session) -> ExitSignal {
        if self.is_error {
            eprintln!("{}", self.output);
        } else if let Err(e) = writeln!(stdout, "{}", self.output) {
            tracing::warn!("cannot print usage: {e}");
        }
        ExitSignal::Continue
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        if name == T::name() {
            Some(match T::from_args(&[name], args) {
                Ok(cmd) => Box::new(cmd),
                Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                    output,
                    is_error: status.is_err(),
                }),
            })
        } else {
            None
        }
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory. Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, _stdout: &mut dyn Write, session: &mut Session) -> Result<ExitSignal> {
        let env = &mut session.env;
        let target = match self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => env
                .get_var("HOME")
                .map(PathBuf::from)
                .ok_or_else(|| anyhow!("cd: HOME not set"))?,
        };

        let canonical = fs::canonicalize(env.current_dir.join(&target))
            .with_context(|| format!("cd: {}", target.display()))?;
        env::set_current_dir(&canonical).with_context(|| format!("cd: {}", target.display()))?;
        tracing::debug!(dir = %canonical.display(), "changed directory");
        env.current_dir = canonical;
        Ok(ExitSignal::Continue)
    }
}

#[derive(FromArgs)]
/// Leave the shell.
pub struct Exit {
    #[argh(positional, greedy)]
    /// ignored.
    pub _args: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(self, _stdout: &mut dyn Write, _session: &mut Session) -> Result<ExitSignal> {
        Ok(ExitSignal::Terminate)
    }
}

#[derive(FromArgs)]
/// Write the process tree rooted at PID to a file as a DOT digraph.
pub struct Psvis {
    #[argh(positional)]
    /// process id at the root of the reported tree.
    pub pid: String,

    #[argh(positional)]
    /// file that receives the graph.
    pub output: String,
}

impl BuiltinCommand for Psvis {
    fn name() -> &'static str {
        "psvis"
    }

    fn execute(self, stdout: &mut dyn Write, session: &mut Session) -> Result<ExitSignal> {
        let source = psvis::source_for(&session.config.psvis_endpoint, &session.config.procfs_root)?;
        let mut report = Vec::new();
        source.report(&self.pid, &mut report).context("psvis")?;
        // The output file is only touched once the report is complete.
        let path = session.env.resolve(&self.output);
        let mut file =
            File::create(&path).with_context(|| format!("psvis: error opening {}", self.output))?;
        file.write_all(&report)
            .with_context(|| format!("psvis: error writing {}", self.output))?;
        writeln!(stdout, "Process tree written to {}", self.output)?;
        Ok(ExitSignal::Continue)
    }
}

#[derive(FromArgs)]
/// Print a hex and ASCII dump of a file.
pub struct Kuhex {
    #[argh(option, short = 'g', default = "1")]
    /// bytes per group: 1, 2, 4, 8 or 16.
    pub group: usize,

    #[argh(positional)]
    /// file to dump.
    pub file: String,
}

impl BuiltinCommand for Kuhex {
    fn name() -> &'static str {
        "kuhex"
    }

    fn execute(self, stdout: &mut dyn Write, session: &mut Session) -> Result<ExitSignal> {
        let group = GroupSize::try_from(self.group).context("kuhex")?;
        let mut input = File::open(session.env.resolve(&self.file))
            .with_context(|| format!("kuhex: {}", self.file))?;
        hexdump::dump(&mut input, group, stdout).context("kuhex")?;
        Ok(ExitSignal::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{Config, Environment};
    use std::collections::HashMap;
    use std::env as stdenv;
    use std::sync::{Mutex, MutexGuard, OnceLock};

    fn lock_current_dir() -> MutexGuard<'static, ()> {
        static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        MUTEX
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn session_in(dir: PathBuf) -> Session {
        let env = Environment {
            vars: HashMap::new(),
            current_dir: dir,
        };
        Session::new(env, Config::default())
    }

    #[test]
    fn test_cd_to_absolute_path() {
        let _lock = lock_current_dir();
        let temp = tempfile::tempdir().unwrap();
        let canonical_temp = fs::canonicalize(temp.path()).unwrap();
        let orig = stdenv::current_dir().unwrap();

        let mut session = session_in(orig.clone());
        let cmd = Cd {
            target: Some(canonical_temp.to_string_lossy().to_string()),
        };
        let res = cmd.execute(&mut Vec::new(), &mut session);

        assert!(matches!(res, Ok(ExitSignal::Continue)));
        assert_eq!(fs::canonicalize(stdenv::current_dir().unwrap()).unwrap(), canonical_temp);
        assert_eq!(session.env.current_dir, canonical_temp);

        stdenv::set_current_dir(orig).expect("failed to restore cwd");
    }

    #[test]
    fn test_cd_relative_to_session_dir() {
        let _lock = lock_current_dir();
        let temp = tempfile::tempdir().unwrap();
        let canonical_temp = fs::canonicalize(temp.path()).unwrap();
        fs::create_dir(canonical_temp.join("sub")).unwrap();
        let orig = stdenv::current_dir().unwrap();

        let mut session = session_in(canonical_temp.clone());
        let cmd = Cd {
            target: Some("sub".to_string()),
        };
        cmd.execute(&mut Vec::new(), &mut session).unwrap();
        assert_eq!(session.env.current_dir, canonical_temp.join("sub"));

        stdenv::set_current_dir(orig).expect("failed to restore cwd");
    }

    #[test]
    fn test_cd_to_home_when_none() {
        let _lock = lock_current_dir();
        let temp = tempfile::tempdir().unwrap();
        let canonical_temp = fs::canonicalize(temp.path()).unwrap();
        let orig = stdenv::current_dir().unwrap();

        let mut session = session_in(orig.clone());
        session
            .env
            .set_var("HOME", canonical_temp.to_string_lossy().to_string());

        let res = Cd { target: None }.execute(&mut Vec::new(), &mut session);

        assert!(res.is_ok());
        assert_eq!(session.env.current_dir, canonical_temp);

        stdenv::set_current_dir(orig).expect("failed to restore cwd");
    }

    #[test]
    fn test_cd_without_home_errors() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let mut session = session_in(orig.clone());

        let err = Cd { target: None }
            .execute(&mut Vec::new(), &mut session)
            .unwrap_err();
        assert_eq!(err.to_string(), "cd: HOME not set");
        assert_eq!(stdenv::current_dir().unwrap(), orig);
    }

    #[test]
    fn test_cd_nonexistent_path_errors() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let mut session = session_in(orig.clone());

        let name = format!("nonexistent_dir_for_dash_test_{}", std::process::id());
        let err = Cd {
            target: Some(name.clone()),
        }
        .execute(&mut Vec::new(), &mut session)
        .unwrap_err();

        assert!(format!("{err:#}").starts_with(&format!("cd: {name}: ")));
        assert_eq!(stdenv::current_dir().unwrap(), orig);
        assert_eq!(session.env.current_dir, orig);
    }

    #[test]
    fn test_exit_terminates() {
        let mut session = session_in(stdenv::temp_dir());
        let res = Exit { _args: vec![] }.execute(&mut Vec::new(), &mut session);
        assert!(matches!(res, Ok(ExitSignal::Terminate)));
    }

    #[test]
    fn test_factory_matches_by_name_only() {
        let factory = Factory::<Exit>::default();
        assert!(factory.try_create("exit", &[]).is_some());
        assert!(factory.try_create("exit", &["3"]).is_some());
        assert!(factory.try_create("exitt", &[]).is_none());
    }

    #[test]
    fn test_kuhex_parses_group_option() {
        let cmd = Kuhex::from_args(&["kuhex"], &["-g", "4", "data.bin"]).unwrap();
        assert_eq!(cmd.group, 4);
        assert_eq!(cmd.file, "data.bin");

        let cmd = Kuhex::from_args(&["kuhex"], &["data.bin"]).unwrap();
        assert_eq!(cmd.group, 1);

        assert!(Kuhex::from_args(&["kuhex"], &[]).is_err());
    }

    #[test]
    fn test_kuhex_dumps_relative_file() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("data.bin"), b"AB").unwrap();
        let mut session = session_in(temp.path().to_path_buf());

        let mut out = Vec::new();
        let cmd = Kuhex {
            group: 2,
            file: "data.bin".to_string(),
        };
        cmd.execute(&mut out, &mut session).unwrap();

        let s = String::from_utf8(out).unwrap();
        assert!(s.starts_with("00000000: 4142 "));
        assert!(s.ends_with(" AB\n"));
    }

    #[test]
    fn test_kuhex_rejects_group_size() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("data.bin"), b"AB").unwrap();
        let mut session = session_in(temp.path().to_path_buf());

        let mut out = Vec::new();
        let err = Kuhex {
            group: 3,
            file: "data.bin".to_string(),
        }
        .execute(&mut out, &mut session)
        .unwrap_err();

        assert_eq!(
            format!("{err:#}"),
            "kuhex: invalid group size, supported sizes: 1,2,4,8,16."
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_psvis_writes_report_file() {
        let temp = tempfile::tempdir().unwrap();
        let endpoint = temp.path().join("psvis_tree");
        fs::write(&endpoint, "").unwrap();

        let mut session = session_in(temp.path().to_path_buf());
        session.config.psvis_endpoint = endpoint;

        let mut out = Vec::new();
        let cmd = Psvis {
            pid: "1".to_string(),
            output: "tree.dot".to_string(),
        };
        cmd.execute(&mut out, &mut session).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Process tree written to tree.dot\n"
        );
        // A plain-file endpoint hands back exactly what was written to it.
        assert_eq!(fs::read_to_string(temp.path().join("tree.dot")).unwrap(), "1\n");
    }

    #[test]
    fn test_psvis_failed_report_leaves_no_output_file() {
        let temp = tempfile::tempdir().unwrap();
        // Exists, so it is used as the endpoint, but cannot be opened for writing.
        let endpoint = temp.path().join("psvis_tree");
        fs::create_dir(&endpoint).unwrap();

        let mut session = session_in(temp.path().to_path_buf());
        session.config.psvis_endpoint = endpoint;

        let mut out = Vec::new();
        let err = Psvis {
            pid: "1".to_string(),
            output: "tree.dot".to_string(),
        }
        .execute(&mut out, &mut session)
        .unwrap_err();

        let message = format!("{err:#}");
        assert!(message.starts_with("psvis: error opening "), "{message}");
        assert!(message.contains("for writing"), "{message}");
        assert!(out.is_empty());
        assert!(!temp.path().join("tree.dot").exists());
    }
}
