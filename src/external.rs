use crate::command::{Command, RedirectKind, Stdin};
use crate::env::{Config, Environment};
use crate::io_adapters::{ClosedInput, InheritedStdin, open_append, open_input, open_truncate};
use crate::path::find_command_path;
use nix::errno::Errno;
use std::ffi::OsStr;
use std::fs::File;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus, Stdio};
use thiserror::Error;

/// Why a stage did not start.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("command execution failed: {0}: command not found")]
    NotFound(String),
    #[error("error opening {}: {source}", path.display())]
    Redirect { path: PathBuf, source: io::Error },
    #[error("command execution failed: {name}: {source}")]
    Exec { name: String, source: io::Error },
    /// The process could not be created at all.
    #[error("fork error: {0}")]
    Fault(io::Error),
}

/// A spawned stage.
#[derive(Debug)]
pub struct Job {
    pub pid: u32,
    pub name: String,
    child: Child,
}

impl Job {
    /// Block until the process exits.
    pub fn wait(mut self) -> io::Result<ExitStatus> {
        self.child.wait()
    }
}

/// Background children that have not been reaped yet.
#[derive(Debug, Default)]
pub struct Jobs {
    running: Vec<Job>,
}

impl Jobs {
    pub fn detach(&mut self, job: Job) {
        tracing::debug!(pid = job.pid, name = %job.name, "detached");
        self.running.push(job);
    }

    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    /// Collect every background child that has exited, without blocking.
    pub fn reap(&mut self) -> Vec<(u32, String, ExitStatus)> {
        if self.is_empty() {
            return Vec::new();
        }
        let mut finished = Vec::new();
        self.running.retain_mut(|job| match job.child.try_wait() {
            Ok(Some(status)) => {
                finished.push((job.pid, job.name.clone(), status));
                false
            }
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(pid = job.pid, "cannot poll background job: {e}");
                false
            }
        });
        finished
    }
}

/// Result of launching every stage of a pipeline.
#[derive(Debug, Default)]
pub struct Spawned {
    pub jobs: Vec<Job>,
    /// Stage-local failures, already in pipeline order.
    pub errors: Vec<SpawnError>,
    /// A process could not be created; later stages were not attempted.
    pub fault: bool,
}

/// Launch the stages left to right, each reading the previous one's pipe.
///
/// Explicit redirects override the pipe wiring. A stage that fails to start
/// leaves its successor with an empty input and does not stop the pipeline;
/// only a [`SpawnError::Fault`] does.
pub fn spawn_pipeline(stages: &[Command], env: &Environment, config: &Config) -> Spawned {
    let search_list = env.search_list(config);
    let mut spawned = Spawned::default();
    let mut upstream: Option<Box<dyn Stdin>> = None;

    for (i, stage) in stages.iter().enumerate() {
        let last = i + 1 == stages.len();
        let input: Box<dyn Stdin> = match upstream.take() {
            Some(pipe) => pipe,
            None if i == 0 => Box::new(InheritedStdin::new()),
            None => Box::new(ClosedInput),
        };

        match spawn_stage(stage, input, last, env, &search_list) {
            Ok(mut child) => {
                if let Some(out) = child.stdout.take() {
                    upstream = Some(Box::new(out));
                }
                let job = Job {
                    pid: child.id(),
                    name: stage.name.clone(),
                    child,
                };
                tracing::debug!(pid = job.pid, name = %job.name, stage = i, "spawned");
                spawned.jobs.push(job);
            }
            Err(SpawnError::Fault(e)) => {
                spawned.errors.push(SpawnError::Fault(e));
                spawned.fault = true;
                break;
            }
            Err(e) => spawned.errors.push(e),
        }
    }
    spawned
}

fn spawn_stage(
    stage: &Command,
    input: Box<dyn Stdin>,
    last: bool,
    env: &Environment,
    search_list: &OsStr,
) -> Result<Child, SpawnError> {
    let mut stdin = input.stdio();
    let mut stdout = if last { Stdio::inherit() } else { Stdio::piped() };

    let open = |kind: RedirectKind, opener: fn(&Path) -> io::Result<File>| {
        stage
            .redirects
            .get(kind)
            .map(|target| {
                let path = env.resolve(target);
                opener(&path).map_err(|source| SpawnError::Redirect { path, source })
            })
            .transpose()
    };
    if let Some(file) = open(RedirectKind::Input, open_input)? {
        stdin = file.into();
    }
    if let Some(file) = open(RedirectKind::Truncate, open_truncate)? {
        stdout = file.into();
    }
    if let Some(file) = open(RedirectKind::Append, open_append)? {
        stdout = file.into();
    }

    let program = find_command_path(search_list, &stage.name)
        .ok_or_else(|| SpawnError::NotFound(stage.name.clone()))?;
    // Literal relative paths are relative to the shell's directory, not the child's.
    let program = env.current_dir.join(program);

    std::process::Command::new(&program)
        .arg0(&stage.name)
        .args(stage.arguments())
        .envs(env.vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(&env.current_dir)
        .stdin(stdin)
        .stdout(stdout)
        .spawn()
        .map_err(|source| {
            if is_fork_failure(&source) {
                SpawnError::Fault(source)
            } else {
                SpawnError::Exec {
                    name: stage.name.clone(),
                    source,
                }
            }
        })
}

/// Only a missing process slot or memory stops the rest of the pipeline;
/// anything the exec itself rejects belongs to the one stage.
fn is_fork_failure(error: &io::Error) -> bool {
    matches!(
        error.raw_os_error().map(Errno::from_raw),
        Some(Errno::EAGAIN | Errno::ENOMEM)
    )
}

/// Shell-style status number: the exit code, or 128 + signal.
pub fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    if let Some(code) = status.code() {
        code
    } else if let Some(signal) = status.signal() {
        128 + signal
    } else if status.core_dumped() {
        255
    } else {
        -1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use std::collections::HashMap;
    use std::fs;

    fn env_in(dir: &std::path::Path) -> Environment {
        let mut vars = HashMap::new();
        vars.insert("PATH".to_string(), "/bin:/usr/bin".to_string());
        Environment {
            vars,
            current_dir: dir.to_path_buf(),
        }
    }

    fn run(line: &str, env: &Environment) -> Spawned {
        let pipeline = parse(line);
        assert!(pipeline.error.is_none());
        let mut spawned = spawn_pipeline(&pipeline.stages, env, &Config::default());
        for job in std::mem::take(&mut spawned.jobs) {
            job.wait().unwrap();
        }
        spawned
    }

    #[test]
    fn three_stage_pipeline_composes_like_the_os() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("words"), "pear\napple\nfig\napple\n").unwrap();
        let env = env_in(dir.path());

        let spawned = run("sort <words | uniq | head -n 2 >out", &env);
        assert!(spawned.errors.is_empty());
        assert_eq!(fs::read_to_string(dir.path().join("out")).unwrap(), "apple\nfig\n");
    }

    #[test]
    fn explicit_redirect_overrides_the_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_in(dir.path());

        run("echo hidden >first | cat >second", &env);
        assert_eq!(fs::read_to_string(dir.path().join("first")).unwrap(), "hidden\n");
        assert_eq!(fs::read_to_string(dir.path().join("second")).unwrap(), "");
    }

    #[test]
    fn append_wins_over_truncate() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("log"), "kept\n").unwrap();
        fs::write(dir.path().join("t"), "wiped\n").unwrap();
        let env = env_in(dir.path());

        run("echo added >t >>log", &env);
        assert_eq!(fs::read_to_string(dir.path().join("log")).unwrap(), "kept\nadded\n");
        assert_eq!(fs::read_to_string(dir.path().join("t")).unwrap(), "");
    }

    #[test]
    fn unknown_program_fails_only_its_stage() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_in(dir.path());

        let spawned = run("no-such-program-here | wc -c >count", &env);
        assert_eq!(spawned.errors.len(), 1);
        assert!(matches!(spawned.errors[0], SpawnError::NotFound(ref n) if n == "no-such-program-here"));
        assert!(!spawned.fault);
        assert_eq!(
            fs::read_to_string(dir.path().join("count")).unwrap().trim(),
            "0"
        );
    }

    #[test]
    fn missing_input_file_is_a_redirect_error() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_in(dir.path());

        let spawned = run("cat <absent", &env);
        assert!(matches!(spawned.errors[0], SpawnError::Redirect { .. }));
        assert!(spawned.errors[0].to_string().contains("absent"));
    }

    #[test]
    fn literal_relative_path_runs_from_current_dir() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("hello.sh");
        fs::write(&script, "#!/bin/sh\necho \"$0 $1\"\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        let env = env_in(dir.path());

        let spawned = run("./hello.sh world >out", &env);
        assert!(spawned.errors.is_empty(), "{:?}", spawned.errors);
        let out = fs::read_to_string(dir.path().join("out")).unwrap();
        assert!(out.ends_with("hello.sh world\n"), "{out}");
    }

    #[test]
    fn unrunnable_file_fails_only_its_stage() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("garbage");
        fs::write(&garbage, [0u8, 1, 2, 3]).unwrap();
        fs::set_permissions(&garbage, fs::Permissions::from_mode(0o755)).unwrap();
        let env = env_in(dir.path());

        let spawned = run("./garbage | echo downstream >out", &env);
        assert!(!spawned.fault);
        assert_eq!(spawned.errors.len(), 1);
        assert!(matches!(spawned.errors[0], SpawnError::Exec { ref name, .. } if name == "./garbage"));
        assert_eq!(fs::read_to_string(dir.path().join("out")).unwrap(), "downstream\n");
    }

    #[test]
    fn only_resource_exhaustion_counts_as_a_fork_failure() {
        assert!(is_fork_failure(&io::Error::from_raw_os_error(Errno::EAGAIN as i32)));
        assert!(is_fork_failure(&io::Error::from_raw_os_error(Errno::ENOMEM as i32)));
        assert!(!is_fork_failure(&io::Error::from_raw_os_error(Errno::ENOEXEC as i32)));
        assert!(!is_fork_failure(&io::Error::from_raw_os_error(Errno::ETXTBSY as i32)));
        assert!(!is_fork_failure(&io::Error::other("no errno")));
    }

    #[test]
    fn background_jobs_are_reaped() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_in(dir.path());
        let pipeline = parse("true &");
        let mut spawned = spawn_pipeline(&pipeline.stages, &env, &Config::default());

        let mut jobs = Jobs::default();
        for job in spawned.jobs.drain(..) {
            jobs.detach(job);
        }
        assert_eq!(jobs.len(), 1);

        let mut finished = Vec::new();
        for _ in 0..200 {
            finished.extend(jobs.reap());
            if jobs.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(jobs.is_empty());
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].1, "true");
        assert_eq!(exit_code(finished[0].2), 0);
    }

    #[test]
    fn exit_codes_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_in(dir.path());
        let pipeline = parse("false");
        let mut spawned = spawn_pipeline(&pipeline.stages, &env, &Config::default());
        let status = spawned.jobs.remove(0).wait().unwrap();
        assert_eq!(exit_code(status), 1);
    }
}
