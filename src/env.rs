use crate::external::Jobs;
use std::collections::HashMap;
use std::env as stdenv;
use std::ffi::OsString;
use std::path::PathBuf;

/// Name tag shown in prompts and prefixed to diagnostics.
pub const SHELL_TAG: &str = "dash";

/// Search list used when `PATH` is not set.
pub const DEFAULT_SEARCH_LIST: &str = "/bin:/usr/bin";

/// Pseudo-file exposed by the process-tree kernel module.
pub const PSVIS_ENDPOINT: &str = "/proc/psvis_tree";

/// Maximum number of bytes in one edited line.
pub const MAX_LINE: usize = 4096;

/// Startup tunables captured once from the process environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub tag: String,
    pub default_search_list: String,
    /// Write/read endpoint of the process-tree collaborator.
    /// Overridden by `DASH_PSVIS_ENDPOINT`.
    pub psvis_endpoint: PathBuf,
    /// Root of the proc filesystem used when the kernel endpoint is absent.
    pub procfs_root: PathBuf,
    pub max_line: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tag: SHELL_TAG.to_string(),
            default_search_list: DEFAULT_SEARCH_LIST.to_string(),
            psvis_endpoint: PathBuf::from(PSVIS_ENDPOINT),
            procfs_root: PathBuf::from("/proc"),
            max_line: MAX_LINE,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(endpoint) = stdenv::var_os("DASH_PSVIS_ENDPOINT") {
            config.psvis_endpoint = PathBuf::from(endpoint);
        }
        config
    }
}

/// Mutable, user-level view of the process environment used by the interpreter.
///
/// The environment contains:
/// - `vars`: a map of environment variables that will be visible to executed commands.
/// - `current_dir`: the working directory for command execution.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Key-value store of environment variables (e.g., PATH, HOME).
    pub vars: HashMap<String, String>,
    /// The current working directory for command execution.
    pub current_dir: PathBuf,
}

impl Environment {
    /// Capture the current process state into a new `Environment` instance.
    pub fn new() -> Self {
        let vars = stdenv::vars().collect();
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self { vars, current_dir }
    }

    /// Get the value of an environment variable.
    ///
    /// Only `self.vars` is consulted; it was seeded from the process
    /// environment by [`Environment::new`].
    pub fn get_var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    /// Set or override an environment variable in `self.vars`.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    /// The colon-separated directories consulted to resolve bare names.
    pub fn search_list(&self, config: &Config) -> OsString {
        self.get_var("PATH")
            .unwrap_or_else(|| config.default_search_list.clone())
            .into()
    }

    /// Resolve a possibly relative path against the working directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.current_dir.join(path)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything that outlives a single REPL iteration.
#[derive(Debug)]
pub struct Session {
    pub env: Environment,
    pub config: Config,
    /// The previously submitted line, recalled with the Up arrow.
    pub last_line: String,
    /// Background children not yet reaped.
    pub jobs: Jobs,
}

impl Session {
    pub fn new(env: Environment, config: Config) -> Self {
        Self {
            env,
            config,
            last_line: String::new(),
            jobs: Jobs::default(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Environment::new(), Config::from_env())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_env() -> Environment {
        Environment {
            vars: HashMap::new(),
            current_dir: stdenv::current_dir().unwrap(),
        }
    }

    #[test]
    fn test_env_set_and_get_var() {
        let mut env = empty_env();

        // initially absent
        assert_eq!(env.get_var("SOME_RANDOM_ENV_VAR_12345"), None);

        env.set_var("KEY", "VALUE");

        assert_eq!(env.get_var("KEY"), Some("VALUE".to_string()));
    }

    #[test]
    fn test_env_reads_from_process_env() {
        let env = Environment::new();
        assert!(env.get_var("PATH").is_some());
    }

    #[test]
    fn search_list_prefers_path_variable() {
        let mut env = empty_env();
        env.set_var("PATH", "/opt/a:/opt/b");
        assert_eq!(env.search_list(&Config::default()), OsString::from("/opt/a:/opt/b"));
    }

    #[test]
    fn relative_paths_resolve_against_current_dir() {
        let mut env = empty_env();
        env.current_dir = PathBuf::from("/tmp/work");
        assert_eq!(env.resolve("out.txt"), PathBuf::from("/tmp/work/out.txt"));
        assert_eq!(env.resolve("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }
}
