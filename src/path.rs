use nix::unistd::{AccessFlags, access};
use std::borrow::Cow;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Resolve a command name to the program that should be spawned.
///
/// Behavior:
/// - Empty name: returns `None`.
/// - Name containing a `/`: taken literally as a path, without any check; the
///   spawn reports it if nothing is there.
/// - Bare name: each directory of `search_list` (colon-separated, like `PATH`)
///   is tried in order and the first entry the caller may execute wins.
pub fn find_command_path<'a>(search_list: &OsStr, name: &'a str) -> Option<Cow<'a, Path>> {
    if name.is_empty() {
        return None;
    }
    if name.contains('/') {
        return Some(Cow::Borrowed(Path::new(name)));
    }
    find_in_path(search_list, OsStr::new(name)).map(Cow::Owned)
}

/// The directories of a colon-separated search list, in order.
pub fn search_dirs(search_list: &OsStr) -> Vec<PathBuf> {
    std::env::split_paths(search_list).collect()
}

fn find_in_path(search_list: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_list)
        .map(|dir| dir.join(cmd))
        .find(|path| is_executable(path))
}

/// A regular file the current user has execute permission on.
pub fn is_executable(path: &Path) -> bool {
    path.is_file() && access(path, AccessFlags::X_OK).is_ok()
}
