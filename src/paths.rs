use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

/// Program wrapped when nothing else is configured.
pub const DEFAULT_PROGRAM: &str = "claude";

/// Locate the program to wrap.
///
/// `program` is either a path (anything containing a separator) or a bare
/// command name. A bare name is looked up in the assistant's local install
/// directory first, then on `$PATH`, then in the usual user and package
/// manager bin directories.
pub fn resolve_program(program: &str) -> Result<PathBuf> {
    let home = dirs::home_dir();
    let path_var = std::env::var_os("PATH");
    match resolve_program_in(program, home.as_deref(), path_var.as_deref()) {
        Some(found) => Ok(found),
        None if looks_like_path(program) => {
            bail!("configured program '{program}' does not exist or is not executable")
        }
        None => bail!("'{program}' command not found"),
    }
}

pub fn resolve_program_in(program: &str, home: Option<&Path>, path_var: Option<&OsStr>) -> Option<PathBuf> {
    if looks_like_path(program) {
        let path = expand_home(program, home);
        return is_executable(&path).then_some(path);
    }

    if let Some(home) = home {
        let local = home.join(".claude").join("local").join(program);
        if is_executable(&local) {
            return Some(local);
        }
    }

    if let Some(found) = path_var.and_then(|p| find_in_path(program, p)) {
        return Some(found);
    }

    let mut fallbacks = vec![PathBuf::from("/usr/local/bin"), PathBuf::from("/opt/homebrew/bin")];
    if let Some(home) = home {
        fallbacks.push(home.join(".local").join("bin"));
        fallbacks.push(home.join("bin"));
    }
    fallbacks
        .into_iter()
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

/// First executable `name` in a `PATH`-style list.
pub fn find_in_path(name: &str, path_var: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path_var)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

/// Look `name` up on the current `PATH`.
pub fn which(name: &str) -> Option<PathBuf> {
    std::env::var_os("PATH").and_then(|p| find_in_path(name, &p))
}

fn looks_like_path(program: &str) -> bool {
    program.contains('/') || program.contains(std::path::MAIN_SEPARATOR) || program.starts_with('~')
}

fn expand_home(program: &str, home: Option<&Path>) -> PathBuf {
    match (program.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(program),
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn make_exe(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn prefers_local_install() {
        let home = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        let local = home.path().join(".claude/local/claude");
        make_exe(&local);
        make_exe(&bin.path().join("claude"));

        let found = resolve_program_in("claude", Some(home.path()), Some(bin.path().as_os_str()));
        assert_eq!(found, Some(local));
    }

    #[test]
    fn falls_back_to_path() {
        let home = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        make_exe(&bin.path().join("claude"));

        let found = resolve_program_in("claude", Some(home.path()), Some(bin.path().as_os_str()));
        assert_eq!(found, Some(bin.path().join("claude")));
    }

    #[test]
    fn falls_back_to_user_bin_dirs() {
        let home = tempfile::tempdir().unwrap();
        let name = "promptwatch-test-program";
        make_exe(&home.path().join(".local/bin").join(name));

        let found = resolve_program_in(name, Some(home.path()), None);
        assert_eq!(found, Some(home.path().join(".local/bin").join(name)));
    }

    #[test]
    fn skips_non_executable_files() {
        let bin = tempfile::tempdir().unwrap();
        std::fs::write(bin.path().join("promptwatch-plain"), "").unwrap();
        assert_eq!(find_in_path("promptwatch-plain", bin.path().as_os_str()), None);
    }

    #[test]
    fn explicit_path_is_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("my-claude");
        make_exe(&exe);
        let program = exe.to_string_lossy().into_owned();
        assert_eq!(resolve_program_in(&program, None, None), Some(exe));
    }

    #[test]
    fn tilde_path_expands_home() {
        let home = tempfile::tempdir().unwrap();
        make_exe(&home.path().join("tools/claude"));
        assert_eq!(
            resolve_program_in("~/tools/claude", Some(home.path()), None),
            Some(home.path().join("tools/claude"))
        );
    }

    #[test]
    fn missing_program_reports_name() {
        let err = resolve_program("promptwatch-definitely-missing").unwrap_err();
        assert_eq!(err.to_string(), "'promptwatch-definitely-missing' command not found");
    }

    #[test]
    fn missing_explicit_path_is_reported() {
        let err = resolve_program("/nonexistent/claude").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/claude"));
    }
}
