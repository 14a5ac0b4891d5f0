//! Display server executable resolution.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::protocol_constants::DISPLAY_SERVER_BINARY;
use crate::utils::expand_home;

use super::error::{SupervisorError, SupervisorResult};

/// Common install locations, checked after any configured search paths.
///
/// Relative entries are resolved against the working directory.
pub const DEFAULT_INSTALL_PATHS: &[&str] = &[
    "../flaschen-taschen/server/ft-server",
    "~/flaschen-taschen/server/ft-server",
    "/usr/local/bin/ft-server",
    "~/projects/flaschen-taschen/server/ft-server",
];

/// Where to look for the display server binary.
#[derive(Debug, Clone, Default)]
pub struct ExecutableSearch {
    /// Explicit path. When set, it is the only candidate.
    pub override_path: Option<PathBuf>,
    /// Extra locations checked before the defaults.
    pub search_paths: Vec<PathBuf>,
    /// Whether [`DEFAULT_INSTALL_PATHS`] are checked.
    pub include_defaults: bool,
    /// Directory relative candidates resolve against. Defaults to the
    /// process working directory.
    pub working_dir: Option<PathBuf>,
    /// `PATH`-style list. Defaults to the process environment.
    pub path_env: Option<OsString>,
}

impl ExecutableSearch {
    /// The usual search: overrides and configured paths, then defaults,
    /// the working directory, and `PATH`.
    #[must_use]
    pub fn new(override_path: Option<PathBuf>, search_paths: Vec<PathBuf>) -> Self {
        Self {
            override_path,
            search_paths,
            include_defaults: true,
            working_dir: None,
            path_env: None,
        }
    }

    /// Every path that will be checked, in order.
    #[must_use]
    pub fn candidates(&self) -> Vec<PathBuf> {
        let cwd = self
            .working_dir
            .clone()
            .or_else(|| env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let absolute = |path: &Path| {
            let path = expand_home(path);
            if path.is_absolute() {
                path
            } else {
                cwd.join(path)
            }
        };

        if let Some(path) = &self.override_path {
            return vec![absolute(path.as_path())];
        }

        let mut candidates: Vec<PathBuf> =
            self.search_paths.iter().map(|p| absolute(p.as_path())).collect();
        if self.include_defaults {
            candidates.extend(DEFAULT_INSTALL_PATHS.iter().map(|p| absolute(Path::new(p))));
        }
        candidates.push(cwd.join(DISPLAY_SERVER_BINARY));

        let path_env = self.path_env.clone().or_else(|| env::var_os("PATH"));
        if let Some(path_env) = path_env {
            candidates.extend(
                env::split_paths(&path_env)
                    .filter(|dir| !dir.as_os_str().is_empty())
                    .map(|dir| dir.join(DISPLAY_SERVER_BINARY)),
            );
        }
        candidates
    }
}

/// Returns the first candidate that is a regular, executable file.
pub fn resolve_executable(search: &ExecutableSearch) -> SupervisorResult<PathBuf> {
    let candidates = search.candidates();
    for candidate in &candidates {
        if is_executable(candidate) {
            log::info!("[Supervisor] Using display server at {}", candidate.display());
            return Ok(candidate.clone());
        }
        log::debug!("[Supervisor] No executable at {}", candidate.display());
    }
    Err(SupervisorError::ExecutableNotFound {
        binary: DISPLAY_SERVER_BINARY.to_string(),
        searched: candidates,
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn write_file(path: &Path, mode: u32) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
    }

    fn isolated(dir: &Path) -> ExecutableSearch {
        ExecutableSearch {
            override_path: None,
            search_paths: Vec::new(),
            include_defaults: false,
            working_dir: Some(dir.to_path_buf()),
            path_env: Some(OsString::new()),
        }
    }

    #[test]
    fn configured_path_wins_over_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let configured = dir.path().join("opt/ft-server");
        write_file(&configured, 0o755);
        write_file(&dir.path().join(DISPLAY_SERVER_BINARY), 0o755);

        let mut search = isolated(dir.path());
        search.search_paths = vec![configured.clone()];

        assert_eq!(resolve_executable(&search).unwrap(), configured);
    }

    #[test]
    fn falls_back_to_path_entries() {
        let dir = tempfile::tempdir().unwrap();
        let bin_dir = dir.path().join("bin");
        write_file(&bin_dir.join(DISPLAY_SERVER_BINARY), 0o755);

        let mut search = isolated(&dir.path().join("work"));
        search.path_env = Some(env::join_paths([dir.path().join("empty"), bin_dir.clone()]).unwrap());

        assert_eq!(
            resolve_executable(&search).unwrap(),
            bin_dir.join(DISPLAY_SERVER_BINARY)
        );
    }

    #[test]
    fn non_executable_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join(DISPLAY_SERVER_BINARY), 0o644);

        let err = resolve_executable(&isolated(dir.path())).unwrap_err();
        assert!(matches!(err, SupervisorError::ExecutableNotFound { .. }));
    }

    #[test]
    fn directories_are_not_executables() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(DISPLAY_SERVER_BINARY)).unwrap();

        assert!(resolve_executable(&isolated(dir.path())).is_err());
    }

    #[test]
    fn missing_override_fails_without_searching_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join(DISPLAY_SERVER_BINARY), 0o755);

        let mut search = isolated(dir.path());
        search.override_path = Some(dir.path().join("nope/ft-server"));

        match resolve_executable(&search).unwrap_err() {
            SupervisorError::ExecutableNotFound { searched, .. } => {
                assert_eq!(searched, vec![dir.path().join("nope/ft-server")]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn not_found_lists_every_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let mut search = isolated(dir.path());
        search.search_paths = vec![PathBuf::from("custom/ft-server")];
        search.include_defaults = true;

        let err = resolve_executable(&search).unwrap_err();
        let SupervisorError::ExecutableNotFound { searched, .. } = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(searched.len(), 1 + DEFAULT_INSTALL_PATHS.len() + 1);
        assert_eq!(searched[0], dir.path().join("custom/ft-server"));
        assert_eq!(searched[1], dir.path().join("../flaschen-taschen/server/ft-server"));
        assert!(err.to_string().contains("/usr/local/bin/ft-server"));
    }
}
