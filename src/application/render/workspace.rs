use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::WorkspaceSettings;

use super::types::OutputFormat;

/// Prefix shared by every transient file the service creates. The startup
/// sweep and the cleanup guard only ever touch files carrying it, because the
/// scratch directory may be the system-wide `/tmp`.
pub const SCRATCH_PREFIX: &str = "plantuml_";

const INPUT_EXTENSION: &str = "puml";

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("failed to create scratch directory `{path}`: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The per-process scratch directory holding transient render files.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Resolve the scratch directory and make sure it exists.
    ///
    /// An explicit `workspace.directory` setting wins; otherwise the platform
    /// default is used (`./tmp` on Windows, `/tmp` elsewhere). Creation
    /// failure is fatal for the caller.
    pub fn resolve(settings: &WorkspaceSettings) -> Result<Self, WorkspaceError> {
        let root = settings
            .directory
            .clone()
            .unwrap_or_else(platform_default_dir);
        fs::create_dir_all(&root).map_err(|source| WorkspaceError::Create {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a scratch file pair for one request. The identifier is random
    /// per request, so concurrent requests never collide on names.
    pub fn scratch(&self, format: &OutputFormat) -> Scratch {
        let id = Uuid::new_v4();
        let input = self
            .root
            .join(format!("{SCRATCH_PREFIX}{id}.{INPUT_EXTENSION}"));
        let expected_output = self
            .root
            .join(format!("{SCRATCH_PREFIX}{id}.{}", format.extension()));
        Scratch {
            id,
            input,
            expected_output,
        }
    }

    /// Names currently present in the scratch directory, for failure
    /// diagnostics. Unreadable entries are skipped.
    pub fn listing(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Remove scratch files left behind by a previous process, returning how
    /// many were deleted. Only regular files carrying [`SCRATCH_PREFIX`] are
    /// touched; removal failures are logged and skipped.
    pub fn sweep_stale(&self) -> usize {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return 0;
        };

        let mut removed = 0;
        for entry in entries.filter_map(|entry| entry.ok()) {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(SCRATCH_PREFIX) {
                continue;
            }
            if !entry.file_type().map(|kind| kind.is_file()).unwrap_or(false) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(err) => warn!(
                    target = "application::render::workspace",
                    path = %entry.path().display(),
                    error = %err,
                    "failed to sweep stale scratch file"
                ),
            }
        }
        removed
    }

    /// Whether the scratch directory accepts new files right now, probed with
    /// a short-lived temp file.
    pub fn probe_writable(&self) -> bool {
        tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .suffix(".probe")
            .tempfile_in(&self.root)
            .is_ok()
    }
}

fn platform_default_dir() -> PathBuf {
    if cfg!(windows) {
        env::current_dir()
            .map(|dir| dir.join("tmp"))
            .unwrap_or_else(|_| PathBuf::from("tmp"))
    } else {
        PathBuf::from("/tmp")
    }
}

/// One request's transient file pair.
#[derive(Debug)]
pub struct Scratch {
    pub id: Uuid,
    pub input: PathBuf,
    pub expected_output: PathBuf,
}

impl Scratch {
    /// A cleanup guard covering this scratch pair. Additional files (the
    /// resolved output, when it differs from the expected path) can be
    /// tracked onto the guard later.
    pub fn guard(&self) -> ScratchGuard {
        ScratchGuard {
            paths: vec![self.input.clone(), self.expected_output.clone()],
        }
    }
}

/// Deletes the tracked files when dropped, on every exit path. A deletion
/// failure is logged, never escalated: by the time the guard runs, the
/// response has already been determined.
#[derive(Debug)]
pub struct ScratchGuard {
    paths: Vec<PathBuf>,
}

impl ScratchGuard {
    pub fn track(&mut self, path: PathBuf) {
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        for path in &self.paths {
            match fs::remove_file(path) {
                Ok(()) => debug!(
                    target = "application::render::workspace",
                    path = %path.display(),
                    "removed scratch file"
                ),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!(
                    target = "application::render::workspace",
                    path = %path.display(),
                    error = %err,
                    "failed to remove scratch file"
                ),
            }
        }
    }
}
