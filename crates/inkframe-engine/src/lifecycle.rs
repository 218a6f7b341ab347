use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use chrono::Local;
use inkframe_contracts::ComicError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

pub const SCOPE_PREFIX: &str = "comic_";

/// The shared storage scope: one subdirectory per request, plus the event log.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a fresh, uniquely named working directory for one request.
    pub fn create_scope(&self) -> Result<PathBuf, ComicError> {
        fs::create_dir_all(&self.root).map_err(|err| ComicError::io(&self.root, err))?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let suffix = Uuid::new_v4().simple().to_string();
        let dir = self
            .root
            .join(format!("{SCOPE_PREFIX}{stamp}_{}", &suffix[..8]));
        fs::create_dir(&dir).map_err(|err| ComicError::io(&dir, err))?;
        debug!(dir = %dir.display(), "working directory created");
        Ok(dir)
    }

    /// Locates a deliverable by bare file name inside any request scope.
    ///
    /// Read-only walk in file-name order; the first match wins. Only files directly
    /// inside a scope are served, and names that could address anything else are
    /// treated as unknown.
    pub fn find(&self, name: &str) -> Result<PathBuf, ComicError> {
        let not_found = || ComicError::NotFound(name.to_string());
        if name.is_empty()
            || name == "."
            || name.contains("..")
            || name.contains('/')
            || name.contains('\\')
        {
            return Err(not_found());
        }
        if !self.root.is_dir() {
            return Err(not_found());
        }

        WalkDir::new(&self.root)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .find(|entry| entry.file_type().is_file() && entry.file_name() == name)
            .map(|entry| entry.into_path())
            .ok_or_else(not_found)
    }

    /// Removes request scopes last modified more than `max_age` ago.
    ///
    /// Best-effort: failures are logged and the scope is skipped. Returns the removed paths.
    pub fn sweep_expired(&self, max_age: Duration) -> Result<Vec<PathBuf>, ComicError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(ComicError::io(&self.root, err)),
        };
        let now = SystemTime::now();
        let mut removed = Vec::new();
        for entry in entries.filter_map(|entry| entry.ok()) {
            let path = entry.path();
            let is_scope = entry
                .file_name()
                .to_str()
                .map(|name| name.starts_with(SCOPE_PREFIX))
                .unwrap_or(false);
            if !is_scope || !path.is_dir() {
                continue;
            }
            let age = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());
            let Some(age) = age.filter(|age| *age >= max_age) else {
                continue;
            };
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    info!(
                        dir = %path.display(),
                        age_s = age.as_secs(),
                        "expired scope removed"
                    );
                    removed.push(path);
                }
                Err(err) => warn!(
                    dir = %path.display(),
                    error = %err,
                    "expired scope removal failed"
                ),
            }
        }
        removed.sort();
        Ok(removed)
    }
}

/// Deletes `dir` after `delay` on a detached thread.
///
/// Errors are logged and never retried. Returns `None` if the thread could not be
/// started; the directory is then left for `sweep_expired`.
pub fn schedule_cleanup(dir: PathBuf, delay: Duration) -> Option<JoinHandle<()>> {
    let label = dir.display().to_string();
    let spawned = thread::Builder::new()
        .name("inkframe-cleanup".to_string())
        .spawn(move || {
            thread::sleep(delay);
            remove_scope(&dir);
        });
    match spawned {
        Ok(handle) => {
            debug!(dir = %label, delay_s = delay.as_secs(), "cleanup scheduled");
            Some(handle)
        }
        Err(err) => {
            error!(
                dir = %label,
                error = %err,
                "cleanup thread could not be started"
            );
            None
        }
    }
}

fn remove_scope(dir: &Path) {
    match fs::remove_dir_all(dir) {
        Ok(()) => info!(dir = %dir.display(), "working directory removed"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "working directory already gone")
        }
        Err(err) => error!(
            dir = %dir.display(),
            error = %err,
            "working directory cleanup failed"
        ),
    }
}
