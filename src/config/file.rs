//! TOML file store in the platform config directory

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use directories::ProjectDirs;
use fs2::FileExt;

use super::{CredentialStore, StoredState};
use crate::error::{Error, Result};

fn project_dirs() -> anyhow::Result<ProjectDirs> {
    ProjectDirs::from("com", "isolar-cli", "isolar-cli")
        .context("Could not determine config directory")
}

/// Directory for transient output such as the badge file.
pub fn cache_dir() -> anyhow::Result<PathBuf> {
    Ok(project_dirs()?.cache_dir().to_path_buf())
}

/// Store backed by a single `config.toml`.
///
/// Updates hold an advisory lock on `config.toml.lock`, so the CLI and a
/// running `serve` never interleave their read-modify-write cycles.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Store at the default location, `<config dir>/config.toml`.
    pub fn open_default() -> anyhow::Result<Self> {
        Ok(Self::at(project_dirs()?.config_dir().join("config.toml")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("toml.lock")
    }

    /// Exclusive lock across processes, released when the file is dropped.
    fn lock_exclusive(&self) -> Result<fs::File> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| storage_err("create config directory", e))?;
        }
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path())
            .map_err(|e| storage_err("open config lock", e))?;
        file.lock_exclusive()
            .map_err(|e| storage_err("lock config file", e))?;
        Ok(file)
    }

    fn read(&self) -> Result<StoredState> {
        if !self.path.exists() {
            return Ok(StoredState::default());
        }

        let content = fs::read_to_string(&self.path)
            .map_err(|e| Error::Storage(format!("Failed to read config file: {}", e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Storage(format!("Failed to parse config file: {}", e)))
    }

    fn write(&self, state: &StoredState) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| storage_err("create config directory", e))?;
        }

        let content =
            toml::to_string_pretty(state).map_err(|e| storage_err("serialize config", e))?;

        // Write next to the target, then rename over it.
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, content).map_err(|e| storage_err("write config file", e))?;

        // Set restrictive permissions on config file (contains tokens)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&tmp, perms)
                .map_err(|e| storage_err("set config permissions", e))?;
        }

        fs::rename(&tmp, &self.path).map_err(|e| storage_err("replace config file", e))
    }
}

fn storage_err(what: &str, e: impl std::fmt::Display) -> Error {
    Error::Storage(format!("Failed to {}: {}", what, e))
}

impl CredentialStore for FileStore {
    fn load(&self) -> Result<StoredState> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.read()
    }

    fn update(&self, apply: &mut dyn FnMut(&mut StoredState)) -> Result<StoredState> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let _file_lock = self.lock_exclusive()?;
        let mut state = self.read()?;
        apply(&mut state);
        self.write(&state)?;
        tracing::debug!("Saved state to {}", self.path.display());
        Ok(state)
    }
}
