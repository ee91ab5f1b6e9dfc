use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk layout of an application managed by the installer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppLayout {
    root: PathBuf,
}

impl AppLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_manifest_path(&self) -> PathBuf {
        self.root.join("project.toml")
    }

    pub fn var_dir(&self) -> PathBuf {
        self.root.join("var")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.var_dir().join("config")
    }

    pub fn config_path(&self, config: &str) -> PathBuf {
        self.config_dir().join(config)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.config_dir().join("installer.toml")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.var_dir().join("install.lock")
    }

    pub fn module_dir(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    pub fn module_manifest_path(&self, path: &str) -> PathBuf {
        self.module_dir(path).join("module.toml")
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [self.var_dir(), self.config_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}
