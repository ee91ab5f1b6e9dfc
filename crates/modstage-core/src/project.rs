use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

/// The application's `project.toml`: the list of its entry points.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectManifest {
    pub name: Option<String>,
    #[serde(default)]
    pub entrypoints: Vec<EntryPointDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryPointDecl {
    pub file: String,
    pub config: String,
    #[serde(default)]
    pub kind: EntryPointKind,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryPointKind {
    #[default]
    Classic,
    Cmdline,
    Jsonrpc,
    Xmlrpc,
    Soap,
}

impl ProjectManifest {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let manifest: Self = toml::from_str(input).context("failed to parse project manifest")?;
        if manifest.entrypoints.is_empty() {
            return Err(anyhow!("project manifest declares no entry point"));
        }

        let mut seen_files = HashSet::new();
        for entrypoint in &manifest.entrypoints {
            if entrypoint.file.trim().is_empty() {
                return Err(anyhow!("entry point file must not be empty"));
            }
            if entrypoint.config.trim().is_empty() {
                return Err(anyhow!(
                    "entry point '{}' has no config file",
                    entrypoint.file
                ));
            }
            if !seen_files.insert(entrypoint.file.as_str()) {
                return Err(anyhow!("duplicate entry point '{}'", entrypoint.file));
            }
        }
        Ok(manifest)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read project manifest: {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid project manifest: {}", path.display()))
    }
}

impl EntryPointDecl {
    /// The entry point id is its file path without the extension.
    pub fn id(&self) -> String {
        let file = self.file.trim().replace('\\', "/");
        match file.rsplit_once('.') {
            Some((stem, extension)) if !stem.is_empty() && !extension.contains('/') => {
                stem.to_string()
            }
            _ => file,
        }
    }

    pub fn is_cli(&self) -> bool {
        self.kind.is_cli()
    }
}

impl EntryPointKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Classic => "classic",
            Self::Cmdline => "cmdline",
            Self::Jsonrpc => "jsonrpc",
            Self::Xmlrpc => "xmlrpc",
            Self::Soap => "soap",
        }
    }

    pub fn is_cli(self) -> bool {
        self == Self::Cmdline
    }
}
