use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::version::{serde_version, VersionRange};

/// Contents of a module's `module.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModuleManifest {
    pub name: String,
    #[serde(with = "serde_version")]
    pub version: Version,
    pub date: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    #[serde(default)]
    pub hooks: HookCommands,
    #[serde(default)]
    pub upgraders: Vec<UpgraderSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencySpec {
    pub name: String,
    pub min_version: Option<String>,
    pub max_version: Option<String>,
    #[serde(default)]
    pub kind: DependencyKind,
}

/// Only `module` dependencies take part in resolution; `framework`
/// constraints are checked by the host before the installer runs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    #[default]
    Module,
    Framework,
}

/// Shell commands bound to each lifecycle hook.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HookCommands {
    #[serde(default)]
    pub pre_install: Vec<String>,
    #[serde(default)]
    pub install: Vec<String>,
    #[serde(default)]
    pub post_install: Vec<String>,
    #[serde(default)]
    pub pre_uninstall: Vec<String>,
    #[serde(default)]
    pub uninstall: Vec<String>,
    #[serde(default)]
    pub post_uninstall: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpgraderSpec {
    #[serde(with = "serde_version")]
    pub version: Version,
    pub date: Option<String>,
    #[serde(default)]
    pub hooks: HookCommands,
}

impl ModuleManifest {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let manifest: Self = toml::from_str(input).context("failed to parse module manifest")?;
        validate_module_name(&manifest.name)?;

        let mut seen_dependencies = HashSet::new();
        for dependency in &manifest.dependencies {
            if dependency.kind == DependencyKind::Module && dependency.name == manifest.name {
                return Err(anyhow!("module '{}' depends on itself", manifest.name));
            }
            if !seen_dependencies.insert((dependency.kind, dependency.name.as_str())) {
                return Err(anyhow!(
                    "module '{}' declares dependency '{}' twice",
                    manifest.name,
                    dependency.name
                ));
            }
            dependency.range().with_context(|| {
                format!(
                    "invalid version bounds for dependency '{}' of module '{}'",
                    dependency.name, manifest.name
                )
            })?;
        }

        let mut seen_upgraders = HashSet::new();
        for upgrader in &manifest.upgraders {
            if !seen_upgraders.insert(&upgrader.version) {
                return Err(anyhow!(
                    "module '{}' declares two upgraders for version {}",
                    manifest.name,
                    upgrader.version
                ));
            }
        }

        Ok(manifest)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read module manifest: {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid module manifest: {}", path.display()))
    }

    pub fn module_dependencies(&self) -> impl Iterator<Item = &DependencySpec> {
        self.dependencies
            .iter()
            .filter(|dependency| dependency.kind == DependencyKind::Module)
    }
}

impl DependencySpec {
    pub fn range(&self) -> anyhow::Result<VersionRange> {
        VersionRange::parse(self.min_version.as_deref(), self.max_version.as_deref())
    }
}

impl HookCommands {
    pub fn is_empty(&self) -> bool {
        self.pre_install.is_empty()
            && self.install.is_empty()
            && self.post_install.is_empty()
            && self.pre_uninstall.is_empty()
            && self.uninstall.is_empty()
            && self.post_uninstall.is_empty()
    }
}

pub(crate) fn validate_module_name(name: &str) -> anyhow::Result<()> {
    if name.trim().is_empty() {
        return Err(anyhow!("module name must not be empty"));
    }
    if !name
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
    {
        return Err(anyhow!("module name contains invalid character(s): {name}"));
    }
    Ok(())
}
