use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

use crate::manifest::validate_module_name;

/// Configuration of one entry point.
///
/// Module hooks are allowed to rewrite the file, so keys this crate does not
/// know about are kept in `extra` instead of being rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntryPointConfig {
    #[serde(default)]
    pub disable_installers: bool,
    #[serde(default)]
    pub modules: Vec<ModuleBinding>,
    #[serde(flatten)]
    pub extra: toml::Table,
}

/// A module activated (or merely known) by an entry point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModuleBinding {
    pub name: String,
    pub path: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

impl EntryPointConfig {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let config: Self =
            toml::from_str(input).context("failed to parse entry point configuration")?;

        let mut seen = HashSet::new();
        for binding in &config.modules {
            validate_module_name(&binding.name)?;
            if binding.path.trim().is_empty() {
                return Err(anyhow!("module '{}' has no path", binding.name));
            }
            if !seen.insert(binding.name.as_str()) {
                return Err(anyhow!("module '{}' is listed twice", binding.name));
            }
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| {
            format!("failed to read entry point configuration: {}", path.display())
        })?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid entry point configuration: {}", path.display()))
    }

    pub fn module(&self, name: &str) -> Option<&ModuleBinding> {
        self.modules.iter().find(|binding| binding.name == name)
    }

    pub fn enabled_modules(&self) -> impl Iterator<Item = &ModuleBinding> {
        self.modules.iter().filter(|binding| binding.enabled)
    }
}
