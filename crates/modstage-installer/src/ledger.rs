use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use semver::Version;
use tracing::debug;

const INSTALLED: &str = "installed";
const VERSION: &str = "version";
const VERSION_DATE: &str = "version.date";
const FIRST_VERSION: &str = "firstversion";
const FIRST_VERSION_DATE: &str = "firstversion.date";

const MODULE_FIELDS: [&str; 5] = [
    INSTALLED,
    VERSION,
    VERSION_DATE,
    FIRST_VERSION,
    FIRST_VERSION_DATE,
];

/// Persistent record of installed modules, one table per entry point.
///
/// Mutations only touch memory; `save` is the durability boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLedger {
    path: PathBuf,
    scopes: BTreeMap<String, BTreeMap<String, String>>,
}

/// Typed view over the keys of one module in one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerRecord {
    pub installed: bool,
    pub version: Option<String>,
    pub version_date: Option<String>,
    pub first_version: Option<String>,
    pub first_version_date: Option<String>,
}

impl InstallLedger {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Self {
                    path,
                    scopes: BTreeMap::new(),
                });
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read install ledger: {}", path.display()));
            }
        };

        let scopes = toml::from_str(&raw)
            .with_context(|| format!("failed to parse install ledger: {}", path.display()))?;
        Ok(Self { path, scopes })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_value(&mut self, key: &str, value: impl Into<String>, scope: &str) {
        self.scopes
            .entry(scope.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub fn remove_value(&mut self, key: &str, scope: &str) -> bool {
        let Some(values) = self.scopes.get_mut(scope) else {
            return false;
        };
        let removed = values.remove(key).is_some();
        if values.is_empty() {
            self.scopes.remove(scope);
        }
        removed
    }

    pub fn get_value(&self, key: &str, scope: &str) -> Option<&str> {
        self.scopes
            .get(scope)
            .and_then(|values| values.get(key))
            .map(String::as_str)
    }

    pub fn get_values(&self, scope: &str) -> BTreeMap<String, String> {
        self.scopes.get(scope).cloned().unwrap_or_default()
    }

    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scopes.keys().map(String::as_str)
    }

    /// Writes the ledger to a sibling file, syncs it, then renames it over
    /// the ledger so a crash leaves either the old or the new content.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let payload =
            toml::to_string(&self.scopes).context("failed to serialize install ledger")?;
        let tmp_path = self.path.with_extension("toml.tmp");
        let mut file = fs::File::create(&tmp_path)
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;
        file.write_all(payload.as_bytes())
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync {}", tmp_path.display()))?;
        drop(file);

        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!(
                "failed to move {} over {}",
                tmp_path.display(),
                self.path.display()
            )
        })?;
        debug!(path = %self.path.display(), "install ledger saved");
        Ok(())
    }

    pub fn record(&self, scope: &str, module: &str) -> Option<LedgerRecord> {
        let values = self.scopes.get(scope)?;
        let field = |name: &str| values.get(&module_key(module, name)).cloned();
        if MODULE_FIELDS
            .iter()
            .all(|name| !values.contains_key(&module_key(module, name)))
        {
            return None;
        }

        Some(LedgerRecord {
            installed: field(INSTALLED).map(|v| v == "1").unwrap_or(false),
            version: field(VERSION),
            version_date: field(VERSION_DATE),
            first_version: field(FIRST_VERSION),
            first_version_date: field(FIRST_VERSION_DATE),
        })
    }

    /// Records a fresh install; the first version is the installed one.
    pub fn write_install(&mut self, scope: &str, module: &str, version: &Version, date: &str) {
        self.set_value(&module_key(module, INSTALLED), "1", scope);
        self.write_version(scope, module, version, date);
        self.set_value(&module_key(module, FIRST_VERSION), version.to_string(), scope);
        self.set_value(&module_key(module, FIRST_VERSION_DATE), date, scope);
    }

    pub fn write_version(&mut self, scope: &str, module: &str, version: &Version, date: &str) {
        self.set_value(&module_key(module, VERSION), version.to_string(), scope);
        self.set_value(&module_key(module, VERSION_DATE), date, scope);
    }

    /// Mirrors the state read from an entry point at startup.
    pub fn write_state(
        &mut self,
        scope: &str,
        module: &str,
        installed: bool,
        version: Option<&Version>,
    ) {
        self.set_value(
            &module_key(module, INSTALLED),
            if installed { "1" } else { "0" },
            scope,
        );
        match version {
            Some(version) => {
                self.set_value(&module_key(module, VERSION), version.to_string(), scope)
            }
            None => {
                self.remove_value(&module_key(module, VERSION), scope);
            }
        }
    }

    pub fn remove_module(&mut self, scope: &str, module: &str) {
        for name in MODULE_FIELDS {
            self.remove_value(&module_key(module, name), scope);
        }
    }

    /// Drops every `<module>.*` key whose module is not in `keep`.
    pub fn prune_modules(&mut self, scope: &str, keep: &HashSet<&str>) -> Vec<String> {
        let stale = self
            .get_values(scope)
            .into_keys()
            .filter(|key| match key.split_once('.') {
                Some((module, _)) => !keep.contains(module),
                None => false,
            })
            .collect::<Vec<_>>();
        for key in &stale {
            self.remove_value(key, scope);
        }
        stale
    }
}

fn module_key(module: &str, field: &str) -> String {
    format!("{module}.{field}")
}
