use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use modstage_core::{ModuleBinding, ModuleManifest};
use modstage_resolver::{ItemErrorCode, ResolverItem};
use semver::Version;

/// One module bound to one entry point: its manifest plus installed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub name: String,
    pub path: String,
    pub manifest: ModuleManifest,
    pub enabled: bool,
    pub installed: bool,
    pub installed_version: Option<Version>,
    pub parameters: BTreeMap<String, String>,
    pub in_error: Option<ItemErrorCode>,
}

impl ModuleDescriptor {
    pub fn new(binding: &ModuleBinding, manifest: ModuleManifest) -> Result<Self> {
        if manifest.name != binding.name {
            return Err(anyhow!(
                "module '{}' at {} declares the name '{}'",
                binding.name,
                binding.path,
                manifest.name
            ));
        }
        Ok(Self {
            name: binding.name.clone(),
            path: binding.path.clone(),
            manifest,
            enabled: binding.enabled,
            installed: false,
            installed_version: None,
            parameters: binding.parameters.clone(),
            in_error: None,
        })
    }

    pub fn source_version(&self) -> &Version {
        &self.manifest.version
    }

    pub fn source_date(&self) -> &str {
        self.manifest.date.as_deref().unwrap_or_default()
    }

    /// Builds the resolver input with the action derived from installed
    /// versus source version.
    pub fn resolver_item(&self) -> Result<ResolverItem> {
        let mut item = ResolverItem::new(self.name.clone(), self.manifest.version.clone());
        item.installed = self.installed;
        item.current_version = self.installed_version.clone();
        item.in_error = self.in_error;
        for dependency in self.manifest.module_dependencies() {
            let range = dependency.range().with_context(|| {
                format!(
                    "invalid version bounds for dependency '{}' of module '{}'",
                    dependency.name, self.name
                )
            })?;
            item = item.with_dependency(dependency.name.clone(), range);
        }
        Ok(item.derive_action(self.enabled))
    }

    pub fn mark_installed(&mut self, version: Version) {
        self.installed = true;
        self.installed_version = Some(version);
    }

    pub fn mark_removed(&mut self) {
        self.installed = false;
        self.installed_version = None;
    }
}
