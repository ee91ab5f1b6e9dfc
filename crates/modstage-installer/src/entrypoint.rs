use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use modstage_core::{
    parse_module_version, EntryPointConfig, EntryPointDecl, EntryPointKind, ModuleManifest,
};
use tracing::debug;

use crate::descriptor::ModuleDescriptor;
use crate::layout::AppLayout;
use crate::ledger::InstallLedger;

/// Live state of one entry point during an installer run.
///
/// Hooks may rewrite the configuration file behind the installer's back,
/// so the in-memory copy is re-read through `reload_config` after each one.
#[derive(Debug)]
pub struct EntryPointContext {
    id: String,
    file: String,
    kind: EntryPointKind,
    config_path: PathBuf,
    config: EntryPointConfig,
    config_revision: u64,
    modules: Vec<ModuleDescriptor>,
}

impl EntryPointContext {
    pub fn new(
        decl: &EntryPointDecl,
        config_path: impl Into<PathBuf>,
        config: EntryPointConfig,
        modules: Vec<ModuleDescriptor>,
    ) -> Self {
        Self {
            id: decl.id(),
            file: decl.file.clone(),
            kind: decl.kind,
            config_path: config_path.into(),
            config,
            config_revision: 0,
            modules,
        }
    }

    /// Reads the entry point's config and every module manifest it lists.
    /// Installed state comes from the ledger.
    pub fn load(layout: &AppLayout, decl: &EntryPointDecl, ledger: &InstallLedger) -> Result<Self> {
        let config_path = layout.config_path(&decl.config);
        let config = EntryPointConfig::load(&config_path)?;
        let id = decl.id();

        let mut modules = Vec::with_capacity(config.modules.len());
        for binding in &config.modules {
            let manifest = ModuleManifest::load(&layout.module_manifest_path(&binding.path))
                .with_context(|| {
                    format!("failed to load module '{}' for entry point '{id}'", binding.name)
                })?;
            let mut descriptor = ModuleDescriptor::new(binding, manifest)?;

            if let Some(record) = ledger.record(&id, &binding.name) {
                descriptor.installed = record.installed;
                descriptor.installed_version = match record.version.as_deref() {
                    Some(raw) if record.installed => Some(parse_module_version(raw).with_context(
                        || format!("invalid recorded version of module '{}'", binding.name),
                    )?),
                    _ => None,
                };
            }
            modules.push(descriptor);
        }

        Ok(Self::new(decl, config_path, config, modules))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn kind(&self) -> EntryPointKind {
        self.kind
    }

    pub fn is_cli(&self) -> bool {
        self.kind.is_cli()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn config(&self) -> &EntryPointConfig {
        &self.config
    }

    /// Bumped on every config replacement; anything derived from an older
    /// revision is stale.
    pub fn config_revision(&self) -> u64 {
        self.config_revision
    }

    pub fn installers_disabled(&self) -> bool {
        self.config.disable_installers
    }

    pub fn replace_config(&mut self, config: EntryPointConfig) {
        self.config = config;
        self.config_revision += 1;
    }

    pub fn reload_config(&mut self) -> Result<()> {
        let config = EntryPointConfig::load(&self.config_path)?;
        self.replace_config(config);
        debug!(
            entry_point = %self.id,
            revision = self.config_revision,
            "configuration reloaded"
        );
        Ok(())
    }

    pub fn modules(&self) -> &[ModuleDescriptor] {
        &self.modules
    }

    pub fn module(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.modules.iter().find(|module| module.name == name)
    }

    pub fn module_mut(&mut self, name: &str) -> Option<&mut ModuleDescriptor> {
        self.modules.iter_mut().find(|module| module.name == name)
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.module(name).is_some()
    }
}
