use std::collections::BTreeMap;
use std::fmt;

use semver::Version;

use crate::descriptor::ModuleDescriptor;
use crate::entrypoint::EntryPointContext;
use crate::error::HookError;

/// What a lifecycle hook gets to see: the entry point it runs for, the
/// module it belongs to and the module's install parameters.
#[derive(Debug)]
pub struct HookContext<'a> {
    pub entry_point: &'a mut EntryPointContext,
    pub module: &'a str,
    pub parameters: BTreeMap<String, String>,
    pub whole_app: bool,
}

/// Lifecycle callbacks of a module. Every hook defaults to doing nothing.
pub trait ModuleInstaller {
    fn pre_install(&mut self, _ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn install(&mut self, _ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn post_install(&mut self, _ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn pre_uninstall(&mut self, _ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn uninstall(&mut self, _ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn post_uninstall(&mut self, _ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }
}

/// Hooks that move an installed module to `version`.
pub struct Upgrader {
    pub version: Version,
    pub date: Option<String>,
    pub handler: Box<dyn ModuleInstaller>,
}

impl Upgrader {
    pub fn new(version: Version, handler: Box<dyn ModuleInstaller>) -> Self {
        Self {
            version,
            date: None,
            handler,
        }
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }
}

impl fmt::Debug for Upgrader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upgrader")
            .field("version", &self.version)
            .field("date", &self.date)
            .finish_non_exhaustive()
    }
}

/// Supplies the lifecycle handlers of modules.
pub trait HandlerProvider {
    /// Handler used to install or remove `module`; `None` when the module
    /// has nothing to run.
    fn installer(
        &mut self,
        module: &ModuleDescriptor,
        entry_point: &EntryPointContext,
        whole_app: bool,
    ) -> anyhow::Result<Option<Box<dyn ModuleInstaller>>>;

    /// Every upgrader the module ships, in any order.
    fn upgraders(
        &mut self,
        module: &ModuleDescriptor,
        entry_point: &EntryPointContext,
    ) -> anyhow::Result<Vec<Upgrader>>;
}

/// Keeps the upgraders above `current` and up to `target`, lowest first.
pub fn select_upgrade_steps(
    upgraders: Vec<Upgrader>,
    current: Option<&Version>,
    target: &Version,
) -> Vec<Upgrader> {
    let mut steps = upgraders
        .into_iter()
        .filter(|upgrader| current.map(|c| upgrader.version > *c).unwrap_or(true))
        .filter(|upgrader| upgrader.version <= *target)
        .collect::<Vec<_>>();
    steps.sort_by(|a, b| a.version.cmp(&b.version));
    steps
}
