use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::anyhow;
use modstage_core::ProjectManifest;
use modstage_resolver::{Action, ItemErrorCode, ResolutionChain, ResolveError, Resolver};
use semver::Version;
use tracing::{debug, info, warn};

use crate::descriptor::ModuleDescriptor;
use crate::entrypoint::EntryPointContext;
use crate::error::{HookError, InstallError};
use crate::flags::InstallFlags;
use crate::hooks::{select_upgrade_steps, HandlerProvider, HookContext, ModuleInstaller, Upgrader};
use crate::layout::AppLayout;
use crate::ledger::InstallLedger;
use crate::lock::InstallLock;
use crate::messages::InstallMessage;
use crate::reporter::InstallReporter;

/// Drives installs, upgrades and removals of modules across the entry
/// points of one application.
///
/// Every module state change is saved to the ledger before the next module
/// is touched. Nothing is rolled back on failure; a later run picks up from
/// what the ledger says.
pub struct Installer<R, P> {
    ledger: InstallLedger,
    entry_points: Vec<EntryPointContext>,
    aliases: HashMap<String, usize>,
    reporter: R,
    provider: P,
    _lock: Option<InstallLock>,
}

/// One entry point to process, optionally restricted to a set of modules
/// with a forced action.
struct Target {
    index: usize,
    request: Option<(Vec<String>, Action)>,
}

enum Handlers {
    Single(Option<Box<dyn ModuleInstaller>>),
    Steps(Vec<Upgrader>),
}

struct PendingModule {
    name: String,
    action: Action,
    handlers: Handlers,
}

#[derive(Debug, Clone, Copy)]
enum HookStage {
    Before,
    After,
}

impl PendingModule {
    /// Runs the pre or post hooks matching the module's action.
    fn run_stage(
        &mut self,
        stage: HookStage,
        ctx: &mut HookContext<'_>,
        flags: InstallFlags,
    ) -> Result<(), HookError> {
        match (&mut self.handlers, self.action) {
            (Handlers::Single(Some(handler)), Action::Install)
                if flags.contains(InstallFlags::INSTALL) =>
            {
                match stage {
                    HookStage::Before => handler.pre_install(ctx),
                    HookStage::After => handler.post_install(ctx),
                }
            }
            (Handlers::Single(Some(handler)), Action::Remove)
                if flags.contains(InstallFlags::REMOVE) =>
            {
                match stage {
                    HookStage::Before => handler.pre_uninstall(ctx),
                    HookStage::After => handler.post_uninstall(ctx),
                }
            }
            (Handlers::Steps(steps), Action::Upgrade) if flags.contains(InstallFlags::UPGRADE) => {
                for step in steps.iter_mut() {
                    match stage {
                        HookStage::Before => step.handler.pre_install(ctx)?,
                        HookStage::After => step.handler.post_install(ctx)?,
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

enum StepFailure {
    Hook(HookError),
    Fatal(InstallError),
}

impl From<HookError> for StepFailure {
    fn from(err: HookError) -> Self {
        Self::Hook(err)
    }
}

impl From<anyhow::Error> for StepFailure {
    fn from(err: anyhow::Error) -> Self {
        Self::Hook(HookError::Runtime(err))
    }
}

impl From<InstallError> for StepFailure {
    fn from(err: InstallError) -> Self {
        Self::Fatal(err)
    }
}

impl<R: InstallReporter, P: HandlerProvider> Installer<R, P> {
    /// Opens the application rooted at `layout`.
    ///
    /// Claims the install lock, loads every entry point (entry points that
    /// share a config file are loaded once), then syncs the ledger with
    /// what was read and drops entries of modules no longer bound.
    pub fn open(layout: &AppLayout, reporter: R, provider: P) -> Result<Self, InstallError> {
        layout
            .ensure_base_dirs()
            .map_err(InstallError::Configuration)?;
        let lock = InstallLock::acquire(&layout.lock_path())?;
        let project = ProjectManifest::load(&layout.project_manifest_path())
            .map_err(InstallError::Configuration)?;
        let mut ledger =
            InstallLedger::open(layout.ledger_path()).map_err(InstallError::Configuration)?;

        let mut entry_points: Vec<EntryPointContext> = Vec::new();
        let mut aliases = HashMap::new();
        let mut by_config: HashMap<&str, usize> = HashMap::new();
        for decl in &project.entrypoints {
            let index = match by_config.get(decl.config.as_str()) {
                Some(&index) => {
                    debug!(
                        entry_point = %decl.file,
                        config = %decl.config,
                        "entry point shares its config with an earlier one"
                    );
                    index
                }
                None => {
                    let context = EntryPointContext::load(layout, decl, &ledger)
                        .map_err(InstallError::Configuration)?;
                    entry_points.push(context);
                    by_config.insert(decl.config.as_str(), entry_points.len() - 1);
                    entry_points.len() - 1
                }
            };
            aliases.entry(decl.id()).or_insert(index);
            aliases.entry(decl.file.clone()).or_insert(index);
        }

        for entry_point in &entry_points {
            let scope = entry_point.id();
            for module in entry_point.modules() {
                ledger.write_state(
                    scope,
                    &module.name,
                    module.installed,
                    module.installed_version.as_ref(),
                );
            }
            let keep = entry_point
                .modules()
                .iter()
                .map(|module| module.name.as_str())
                .collect::<HashSet<_>>();
            let stale = ledger.prune_modules(scope, &keep);
            if !stale.is_empty() {
                debug!(entry_point = scope, keys = stale.len(), "pruned stale ledger entries");
            }
        }
        ledger.save().map_err(InstallError::Ledger)?;

        info!(
            root = %layout.root().display(),
            entry_points = entry_points.len(),
            "application opened"
        );
        Ok(Self {
            ledger,
            entry_points,
            aliases,
            reporter,
            provider,
            _lock: Some(lock),
        })
    }

    /// Builds an installer over already loaded state, without a lock.
    pub fn from_parts(
        ledger: InstallLedger,
        entry_points: Vec<EntryPointContext>,
        reporter: R,
        provider: P,
    ) -> Self {
        let mut aliases = HashMap::new();
        for (index, entry_point) in entry_points.iter().enumerate() {
            aliases.entry(entry_point.id().to_string()).or_insert(index);
            aliases.entry(entry_point.file().to_string()).or_insert(index);
        }
        Self {
            ledger,
            entry_points,
            aliases,
            reporter,
            provider,
            _lock: None,
        }
    }

    pub fn ledger(&self) -> &InstallLedger {
        &self.ledger
    }

    pub fn entry_points(&self) -> &[EntryPointContext] {
        &self.entry_points
    }

    /// Looks an entry point up by id or by file name.
    pub fn entry_point(&self, name: &str) -> Option<&EntryPointContext> {
        self.aliases
            .get(name)
            .map(|&index| &self.entry_points[index])
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    pub fn reporter_mut(&mut self) -> &mut R {
        &mut self.reporter
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Installs, upgrades or removes whatever every entry point needs.
    pub fn install_application(&mut self, flags: InstallFlags) -> Result<bool, InstallError> {
        self.reporter.start();
        let targets = (0..self.entry_points.len())
            .map(|index| Target {
                index,
                request: None,
            })
            .collect();
        let result = self.run_targets(targets, true, flags);
        self.reporter.end();
        result
    }

    pub fn install_entry_point(&mut self, name: &str) -> Result<bool, InstallError> {
        let index = self.entry_point_index(name)?;
        self.reporter.start();
        let target = Target {
            index,
            request: None,
        };
        let result = self.run_targets(vec![target], true, InstallFlags::ALL);
        self.reporter.end();
        result
    }

    /// Installs the named modules, even when they are not enabled.
    ///
    /// Without an entry point every entry point using the modules is
    /// targeted.
    pub fn install_modules(
        &mut self,
        names: &[String],
        entry_point: Option<&str>,
    ) -> Result<bool, InstallError> {
        self.run_module_request(names, Action::Install, entry_point)
    }

    pub fn uninstall_modules(
        &mut self,
        names: &[String],
        entry_point: Option<&str>,
    ) -> Result<bool, InstallError> {
        self.run_module_request(names, Action::Remove, entry_point)
    }

    /// Pretends `name` is installed at `version` in every entry point, so
    /// the next run upgrades from there. Returns whether any entry point
    /// knows the module.
    pub fn force_module_version(&mut self, name: &str, version: Version) -> bool {
        let mut found = false;
        for entry_point in &mut self.entry_points {
            if let Some(module) = entry_point.module_mut(name) {
                module.mark_installed(version.clone());
                found = true;
            }
        }
        found
    }

    /// Replaces the parameters handed to the hooks of `name`.
    pub fn set_module_parameters(
        &mut self,
        name: &str,
        parameters: BTreeMap<String, String>,
        entry_point: Option<&str>,
    ) -> Result<(), InstallError> {
        let indexes = match entry_point {
            Some(entry_point) => vec![self.entry_point_index(entry_point)?],
            None => (0..self.entry_points.len()).collect(),
        };
        for index in indexes {
            if let Some(module) = self.entry_points[index].module_mut(name) {
                module.parameters = parameters.clone();
            }
        }
        Ok(())
    }

    /// Resolves every entry point without running anything.
    pub fn preview(
        &self,
    ) -> Result<Vec<(String, Result<ResolutionChain, ResolveError>)>, InstallError> {
        let mut previews = Vec::with_capacity(self.entry_points.len());
        for entry_point in &self.entry_points {
            let resolved =
                build_resolver(entry_point, None)?.and_then(|resolver| resolver.resolve());
            previews.push((entry_point.id().to_string(), resolved));
        }
        Ok(previews)
    }

    fn entry_point_index(&self, name: &str) -> Result<usize, InstallError> {
        self.aliases
            .get(name)
            .copied()
            .ok_or_else(|| InstallError::UnknownEntryPoint(name.to_string()))
    }

    fn report(&mut self, message: InstallMessage) {
        self.reporter
            .message(&message.to_string(), message.severity());
    }

    fn report_hook_error(&mut self, module: &str, err: &HookError) {
        warn!(module, error = %err, "module hook failed");
        self.report(InstallMessage::ModuleError {
            module: module.to_string(),
            message: format!("{err:#}"),
        });
    }

    fn save_ledger(&self) -> Result<(), InstallError> {
        self.ledger.save().map_err(InstallError::Ledger)
    }

    fn run_module_request(
        &mut self,
        names: &[String],
        action: Action,
        entry_point: Option<&str>,
    ) -> Result<bool, InstallError> {
        let explicit = entry_point
            .map(|name| self.entry_point_index(name))
            .transpose()?;
        self.reporter.start();
        if names.is_empty() {
            self.report(InstallMessage::NoModulesRequested);
            self.reporter.end();
            return Ok(true);
        }
        let result = match self.plan_module_request(names, action, explicit) {
            Some(targets) => self.run_targets(targets, false, InstallFlags::ALL),
            None => Ok(false),
        };
        self.reporter.end();
        result
    }

    fn plan_module_request(
        &mut self,
        names: &[String],
        action: Action,
        explicit: Option<usize>,
    ) -> Option<Vec<Target>> {
        let candidates = match explicit {
            Some(index) => vec![index],
            None => (0..self.entry_points.len()).collect::<Vec<_>>(),
        };

        let unknown = names
            .iter()
            .filter(|name| {
                !candidates
                    .iter()
                    .any(|&index| self.entry_points[index].has_module(name))
            })
            .cloned()
            .collect::<Vec<_>>();
        if !unknown.is_empty() {
            for name in unknown {
                self.report(InstallMessage::ModuleUnknown(name));
            }
            return None;
        }

        let mut targets = Vec::new();
        for index in candidates {
            let entry_point = &self.entry_points[index];
            let id = entry_point.id().to_string();
            let (used, unused): (Vec<String>, Vec<String>) = names
                .iter()
                .cloned()
                .partition(|name| entry_point.has_module(name));
            for module in unused {
                self.report(InstallMessage::ModuleNotUsed {
                    module,
                    entry_point: id.clone(),
                });
            }
            if !used.is_empty() {
                targets.push(Target {
                    index,
                    request: Some((used, action)),
                });
            }
        }
        Some(targets)
    }

    /// Resolves every target first, then executes them in order and stops
    /// at the first entry point that fails.
    fn run_targets(
        &mut self,
        targets: Vec<Target>,
        whole_app: bool,
        flags: InstallFlags,
    ) -> Result<bool, InstallError> {
        let mut chains = Vec::with_capacity(targets.len());
        for target in &targets {
            chains.push((target.index, self.resolve_target(target)?));
        }

        for (index, chain) in chains {
            let Some(chain) = chain else {
                return Ok(false);
            };
            if chain.is_empty() {
                let id = self.entry_points[index].id().to_string();
                debug!(entry_point = %id, "nothing to do");
                self.report(InstallMessage::NothingToDo(id));
                continue;
            }
            let succeeded = self.run_entry_point(index, &chain, whole_app, flags)?;
            self.save_ledger()?;
            if !succeeded {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn resolve_target(&mut self, target: &Target) -> Result<Option<ResolutionChain>, InstallError> {
        let entry_point = &self.entry_points[target.index];
        let resolved = build_resolver(entry_point, target.request.as_ref())?
            .and_then(|resolver| resolver.resolve());
        let id = entry_point.id().to_string();

        match resolved {
            Ok(chain) => {
                debug!(entry_point = %id, chain = ?chain.names(), "dependencies resolved");
                self.report(InstallMessage::DependenciesOk);
                Ok(Some(chain))
            }
            Err(conflict) => {
                let code = match &conflict {
                    ResolveError::CircularDependency { .. } => {
                        Some(ItemErrorCode::CircularDependency)
                    }
                    ResolveError::MissingDependency { .. } => {
                        Some(ItemErrorCode::MissingDependencies)
                    }
                    _ => None,
                };
                let entry_point = &mut self.entry_points[target.index];
                if let Some((code, module)) = code.zip(entry_point.module_mut(conflict.item())) {
                    module.in_error = Some(code);
                }
                warn!(
                    entry_point = %id,
                    code = conflict.code(),
                    "dependency resolution failed: {conflict}"
                );
                self.report(InstallMessage::Conflict(conflict));
                self.report(InstallMessage::EntryPointBadEnd(id));
                Ok(None)
            }
        }
    }

    fn run_entry_point(
        &mut self,
        index: usize,
        chain: &ResolutionChain,
        whole_app: bool,
        flags: InstallFlags,
    ) -> Result<bool, InstallError> {
        let id = self.entry_points[index].id().to_string();
        info!(entry_point = %id, modules = chain.len(), "installing entry point");
        self.report(InstallMessage::EntryPointStart(id.clone()));

        let disabled = self.entry_points[index].installers_disabled();
        if disabled {
            self.report(InstallMessage::InstallersDisabled);
        }

        let succeeded = match self.run_pre_phase(index, chain, whole_app, flags, disabled) {
            Some(mut pending) => {
                self.run_install_phase(index, &mut pending, whole_app, flags)?
                    && self.run_post_phase(index, &mut pending, whole_app, flags)
            }
            None => false,
        };

        if succeeded {
            info!(entry_point = %id, "entry point installed");
            self.report(InstallMessage::EntryPointEnd(id));
        } else {
            warn!(entry_point = %id, "entry point installation failed");
            self.report(InstallMessage::EntryPointBadEnd(id));
        }
        Ok(succeeded)
    }

    /// Obtains handlers and runs pre hooks for the whole chain. Every
    /// failure is reported before giving up.
    fn run_pre_phase(
        &mut self,
        index: usize,
        chain: &ResolutionChain,
        whole_app: bool,
        flags: InstallFlags,
        disabled: bool,
    ) -> Option<Vec<PendingModule>> {
        let mut pending = Vec::with_capacity(chain.len());
        let mut failed = false;
        for entry in chain.iter() {
            match self.prepare_module(index, &entry.name, entry.action, whole_app, flags, disabled)
            {
                Ok(module) => pending.push(module),
                Err(err) => {
                    failed = true;
                    self.report_hook_error(&entry.name, &err);
                }
            }
        }
        debug!(phase = "pre", modules = pending.len(), failed, "phase finished");
        (!failed).then_some(pending)
    }

    fn prepare_module(
        &mut self,
        index: usize,
        name: &str,
        action: Action,
        whole_app: bool,
        flags: InstallFlags,
        disabled: bool,
    ) -> Result<PendingModule, HookError> {
        let handlers = if disabled {
            match action {
                Action::Upgrade => Handlers::Steps(Vec::new()),
                _ => Handlers::Single(None),
            }
        } else {
            let entry_point = &self.entry_points[index];
            let module = entry_point
                .module(name)
                .ok_or_else(|| unbound_module(name, entry_point.id()))?;
            match action {
                Action::Upgrade => {
                    let upgraders = self.provider.upgraders(module, entry_point)?;
                    Handlers::Steps(select_upgrade_steps(
                        upgraders,
                        module.installed_version.as_ref(),
                        module.source_version(),
                    ))
                }
                _ => Handlers::Single(self.provider.installer(module, entry_point, whole_app)?),
            }
        };

        let mut pending = PendingModule {
            name: name.to_string(),
            action,
            handlers,
        };
        let mut ctx = hook_context(&mut self.entry_points[index], name, whole_app);
        pending.run_stage(HookStage::Before, &mut ctx, flags)?;
        Ok(pending)
    }

    /// Runs the main hooks in chain order. Stops at the first failure;
    /// modules already saved stay saved.
    fn run_install_phase(
        &mut self,
        index: usize,
        pending: &mut [PendingModule],
        whole_app: bool,
        flags: InstallFlags,
    ) -> Result<bool, InstallError> {
        for module in pending.iter_mut() {
            match self.install_module(index, module, whole_app, flags) {
                Ok(()) => {}
                Err(StepFailure::Hook(err)) => {
                    self.report_hook_error(&module.name, &err);
                    return Ok(false);
                }
                Err(StepFailure::Fatal(err)) => return Err(err),
            }
        }
        debug!(phase = "install", modules = pending.len(), "phase finished");
        Ok(true)
    }

    fn install_module(
        &mut self,
        index: usize,
        pending: &mut PendingModule,
        whole_app: bool,
        flags: InstallFlags,
    ) -> Result<(), StepFailure> {
        let scope = self.entry_points[index].id().to_string();
        let name = pending.name.clone();
        let (source_version, source_date) = {
            let module = self.descriptor_mut(index, &name)?;
            (
                module.source_version().clone(),
                module.source_date().to_string(),
            )
        };

        match (pending.action, &mut pending.handlers) {
            (Action::Install, Handlers::Single(handler)) => {
                if let Some(handler) = handler
                    .as_mut()
                    .filter(|_| flags.contains(InstallFlags::INSTALL))
                {
                    let mut ctx = hook_context(&mut self.entry_points[index], &name, whole_app);
                    handler.install(&mut ctx)?;
                }
                self.ledger
                    .write_install(&scope, &name, &source_version, &source_date);
                self.save_ledger()?;
                self.descriptor_mut(index, &name)?
                    .mark_installed(source_version);
                self.report(InstallMessage::ModuleInstalled(name.clone()));
            }
            (Action::Upgrade, Handlers::Steps(steps)) => {
                let mut last = None;
                for step in steps.iter_mut() {
                    if flags.contains(InstallFlags::UPGRADE) {
                        let mut ctx =
                            hook_context(&mut self.entry_points[index], &name, whole_app);
                        step.handler.install(&mut ctx)?;
                    }
                    // Saved per step so a failing later step resumes from here.
                    self.ledger.write_version(
                        &scope,
                        &name,
                        &step.version,
                        step.date.as_deref().unwrap_or_default(),
                    );
                    self.save_ledger()?;
                    self.descriptor_mut(index, &name)?
                        .mark_installed(step.version.clone());
                    self.report(InstallMessage::ModuleUpgraded {
                        module: name.clone(),
                        version: step.version.clone(),
                    });
                    last = Some(step.version.clone());
                }
                if last.as_ref() != Some(&source_version) {
                    self.ledger
                        .write_version(&scope, &name, &source_version, &source_date);
                    self.save_ledger()?;
                    self.descriptor_mut(index, &name)?
                        .mark_installed(source_version.clone());
                    self.report(InstallMessage::ModuleUpgraded {
                        module: name.clone(),
                        version: source_version,
                    });
                }
            }
            (Action::Remove, Handlers::Single(handler)) => {
                if let Some(handler) = handler
                    .as_mut()
                    .filter(|_| flags.contains(InstallFlags::REMOVE))
                {
                    let mut ctx = hook_context(&mut self.entry_points[index], &name, whole_app);
                    handler.uninstall(&mut ctx)?;
                }
                self.ledger.remove_module(&scope, &name);
                self.save_ledger()?;
                self.descriptor_mut(index, &name)?.mark_removed();
                self.report(InstallMessage::ModuleUninstalled(name.clone()));
            }
            (action, _) => {
                debug!(module = %name, %action, "no handler shape for action");
            }
        }

        self.entry_points[index].reload_config()?;
        Ok(())
    }

    /// Runs post hooks of every module that went through the install
    /// phase. Failures are reported and the remaining hooks still run.
    fn run_post_phase(
        &mut self,
        index: usize,
        pending: &mut [PendingModule],
        whole_app: bool,
        flags: InstallFlags,
    ) -> bool {
        let mut succeeded = true;
        for module in pending.iter_mut() {
            let name = module.name.clone();
            let result = {
                let mut ctx = hook_context(&mut self.entry_points[index], &name, whole_app);
                module.run_stage(HookStage::After, &mut ctx, flags)
            }
            .and_then(|()| {
                self.entry_points[index]
                    .reload_config()
                    .map_err(HookError::from)
            });
            if let Err(err) = result {
                succeeded = false;
                self.report_hook_error(&name, &err);
            }
        }
        debug!(phase = "post", modules = pending.len(), succeeded, "phase finished");
        succeeded
    }

    fn descriptor_mut(
        &mut self,
        index: usize,
        name: &str,
    ) -> Result<&mut ModuleDescriptor, HookError> {
        let entry_point = &mut self.entry_points[index];
        let id = entry_point.id().to_string();
        entry_point
            .module_mut(name)
            .ok_or_else(|| unbound_module(name, &id))
    }
}

fn build_resolver(
    entry_point: &EntryPointContext,
    request: Option<&(Vec<String>, Action)>,
) -> Result<Result<Resolver, ResolveError>, InstallError> {
    let mut resolver = Resolver::new();
    for module in entry_point.modules() {
        let item = module
            .resolver_item()
            .map_err(InstallError::Configuration)?;
        // Modules not named by a request keep their derived action.
        let item = match request {
            None => item,
            Some((names, _)) if !names.contains(&module.name) => item,
            Some((_, Action::Remove)) => item.with_action(Action::Remove),
            Some(_) => item.derive_action(true),
        };
        if let Err(conflict) = resolver.add_item(item) {
            return Ok(Err(conflict));
        }
    }
    Ok(Ok(resolver))
}

fn hook_context<'a>(
    entry_point: &'a mut EntryPointContext,
    module: &'a str,
    whole_app: bool,
) -> HookContext<'a> {
    let parameters = entry_point
        .module(module)
        .map(|descriptor| descriptor.parameters.clone())
        .unwrap_or_default();
    HookContext {
        entry_point,
        module,
        parameters,
        whole_app,
    }
}

fn unbound_module(name: &str, entry_point: &str) -> HookError {
    HookError::Runtime(anyhow!(
        "module '{name}' is not bound to entry point '{entry_point}'"
    ))
}
