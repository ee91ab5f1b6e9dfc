use std::fmt;

use modstage_resolver::ResolveError;
use semver::Version;

use crate::reporter::Severity;

/// Every message the installer sends to its reporter.
///
/// `key` is the stable identifier front-ends can translate; `Display`
/// renders the default English text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallMessage {
    EntryPointStart(String),
    InstallersDisabled,
    EntryPointEnd(String),
    EntryPointBadEnd(String),
    DependenciesOk,
    Conflict(ResolveError),
    ModuleUnknown(String),
    ModuleNotUsed { module: String, entry_point: String },
    ModuleInstalled(String),
    ModuleUpgraded { module: String, version: Version },
    ModuleUninstalled(String),
    ModuleError { module: String, message: String },
    NothingToDo(String),
    NoModulesRequested,
}

impl InstallMessage {
    pub fn key(&self) -> &'static str {
        match self {
            Self::EntryPointStart(_) => "install.entrypoint.start",
            Self::InstallersDisabled => "install.entrypoint.installers.disabled",
            Self::EntryPointEnd(_) => "install.entrypoint.end",
            Self::EntryPointBadEnd(_) => "install.entrypoint.bad.end",
            Self::DependenciesOk => "install.dependencies.ok",
            Self::Conflict(err) => conflict_key(err),
            Self::ModuleUnknown(_) => "module.unknown",
            Self::ModuleNotUsed { .. } => "module.not.used",
            Self::ModuleInstalled(_) => "install.module.installed",
            Self::ModuleUpgraded { .. } => "install.module.upgraded",
            Self::ModuleUninstalled(_) => "install.module.uninstalled",
            Self::ModuleError { .. } => "install.module.error",
            Self::NothingToDo(_) => "install.entrypoint.nothing",
            Self::NoModulesRequested => "module.none.requested",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::EntryPointStart(_)
            | Self::InstallersDisabled
            | Self::ModuleNotUsed { .. }
            | Self::NoModulesRequested => Severity::Notice,
            Self::EntryPointBadEnd(_) => Severity::Warning,
            Self::Conflict(_) | Self::ModuleUnknown(_) | Self::ModuleError { .. } => {
                Severity::Error
            }
            Self::EntryPointEnd(_)
            | Self::DependenciesOk
            | Self::ModuleInstalled(_)
            | Self::ModuleUpgraded { .. }
            | Self::ModuleUninstalled(_)
            | Self::NothingToDo(_) => Severity::Ok,
        }
    }
}

fn conflict_key(err: &ResolveError) -> &'static str {
    match err {
        ResolveError::CircularDependency { .. } => "module.circular.dependency",
        ResolveError::VersionMismatch { .. } => "module.bad.dependency.version",
        ResolveError::DeletionConflict { .. } => "install.error.delete.dependency",
        ResolveError::MissingDependency { .. } => "module.needed",
        ResolveError::DependencyInstallFailure { .. }
        | ResolveError::DependencyRemoveFailure { .. } => "install.error.install.dependency",
        ResolveError::DuplicateItem { .. } => "install.bad.dependencies",
    }
}

impl fmt::Display for InstallMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EntryPointStart(ep) => write!(f, "installation for entry point '{ep}'"),
            Self::InstallersDisabled => {
                f.write_str("module installers are disabled for this entry point")
            }
            Self::EntryPointEnd(ep) => write!(f, "entry point '{ep}' is ready"),
            Self::EntryPointBadEnd(ep) => {
                write!(f, "installation of entry point '{ep}' stopped on errors")
            }
            Self::DependenciesOk => f.write_str("module dependencies are satisfied"),
            Self::Conflict(err) => write!(f, "{err}"),
            Self::ModuleUnknown(module) => write!(f, "unknown module '{module}'"),
            Self::ModuleNotUsed {
                module,
                entry_point,
            } => write!(f, "module '{module}' is not used by entry point '{entry_point}'"),
            Self::ModuleInstalled(module) => write!(f, "module '{module}' installed"),
            Self::ModuleUpgraded { module, version } => {
                write!(f, "module '{module}' upgraded to {version}")
            }
            Self::ModuleUninstalled(module) => write!(f, "module '{module}' uninstalled"),
            Self::ModuleError { module, message } => write!(f, "module '{module}': {message}"),
            Self::NothingToDo(ep) => write!(f, "nothing to do for entry point '{ep}'"),
            Self::NoModulesRequested => f.write_str("no module given, nothing to do"),
        }
    }
}
