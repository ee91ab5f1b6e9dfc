mod config;
mod manifest;
mod project;
mod version;

pub use config::{EntryPointConfig, ModuleBinding};
pub use manifest::{DependencyKind, DependencySpec, HookCommands, ModuleManifest, UpgraderSpec};
pub use project::{EntryPointDecl, EntryPointKind, ProjectManifest};
pub use version::{parse_module_version, VersionRange};
