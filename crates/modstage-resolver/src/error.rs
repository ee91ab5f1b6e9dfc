use modstage_core::VersionRange;
use semver::Version;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    CircularDependency,
    VersionMismatch,
    DeletionConflict,
    MissingDependency,
    DependencyInstallFailure,
    DependencyRemoveFailure,
    DuplicateItem,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("circular dependency on module '{item}': {}", .cycle.join(" -> "))]
    CircularDependency {
        item: String,
        cycle: Vec<String>,
        removal: bool,
    },

    #[error("module '{item}' requires '{dependency}' in {range}, found {found}")]
    VersionMismatch {
        item: String,
        dependency: String,
        found: Version,
        range: VersionRange,
    },

    #[error("module '{item}' cannot be removed: '{dependent}' depends on it")]
    DeletionConflict { item: String, dependent: String },

    #[error("module '{item}' needs missing module(s): {}", .missing.join(", "))]
    MissingDependency { item: String, missing: Vec<String> },

    #[error("module '{item}' cannot be installed: its dependency '{dependency}' is in error")]
    DependencyInstallFailure { item: String, dependency: String },

    #[error("module '{item}' cannot be removed: its dependent '{dependent}' is in error")]
    DependencyRemoveFailure { item: String, dependent: String },

    #[error("module '{name}' is listed more than once")]
    DuplicateItem { name: String },
}

impl ResolveError {
    pub fn kind(&self) -> ConflictKind {
        match self {
            Self::CircularDependency { .. } => ConflictKind::CircularDependency,
            Self::VersionMismatch { .. } => ConflictKind::VersionMismatch,
            Self::DeletionConflict { .. } => ConflictKind::DeletionConflict,
            Self::MissingDependency { .. } => ConflictKind::MissingDependency,
            Self::DependencyInstallFailure { .. } => ConflictKind::DependencyInstallFailure,
            Self::DependencyRemoveFailure { .. } => ConflictKind::DependencyRemoveFailure,
            Self::DuplicateItem { .. } => ConflictKind::DuplicateItem,
        }
    }

    /// Stable numeric code for reporters and exit statuses.
    pub fn code(&self) -> u32 {
        match self {
            Self::CircularDependency { removal: false, .. } => 1,
            Self::VersionMismatch { .. } => 2,
            Self::DeletionConflict { .. } => 3,
            Self::CircularDependency { removal: true, .. } => 4,
            Self::DependencyInstallFailure { .. } | Self::DependencyRemoveFailure { .. } => 5,
            Self::MissingDependency { .. } => 6,
            Self::DuplicateItem { .. } => 7,
        }
    }

    /// Name of the module the conflict is reported against.
    pub fn item(&self) -> &str {
        match self {
            Self::CircularDependency { item, .. }
            | Self::VersionMismatch { item, .. }
            | Self::DeletionConflict { item, .. }
            | Self::MissingDependency { item, .. }
            | Self::DependencyInstallFailure { item, .. }
            | Self::DependencyRemoveFailure { item, .. } => item,
            Self::DuplicateItem { name } => name,
        }
    }
}
