use std::fmt;

use modstage_core::VersionRange;
use semver::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    None,
    Install,
    Upgrade,
    Remove,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Install => "install",
            Self::Upgrade => "upgrade",
            Self::Remove => "remove",
        }
    }

    pub(crate) fn is_setup(self) -> bool {
        matches!(self, Self::Install | Self::Upgrade)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error state left on a module by a previous failed resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemErrorCode {
    MissingDependencies = 1,
    CircularDependency = 2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub range: VersionRange,
}

/// One module as seen by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverItem {
    pub name: String,
    pub installed: bool,
    pub current_version: Option<Version>,
    pub source_version: Version,
    pub dependencies: Vec<Dependency>,
    pub action: Action,
    pub in_error: Option<ItemErrorCode>,
}

impl ResolverItem {
    pub fn new(name: impl Into<String>, source_version: Version) -> Self {
        Self {
            name: name.into(),
            installed: false,
            current_version: None,
            source_version,
            dependencies: Vec::new(),
            action: Action::None,
            in_error: None,
        }
    }

    pub fn installed_at(mut self, version: Version) -> Self {
        self.installed = true;
        self.current_version = Some(version);
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>, range: VersionRange) -> Self {
        self.dependencies.push(Dependency {
            name: name.into(),
            range,
        });
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    pub fn with_error(mut self, code: ItemErrorCode) -> Self {
        self.in_error = Some(code);
        self
    }

    /// Computes the action from installed state: an installed module older
    /// than its source is upgraded, an enabled module not yet installed is
    /// installed, anything else is left alone.
    pub fn derive_action(mut self, enabled: bool) -> Self {
        self.action = match (&self.current_version, self.installed) {
            (Some(current), true) if *current < self.source_version => Action::Upgrade,
            (None, true) => Action::Upgrade,
            (_, true) => Action::None,
            (_, false) if enabled => Action::Install,
            (_, false) => Action::None,
        };
        self
    }

    pub(crate) fn depends_on(&self, name: &str) -> bool {
        self.dependencies.iter().any(|dependency| dependency.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEntry {
    pub name: String,
    pub action: Action,
}

/// Modules to process for one entry point, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionChain {
    pub entries: Vec<ChainEntry>,
}

impl ResolutionChain {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChainEntry> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    pub fn action_of(&self, name: &str) -> Option<Action> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.action)
    }
}
