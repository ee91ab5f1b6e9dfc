use std::collections::{HashMap, VecDeque};

use semver::Version;

use crate::error::ResolveError;
use crate::order::chain_order;
use crate::types::{Action, ChainEntry, ResolutionChain, ResolverItem};

/// Dependency resolver for the modules of one entry point.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    items: Vec<ResolverItem>,
    index: HashMap<String, usize>,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&mut self, item: ResolverItem) -> Result<(), ResolveError> {
        if self.index.contains_key(&item.name) {
            return Err(ResolveError::DuplicateItem { name: item.name });
        }
        self.index.insert(item.name.clone(), self.items.len());
        self.items.push(item);
        Ok(())
    }

    pub fn items(&self) -> &[ResolverItem] {
        &self.items
    }

    pub fn item(&self, name: &str) -> Option<&ResolverItem> {
        self.index.get(name).map(|&idx| &self.items[idx])
    }

    /// Computes the execution chain.
    ///
    /// Uninstalled dependencies of modules being set up are pulled in as
    /// installs. Fails on the first conflict found, in presentation order.
    pub fn resolve(&self) -> Result<ResolutionChain, ResolveError> {
        let mut actions: Vec<Action> = self
            .items
            .iter()
            .map(|item| match item.action {
                Action::Remove if !item.installed => Action::None,
                action => action,
            })
            .collect();

        let mut queue: VecDeque<usize> = (0..self.items.len())
            .filter(|&idx| actions[idx].is_setup())
            .collect();
        let mut checked = vec![false; self.items.len()];
        while let Some(idx) = queue.pop_front() {
            if checked[idx] {
                continue;
            }
            checked[idx] = true;
            self.check_setup_dependencies(idx, &mut actions, &mut queue)?;
        }

        for idx in 0..self.items.len() {
            if actions[idx] == Action::Remove {
                self.check_removal(idx, &actions)?;
            }
        }

        let order = chain_order(&self.items, &actions, &self.index)?;
        Ok(ResolutionChain {
            entries: order
                .into_iter()
                .map(|idx| ChainEntry {
                    name: self.items[idx].name.clone(),
                    action: actions[idx],
                })
                .collect(),
        })
    }

    fn check_setup_dependencies(
        &self,
        idx: usize,
        actions: &mut [Action],
        queue: &mut VecDeque<usize>,
    ) -> Result<(), ResolveError> {
        let item = &self.items[idx];

        let missing = item
            .dependencies
            .iter()
            .filter(|dependency| !self.index.contains_key(&dependency.name))
            .map(|dependency| dependency.name.clone())
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(ResolveError::MissingDependency {
                item: item.name.clone(),
                missing,
            });
        }

        for dependency in &item.dependencies {
            let dep_idx = self.index[&dependency.name];
            let target = &self.items[dep_idx];

            if target.in_error.is_some() {
                return Err(ResolveError::DependencyInstallFailure {
                    item: item.name.clone(),
                    dependency: target.name.clone(),
                });
            }

            match actions[dep_idx] {
                Action::Remove => {
                    return Err(ResolveError::DeletionConflict {
                        item: target.name.clone(),
                        dependent: item.name.clone(),
                    });
                }
                Action::None if !target.installed => {
                    actions[dep_idx] = Action::Install;
                    queue.push_back(dep_idx);
                }
                _ => {}
            }

            let found = effective_version(target, actions[dep_idx]);
            if !dependency.range.contains(found) {
                return Err(ResolveError::VersionMismatch {
                    item: item.name.clone(),
                    dependency: target.name.clone(),
                    found: found.clone(),
                    range: dependency.range.clone(),
                });
            }
        }

        Ok(())
    }

    fn check_removal(&self, idx: usize, actions: &[Action]) -> Result<(), ResolveError> {
        let removed = &self.items[idx];
        for (other_idx, other) in self.items.iter().enumerate() {
            if other_idx == idx || !other.depends_on(&removed.name) {
                continue;
            }
            match actions[other_idx] {
                Action::Remove if other.in_error.is_some() => {
                    return Err(ResolveError::DependencyRemoveFailure {
                        item: removed.name.clone(),
                        dependent: other.name.clone(),
                    });
                }
                Action::Remove => {}
                Action::None if !other.installed => {}
                _ => {
                    return Err(ResolveError::DeletionConflict {
                        item: removed.name.clone(),
                        dependent: other.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Version a dependency will have once the chain has run.
fn effective_version(item: &ResolverItem, action: Action) -> &Version {
    match action {
        Action::Install | Action::Upgrade => &item.source_version,
        _ => item.current_version.as_ref().unwrap_or(&item.source_version),
    }
}
