use std::collections::{BTreeSet, HashMap};

use crate::error::ResolveError;
use crate::types::{Action, ResolverItem};

/// Orders every item with an action so that dependencies are set up before
/// their dependents and dependents are removed before their dependencies.
///
/// Ready items are emitted in presentation order, which keeps the chain
/// reproducible between runs.
pub(crate) fn chain_order(
    items: &[ResolverItem],
    actions: &[Action],
    index: &HashMap<String, usize>,
) -> Result<Vec<usize>, ResolveError> {
    let active = |idx: usize| actions[idx] != Action::None;

    let mut preds: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); items.len()];
    let mut succs: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); items.len()];

    for (from, item) in items.iter().enumerate() {
        if !active(from) {
            continue;
        }
        for dependency in &item.dependencies {
            let Some(&to) = index.get(&dependency.name) else {
                continue;
            };
            if !active(to) {
                continue;
            }
            let (before, after) = match (actions[from], actions[to]) {
                (a, b) if a.is_setup() && b.is_setup() => (to, from),
                (Action::Remove, Action::Remove) => (from, to),
                _ => continue,
            };
            preds[after].insert(before);
            succs[before].insert(after);
        }
    }

    let mut in_degree: Vec<usize> = preds.iter().map(BTreeSet::len).collect();
    let mut ready: BTreeSet<usize> = (0..items.len())
        .filter(|&idx| active(idx) && in_degree[idx] == 0)
        .collect();
    let mut ordered = Vec::new();

    while let Some(next) = ready.pop_first() {
        ordered.push(next);
        for &child in &succs[next] {
            in_degree[child] = in_degree[child].saturating_sub(1);
            if in_degree[child] == 0 {
                ready.insert(child);
            }
        }
    }

    let active_count = (0..items.len()).filter(|&idx| active(idx)).count();
    if ordered.len() != active_count {
        let emitted: BTreeSet<usize> = ordered.iter().copied().collect();
        let leftover: BTreeSet<usize> = (0..items.len())
            .filter(|&idx| active(idx) && !emitted.contains(&idx))
            .collect();
        return Err(cycle_error(items, actions, &preds, &leftover));
    }

    Ok(ordered)
}

fn cycle_error(
    items: &[ResolverItem],
    actions: &[Action],
    preds: &[BTreeSet<usize>],
    leftover: &BTreeSet<usize>,
) -> ResolveError {
    // every leftover node still waits on another leftover node, so walking
    // predecessors from any of them must come back to a visited node
    let mut path: Vec<usize> = Vec::new();
    let mut position: HashMap<usize, usize> = HashMap::new();
    let mut current = leftover.first().copied();

    let mut cycle = Vec::new();
    while let Some(node) = current {
        if let Some(&start) = position.get(&node) {
            cycle = path[start..].to_vec();
            break;
        }
        position.insert(node, path.len());
        path.push(node);
        current = preds[node].iter().copied().find(|p| leftover.contains(p));
    }
    if cycle.is_empty() {
        cycle = leftover.iter().copied().collect();
    }

    let pivot = cycle
        .iter()
        .enumerate()
        .min_by_key(|(_, idx)| **idx)
        .map(|(pos, _)| pos)
        .unwrap_or(0);
    cycle.rotate_left(pivot);

    let item_idx = cycle[0];
    let mut names: Vec<String> = cycle.iter().map(|&idx| items[idx].name.clone()).collect();
    names.push(items[item_idx].name.clone());

    ResolveError::CircularDependency {
        item: items[item_idx].name.clone(),
        cycle: names,
        removal: actions[item_idx] == Action::Remove,
    }
}
