//! The replacement graph.
//!
//! Every action appends `(precursor, successors)` entries; a precursor with
//! no successors was dropped. Successors of one entry can themselves be
//! rewritten by a later entry (fold creates such intermediates), so at the
//! end of a run the raw list is reduced to a direct mapping from original
//! commits to the commits that finally replaced them. Bookmark migration
//! works off that reduced mapping.

use anyhow::{bail, Result};
use std::collections::{BTreeMap, BTreeSet};

use crate::node::Node;
use crate::repo::Repo;
use crate::ui;

/// One raw entry: precursor and its (possibly empty) successors.
pub type Replacement = (Node, Vec<Node>);

/// Result of reducing the raw replacement list.
pub struct Reduction {
    /// Original commit → final successors. Dropped commits map to an empty
    /// list. Intermediate temp commits do not appear as keys.
    pub mapping: BTreeMap<Node, Vec<Node>>,
    /// Commits that were created and then rewritten again, in revision
    /// order. They are internal and get stripped.
    pub tmpnodes: Vec<Node>,
    /// Commits created by the run that survive it, in revision order.
    pub new: Vec<Node>,
    /// Replacement for the old topmost commit, where bookmarks pointing at
    /// the old tip should land.
    pub newtopmost: Option<Node>,
}

/// Reduce the raw replacement list to the final mapping.
///
/// Successor sets are substituted through intermediates until only terminal
/// commits remain; the graph is acyclic, so the substitution reaches a
/// fixed point.
pub fn process_replacements(repo: &dyn Repo, replacements: &[Replacement]) -> Result<Reduction> {
    let mut allsuccs: BTreeSet<Node> = BTreeSet::new();
    let mut replaced: BTreeSet<Node> = BTreeSet::new();
    let mut fullmapping: BTreeMap<Node, BTreeSet<Node>> = BTreeMap::new();
    for (precursor, successors) in replacements {
        allsuccs.extend(successors.iter().copied());
        replaced.insert(*precursor);
        fullmapping
            .entry(*precursor)
            .or_default()
            .extend(successors.iter().copied());
    }
    let new_set: BTreeSet<Node> = allsuccs.difference(&replaced).copied().collect();
    let tmp_set: BTreeSet<Node> = allsuccs.intersection(&replaced).copied().collect();

    let mut toproceed: BTreeSet<Node> = fullmapping.keys().copied().collect();
    let mut finalized: BTreeMap<Node, BTreeSet<Node>> = BTreeMap::new();
    while !toproceed.is_empty() {
        let mut progressed = false;
        for x in toproceed.clone() {
            let mut succs = fullmapping.get(&x).cloned().unwrap_or_default();
            let mut blocked = false;
            for s in succs.clone() {
                if toproceed.contains(&s) {
                    // successor with unknown closure; try again next pass
                    blocked = true;
                    break;
                }
                if let Some(closure) = finalized.get(&s) {
                    succs.remove(&s);
                    succs.extend(closure.iter().copied());
                }
            }
            if blocked {
                fullmapping.insert(x, succs);
            } else {
                finalized.insert(x, succs);
                toproceed.remove(&x);
                progressed = true;
            }
        }
        if !progressed {
            bail!("replacement graph contains a cycle");
        }
    }

    // temp commits are internal; they never appear as keys
    for n in &tmp_set {
        finalized.remove(n);
    }

    let mut mapping: BTreeMap<Node, Vec<Node>> = BTreeMap::new();
    for (precursor, succs) in finalized {
        mapping.insert(precursor, sort_by_rev(repo, succs)?);
    }

    let tmpnodes = sort_by_rev(repo, tmp_set)?;
    let new = sort_by_rev(repo, new_set)?;

    let newtopmost = if let Some(top) = new.last() {
        Some(*top)
    } else if mapping.is_empty() {
        // nothing was rewritten at all
        None
    } else {
        // everything was dropped; the new topmost is the parent of the
        // lowest dropped commit
        let lowest = sort_by_rev(repo, mapping.keys().copied())?[0];
        repo.commit_info(&lowest)?.p1
    };

    Ok(Reduction {
        mapping,
        tmpnodes,
        new,
        newtopmost,
    })
}

fn sort_by_rev(repo: &dyn Repo, nodes: impl IntoIterator<Item = Node>) -> Result<Vec<Node>> {
    let mut keyed: Vec<(u64, Node)> = Vec::new();
    for node in nodes {
        keyed.push((repo.rev(&node)?, node));
    }
    keyed.sort();
    Ok(keyed.into_iter().map(|(_, n)| n).collect())
}

/// Move bookmarks off rewritten commits.
///
/// Bookmarks on the old topmost stay on the tip of the rewritten range.
/// A bookmark on a dropped commit walks parent-ward until it finds a commit
/// with surviving successors.
pub fn move_bookmarks(
    repo: &mut dyn Repo,
    mapping: &BTreeMap<Node, Vec<Node>>,
    oldtopmost: &Node,
    newtopmost: Option<&Node>,
) -> Result<()> {
    if mapping.is_empty() {
        return Ok(());
    }
    let mut moves: Vec<(String, Node)> = Vec::new();
    'bookmarks: for (mark, old) in repo.bookmarks() {
        if old == *oldtopmost {
            // keep bookmarks on the tip
            if let Some(top) = newtopmost {
                moves.push((mark, *top));
            }
            continue;
        }
        let mut base = old;
        let mut new = match mapping.get(&base) {
            None => continue,
            Some(succs) => succs.clone(),
        };
        while new.is_empty() {
            // base was dropped; try its parent
            match repo.commit_info(&base)?.p1 {
                Some(parent) => {
                    base = parent;
                    new = mapping.get(&base).cloned().unwrap_or_else(|| vec![base]);
                }
                None => continue 'bookmarks,
            }
        }
        if let Some(target) = new.last() {
            moves.push((mark, *target));
        }
    }

    if moves.is_empty() {
        return Ok(());
    }
    for (mark, new) in &moves {
        ui::debug(&format!(
            "histedit: moving bookmark {} to {}",
            mark,
            new.short()
        ));
        repo.set_bookmark(mark, new)?;
    }
    repo.write_bookmarks()
}
