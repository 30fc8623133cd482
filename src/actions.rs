//! Action primitives.
//!
//! Each primitive receives the commit the new history currently ends at and
//! the original commit the plan step names, performs its rewrite, and
//! returns the new end of history plus the replacement entries it recorded.
//! The caller holds the locks and has already persisted the edit state, so
//! a primitive that needs the user simply returns the suspension error and
//! the process exits with everything on disk.

use anyhow::{bail, Result};

use crate::collapse::collapse;
use crate::editor::MessageEditor;
use crate::errors::EditError;
use crate::node::Node;
use crate::plan::{Action, Step};
use crate::repo::{Commit, CommitOpts, MergeStats, Repo};
use crate::replace::Replacement;
use crate::ui;

/// Ambient context threaded through the primitives.
pub struct ActionCtx<'a> {
    pub editor: &'a dyn MessageEditor,
    /// Identity used when a fold combines commits by different authors.
    pub username: String,
}

/// Outcome of one primitive: the commit the next action builds atop, plus
/// recorded replacements.
pub type ActionResult = (Option<Node>, Vec<Replacement>);

/// Dispatch one plan step.
pub fn run_action(
    repo: &mut dyn Repo,
    ctx: &ActionCtx<'_>,
    parent: Option<Node>,
    step: &Step,
) -> Result<ActionResult> {
    match step.action {
        Action::Pick => pick(repo, ctx, parent, &step.node),
        Action::Edit => edit(repo, ctx, parent, &step.node),
        Action::Fold => fold(repo, ctx, parent, &step.node),
        Action::Drop => drop_commit(repo, ctx, parent, &step.node),
        Action::Mess => message(repo, ctx, parent, &step.node),
    }
}

/// Merge `target`'s delta (only) into the current working directory.
///
/// When the target already sits on the working copy parent no merge is
/// needed; its content is applied in place. Otherwise the delta
/// `target.p1 → target` is three-way merged onto the working copy and the
/// dirstate is pinned back to the original parent, so the follow-up commit
/// captures the delta as a single-parent change. Rename metadata is carried
/// over either way.
fn apply_changes(repo: &mut dyn Repo, target: &Commit) -> Result<Option<MergeStats>> {
    let (wcpar, _) = repo.wc_parents();
    let stats = if target.p1 == wcpar {
        repo.revert_to(&target.node)?;
        None
    } else {
        let stats = repo.merge_update(&target.node, target.p1.as_ref())?;
        repo.set_wc_parents(wcpar, None)?;
        Some(stats)
    };
    repo.duplicate_copies(&target.node)?;
    Ok(stats)
}

fn has_conflicts(stats: &Option<MergeStats>) -> bool {
    stats.map(|s| s.unresolved > 0).unwrap_or(false)
}

fn commit_opts_from(target: &Commit, text: String) -> CommitOpts {
    CommitOpts {
        text,
        user: target.user.clone(),
        date: target.date,
        extra: target.extra.clone(),
    }
}

pub fn pick(
    repo: &mut dyn Repo,
    _ctx: &ActionCtx<'_>,
    parent: Option<Node>,
    target: &Node,
) -> Result<ActionResult> {
    let oldctx = repo.commit_info(target)?;
    if oldctx.p1 == parent {
        ui::debug(&format!("node {} unchanged", target.short()));
        return Ok((Some(*target), vec![]));
    }
    repo.update(parent.as_ref())?;
    let stats = apply_changes(repo, &oldctx)?;
    if has_conflicts(&stats) {
        return Err(EditError::Unresolved.into());
    }
    let opts = commit_opts_from(&oldctx, oldctx.description.clone());
    match repo.commit_wc(&opts)? {
        None => {
            ui::warning(&format!("{}: empty changeset", target.hex()));
            Ok((parent, vec![]))
        }
        Some(new) => Ok((Some(new), vec![(*target, vec![new])])),
    }
}

pub fn edit(
    repo: &mut dyn Repo,
    _ctx: &ActionCtx<'_>,
    parent: Option<Node>,
    target: &Node,
) -> Result<ActionResult> {
    let oldctx = repo.commit_info(target)?;
    repo.update(parent.as_ref())?;
    apply_changes(repo, &oldctx)?;
    // always hand control back to the user, conflicts or not
    Err(EditError::EditStopped.into())
}

pub fn fold(
    repo: &mut dyn Repo,
    ctx: &ActionCtx<'_>,
    parent: Option<Node>,
    target: &Node,
) -> Result<ActionResult> {
    let oldctx = repo.commit_info(target)?;
    repo.update(parent.as_ref())?;
    let stats = apply_changes(repo, &oldctx)?;
    if has_conflicts(&stats) {
        return Err(EditError::Unresolved.into());
    }
    let opts = commit_opts_from(&oldctx, format!("fold-temp-revision {}", target.short()));
    match repo.commit_wc(&opts)? {
        None => {
            ui::warning(&format!("{}: empty changeset", target.hex()));
            Ok((parent, vec![]))
        }
        Some(temp) => finish_fold(repo, ctx, parent, &oldctx, temp, &[]),
    }
}

/// Combine the commit chain `parent..newnode` with `oldctx`'s identity into
/// a single commit. `internal` lists extra commits the user made during a
/// suspended fold; their messages join the combined message and they are
/// recorded as precursors of the result.
pub fn finish_fold(
    repo: &mut dyn Repo,
    ctx: &ActionCtx<'_>,
    parent: Option<Node>,
    oldctx: &Commit,
    newnode: Node,
    internal: &[Node],
) -> Result<ActionResult> {
    let Some(parent_node) = parent else {
        bail!("cannot fold into the null revision");
    };
    let first = repo.commit_info(&parent_node)?;
    repo.update(first.p1.as_ref())?;

    let user = if first.user == oldctx.user {
        first.user.clone()
    } else {
        ctx.username.clone()
    };
    let mut parts = vec![first.description.clone()];
    for node in internal {
        parts.push(repo.commit_info(node)?.description);
    }
    parts.push(oldctx.description.clone());
    let opts = CommitOpts {
        text: parts.join("\n***\n"),
        user,
        date: first.date.max(oldctx.date),
        extra: first.extra.clone(),
    };

    let last = repo.commit_info(&newnode)?;
    match collapse(repo, &first, &last, &opts, ctx.editor)? {
        None => Ok((Some(parent_node), vec![])),
        Some(combined) => {
            repo.update(Some(&combined))?;
            let mut replacements = vec![
                (oldctx.node, vec![newnode]),
                (parent_node, vec![combined]),
                (newnode, vec![combined]),
            ];
            for node in internal {
                replacements.push((*node, vec![combined]));
            }
            Ok((Some(combined), replacements))
        }
    }
}

pub fn drop_commit(
    _repo: &mut dyn Repo,
    _ctx: &ActionCtx<'_>,
    parent: Option<Node>,
    target: &Node,
) -> Result<ActionResult> {
    Ok((parent, vec![(*target, vec![])]))
}

pub fn message(
    repo: &mut dyn Repo,
    ctx: &ActionCtx<'_>,
    parent: Option<Node>,
    target: &Node,
) -> Result<ActionResult> {
    let oldctx = repo.commit_info(target)?;
    repo.update(parent.as_ref())?;
    let stats = apply_changes(repo, &oldctx)?;
    if has_conflicts(&stats) {
        return Err(EditError::Unresolved.into());
    }
    let text = ctx.editor.edit(&format!("{}\n", oldctx.description))?;
    let opts = commit_opts_from(&oldctx, text);
    match repo.commit_wc(&opts)? {
        None => {
            ui::warning(&format!("{}: empty changeset", target.hex()));
            Ok((parent, vec![]))
        }
        // content addressing: an unchanged message resolves to the original
        // commit, so there is nothing to replace
        Some(new) if new == *target => Ok((Some(new), vec![])),
        Some(new) => Ok((Some(new), vec![(*target, vec![new])])),
    }
}
