//! Resume a suspended history edit.
//!
//! The state file still carries the suspended step at the head of the plan.
//! Whatever the user did since (resolved conflicts, amended files, made
//! commits of their own) is folded back into the run: new commits become
//! the suspended step's successors, a dirty working copy is committed with
//! the step's message, and for fold the intermediates feed the combine.
//! Then the ordinary action loop takes over.

use anyhow::{bail, Result};

use crate::actions::{finish_fold, ActionCtx};
use crate::config::Config;
use crate::editor::MessageEditor;
use crate::errors::EditError;
use crate::lock::Lock;
use crate::node::Node;
use crate::plan::Action;
use crate::repo::{CommitOpts, Repo};
use crate::replace::Replacement;
use crate::state::EditState;
use crate::ui;

use super::start::{drive, LOCK_TIMEOUT};

/// Continue a suspended edit. Returns the process exit code.
pub fn run(repo: &mut dyn Repo, config: &Config, editor: &dyn MessageEditor) -> Result<i32> {
    let meta = repo.meta_dir();
    let _wlock = Lock::acquire(&meta, "wlock", LOCK_TIMEOUT)?;
    let outcome = continue_edit(repo, config, editor);
    repo.save()?;
    outcome
}

fn continue_edit(
    repo: &mut dyn Repo,
    config: &Config,
    editor: &dyn MessageEditor,
) -> Result<i32> {
    let meta = repo.meta_dir();
    let Some(mut state) = EditState::read(&meta)? else {
        bail!("no history edit in progress");
    };
    let actx = ActionCtx {
        editor,
        username: config.username(),
    };

    let (parent, replacements) = bootstrap(repo, &actx, &mut state)?;
    state.parent = parent;
    state.replacements.extend(replacements);

    drive(repo, config, editor, state)
}

/// Absorb what the user did while the edit was suspended and finish the
/// suspended step.
fn bootstrap(
    repo: &mut dyn Repo,
    actx: &ActionCtx<'_>,
    state: &mut EditState,
) -> Result<(Option<Node>, Vec<Replacement>)> {
    if state.plan.is_empty() {
        bail!("edit state is corrupted: no suspended changeset");
    }
    let step = state.plan.remove(0);
    let ctx = repo.commit_info(&step.node)?;

    // commits the user created between the recorded parent and the working
    // copy; a working copy that wandered off is rejected before anything is
    // committed
    let mut newchildren = new_children(repo, state.parent.as_ref())?;

    // commit a dirty working copy as the outcome of the suspended step
    let mut new: Option<Node> = None;
    if !repo.status()?.is_clean() {
        let message = match step.action {
            Action::Fold => format!("fold-temp-revision {}", step.node.short()),
            _ => format!("{}\n", ctx.description),
        };
        let message = match step.action {
            Action::Edit | Action::Mess => actx.editor.edit(&message)?,
            _ => message,
        };
        new = repo.commit_wc(&CommitOpts {
            text: message,
            user: ctx.user.clone(),
            date: ctx.date,
            extra: ctx.extra.clone(),
        })?;
        if let Some(node) = new {
            // a conflicted pick or fold resumes here once the files are fixed
            if matches!(step.action, Action::Pick | Action::Fold) {
                ui::success(&format!("resolved conflicts in {}", step.node.short()));
            }
            newchildren.push(node);
        }
    }

    let mut replacements: Vec<Replacement> = Vec::new();
    if !newchildren.contains(&ctx.node) {
        // new children may be empty when the changeset was dropped, e.g. a
        // conflicting pick resolved by reverting to the parent
        replacements.push((ctx.node, newchildren.clone()));
    }

    if step.action == Action::Fold {
        // the last commit carries the folded delta; earlier ones are
        // internal intermediates
        let newnode = match new {
            Some(node) => {
                newchildren.pop();
                node
            }
            None => match newchildren.pop() {
                Some(node) => node,
                None => bail!("no changes found to fold"),
            },
        };
        let (parent, fold_repls) =
            finish_fold(repo, actx, state.parent, &ctx, newnode, &newchildren)?;
        replacements.extend(fold_repls);
        Ok((parent, replacements))
    } else if let Some(last) = newchildren.last() {
        Ok((Some(*last), replacements))
    } else {
        Ok((state.parent, replacements))
    }
}

/// Commits between the recorded parent and the working copy parent along
/// first parents, in ancestor order and excluding the parent itself.
fn new_children(repo: &dyn Repo, parent: Option<&Node>) -> Result<Vec<Node>> {
    let mut path = Vec::new();
    let mut cursor = repo.wc_parents().0;
    loop {
        match (cursor, parent) {
            (Some(c), Some(p)) if c == *p => break,
            (None, None) => break,
            (None, Some(p)) => return Err(EditError::NonDescendantContinue(*p).into()),
            (Some(c), _) => {
                path.push(c);
                cursor = repo.commit_info(&c)?.p1;
            }
        }
    }
    path.reverse();
    Ok(path)
}
