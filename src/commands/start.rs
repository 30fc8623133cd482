//! Start a history edit and drive the plan to completion.
//!
//! The shared action loop lives here too: `--continue` re-enters it after
//! bootstrapping the suspended step. State is persisted *before* each
//! action, so a crash or suspension at any point leaves a resumable state
//! file behind.

use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::actions::{run_action, ActionCtx};
use crate::config::Config;
use crate::editor::MessageEditor;
use crate::errors::EditError;
use crate::lock::Lock;
use crate::node::Node;
use crate::plan;
use crate::repo::{Repo, UNDO_FILE};
use crate::replace::{move_bookmarks, process_replacements};
use crate::state::{EditState, LAST_EDIT_FILE};
use crate::ui;

/// How long lock acquisition waits for another process, in seconds.
pub const LOCK_TIMEOUT: i64 = 600;

/// Overlay patch queues mark their applied patches here; rewriting history
/// underneath them corrupts their state.
const PATCHES_FILE: &str = "patches-applied";

/// Options for starting an edit.
pub struct EditOpts {
    /// Parent revision, or the peer destination with `outgoing`.
    pub parent: Option<String>,
    /// Read the plan from this file instead of the editor.
    pub commands: Option<PathBuf>,
    /// Retain the original commits after the edit.
    pub keep: bool,
    /// Derive the parent from the first commit missing at the push target.
    pub outgoing: bool,
    /// With `outgoing`, allow an unrelated peer.
    pub force: bool,
}

/// Start a new edit. Returns the process exit code.
pub fn run(
    repo: &mut dyn Repo,
    config: &Config,
    editor: &dyn MessageEditor,
    opts: &EditOpts,
) -> Result<i32> {
    let meta = repo.meta_dir();
    if meta.join(PATCHES_FILE).exists() {
        return Err(EditError::PatchesApplied.into());
    }
    if opts.force && !opts.outgoing {
        bail!("--force only allowed with --outgoing");
    }

    let _wlock = Lock::acquire(&meta, "wlock", LOCK_TIMEOUT)?;
    let outcome = start_edit(repo, config, editor, opts);
    // suspension exits through here as well: everything the run created so
    // far must land on disk
    repo.save()?;
    outcome
}

fn start_edit(
    repo: &mut dyn Repo,
    config: &Config,
    editor: &dyn MessageEditor,
    opts: &EditOpts,
) -> Result<i32> {
    let meta = repo.meta_dir();
    if EditState::exists(&meta) {
        return Err(EditError::AlreadyInProgress.into());
    }
    if !repo.status()?.is_clean() {
        bail!("uncommitted changes in working directory");
    }
    let Some(topmost) = repo.wc_parents().0 else {
        ui::warning("nothing to edit");
        return Ok(1);
    };

    let parent: Option<Node> = if opts.outgoing {
        let Some(dest) = opts.parent.clone().or_else(|| config.paths.default_push.clone()) else {
            bail!("no destination configured for --outgoing (set paths.default_push)");
        };
        ui::status(&format!("comparing with {}", dest));
        let missing = repo.outgoing(Path::new(&dest), opts.force)?;
        match missing.first() {
            None => {
                ui::warning("nothing to edit");
                return Ok(1);
            }
            Some(first) => repo.commit_info(first)?.p1,
        }
    } else {
        match &opts.parent {
            None => bail!("a parent revision is required"),
            Some(spec) => Some(repo.lookup(spec)?),
        }
    };

    let range = between(repo, parent.as_ref(), &topmost, opts.keep)?;
    if range.is_empty() {
        ui::warning("nothing to edit");
        return Ok(1);
    }

    let text = match &opts.commands {
        Some(file) => fs::read_to_string(file)
            .with_context(|| format!("Failed to read plan from {:?}", file))?,
        None => {
            let mut default = plan::default_plan(repo, &range)?;
            default.push_str("\n\n");
            default.push_str(&plan::edit_comment(&range[0], &topmost));
            let text = editor.edit(&default)?;
            // keep a copy in case the user needs to ask for help after
            // something surprising happens
            fs::write(meta.join(LAST_EDIT_FILE), &text)?;
            text
        }
    };
    let rules = plan::parse(&text)?;
    let steps = plan::verify(&rules, repo, &range)?;

    drive(
        repo,
        config,
        editor,
        EditState {
            parent,
            plan: steps,
            keep: opts.keep,
            topmost,
            replacements: Vec::new(),
        },
    )
}

/// Select and validate the commits to edit: the linear run from the child
/// of `parent` up to `topmost`.
pub fn between(
    repo: &dyn Repo,
    parent: Option<&Node>,
    topmost: &Node,
    keep: bool,
) -> Result<Vec<Node>> {
    let mut range = Vec::new();
    let mut cursor = Some(*topmost);
    loop {
        match (cursor, parent) {
            (Some(c), Some(p)) if c == *p => break,
            (None, None) => break,
            (None, Some(p)) => bail!(
                "{} is not an ancestor of the working directory",
                p.short()
            ),
            (Some(c), _) => {
                let info = repo.commit_info(&c)?;
                if info.p2.is_some() {
                    bail!("cannot edit history containing merges");
                }
                range.push(c);
                cursor = info.p1;
            }
        }
    }
    range.reverse();
    if range.is_empty() {
        return Ok(range);
    }

    if !keep {
        // rewriting a commit with descendants outside the range would
        // orphan them
        for node in &range {
            for child in repo.children(node)? {
                if !range.contains(&child) {
                    return Err(EditError::OrphanedNodes.into());
                }
            }
        }
    }
    // phases are monotonic: a mutable root means a mutable range
    let root = range[0];
    if !repo.is_mutable(&root)? {
        return Err(EditError::ImmutableRevision(root).into());
    }
    Ok(range)
}

/// The action loop plus completion. Shared by start and continue.
pub fn drive(
    repo: &mut dyn Repo,
    config: &Config,
    editor: &dyn MessageEditor,
    mut state: EditState,
) -> Result<i32> {
    let meta = repo.meta_dir();
    let actx = ActionCtx {
        editor,
        username: config.username(),
    };

    while !state.plan.is_empty() {
        state.write(&meta)?;
        let step = state.plan.remove(0);
        ui::step(&format!("{} {}", step.action.name(), step.node.short()));
        let (parent, replacements) = {
            let _store_lock = Lock::acquire(&meta, "lock", LOCK_TIMEOUT)?;
            run_action(repo, &actx, state.parent, &step)?
        };
        state.parent = parent;
        state.replacements.extend(replacements);
    }

    repo.update(state.parent.as_ref())?;

    let reduction = process_replacements(repo, &state.replacements)?;
    for (precursor, successors) in &reduction.mapping {
        match successors.first() {
            None => ui::debug(&format!("histedit: {} is dropped", precursor.short())),
            Some(first) => {
                ui::debug(&format!(
                    "histedit: {} is replaced by {}",
                    precursor.short(),
                    first.short()
                ));
                for succ in &successors[1..] {
                    ui::debug(&format!(
                        "histedit:                            {}",
                        succ.short()
                    ));
                }
            }
        }
    }

    if !state.keep {
        if !reduction.mapping.is_empty() {
            let _store_lock = Lock::acquire(&meta, "lock", LOCK_TIMEOUT)?;
            move_bookmarks(
                repo,
                &reduction.mapping,
                &state.topmost,
                reduction.newtopmost.as_ref(),
            )?;
        }
        if repo.markers_enabled() {
            // markers are recorded in ascending precursor-revision order
            let mut markers: Vec<(u64, Node, Vec<Node>)> = Vec::new();
            for (precursor, successors) in &reduction.mapping {
                markers.push((repo.rev(precursor)?, *precursor, successors.clone()));
            }
            markers.sort();
            let markers: Vec<(Node, Vec<Node>)> =
                markers.into_iter().map(|(_, p, s)| (p, s)).collect();
            if !markers.is_empty() {
                let _store_lock = Lock::acquire(&meta, "lock", LOCK_TIMEOUT)?;
                repo.create_markers(&markers)?;
            }
        } else {
            let replaced: Vec<Node> = reduction.mapping.keys().copied().collect();
            cleanup_nodes(repo, "replaced", replaced)?;
        }
    }

    cleanup_nodes(repo, "temp", reduction.tmpnodes.clone())?;
    EditState::clear(&meta)?;
    let undo = meta.join(UNDO_FILE);
    if undo.exists() {
        fs::remove_file(&undo)?;
    }
    ui::success_bold("history edit complete");
    Ok(0)
}

/// Strip a group of commits from the repository. The set may contain
/// commits that no longer exist.
pub fn cleanup_nodes(repo: &mut dyn Repo, name: &str, nodes: Vec<Node>) -> Result<()> {
    if nodes.is_empty() {
        return Ok(());
    }
    ui::debug(&format!(
        "should strip {} nodes {}",
        name,
        nodes
            .iter()
            .map(|n| n.short())
            .collect::<Vec<_>>()
            .join(", ")
    ));

    let meta = repo.meta_dir();
    let _store_lock = Lock::acquire(&meta, "lock", LOCK_TIMEOUT)?;

    let known: BTreeSet<Node> = nodes.into_iter().filter(|n| repo.contains(n)).collect();

    // strip each subgraph at its root; stripping a root may take other
    // roots' subgraphs with it, hence the contains re-check
    let mut roots: Vec<(u64, Node)> = Vec::new();
    for node in &known {
        let info = repo.commit_info(node)?;
        let parent_inside = info.p1.map(|p| known.contains(&p)).unwrap_or(false)
            || info.p2.map(|p| known.contains(&p)).unwrap_or(false);
        if !parent_inside {
            roots.push((repo.rev(node)?, *node));
        }
    }
    // root-first order
    roots.sort();
    for (_, root) in roots {
        if repo.contains(&root) {
            repo.strip(&root)?;
        }
    }
    Ok(())
}
