//! Abort a suspended history edit.
//!
//! Puts the working copy back on the original topmost commit, strips every
//! commit the run created (temporary and final alike), and removes the
//! state file. The original commits were never touched, so nothing else
//! needs restoring.

use anyhow::{bail, Result};

use crate::lock::Lock;
use crate::repo::Repo;
use crate::replace::process_replacements;
use crate::state::EditState;
use crate::ui;

use super::start::{cleanup_nodes, LOCK_TIMEOUT};

/// Abort a suspended edit. Returns the process exit code.
pub fn run(repo: &mut dyn Repo) -> Result<i32> {
    let meta = repo.meta_dir();
    let _wlock = Lock::acquire(&meta, "wlock", LOCK_TIMEOUT)?;
    let outcome = abort_edit(repo);
    repo.save()?;
    outcome
}

fn abort_edit(repo: &mut dyn Repo) -> Result<i32> {
    let meta = repo.meta_dir();
    let Some(state) = EditState::read(&meta)? else {
        bail!("no history edit in progress");
    };

    let reduction = process_replacements(repo, &state.replacements)?;

    ui::debug(&format!(
        "restore wc to old parent {}",
        state.topmost.short()
    ));
    repo.update(Some(&state.topmost))?;

    cleanup_nodes(repo, "temp", reduction.tmpnodes)?;
    cleanup_nodes(repo, "new", reduction.new)?;

    EditState::clear(&meta)?;
    ui::error("history edit aborted");
    Ok(0)
}
