//! Typed failure kinds for the edit engine.
//!
//! Commands use `anyhow` for plumbing; the kinds below are the ones callers
//! need to tell apart. Chief among them is suspension (`Unresolved`,
//! `EditStopped`), which is not a failure at all but an instruction to exit
//! with state on disk; "nothing to edit" maps to exit code 1.

use thiserror::Error;

use crate::node::Node;

#[derive(Debug, Error)]
pub enum EditError {
    /// A merge left unresolved files; state is persisted.
    #[error("fix up the change and run 'hx --continue'")]
    Unresolved,

    /// An `edit` step applied its delta and now waits for the user.
    #[error(
        "make changes as needed, you may commit as needed now\n\
         when you are finished, run 'hx --continue' to resume"
    )]
    EditStopped,

    /// The requested range is empty.
    #[error("nothing to edit")]
    NothingToEdit,

    /// Rewriting the range would orphan commits outside it.
    #[error("cannot edit history that would orphan nodes")]
    OrphanedNodes,

    /// The root of the range is published.
    #[error("cannot edit immutable changeset: {0}")]
    ImmutableRevision(Node),

    /// A state file already exists at start.
    #[error("history edit already in progress, try --continue or --abort")]
    AlreadyInProgress,

    /// An overlay patch queue is active.
    #[error("source has overlay patches applied")]
    PatchesApplied,

    /// The plan failed to parse or verify.
    #[error("{0}")]
    MalformedPlan(String),

    /// On continue, the working copy parent is not a descendant of the
    /// recorded parent.
    #[error(
        "working directory parent is not a descendant of {0}\n\
         (update to {0} or descendant and run 'hx --continue' again)"
    )]
    NonDescendantContinue(Node),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NODE_LEN};

    #[test]
    fn test_messages_carry_recovery_hints() {
        assert!(EditError::Unresolved.to_string().contains("--continue"));
        assert!(EditError::AlreadyInProgress.to_string().contains("--abort"));
        let node = Node::from_bytes([0; NODE_LEN]);
        assert!(EditError::NonDescendantContinue(node)
            .to_string()
            .contains("descendant"));
    }
}
