//! Repository access for the edit engine.
//!
//! The engine never talks to a concrete store directly: everything goes
//! through the [`Repo`] trait, which captures the contract the engine needs
//! from its host repository (changelog queries, working-copy manipulation,
//! commit synthesis, bookmarks, strip, and obsolescence markers).
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │  engine (plan / actions / collapse / replace)  │
//! │                                                │
//! │        ┌────────────────────────────┐          │
//! │        │        &mut dyn Repo       │          │
//! │        └────────────────────────────┘          │
//! └────────────────────────────────────────────────┘
//!                       │
//!                       ▼
//!              ┌─────────────────┐
//!              │     MemRepo     │
//!              │ (reference      │
//!              │  backend, .hx/) │
//!              └─────────────────┘
//! ```
//!
//! `MemRepo` is the reference backend: a content-addressed store with a real
//! working directory, good enough to drive the engine end-to-end and to back
//! the test suite. Alternative backends implement the same trait.

mod memory;

pub use memory::MemRepo;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::node::Node;

/// Name of the repository metadata directory.
pub const META_DIR: &str = ".hx";

/// Journal written by `strip` under the metadata directory; removed when an
/// edit completes.
pub const UNDO_FILE: &str = "undo.json";

/// Commit timestamp: seconds since the epoch plus a fixed UTC offset.
/// Ordering compares seconds first, so `max` picks the later wall-clock
/// moment regardless of timezone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    pub secs: i64,
    pub offset: i32,
}

impl Timestamp {
    pub fn now() -> Self {
        let now = chrono::Local::now();
        Self {
            secs: now.timestamp(),
            offset: now.offset().local_minus_utc(),
        }
    }
}

/// One file in a commit manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub data: Vec<u8>,
    #[serde(default)]
    pub exec: bool,
    #[serde(default)]
    pub link: bool,
    /// Rename/copy source recorded when the file was committed.
    #[serde(default)]
    pub copied: Option<String>,
}

impl FileEntry {
    pub fn flags(&self) -> (bool, bool) {
        (self.exec, self.link)
    }
}

/// Mapping path → file entry for one commit.
pub type Manifest = BTreeMap<String, FileEntry>;

/// Immutable commit metadata. Parents are `None` at the repository root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub node: Node,
    pub p1: Option<Node>,
    pub p2: Option<Node>,
    pub user: String,
    pub date: Timestamp,
    pub description: String,
    pub extra: BTreeMap<String, String>,
    /// Paths touched relative to p1.
    pub files: Vec<String>,
}

/// Options for committing the working copy.
#[derive(Clone, Debug)]
pub struct CommitOpts {
    pub text: String,
    pub user: String,
    pub date: Timestamp,
    pub extra: BTreeMap<String, String>,
}

/// A file handed to `commit_mem`. `entry: None` marks the path as absent
/// from the synthesized commit.
#[derive(Clone, Debug)]
pub struct MemFile {
    pub path: String,
    pub entry: Option<FileEntry>,
}

/// Working copy status relative to its first parent.
#[derive(Clone, Debug, Default)]
pub struct Status {
    pub modified: Vec<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl Status {
    pub fn is_clean(&self) -> bool {
        self.modified.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }
}

/// Counters reported by a merge update.
#[derive(Clone, Copy, Debug, Default)]
pub struct MergeStats {
    pub updated: usize,
    pub merged: usize,
    pub removed: usize,
    pub deleted: usize,
    /// Files left with conflicts the user must resolve.
    pub unresolved: usize,
}

/// The repository contract consumed by the engine.
///
/// Methods that change the store or the working directory take `&mut self`;
/// the engine is single-threaded and serializes every mutation behind the
/// advisory locks.
pub trait Repo {
    /// Working directory root.
    fn root(&self) -> &Path;

    /// Metadata directory (`<root>/.hx`). Locks, the edit state file, and
    /// the plan backup live here.
    fn meta_dir(&self) -> PathBuf;

    // ── changelog ────────────────────────────────────────────────

    /// Revision number of a commit (its position in the changelog).
    fn rev(&self, node: &Node) -> Result<u64>;

    fn contains(&self, node: &Node) -> bool;

    /// Resolve a user-supplied revision: full hex, unique hex prefix, or
    /// bookmark name.
    fn lookup(&self, spec: &str) -> Result<Node>;

    fn commit_info(&self, node: &Node) -> Result<Commit>;

    fn manifest(&self, node: &Node) -> Result<Manifest>;

    fn children(&self, node: &Node) -> Result<Vec<Node>>;

    /// False once a commit is published.
    fn is_mutable(&self, node: &Node) -> Result<bool>;

    // ── dirstate / working copy ──────────────────────────────────

    fn wc_parents(&self) -> (Option<Node>, Option<Node>);

    fn set_wc_parents(&mut self, p1: Option<Node>, p2: Option<Node>) -> Result<()>;

    fn status(&self) -> Result<Status>;

    /// Clean checkout: make the working directory match `target` exactly.
    /// `None` empties it (the null revision).
    fn update(&mut self, target: Option<&Node>) -> Result<()>;

    /// Three-way merge of `target` onto the working directory against an
    /// explicit ancestor. Leaves conflict markers in unresolved files and
    /// does not touch the dirstate parents; the caller owns that
    /// bookkeeping.
    fn merge_update(&mut self, target: &Node, ancestor: Option<&Node>) -> Result<MergeStats>;

    /// Overwrite the working directory with `target`'s content without
    /// changing the dirstate parents (an in-place apply).
    fn revert_to(&mut self, target: &Node) -> Result<()>;

    /// Carry `target`'s recorded rename/copy metadata into the dirstate so
    /// the next commit preserves it.
    fn duplicate_copies(&mut self, target: &Node) -> Result<()>;

    /// Copy tracing between two commits: destination → source, with
    /// round-trip renames (a → b → a) eliminated.
    fn pathcopies(&self, a: &Node, b: &Node) -> Result<BTreeMap<String, String>>;

    // ── commit synthesis ─────────────────────────────────────────

    /// Commit the working directory. Returns `None` when there is nothing
    /// to commit.
    fn commit_wc(&mut self, opts: &CommitOpts) -> Result<Option<Node>>;

    /// Synthesize a commit from an explicit file list without touching the
    /// working directory.
    fn commit_mem(
        &mut self,
        parents: (Option<Node>, Option<Node>),
        text: &str,
        files: Vec<MemFile>,
        user: &str,
        date: Timestamp,
        extra: &BTreeMap<String, String>,
    ) -> Result<Node>;

    // ── bookmarks ────────────────────────────────────────────────

    fn bookmarks(&self) -> Vec<(String, Node)>;

    fn set_bookmark(&mut self, name: &str, node: &Node) -> Result<()>;

    /// Persist pending bookmark changes.
    fn write_bookmarks(&mut self) -> Result<()>;

    // ── destructive operations ───────────────────────────────────

    /// Irreversibly remove a commit and all its descendants, journaling
    /// them to the undo file first.
    fn strip(&mut self, node: &Node) -> Result<()>;

    /// Whether rewrites should leave obsolescence markers instead of
    /// stripping the superseded commits.
    fn markers_enabled(&self) -> bool;

    /// Record precursor → successors markers. An empty successor list marks
    /// a drop.
    fn create_markers(&mut self, markers: &[(Node, Vec<Node>)]) -> Result<()>;

    // ── discovery ────────────────────────────────────────────────

    /// Commits present locally but missing from the peer repository at
    /// `peer`, in revision order. Errors on an unrelated peer unless
    /// `force`.
    fn outgoing(&self, peer: &Path, force: bool) -> Result<Vec<Node>>;

    // ── persistence ──────────────────────────────────────────────

    /// Flush store and dirstate to disk.
    fn save(&mut self) -> Result<()>;
}

/// Find the repository root by walking up from the current directory.
pub fn find_root() -> Result<PathBuf> {
    let current_dir = std::env::current_dir()?;
    let mut dir = current_dir.as_path();

    loop {
        if dir.join(META_DIR).is_dir() {
            return Ok(dir.to_path_buf());
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => anyhow::bail!("no repository found (.hx not found from {:?})", current_dir),
        }
    }
}
