//! Reference repository backend.
//!
//! A content-addressed commit store with a real working directory. Commits
//! are addressed by the SHA-256 (truncated to 20 bytes) of their canonical
//! encoding, so re-creating an identical commit yields the identical node;
//! the engine relies on this to detect no-op rewrites. Store and dirstate
//! are persisted as JSON snapshots under `.hx/`; the working directory is
//! the repository root itself.
//!
//! The merge here is deliberately simple: per-file three-way against an
//! explicit ancestor. Files changed on both sides get conflict markers and
//! land in the unresolved set.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use super::{
    Commit, CommitOpts, FileEntry, Manifest, MemFile, MergeStats, Repo, Status, Timestamp,
    META_DIR, UNDO_FILE,
};
use crate::config::Config;
use crate::node::{Node, NODE_LEN};

const STORE_FILE: &str = "store.json";
const DIRSTATE_FILE: &str = "dirstate.json";

/// Obsolescence marker: a rewrite recorded without deleting anything.
/// An empty successor list records a drop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Marker {
    pub precursor: Node,
    pub successors: Vec<Node>,
}

#[derive(Default, Serialize, Deserialize)]
struct Store {
    commits: BTreeMap<Node, Commit>,
    manifests: BTreeMap<Node, Manifest>,
    /// Nodes in revision order.
    changelog: Vec<Node>,
    /// Published (immutable) commits.
    public: BTreeSet<Node>,
    bookmarks: BTreeMap<String, Node>,
    markers: Vec<Marker>,
}

#[derive(Default, Serialize, Deserialize)]
struct Dirstate {
    p1: Option<Node>,
    p2: Option<Node>,
    #[serde(default)]
    unresolved: BTreeSet<String>,
    /// Pending rename metadata for the next commit: destination → source.
    #[serde(default)]
    copies: BTreeMap<String, String>,
}

/// Journal written by `strip` so a botched rewrite is recoverable by hand.
#[derive(Serialize, Deserialize)]
struct UndoJournal {
    stripped: Vec<(Commit, Manifest)>,
}

pub struct MemRepo {
    root: PathBuf,
    store: Store,
    dirstate: Dirstate,
    markers_enabled: bool,
}

impl MemRepo {
    /// Create a fresh repository at `root`.
    pub fn init(root: &Path) -> Result<Self> {
        let meta = root.join(META_DIR);
        if meta.exists() {
            bail!("repository already exists at {:?}", root);
        }
        fs::create_dir_all(&meta)?;
        let mut repo = Self {
            root: root.to_path_buf(),
            store: Store::default(),
            dirstate: Dirstate::default(),
            markers_enabled: false,
        };
        repo.save()?;
        Ok(repo)
    }

    /// Open an existing repository at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        let meta = root.join(META_DIR);
        let store_path = meta.join(STORE_FILE);
        let contents = fs::read_to_string(&store_path)
            .with_context(|| format!("no repository at {:?}", root))?;
        let store: Store = serde_json::from_str(&contents)
            .with_context(|| format!("store file is corrupted: {:?}", store_path))?;

        let dirstate = match fs::read_to_string(meta.join(DIRSTATE_FILE)) {
            Ok(text) => serde_json::from_str(&text).context("dirstate file is corrupted")?,
            Err(_) => Dirstate::default(),
        };

        let config = Config::load(&meta)?;
        Ok(Self {
            root: root.to_path_buf(),
            store,
            dirstate,
            markers_enabled: config.obsolescence,
        })
    }

    /// Toggle obsolescence markers (normally driven by config).
    pub fn set_markers_enabled(&mut self, enabled: bool) {
        self.markers_enabled = enabled;
    }

    /// Publish a commit and its ancestors, making them immutable.
    pub fn set_public(&mut self, node: &Node) {
        let mut queue = vec![*node];
        while let Some(n) = queue.pop() {
            if !self.store.public.insert(n) {
                continue;
            }
            if let Some(c) = self.store.commits.get(&n) {
                queue.extend(c.p1.iter().copied());
                queue.extend(c.p2.iter().copied());
            }
        }
    }

    /// Nodes in revision order.
    pub fn changelog(&self) -> &[Node] {
        &self.store.changelog
    }

    /// Recorded obsolescence markers.
    pub fn markers(&self) -> &[Marker] {
        &self.store.markers
    }

    /// Files still carrying merge conflicts.
    pub fn unresolved(&self) -> Vec<String> {
        self.dirstate.unresolved.iter().cloned().collect()
    }

    // ── working directory ────────────────────────────────────────

    /// Snapshot the on-disk working directory, skipping the metadata dir.
    fn walk_wdir(&self) -> Result<Manifest> {
        let mut manifest = Manifest::new();
        self.walk_dir(&self.root, "", &mut manifest)?;
        Ok(manifest)
    }

    fn walk_dir(&self, dir: &Path, prefix: &str, manifest: &mut Manifest) -> Result<()> {
        for entry in fs::read_dir(dir).with_context(|| format!("cannot read {:?}", dir))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if prefix.is_empty() && name == META_DIR {
                continue;
            }
            let rel = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };
            let path = entry.path();
            if path.is_dir() {
                self.walk_dir(&path, &rel, manifest)?;
            } else {
                let data = fs::read(&path)?;
                manifest.insert(
                    rel,
                    FileEntry {
                        data,
                        exec: is_executable(&path),
                        link: false,
                        copied: None,
                    },
                );
            }
        }
        Ok(())
    }

    fn write_file(&self, rel: &str, entry: &FileEntry) -> Result<()> {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &entry.data)?;
        set_executable(&path, entry.exec)?;
        Ok(())
    }

    fn remove_file(&self, rel: &str) -> Result<()> {
        let path = self.root.join(rel);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Make the working directory contain exactly `target`; files tracked
    /// in `old` but absent from `target` are removed.
    fn materialize(&self, old: &Manifest, target: &Manifest) -> Result<()> {
        for path in old.keys() {
            if !target.contains_key(path) {
                self.remove_file(path)?;
            }
        }
        for (path, entry) in target {
            self.write_file(path, entry)?;
        }
        Ok(())
    }

    fn manifest_or_empty(&self, node: Option<&Node>) -> Result<Manifest> {
        match node {
            Some(n) => self.manifest(n),
            None => Ok(Manifest::new()),
        }
    }

    // ── store internals ──────────────────────────────────────────

    fn commit_record(&self, node: &Node) -> Result<&Commit> {
        self.store
            .commits
            .get(node)
            .with_context(|| format!("unknown revision {}", node.short()))
    }

    fn add_commit(&mut self, mut commit: Commit, manifest: Manifest) -> Node {
        let node = hash_commit(&commit, &manifest);
        commit.node = node;
        if !self.store.commits.contains_key(&node) {
            self.store.commits.insert(node, commit);
            self.store.manifests.insert(node, manifest);
            self.store.changelog.push(node);
        }
        node
    }

    /// Commits strictly after `a` up to and including `b` along the first-
    /// parent chain, in ancestor order.
    fn linear_chain(&self, a: &Node, b: &Node) -> Result<Vec<Node>> {
        let mut chain = Vec::new();
        let mut cursor = *b;
        loop {
            if cursor == *a {
                chain.reverse();
                return Ok(chain);
            }
            chain.push(cursor);
            match self.commit_record(&cursor)?.p1 {
                Some(p) => cursor = p,
                None => bail!(
                    "{} is not an ancestor of {}",
                    a.short(),
                    b.short()
                ),
            }
        }
    }

    /// Nearest ancestor of `node` (following first parents) that survives
    /// outside `doomed`.
    fn surviving_ancestor(&self, node: &Node, doomed: &BTreeSet<Node>) -> Option<Node> {
        let mut cursor = *node;
        loop {
            match self.store.commits.get(&cursor).and_then(|c| c.p1) {
                Some(p) if doomed.contains(&p) => cursor = p,
                other => return other,
            }
        }
    }
}

impl Repo for MemRepo {
    fn root(&self) -> &Path {
        &self.root
    }

    fn meta_dir(&self) -> PathBuf {
        self.root.join(META_DIR)
    }

    fn rev(&self, node: &Node) -> Result<u64> {
        self.store
            .changelog
            .iter()
            .position(|n| n == node)
            .map(|i| i as u64)
            .with_context(|| format!("unknown revision {}", node.short()))
    }

    fn contains(&self, node: &Node) -> bool {
        self.store.commits.contains_key(node)
    }

    fn lookup(&self, spec: &str) -> Result<Node> {
        if let Some(node) = self.store.bookmarks.get(spec) {
            return Ok(*node);
        }
        if let Some(node) = Node::from_hex(spec) {
            if self.contains(&node) {
                return Ok(node);
            }
        }
        if spec.len() >= 2 && spec.chars().all(|c| c.is_ascii_hexdigit()) {
            let matches: Vec<Node> = self
                .store
                .changelog
                .iter()
                .filter(|n| n.hex().starts_with(spec))
                .copied()
                .collect();
            match matches.len() {
                1 => return Ok(matches[0]),
                0 => {}
                _ => bail!("ambiguous revision '{}'", spec),
            }
        }
        bail!("unknown revision '{}'", spec)
    }

    fn commit_info(&self, node: &Node) -> Result<Commit> {
        self.commit_record(node).cloned()
    }

    fn manifest(&self, node: &Node) -> Result<Manifest> {
        self.store
            .manifests
            .get(node)
            .cloned()
            .with_context(|| format!("unknown revision {}", node.short()))
    }

    fn children(&self, node: &Node) -> Result<Vec<Node>> {
        Ok(self
            .store
            .changelog
            .iter()
            .filter(|n| {
                self.store
                    .commits
                    .get(*n)
                    .map(|c| c.p1 == Some(*node) || c.p2 == Some(*node))
                    .unwrap_or(false)
            })
            .copied()
            .collect())
    }

    fn is_mutable(&self, node: &Node) -> Result<bool> {
        if !self.contains(node) {
            bail!("unknown revision {}", node.short());
        }
        Ok(!self.store.public.contains(node))
    }

    fn wc_parents(&self) -> (Option<Node>, Option<Node>) {
        (self.dirstate.p1, self.dirstate.p2)
    }

    fn set_wc_parents(&mut self, p1: Option<Node>, p2: Option<Node>) -> Result<()> {
        self.dirstate.p1 = p1;
        self.dirstate.p2 = p2;
        Ok(())
    }

    fn status(&self) -> Result<Status> {
        let tracked = self.manifest_or_empty(self.dirstate.p1.as_ref())?;
        let wdir = self.walk_wdir()?;
        let mut status = Status::default();

        for (path, entry) in &wdir {
            match tracked.get(path) {
                None => status.added.push(path.clone()),
                Some(t) if t.data != entry.data || t.exec != entry.exec => {
                    status.modified.push(path.clone())
                }
                Some(_) => {}
            }
        }
        for path in tracked.keys() {
            if !wdir.contains_key(path) {
                status.removed.push(path.clone());
            }
        }
        Ok(status)
    }

    fn update(&mut self, target: Option<&Node>) -> Result<()> {
        let old = self.walk_wdir()?;
        let new = self.manifest_or_empty(target)?;
        self.materialize(&old, &new)?;
        self.dirstate = Dirstate {
            p1: target.copied(),
            p2: None,
            unresolved: BTreeSet::new(),
            copies: BTreeMap::new(),
        };
        Ok(())
    }

    fn merge_update(&mut self, target: &Node, ancestor: Option<&Node>) -> Result<MergeStats> {
        let local = self.walk_wdir()?;
        let other = self.manifest(target)?;
        let base = self.manifest_or_empty(ancestor)?;

        let mut paths: BTreeSet<&String> = BTreeSet::new();
        paths.extend(local.keys());
        paths.extend(other.keys());
        paths.extend(base.keys());

        let mut stats = MergeStats::default();
        for path in paths {
            let l = local.get(path);
            let o = other.get(path);
            let b = base.get(path);

            if same_content(l, o) {
                continue;
            }
            if same_content(l, b) {
                // only the other side changed; take it
                match o {
                    Some(entry) => {
                        self.write_file(path, entry)?;
                        stats.updated += 1;
                    }
                    None => {
                        self.remove_file(path)?;
                        stats.removed += 1;
                    }
                }
            } else if same_content(o, b) {
                // only the local side changed; keep it
            } else {
                stats.unresolved += 1;
                self.dirstate.unresolved.insert(path.clone());
                match (l, o) {
                    (Some(l), Some(o)) => {
                        let marked = conflict_markers(&l.data, &o.data, &target.short());
                        self.write_file(
                            path,
                            &FileEntry {
                                data: marked,
                                exec: l.exec,
                                link: false,
                                copied: None,
                            },
                        )?;
                    }
                    // change vs delete: keep whichever content exists
                    (Some(_), None) => {}
                    (None, Some(o)) => self.write_file(path, o)?,
                    (None, None) => {}
                }
            }
        }
        Ok(stats)
    }

    fn revert_to(&mut self, target: &Node) -> Result<()> {
        let old = self.walk_wdir()?;
        let new = self.manifest(target)?;
        self.materialize(&old, &new)?;
        self.dirstate.unresolved.clear();
        Ok(())
    }

    fn duplicate_copies(&mut self, target: &Node) -> Result<()> {
        let info = self.commit_info(target)?;
        let manifest = self.manifest(target)?;
        for path in &info.files {
            if let Some(src) = manifest.get(path).and_then(|e| e.copied.clone()) {
                self.dirstate.copies.insert(path.clone(), src);
            }
        }
        Ok(())
    }

    fn pathcopies(&self, a: &Node, b: &Node) -> Result<BTreeMap<String, String>> {
        let mut copies: BTreeMap<String, String> = BTreeMap::new();
        for node in self.linear_chain(a, b)? {
            let info = self.commit_record(&node)?.clone();
            let manifest = self
                .store
                .manifests
                .get(&node)
                .with_context(|| format!("unknown revision {}", node.short()))?;
            for path in &info.files {
                if let Some(src) = manifest.get(path).and_then(|e| e.copied.clone()) {
                    let origin = copies.remove(&src).unwrap_or(src);
                    copies.insert(path.clone(), origin);
                }
            }
        }
        // a → b → a round trips cancel out
        copies.retain(|dst, src| dst != src);
        Ok(copies)
    }

    fn commit_wc(&mut self, opts: &CommitOpts) -> Result<Option<Node>> {
        let status = self.status()?;
        if status.is_clean() && self.dirstate.p2.is_none() {
            return Ok(None);
        }

        let mut manifest = self.walk_wdir()?;
        for (path, entry) in manifest.iter_mut() {
            if let Some(src) = self.dirstate.copies.get(path) {
                entry.copied = Some(src.clone());
            }
        }

        let mut files: Vec<String> = Vec::new();
        files.extend(status.modified);
        files.extend(status.added);
        files.extend(status.removed);
        files.sort();

        let commit = Commit {
            node: Node::from_bytes([0; NODE_LEN]),
            p1: self.dirstate.p1,
            p2: self.dirstate.p2,
            user: opts.user.clone(),
            date: opts.date,
            description: opts.text.trim_end().to_string(),
            extra: opts.extra.clone(),
            files,
        };
        let node = self.add_commit(commit, manifest);
        self.dirstate = Dirstate {
            p1: Some(node),
            p2: None,
            unresolved: BTreeSet::new(),
            copies: BTreeMap::new(),
        };
        Ok(Some(node))
    }

    fn commit_mem(
        &mut self,
        parents: (Option<Node>, Option<Node>),
        text: &str,
        files: Vec<MemFile>,
        user: &str,
        date: Timestamp,
        extra: &BTreeMap<String, String>,
    ) -> Result<Node> {
        let mut manifest = self.manifest_or_empty(parents.0.as_ref())?;
        let mut touched = Vec::new();
        for file in files {
            touched.push(file.path.clone());
            match file.entry {
                Some(entry) => {
                    manifest.insert(file.path, entry);
                }
                None => {
                    manifest.remove(&file.path);
                }
            }
        }
        touched.sort();

        let commit = Commit {
            node: Node::from_bytes([0; NODE_LEN]),
            p1: parents.0,
            p2: parents.1,
            user: user.to_string(),
            date,
            description: text.trim_end().to_string(),
            extra: extra.clone(),
            files: touched,
        };
        Ok(self.add_commit(commit, manifest))
    }

    fn bookmarks(&self) -> Vec<(String, Node)> {
        self.store
            .bookmarks
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    fn set_bookmark(&mut self, name: &str, node: &Node) -> Result<()> {
        if !self.contains(node) {
            bail!("cannot bookmark unknown revision {}", node.short());
        }
        self.store.bookmarks.insert(name.to_string(), *node);
        Ok(())
    }

    fn write_bookmarks(&mut self) -> Result<()> {
        self.save()
    }

    fn strip(&mut self, node: &Node) -> Result<()> {
        if !self.contains(node) {
            bail!("unknown revision {}", node.short());
        }

        // the node and everything descending from it
        let mut doomed: BTreeSet<Node> = BTreeSet::new();
        for n in &self.store.changelog {
            let c = &self.store.commits[n];
            let from_parent = c.p1.map(|p| doomed.contains(&p)).unwrap_or(false)
                || c.p2.map(|p| doomed.contains(&p)).unwrap_or(false);
            if n == node || from_parent {
                doomed.insert(*n);
            }
        }

        let journal = UndoJournal {
            stripped: doomed
                .iter()
                .map(|n| (self.store.commits[n].clone(), self.store.manifests[n].clone()))
                .collect(),
        };
        fs::write(
            self.meta_dir().join(UNDO_FILE),
            serde_json::to_string_pretty(&journal)?,
        )?;

        // relocate anything pointing into the doomed set
        let moves: Vec<(String, Option<Node>)> = self
            .store
            .bookmarks
            .iter()
            .filter(|(_, n)| doomed.contains(n))
            .map(|(name, n)| (name.clone(), self.surviving_ancestor(n, &doomed)))
            .collect();
        for (name, target) in moves {
            match target {
                Some(t) => {
                    self.store.bookmarks.insert(name, t);
                }
                None => {
                    self.store.bookmarks.remove(&name);
                }
            }
        }
        if let Some(p1) = self.dirstate.p1 {
            if doomed.contains(&p1) {
                self.dirstate.p1 = self.surviving_ancestor(&p1, &doomed);
            }
        }
        if let Some(p2) = self.dirstate.p2 {
            if doomed.contains(&p2) {
                self.dirstate.p2 = None;
            }
        }

        self.store.changelog.retain(|n| !doomed.contains(n));
        for n in &doomed {
            self.store.commits.remove(n);
            self.store.manifests.remove(n);
            self.store.public.remove(n);
        }
        Ok(())
    }

    fn markers_enabled(&self) -> bool {
        self.markers_enabled
    }

    fn create_markers(&mut self, markers: &[(Node, Vec<Node>)]) -> Result<()> {
        for (precursor, successors) in markers {
            self.store.markers.push(Marker {
                precursor: *precursor,
                successors: successors.clone(),
            });
        }
        Ok(())
    }

    fn outgoing(&self, peer: &Path, force: bool) -> Result<Vec<Node>> {
        let peer_repo =
            MemRepo::open(peer).with_context(|| format!("cannot open peer repository {:?}", peer))?;

        let related = self
            .store
            .changelog
            .iter()
            .any(|n| peer_repo.contains(n));
        if !related && !self.store.changelog.is_empty() && !peer_repo.store.changelog.is_empty() {
            if !force {
                bail!("repository is unrelated (use --force to proceed anyway)");
            }
        }

        Ok(self
            .store
            .changelog
            .iter()
            .filter(|n| !peer_repo.contains(n))
            .copied()
            .collect())
    }

    fn save(&mut self) -> Result<()> {
        let meta = self.meta_dir();
        fs::create_dir_all(&meta)?;
        fs::write(
            meta.join(STORE_FILE),
            serde_json::to_string_pretty(&self.store)?,
        )?;
        fs::write(
            meta.join(DIRSTATE_FILE),
            serde_json::to_string_pretty(&self.dirstate)?,
        )?;
        Ok(())
    }
}

/// Content equality for merge decisions: data and flags, ignoring rename
/// metadata.
fn same_content(a: Option<&FileEntry>, b: Option<&FileEntry>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.data == b.data && a.exec == b.exec,
        _ => false,
    }
}

fn conflict_markers(local: &[u8], other: &[u8], other_label: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(local.len() + other.len() + 64);
    out.extend_from_slice(b"<<<<<<< local\n");
    out.extend_from_slice(local);
    if !local.ends_with(b"\n") {
        out.push(b'\n');
    }
    out.extend_from_slice(b"=======\n");
    out.extend_from_slice(other);
    if !other.ends_with(b"\n") {
        out.push(b'\n');
    }
    out.extend_from_slice(format!(">>>>>>> {}\n", other_label).as_bytes());
    out
}

/// Canonical content hash of a commit: parents, metadata, and full manifest.
fn hash_commit(commit: &Commit, manifest: &Manifest) -> Node {
    let mut hasher = Sha256::new();
    let mut field = |bytes: &[u8]| {
        hasher.update((bytes.len() as u64).to_be_bytes());
        hasher.update(bytes);
    };

    match &commit.p1 {
        Some(p) => field(p.as_bytes()),
        None => field(b""),
    }
    match &commit.p2 {
        Some(p) => field(p.as_bytes()),
        None => field(b""),
    }
    field(commit.user.as_bytes());
    field(&commit.date.secs.to_be_bytes());
    field(&commit.date.offset.to_be_bytes());
    field(commit.description.as_bytes());
    for (k, v) in &commit.extra {
        field(k.as_bytes());
        field(v.as_bytes());
    }
    for (path, entry) in manifest {
        field(path.as_bytes());
        field(&entry.data);
        field(&[entry.exec as u8, entry.link as u8]);
        match &entry.copied {
            Some(src) => field(src.as_bytes()),
            None => field(b""),
        }
    }

    let digest = hasher.finalize();
    let mut bytes = [0u8; NODE_LEN];
    bytes.copy_from_slice(&digest[..NODE_LEN]);
    Node::from_bytes(bytes)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    false
}

#[cfg(unix)]
fn set_executable(path: &Path, exec: bool) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if exec { 0o755 } else { 0o644 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path, _exec: bool) -> Result<()> {
    Ok(())
}
