//! The fold engine: collapse a linear run of commits into one.
//!
//! Works entirely in memory, with no intermediate working-copy writes. The
//! combined commit sits on the first commit's parents and takes its file
//! contents from the last commit, with files that ended up unchanged
//! pruned away.

use anyhow::Result;
use std::collections::BTreeSet;

use crate::editor::MessageEditor;
use crate::node::Node;
use crate::repo::{Commit, CommitOpts, Manifest, MemFile, Repo};

/// Collapse `first..last` (inclusive) into a single new commit on top of
/// `first`'s parent. Message, user, and date come from `opts`; extra
/// metadata is carried from `first`. The message goes through the editor
/// before the commit is finalized.
///
/// Returns `None` when there is nothing to collapse: the range is not a
/// simple chain, or its net effect is empty.
pub fn collapse(
    repo: &mut dyn Repo,
    first: &Commit,
    last: &Commit,
    opts: &CommitOpts,
    editor: &dyn MessageEditor,
) -> Result<Option<Node>> {
    let chain = match walk_chain(repo, &first.node, &last.node)? {
        Some(chain) => chain,
        None => return Ok(None),
    };

    let base = match &first.p1 {
        Some(p) => repo.manifest(p)?,
        None => Manifest::new(),
    };
    let last_manifest = repo.manifest(&last.node)?;

    // every file any commit in the chain touched
    let mut files: BTreeSet<String> = BTreeSet::new();
    for node in &chain {
        files.extend(repo.commit_info(node)?.files);
    }

    // recompute copies so a → b → a round trips vanish
    let copied = repo.pathcopies(&first.node, &last.node)?;

    // prune files the chain ended up reverting
    files.retain(|f| !same_file(f, &last_manifest, &base));
    if files.is_empty() {
        return Ok(None);
    }

    let mem_files: Vec<MemFile> = files
        .into_iter()
        .map(|path| {
            let entry = last_manifest.get(&path).map(|e| {
                let mut entry = e.clone();
                entry.copied = copied.get(&path).cloned();
                entry
            });
            MemFile { path, entry }
        })
        .collect();

    let message = if opts.text.is_empty() {
        first.description.clone()
    } else {
        opts.text.clone()
    };
    let message = editor.edit(&message)?;

    let node = repo.commit_mem(
        (first.p1, first.p2),
        &message,
        mem_files,
        &opts.user,
        opts.date,
        &first.extra,
    )?;
    Ok(Some(node))
}

/// `first..last` inclusive along first parents, or `None` when `last` does
/// not descend from `first` that way.
fn walk_chain(repo: &dyn Repo, first: &Node, last: &Node) -> Result<Option<Vec<Node>>> {
    let mut chain = vec![*last];
    let mut cursor = *last;
    while cursor != *first {
        match repo.commit_info(&cursor)?.p1 {
            Some(parent) => {
                chain.push(parent);
                cursor = parent;
            }
            None => return Ok(None),
        }
    }
    chain.reverse();
    Ok(Some(chain))
}

/// A file is unchanged across the collapse when its content and flags in
/// `last` match `base`, or when it exists in neither.
fn same_file(path: &str, last: &Manifest, base: &Manifest) -> bool {
    match (last.get(path), base.get(path)) {
        (Some(a), Some(b)) => a.data == b.data && a.flags() == b.flags(),
        (Some(_), None) => false,
        (None, existing) => existing.is_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::PlainEditor;
    use crate::repo::{FileEntry, MemRepo, Timestamp};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn entry(data: &str) -> Option<FileEntry> {
        Some(FileEntry {
            data: data.as_bytes().to_vec(),
            exec: false,
            link: false,
            copied: None,
        })
    }

    fn mem_commit(
        repo: &mut MemRepo,
        parent: Option<Node>,
        message: &str,
        files: Vec<(&str, Option<FileEntry>)>,
        secs: i64,
    ) -> Node {
        repo.commit_mem(
            (parent, None),
            message,
            files
                .into_iter()
                .map(|(path, entry)| MemFile {
                    path: path.to_string(),
                    entry,
                })
                .collect(),
            "test <test@example.com>",
            Timestamp { secs, offset: 0 },
            &BTreeMap::new(),
        )
        .unwrap()
    }

    fn opts(text: &str) -> CommitOpts {
        CommitOpts {
            text: text.to_string(),
            user: "test <test@example.com>".to_string(),
            date: Timestamp { secs: 10, offset: 0 },
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_collapse_combines_file_changes() {
        let dir = tempdir().unwrap();
        let mut repo = MemRepo::init(dir.path()).unwrap();
        let a = mem_commit(&mut repo, None, "A", vec![("alpha", entry("alpha\n"))], 0);
        let b = mem_commit(&mut repo, Some(a), "B", vec![("beta", entry("beta\n"))], 1);
        let c = mem_commit(&mut repo, Some(b), "C", vec![("gamma", entry("gamma\n"))], 2);

        let first = repo.commit_info(&b).unwrap();
        let last = repo.commit_info(&c).unwrap();
        let combined = collapse(&mut repo, &first, &last, &opts("B\n***\nC"), &PlainEditor)
            .unwrap()
            .unwrap();

        let info = repo.commit_info(&combined).unwrap();
        assert_eq!(info.p1, Some(a));
        assert_eq!(info.description, "B\n***\nC");
        assert_eq!(info.files, vec!["beta", "gamma"]);

        let manifest = repo.manifest(&combined).unwrap();
        assert_eq!(manifest["alpha"].data, b"alpha\n");
        assert_eq!(manifest["beta"].data, b"beta\n");
        assert_eq!(manifest["gamma"].data, b"gamma\n");
    }

    #[test]
    fn test_collapse_prunes_reverted_files() {
        let dir = tempdir().unwrap();
        let mut repo = MemRepo::init(dir.path()).unwrap();
        let a = mem_commit(&mut repo, None, "A", vec![("alpha", entry("alpha\n"))], 0);
        // b rewrites alpha, c restores it and adds beta
        let b = mem_commit(&mut repo, Some(a), "B", vec![("alpha", entry("changed\n"))], 1);
        let c = mem_commit(
            &mut repo,
            Some(b),
            "C",
            vec![("alpha", entry("alpha\n")), ("beta", entry("beta\n"))],
            2,
        );

        let first = repo.commit_info(&b).unwrap();
        let last = repo.commit_info(&c).unwrap();
        let combined = collapse(&mut repo, &first, &last, &opts("BC"), &PlainEditor)
            .unwrap()
            .unwrap();

        // alpha round-tripped and is not part of the combined change
        let info = repo.commit_info(&combined).unwrap();
        assert_eq!(info.files, vec!["beta"]);
    }

    #[test]
    fn test_collapse_of_pure_revert_is_empty() {
        let dir = tempdir().unwrap();
        let mut repo = MemRepo::init(dir.path()).unwrap();
        let a = mem_commit(&mut repo, None, "A", vec![("alpha", entry("alpha\n"))], 0);
        let b = mem_commit(&mut repo, Some(a), "B", vec![("alpha", entry("changed\n"))], 1);
        let c = mem_commit(&mut repo, Some(b), "C", vec![("alpha", entry("alpha\n"))], 2);

        let first = repo.commit_info(&b).unwrap();
        let last = repo.commit_info(&c).unwrap();
        let result = collapse(&mut repo, &first, &last, &opts("BC"), &PlainEditor).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_collapse_records_file_removal() {
        let dir = tempdir().unwrap();
        let mut repo = MemRepo::init(dir.path()).unwrap();
        let a = mem_commit(
            &mut repo,
            None,
            "A",
            vec![("alpha", entry("alpha\n")), ("beta", entry("beta\n"))],
            0,
        );
        let b = mem_commit(&mut repo, Some(a), "B", vec![("beta", None)], 1);
        let c = mem_commit(&mut repo, Some(b), "C", vec![("gamma", entry("gamma\n"))], 2);

        let first = repo.commit_info(&b).unwrap();
        let last = repo.commit_info(&c).unwrap();
        let combined = collapse(&mut repo, &first, &last, &opts("BC"), &PlainEditor)
            .unwrap()
            .unwrap();

        let manifest = repo.manifest(&combined).unwrap();
        assert!(!manifest.contains_key("beta"));
        assert!(manifest.contains_key("gamma"));
    }

    #[test]
    fn test_collapse_message_goes_through_editor() {
        struct Upcase;
        impl MessageEditor for Upcase {
            fn edit(&self, text: &str) -> Result<String> {
                Ok(text.to_uppercase())
            }
        }

        let dir = tempdir().unwrap();
        let mut repo = MemRepo::init(dir.path()).unwrap();
        let a = mem_commit(&mut repo, None, "A", vec![("alpha", entry("alpha\n"))], 0);
        let b = mem_commit(&mut repo, Some(a), "B", vec![("beta", entry("beta\n"))], 1);

        let first = repo.commit_info(&b).unwrap();
        let combined = collapse(&mut repo, &first, &first.clone(), &opts("hello"), &Upcase)
            .unwrap()
            .unwrap();
        assert_eq!(repo.commit_info(&combined).unwrap().description, "HELLO");
    }
}
