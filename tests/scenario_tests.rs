//! End-to-end runs of the edit engine against the reference backend.

mod common;

use anyhow::Result;
use common::*;
use std::fs;
use tempfile::tempdir;

use histedit::commands::{abort, continue_op, start};
use histedit::config::Config;
use histedit::editor::PlainEditor;
use histedit::errors::EditError;
use histedit::node::Node;
use histedit::repo::{MemRepo, Repo};
use histedit::state::EditState;

#[test]
fn test_reorder_rebuilds_the_chain() -> Result<()> {
    let dir = tempdir()?;
    let (mut repo, [a, b, c, d]) = abcd_repo(dir.path());

    // swap B and C
    let plan = format!("pick {}\npick {}\npick {}\n", c.hex(), b.hex(), d.hex());
    let code = run_plan(&mut repo, &a, &plan)?;
    assert_eq!(code, 0);

    // new linear chain A ← C' ← B' ← D'
    let top = repo.wc_parents().0.expect("working copy parent");
    let chain = first_parent_chain(&repo, &top);
    assert_eq!(chain.len(), 4);
    assert_eq!(chain[3], a);

    let descriptions: Vec<String> = chain[..3]
        .iter()
        .map(|n| repo.commit_info(n).unwrap().description)
        .collect();
    assert_eq!(descriptions, vec!["Add delta", "Add beta", "Add gamma"]);

    // the originals were stripped; only the rewritten chain remains
    assert_eq!(repo.changelog().len(), 4);
    for old in [b, c, d] {
        assert!(!repo.contains(&old));
    }

    // the final tree matches the original topmost tree
    let manifest = repo.manifest(&top)?;
    for file in ["alpha", "beta", "gamma", "delta"] {
        assert!(manifest.contains_key(file), "missing {}", file);
    }

    assert!(!EditState::exists(&repo.meta_dir()));
    assert!(!repo.meta_dir().join("undo.json").exists());
    Ok(())
}

#[test]
fn test_fold_two_commits() -> Result<()> {
    let dir = tempdir()?;
    let mut repo = MemRepo::init(dir.path())?;
    let a = commit_file(&mut repo, "alpha", "alpha\n", "Add alpha", 0);
    let b = commit_file(&mut repo, "beta", "beta\n", "Add beta", 1);
    let c = commit_file(&mut repo, "gamma", "gamma\n", "Add gamma", 2);

    let plan = format!("pick {}\nfold {}\n", b.hex(), c.hex());
    let code = run_plan(&mut repo, &a, &plan)?;
    assert_eq!(code, 0);

    // a single combined commit remains on top of A
    assert_eq!(repo.changelog().len(), 2);
    let combined = repo.wc_parents().0.expect("working copy parent");
    let info = repo.commit_info(&combined)?;
    assert_eq!(info.p1, Some(a));
    assert_eq!(info.description, "Add beta\n***\nAdd gamma");
    assert_eq!(info.user, "alice <alice@example.com>");
    // max of the folded dates
    assert_eq!(info.date.secs, 2);

    let manifest = repo.manifest(&combined)?;
    assert!(manifest.contains_key("beta"));
    assert!(manifest.contains_key("gamma"));

    // originals and the fold-temp intermediate are gone
    for old in [b, c] {
        assert!(!repo.contains(&old));
    }
    for node in repo.changelog() {
        let description = repo.commit_info(node)?.description;
        assert!(!description.starts_with("fold-temp-revision"));
    }
    Ok(())
}

#[test]
fn test_fold_chain_matches_single_combined_commit() -> Result<()> {
    let dir = tempdir()?;
    let (mut repo, [a, b, c, d]) = abcd_repo(dir.path());
    let original_tree = repo.manifest(&d)?;

    let plan = format!("pick {}\nfold {}\nfold {}\n", b.hex(), c.hex(), d.hex());
    let code = run_plan(&mut repo, &a, &plan)?;
    assert_eq!(code, 0);

    assert_eq!(repo.changelog().len(), 2);
    let combined = repo.wc_parents().0.expect("working copy parent");
    let info = repo.commit_info(&combined)?;
    assert_eq!(info.description, "Add beta\n***\nAdd gamma\n***\nAdd delta");
    assert_eq!(repo.manifest(&combined)?, original_tree);
    Ok(())
}

#[test]
fn test_drop_of_dependency_suspends_on_conflict() -> Result<()> {
    let dir = tempdir()?;
    let mut repo = MemRepo::init(dir.path())?;
    let a = commit_file(&mut repo, "alpha", "alpha\n", "A", 0);
    let b = commit_file(&mut repo, "shared", "one\n", "B", 1);
    let c = commit_file(&mut repo, "shared", "one\ntwo\n", "C", 2);
    let d = commit_file(&mut repo, "shared", "one\ntwo\nthree\n", "D", 3);

    // dropping C leaves D's delta without its context
    let plan = format!("pick {}\ndrop {}\npick {}\n", b.hex(), c.hex(), d.hex());
    let err = run_plan(&mut repo, &a, &plan).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EditError>(),
        Some(EditError::Unresolved)
    ));
    assert!(err.to_string().contains("--continue"));

    // state is on disk: the suspended step still heads the plan
    let state = EditState::read(&repo.meta_dir())?.expect("state file");
    assert_eq!(state.plan.len(), 1);
    assert_eq!(state.plan[0].node, d);
    assert!(state.replacements.contains(&(c, vec![])));
    assert_eq!(repo.unresolved(), vec!["shared"]);
    Ok(())
}

#[test]
fn test_continue_after_conflict_resolution() -> Result<()> {
    let dir = tempdir()?;
    let mut repo = MemRepo::init(dir.path())?;
    let a = commit_file(&mut repo, "alpha", "alpha\n", "A", 0);
    let b = commit_file(&mut repo, "shared", "one\n", "B", 1);
    let c = commit_file(&mut repo, "shared", "one\ntwo\n", "C", 2);
    let d = commit_file(&mut repo, "shared", "one\ntwo\nthree\n", "D", 3);

    let plan = format!("pick {}\ndrop {}\npick {}\n", b.hex(), c.hex(), d.hex());
    assert!(run_plan(&mut repo, &a, &plan).is_err());

    // the user resolves the conflict by hand and continues
    fs::write(dir.path().join("shared"), "one\nthree\n")?;
    let code = continue_op::run(&mut repo, &Config::default(), &PlainEditor)?;
    assert_eq!(code, 0);

    // C is dropped, D is replayed with the resolved content
    let top = repo.wc_parents().0.expect("working copy parent");
    let info = repo.commit_info(&top)?;
    assert_eq!(info.description, "D");
    assert_eq!(info.p1, Some(b));
    assert_eq!(repo.manifest(&top)?["shared"].data, b"one\nthree\n");
    for old in [c, d] {
        assert!(!repo.contains(&old));
    }
    assert!(!EditState::exists(&repo.meta_dir()));
    Ok(())
}

#[test]
fn test_continue_after_edit_with_user_commits() -> Result<()> {
    let dir = tempdir()?;
    let (mut repo, [a, b, c, d]) = abcd_repo(dir.path());

    let plan = format!("pick {}\nedit {}\npick {}\n", b.hex(), c.hex(), d.hex());
    let err = run_plan(&mut repo, &a, &plan).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EditError>(),
        Some(EditError::EditStopped)
    ));

    // the suspension left C's delta uncommitted on top of B
    assert_eq!(repo.wc_parents().0, Some(b));
    assert!(!repo.status()?.is_clean());

    // the user splits the step into two commits
    let c1 = commit_file(&mut repo, "gamma", "gamma\n", "gamma, part one", 10);
    let c2 = commit_file(&mut repo, "gamma2", "gamma two\n", "gamma, part two", 11);

    let code = continue_op::run(&mut repo, &Config::default(), &PlainEditor)?;
    assert_eq!(code, 0);

    // final chain: A ← B ← C1 ← C2 ← D'
    let top = repo.wc_parents().0.expect("working copy parent");
    let chain = first_parent_chain(&repo, &top);
    assert_eq!(chain, vec![top, c2, c1, b, a]);
    assert_eq!(repo.commit_info(&top)?.description, "Add delta");
    for old in [c, d] {
        assert!(!repo.contains(&old));
    }
    Ok(())
}

#[test]
fn test_abort_restores_everything() -> Result<()> {
    let dir = tempdir()?;
    let mut repo = MemRepo::init(dir.path())?;
    let a = commit_file(&mut repo, "alpha", "alpha\n", "A", 0);
    let b = commit_file(&mut repo, "shared", "one\n", "B", 1);
    let c = commit_file(&mut repo, "shared", "one\ntwo\n", "C", 2);
    let d = commit_file(&mut repo, "shared", "one\ntwo\nthree\n", "D", 3);
    repo.set_bookmark("work", &d)?;

    let plan = format!("pick {}\ndrop {}\npick {}\n", b.hex(), c.hex(), d.hex());
    assert!(run_plan(&mut repo, &a, &plan).is_err());

    let code = abort::run(&mut repo)?;
    assert_eq!(code, 0);

    // back where we started: same commits, same bookmark, clean state
    assert_eq!(repo.changelog(), &[a, b, c, d]);
    assert_eq!(repo.wc_parents().0, Some(d));
    assert_eq!(repo.bookmarks(), vec![("work".to_string(), d)]);
    assert!(repo.status()?.is_clean());
    assert!(!EditState::exists(&repo.meta_dir()));
    Ok(())
}

#[test]
fn test_abort_strips_commits_created_so_far() -> Result<()> {
    let dir = tempdir()?;
    let mut repo = MemRepo::init(dir.path())?;
    let a = commit_file(&mut repo, "alpha", "alpha\n", "A", 0);
    let b = commit_file(&mut repo, "beta", "b1\n", "B", 1);
    let c = commit_file(&mut repo, "gamma", "gamma\n", "C", 2);
    let d = commit_file(&mut repo, "beta", "b1\nb2\n", "D", 3);

    // C replays onto A cleanly, then D needs the beta file B introduced
    let plan = format!("pick {}\npick {}\npick {}\n", c.hex(), d.hex(), b.hex());
    assert!(run_plan(&mut repo, &a, &plan).is_err());

    // the run already created at least one replacement commit
    assert!(repo.changelog().len() > 4);

    let code = abort::run(&mut repo)?;
    assert_eq!(code, 0);
    assert_eq!(repo.changelog(), &[a, b, c, d]);
    assert_eq!(repo.wc_parents().0, Some(d));
    Ok(())
}

#[test]
fn test_outgoing_derives_parent_from_peer() -> Result<()> {
    let peer_dir = tempdir()?;
    let local_dir = tempdir()?;

    // peer holds only A
    let mut peer = MemRepo::init(peer_dir.path())?;
    commit_file(&mut peer, "alpha", "alpha\n", "Add alpha", 0);
    peer.save()?;

    // local has A plus B, C, D
    let (mut repo, [a, b, c, d]) = abcd_repo(local_dir.path());

    let plan_file = repo.meta_dir().join("plan.txt");
    fs::write(
        &plan_file,
        format!("pick {}\npick {}\npick {}\n", b.hex(), c.hex(), d.hex()),
    )?;
    let code = start::run(
        &mut repo,
        &Config::default(),
        &PlainEditor,
        &start::EditOpts {
            parent: Some(peer_dir.path().to_string_lossy().into_owned()),
            commands: Some(plan_file),
            keep: false,
            outgoing: true,
            force: false,
        },
    )?;
    assert_eq!(code, 0);

    // in-order picks over the outgoing range are no-ops
    assert_eq!(repo.changelog(), &[a, b, c, d]);
    Ok(())
}

#[test]
fn test_keep_retains_original_commits() -> Result<()> {
    let dir = tempdir()?;
    let (mut repo, [a, b, c, d]) = abcd_repo(dir.path());

    let plan = format!("pick {}\npick {}\npick {}\n", c.hex(), b.hex(), d.hex());
    let code = run_plan_opts(&mut repo, &a, &plan, true)?;
    assert_eq!(code, 0);

    // the rewritten chain exists and the originals survive
    assert_eq!(repo.changelog().len(), 7);
    for old in [a, b, c, d] {
        assert!(repo.contains(&old));
    }
    let top = repo.wc_parents().0.expect("working copy parent");
    assert_eq!(repo.commit_info(&top)?.description, "Add delta");
    assert!(repo.markers().is_empty());
    Ok(())
}

#[test]
fn test_obsolescence_markers_instead_of_strip() -> Result<()> {
    let dir = tempdir()?;
    let mut repo = MemRepo::init(dir.path())?;
    let a = commit_file(&mut repo, "alpha", "alpha\n", "Add alpha", 0);
    let b = commit_file(&mut repo, "beta", "beta\n", "Add beta", 1);
    let c = commit_file(&mut repo, "gamma", "gamma\n", "Add gamma", 2);
    repo.set_markers_enabled(true);

    let plan = format!("pick {}\nfold {}\n", b.hex(), c.hex());
    let code = run_plan(&mut repo, &a, &plan)?;
    assert_eq!(code, 0);

    // originals stay in the store, superseded by markers
    assert!(repo.contains(&b));
    assert!(repo.contains(&c));

    let combined = repo.wc_parents().0.expect("working copy parent");
    let markers = repo.markers();
    assert_eq!(markers.len(), 2);
    // sorted by precursor revision: B first
    assert_eq!(markers[0].precursor, b);
    assert_eq!(markers[0].successors, vec![combined]);
    assert_eq!(markers[1].precursor, c);
    assert_eq!(markers[1].successors, vec![combined]);

    // the fold-temp intermediate is still stripped
    for node in repo.changelog() {
        let description = repo.commit_info(node)?.description;
        assert!(!description.starts_with("fold-temp-revision"));
    }
    Ok(())
}

#[test]
fn test_drop_without_dependents() -> Result<()> {
    let dir = tempdir()?;
    let (mut repo, [a, b, c, d]) = abcd_repo(dir.path());

    let plan = format!("pick {}\ndrop {}\npick {}\n", b.hex(), c.hex(), d.hex());
    let code = run_plan(&mut repo, &a, &plan)?;
    assert_eq!(code, 0);

    // chain is A ← B ← D' and no commit carries C's file
    let top = repo.wc_parents().0.expect("working copy parent");
    let chain = first_parent_chain(&repo, &top);
    assert_eq!(chain, vec![top, b, a]);
    assert!(!repo.contains(&c));
    assert!(!repo.contains(&d));
    assert!(!repo.manifest(&top)?.contains_key("gamma"));
    Ok(())
}

#[test]
fn test_bookmarks_follow_the_rewrite() -> Result<()> {
    let dir = tempdir()?;
    let (mut repo, [a, b, c, d]) = abcd_repo(dir.path());
    repo.set_bookmark("tip-mark", &d)?;
    repo.set_bookmark("mid-mark", &c)?;

    // drop C, keep the rest in order
    let plan = format!("pick {}\ndrop {}\npick {}\n", b.hex(), c.hex(), d.hex());
    let code = run_plan(&mut repo, &a, &plan)?;
    assert_eq!(code, 0);

    let top = repo.wc_parents().0.expect("working copy parent");
    let marks: std::collections::BTreeMap<String, Node> =
        repo.bookmarks().into_iter().collect();
    // the old tip bookmark follows the new topmost
    assert_eq!(marks["tip-mark"], top);
    // the dropped commit's bookmark walks back to its parent's successor
    assert_eq!(marks["mid-mark"], b);
    Ok(())
}

#[test]
fn test_mess_rewrites_message_via_plan() -> Result<()> {
    struct Rewriter;
    impl histedit::editor::MessageEditor for Rewriter {
        fn edit(&self, text: &str) -> anyhow::Result<String> {
            Ok(text.replace("Add gamma", "Add gamma, reworded"))
        }
    }

    let dir = tempdir()?;
    let mut repo = MemRepo::init(dir.path())?;
    let a = commit_file(&mut repo, "alpha", "alpha\n", "Add alpha", 0);
    let b = commit_file(&mut repo, "beta", "beta\n", "Add beta", 1);
    let c = commit_file(&mut repo, "gamma", "gamma\n", "Add gamma", 2);

    let plan_file = repo.meta_dir().join("plan.txt");
    fs::write(&plan_file, format!("pick {}\nmess {}\n", b.hex(), c.hex()))?;
    let code = start::run(
        &mut repo,
        &Config::default(),
        &Rewriter,
        &start::EditOpts {
            parent: Some(a.hex()),
            commands: Some(plan_file),
            keep: false,
            outgoing: false,
            force: false,
        },
    )?;
    assert_eq!(code, 0);

    let top = repo.wc_parents().0.expect("working copy parent");
    let info = repo.commit_info(&top)?;
    assert_eq!(info.description, "Add gamma, reworded");
    // content untouched
    assert_eq!(repo.manifest(&top)?["gamma"].data, b"gamma\n");
    assert!(!repo.contains(&c));
    Ok(())
}

#[test]
fn test_state_survives_process_boundary() -> Result<()> {
    let dir = tempdir()?;
    let mut repo = MemRepo::init(dir.path())?;
    let a = commit_file(&mut repo, "alpha", "alpha\n", "A", 0);
    let b = commit_file(&mut repo, "shared", "one\n", "B", 1);
    let c = commit_file(&mut repo, "shared", "one\ntwo\n", "C", 2);
    let d = commit_file(&mut repo, "shared", "one\ntwo\nthree\n", "D", 3);

    let plan = format!("pick {}\ndrop {}\npick {}\n", b.hex(), c.hex(), d.hex());
    assert!(run_plan(&mut repo, &a, &plan).is_err());
    drop(repo);

    // a fresh process: reopen from disk and abort
    let mut repo = MemRepo::open(dir.path())?;
    assert!(EditState::exists(&repo.meta_dir()));
    let code = abort::run(&mut repo)?;
    assert_eq!(code, 0);
    assert_eq!(repo.wc_parents().0, Some(d));
    Ok(())
}
