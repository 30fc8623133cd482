use anyhow::Result;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use histedit::commands::start::{self, EditOpts};
use histedit::config::Config;
use histedit::editor::PlainEditor;
use histedit::node::Node;
use histedit::repo::{CommitOpts, MemRepo, Repo, Timestamp};

/// Commit one file change with a deterministic author and date.
#[allow(dead_code)]
pub fn commit_file(repo: &mut MemRepo, path: &str, data: &str, message: &str, secs: i64) -> Node {
    fs::write(repo.root().join(path), data).expect("write file");
    repo.commit_wc(&CommitOpts {
        text: message.to_string(),
        user: "alice <alice@example.com>".to_string(),
        date: Timestamp { secs, offset: 0 },
        extra: BTreeMap::new(),
    })
    .expect("commit")
    .expect("commit should not be empty")
}

/// The repository from the docs: A adds alpha, B beta, C gamma, D delta.
/// Returns the repo and [a, b, c, d].
#[allow(dead_code)]
pub fn abcd_repo(dir: &Path) -> (MemRepo, [Node; 4]) {
    let mut repo = MemRepo::init(dir).expect("init repo");
    let a = commit_file(&mut repo, "alpha", "alpha\n", "Add alpha", 0);
    let b = commit_file(&mut repo, "beta", "beta\n", "Add beta", 1);
    let c = commit_file(&mut repo, "gamma", "gamma\n", "Add gamma", 2);
    let d = commit_file(&mut repo, "delta", "delta\n", "Add delta", 3);
    (repo, [a, b, c, d])
}

/// Run an edit with an explicit plan, as `--commands` would.
#[allow(dead_code)]
pub fn run_plan(repo: &mut MemRepo, parent: &Node, plan: &str) -> Result<i32> {
    run_plan_opts(repo, parent, plan, false)
}

#[allow(dead_code)]
pub fn run_plan_opts(repo: &mut MemRepo, parent: &Node, plan: &str, keep: bool) -> Result<i32> {
    let plan_file = repo.meta_dir().join("plan.txt");
    fs::write(&plan_file, plan)?;
    start::run(
        repo,
        &Config::default(),
        &PlainEditor,
        &EditOpts {
            parent: Some(parent.hex()),
            commands: Some(plan_file),
            keep,
            outgoing: false,
            force: false,
        },
    )
}

/// Follow first parents from `node` down to the root, newest first.
#[allow(dead_code)]
pub fn first_parent_chain(repo: &MemRepo, node: &Node) -> Vec<Node> {
    let mut chain = vec![*node];
    let mut cursor = *node;
    while let Some(parent) = repo.commit_info(&cursor).expect("commit info").p1 {
        chain.push(parent);
        cursor = parent;
    }
    chain
}
