//! Edit plans.
//!
//! A plan is an ordered list of `(action, changeset)` steps, one per commit
//! in the edit range. The textual form is one step per line:
//!
//! ```text
//! pick c561b4e977df 1 Add beta
//! fold 7c2fd3b9020c 3 Add delta
//! ```
//!
//! Lines starting with `#` and blank lines are ignored. Anything after the
//! changeset is informational. Actions accept short or long names.

use anyhow::Result;

use crate::errors::EditError;
use crate::node::Node;
use crate::repo::Repo;

/// What to do with one changeset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Use the commit.
    Pick,
    /// Use the commit, but stop for amending.
    Edit,
    /// Use the commit, but fold into the previous commit.
    Fold,
    /// Remove the commit from history.
    Drop,
    /// Edit the message without changing the commit content.
    Mess,
}

impl Action {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "p" | "pick" => Some(Self::Pick),
            "e" | "edit" => Some(Self::Edit),
            "f" | "fold" => Some(Self::Fold),
            "d" | "drop" => Some(Self::Drop),
            "m" | "mess" => Some(Self::Mess),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pick => "pick",
            Self::Edit => "edit",
            Self::Fold => "fold",
            Self::Drop => "drop",
            Self::Mess => "mess",
        }
    }

    /// Single-byte code used by the state file.
    pub fn code(&self) -> u8 {
        self.name().as_bytes()[0]
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::parse(std::str::from_utf8(&[code]).ok()?)
    }
}

/// One verified plan step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Step {
    pub action: Action,
    pub node: Node,
}

/// Parse plan text into raw `(action, changeset token)` rules.
pub fn parse(text: &str) -> Result<Vec<(Action, String)>> {
    let mut rules = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((verb, rest)) = line.split_once(char::is_whitespace) else {
            return Err(EditError::MalformedPlan(format!("malformed line \"{}\"", line)).into());
        };
        let action = Action::parse(verb)
            .ok_or_else(|| EditError::MalformedPlan(format!("unknown action \"{}\"", verb)))?;
        // the first token is the changeset; the rest is informational
        let token = rest
            .split_whitespace()
            .next()
            .ok_or_else(|| EditError::MalformedPlan(format!("malformed line \"{}\"", line)))?;
        rules.push((action, token.to_string()));
    }
    Ok(rules)
}

/// Verify that there exists exactly one rule per changeset in `range` and
/// resolve the changeset tokens.
pub fn verify(rules: &[(Action, String)], repo: &dyn Repo, range: &[Node]) -> Result<Vec<Step>> {
    if rules.len() != range.len() {
        return Err(
            EditError::MalformedPlan("must specify a rule for each changeset once".to_string()).into(),
        );
    }
    let mut seen: Vec<Node> = Vec::new();
    let mut steps = Vec::with_capacity(rules.len());
    for (i, (action, token)) in rules.iter().enumerate() {
        let node = repo
            .lookup(token)
            .map_err(|_| EditError::MalformedPlan(format!("unknown changeset {} listed", token)))?;
        if !range.contains(&node) {
            return Err(EditError::MalformedPlan(
                "may not use changesets other than the ones listed".to_string(),
            )
            .into());
        }
        if seen.contains(&node) {
            return Err(EditError::MalformedPlan(format!(
                "duplicate rule for changeset {}",
                node.short()
            ))
            .into());
        }
        if i == 0 && *action == Action::Fold {
            return Err(EditError::MalformedPlan(
                "the first changeset cannot use fold, it has no previous changeset".to_string(),
            )
            .into());
        }
        seen.push(node);
        steps.push(Step {
            action: *action,
            node,
        });
    }
    Ok(steps)
}

/// Build the initial action line for a changeset:
/// `pick <hash> <rev> <summary>`, trimmed to 80 chars so it is not
/// stupidly wide in an editor.
pub fn make_desc(repo: &dyn Repo, node: &Node) -> Result<String> {
    let info = repo.commit_info(node)?;
    let summary = info.description.lines().next().unwrap_or("");
    let line = format!("pick {} {} {}", node.short(), repo.rev(node)?, summary);
    Ok(line.chars().take(80).collect())
}

/// Default plan: one `pick` per changeset in ancestor-to-descendant order.
pub fn default_plan(repo: &dyn Repo, range: &[Node]) -> Result<String> {
    let mut lines = Vec::with_capacity(range.len());
    for node in range {
        lines.push(make_desc(repo, node)?);
    }
    Ok(lines.join("\n"))
}

/// Comment block appended to the plan opened in the editor.
pub fn edit_comment(first: &Node, last: &Node) -> String {
    format!(
        "# Edit history between {} and {}\n\
         #\n\
         # Commands:\n\
         #  p, pick = use commit\n\
         #  e, edit = use commit, but stop for amending\n\
         #  f, fold = use commit, but fold into previous commit (combines N and N-1)\n\
         #  d, drop = remove commit from history\n\
         #  m, mess = edit message without changing commit content\n\
         #\n",
        first.short(),
        last.short()
    )
}
