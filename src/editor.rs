//! External editor invocation.
//!
//! The engine asks for user text in two places: the plan at start, and
//! commit messages for fold/mess (and edits resumed by --continue). Both go
//! through the [`MessageEditor`] trait so non-interactive callers and tests
//! can substitute their own implementation.

use anyhow::{Context, Result};
use std::fs;
use std::io::IsTerminal;
use std::process::Command;

use crate::config::Config;

pub trait MessageEditor {
    /// Hand `text` to the user and return what they saved.
    fn edit(&self, text: &str) -> Result<String>;
}

/// Editor that returns the text unchanged. Used by non-interactive callers
/// that provide everything up front, and by tests.
pub struct PlainEditor;

impl MessageEditor for PlainEditor {
    fn edit(&self, text: &str) -> Result<String> {
        Ok(text.to_string())
    }
}

/// Editor for contexts with no user attached: any request for text fails
/// with a pointer at the non-interactive alternative.
pub struct NonInteractiveEditor;

impl MessageEditor for NonInteractiveEditor {
    fn edit(&self, _text: &str) -> Result<String> {
        anyhow::bail!(
            "cannot open an editor without an interactive terminal\n\
             (provide the plan with --commands <file>)"
        )
    }
}

/// Spawns the user's configured editor on a temp file.
pub struct SystemEditor {
    command: String,
    /// Extra environment for the child, e.g. exported lock ownership.
    env: Vec<(String, String)>,
}

impl SystemEditor {
    pub fn new(config: &Config) -> Self {
        Self {
            command: resolve_editor(config),
            env: Vec::new(),
        }
    }

    /// Export an environment variable to editor subprocesses.
    pub fn export_env(&mut self, key: String, value: String) {
        self.env.push((key, value));
    }

    /// True when an editor session could actually reach a user.
    pub fn is_interactive() -> bool {
        std::io::stdin().is_terminal() || std::env::var("HX_EDITOR").is_ok()
    }
}

impl MessageEditor for SystemEditor {
    fn edit(&self, text: &str) -> Result<String> {
        static SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "hx-editor-{}-{}.txt",
            std::process::id(),
            seq
        ));
        fs::write(&path, text).context("Failed to create temporary file")?;

        let status = Command::new(&self.command)
            .arg(&path)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .status()
            .with_context(|| format!("Failed to open editor '{}'", self.command))?;

        if !status.success() {
            let _ = fs::remove_file(&path);
            anyhow::bail!("Editor exited with non-zero status");
        }

        let result = fs::read_to_string(&path)?;
        let _ = fs::remove_file(&path);
        Ok(result)
    }
}

fn resolve_editor(config: &Config) -> String {
    if let Some(editor) = &config.editor {
        return editor.clone();
    }
    std::env::var("HX_EDITOR")
        .or_else(|_| std::env::var("VISUAL"))
        .or_else(|_| std::env::var("EDITOR"))
        .unwrap_or_else(|_| "vi".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_editor_returns_input() {
        let editor = PlainEditor;
        assert_eq!(editor.edit("pick abc\n").unwrap(), "pick abc\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_system_editor_runs_command() {
        // `true` leaves the buffer untouched
        let editor = SystemEditor {
            command: "true".to_string(),
            env: Vec::new(),
        };
        assert_eq!(editor.edit("some text\n").unwrap(), "some text\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_system_editor_propagates_failure() {
        let editor = SystemEditor {
            command: "false".to_string(),
            env: Vec::new(),
        };
        let err = editor.edit("some text\n").unwrap_err();
        assert!(err.to_string().contains("non-zero"));
    }

    #[test]
    fn test_config_editor_wins() {
        let config = Config {
            editor: Some("my-editor".to_string()),
            ..Config::default()
        };
        assert_eq!(resolve_editor(&config), "my-editor");
    }
}
