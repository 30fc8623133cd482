use clap::{CommandFactory, FromArgMatches, Parser};
use std::path::PathBuf;
use std::sync::OnceLock;

use histedit::commands;
use histedit::commands::start::EditOpts;
use histedit::config::Config;
use histedit::context::ExecutionContext;
use histedit::editor::{MessageEditor, NonInteractiveEditor, SystemEditor};
use histedit::lock::{self, Lock};
use histedit::repo::{self, MemRepo, Repo};

/// Basename of argv[0], memoized, so help text and recovery hints match the
/// name the tool was invoked under (e.g. a `histedit` symlink).
fn program_name() -> &'static str {
    static NAME: OnceLock<String> = OnceLock::new();
    NAME.get_or_init(|| {
        std::env::args_os()
            .next()
            .and_then(|arg| {
                PathBuf::from(arg)
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "hx".to_string())
    })
}

#[derive(Parser)]
#[command(
    about = "Interactively edit changeset history",
    long_about = "\
Interactively edit changeset history.

Rewrites the linear run of changesets between the child of PARENT and the
working directory parent. The plan, one action per changeset, is taken
from --commands or composed in your editor:

  pick c561b4e977df 1 Add beta     use commit
  edit 030b686bedc4 2 Add gamma    use commit, but stop for amending
  fold 7c2fd3b9020c 3 Add delta    combine with the previous commit
  drop ...                         remove commit from history
  mess ...                         edit message without changing content

On a merge conflict the edit suspends with its state saved; resolve the
files and run --continue, or give up with --abort.",
    version
)]
struct Cli {
    /// Parent changeset: its descendants up to the working directory parent
    /// are edited (with --outgoing: the peer repository path)
    parent: Option<String>,

    /// Read history edits from the specified file
    #[arg(long, value_name = "FILE")]
    commands: Option<PathBuf>,

    /// Continue an edit already in progress
    #[arg(short = 'c', long = "continue")]
    cont: bool,

    /// Abort an edit in progress
    #[arg(long)]
    abort: bool,

    /// Don't strip old nodes after edit is complete
    #[arg(short = 'k', long)]
    keep: bool,

    /// Changesets not found in destination
    #[arg(short = 'o', long)]
    outgoing: bool,

    /// Force outgoing even for unrelated repositories
    #[arg(short = 'f', long)]
    force: bool,

    /// First revision to be edited (synonym for PARENT)
    #[arg(short = 'r', long, value_name = "REV")]
    rev: Option<String>,

    /// Show engine debug output
    #[arg(short = 'v', long)]
    verbose: bool,
}

/// Install signal handler for graceful interruption
fn install_signal_handler() {
    ctrlc::set_handler(|| {
        // state is persisted before every action, so interruption is safe;
        // just point the user at the recovery commands
        eprintln!("\n\nEdit interrupted. Run:");
        eprintln!("  {} --continue   to resume", program_name());
        eprintln!("  {} --abort      to roll back", program_name());
        std::process::exit(130);
    })
    .expect("Error setting Ctrl-C handler");
}

fn main() {
    install_signal_handler();

    let matches = Cli::command().name(program_name()).get_matches();
    let cli = Cli::from_arg_matches(&matches).expect("Failed to parse arguments");

    ExecutionContext::init(cli.verbose);

    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<i32> {
    let parent = match (&cli.parent, &cli.rev) {
        (Some(_), Some(_)) => anyhow::bail!("cannot specify both PARENT and --rev"),
        (parent, rev) => parent.clone().or_else(|| rev.clone()),
    };
    if cli.cont && cli.abort {
        anyhow::bail!("cannot use both --continue and --abort");
    }
    if (cli.cont || cli.abort) && (parent.is_some() || cli.outgoing || cli.keep) {
        anyhow::bail!("no arguments allowed with --continue or --abort");
    }

    let root = repo::find_root()?;
    let mut repo = MemRepo::open(&root)?;
    let config = Config::load(&repo.meta_dir())?;

    let editor: Box<dyn MessageEditor> = if SystemEditor::is_interactive() {
        let mut editor = SystemEditor::new(&config);
        // subprocesses we spawn while holding the locks treat them as their own
        for name in ["wlock", "lock"] {
            editor.export_env(Lock::inherit_env_var(name), lock::owner_string());
        }
        Box::new(editor)
    } else {
        Box::new(NonInteractiveEditor)
    };

    if cli.cont {
        return commands::continue_op::run(&mut repo, &config, editor.as_ref());
    }
    if cli.abort {
        return commands::abort::run(&mut repo);
    }

    let opts = EditOpts {
        parent,
        commands: cli.commands.clone(),
        keep: cli.keep,
        outgoing: cli.outgoing,
        force: cli.force,
    };
    commands::start::run(&mut repo, &config, editor.as_ref(), &opts)
}
