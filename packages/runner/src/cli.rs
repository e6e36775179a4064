//! Command-line interface for the runner.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use clipsrules::{Session, Watch};
use console::style;

use crate::document::RunnerDocument;
use crate::error::Result;
use crate::output::ConsoleOutput;

/// clipsrules runner - Load rule documents and evaluate expressions.
#[derive(Parser)]
#[command(name = "clipsrules-runner")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub session: SessionArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options applied to the session before any command runs
#[derive(Args, Debug, Default)]
pub struct SessionArgs {
    /// Watch item to trace (e.g., facts, instances, compilations)
    #[arg(long = "watch", value_name = "ITEM", global = true)]
    pub watch: Vec<Watch>,

    /// Extra output channel to accept besides stdout, stderr and stdwrn
    #[arg(long = "channel", value_name = "NAME", global = true)]
    pub channel: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load a document, reset and run.
    Run {
        /// A .clp file or a JSON runner document
        document: PathBuf,

        /// Maximum number of rule firings (default: unlimited)
        #[arg(short, long)]
        limit: Option<i64>,
    },

    /// Evaluate an expression and print its value.
    Eval {
        /// Expression text, e.g. "(+ 1 2)"
        expression: String,

        /// Document to load before evaluating
        #[arg(short = 'L', long)]
        load: Option<PathBuf>,

        /// Print the value as JSON instead of engine text
        #[arg(long)]
        json: bool,
    },

    /// Load a document, reset and print every fact as JSON.
    Facts {
        /// A .clp file or a JSON runner document
        document: PathBuf,
    },

    /// Execute a command script.
    Batch {
        /// Script of constructs and commands
        file: PathBuf,
    },
}

/// Run the CLI.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut session = open_session(&cli.session);

    let result = match cli.command {
        Commands::Run { document, limit } => run_command(&mut session, &document, limit),
        Commands::Eval {
            expression,
            load,
            json,
        } => eval_command(&mut session, &expression, load.as_deref(), json),
        Commands::Facts { document } => facts_command(&mut session, &document),
        Commands::Batch { file } => batch_command(&mut session, &file),
    };

    session.flush_output();
    result
}

/// Create a session printing to the terminal with the requested watches and
/// channels.
pub fn open_session(args: &SessionArgs) -> Session {
    let mut session = Session::with_handler(ConsoleOutput);
    for item in &args.watch {
        session.watch(*item, true);
    }
    for name in &args.channel {
        session.add_channel(name);
    }
    session
}

fn load_document(session: &mut Session, path: &Path) -> Result<()> {
    RunnerDocument::read(path)?.load_into(session)
}

/// Execute the run command.
fn run_command(session: &mut Session, document: &Path, limit: Option<i64>) -> Result<()> {
    load_document(session, document)?;
    session.reset();
    let fired = session.run(limit);
    session.flush_output();

    eprintln!("{} {}", style(fired).bold(), style("rules fired").dim());
    Ok(())
}

/// Execute the eval command.
fn eval_command(session: &mut Session, expression: &str, load: Option<&Path>, json: bool) -> Result<()> {
    if let Some(path) = load {
        load_document(session, path)?;
        session.reset();
    }

    let value = session.eval(expression)?;
    session.flush_output();

    if json {
        println!("{}", serde_json::to_string(&value)?);
    } else {
        println!("{value}");
    }
    Ok(())
}

/// Execute the facts command.
fn facts_command(session: &mut Session, document: &Path) -> Result<()> {
    load_document(session, document)?;
    session.reset();
    session.flush_output();

    let facts = session.all_facts();
    println!("{}", serde_json::to_string_pretty(&facts)?);
    Ok(())
}

/// Execute the batch command.
fn batch_command(session: &mut Session, file: &Path) -> Result<()> {
    session.load_batch(file)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::parse_from(["clipsrules-runner", "run", "rules.clp", "--limit", "5"]);

        let Commands::Run { document, limit } = cli.command else {
            unreachable!("expected run command");
        };
        assert_eq!(document, PathBuf::from("rules.clp"));
        assert_eq!(limit, Some(5));
        assert!(cli.session.watch.is_empty());
    }

    #[test]
    fn test_cli_parse_eval_with_flags() {
        let cli = Cli::parse_from([
            "clipsrules-runner",
            "eval",
            "(+ 1 2)",
            "--json",
            "--watch",
            "facts",
            "--watch",
            "compilations",
            "--channel",
            "audit",
        ]);

        let Commands::Eval {
            expression,
            load,
            json,
        } = cli.command
        else {
            unreachable!("expected eval command");
        };
        assert_eq!(expression, "(+ 1 2)");
        assert!(load.is_none());
        assert!(json);
        assert_eq!(cli.session.watch, vec![Watch::Facts, Watch::Compilations]);
        assert_eq!(cli.session.channel, vec!["audit".to_string()]);
    }

    #[test]
    fn test_cli_rejects_unknown_watch_item() {
        let parsed = Cli::try_parse_from(["clipsrules-runner", "--watch", "nothing", "batch", "x.bat"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_open_session_applies_args() {
        let args = SessionArgs {
            watch: vec![Watch::Facts],
            channel: vec!["audit".to_string()],
        };
        let session = open_session(&args);
        assert!(session.is_watching(Watch::Facts));
        assert!(!session.is_watching(Watch::Instances));
        assert!(session.has_channel("audit"));
    }
}
