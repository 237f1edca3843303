//! Purpose: `spellbook` CLI entry point.
//! Role: Binary crate root; parses args, installs tracing, dispatches commands.
//! Invariants: Command results are JSON on stdout (pretty on a TTY).
//! Invariants: Errors are JSON on stderr unless stderr is a TTY; logs also go to stderr.
//! Invariants: Process exit code is derived from `to_exit_code`.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

use spellbook::core::error::{Error, ErrorKind, to_exit_code};

mod command_dispatch;
mod spell_paths;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `spellbook --help`."));
            }
        },
    };

    init_tracing();
    command_dispatch::dispatch_command(cli.command, cli.globals)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "spellbook",
    version,
    about = "Discover spells, order them by dependency, and serve their settings",
    long_about = None,
    after_help = r#"EXAMPLES
  $ spellbook --spells-dir ./spells check
  $ spellbook --config settings.json settings --descriptors
  $ spellbook run settings.get --arg '"core.debug"'
  $ spellbook publish core.debug true --backend file+/var/lib/app/live.json
  $ spellbook --spells-dir ./spells=shop serve"#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(flatten)]
    globals: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Clone, Debug)]
struct GlobalArgs {
    #[arg(
        long,
        global = true,
        help = "Settings source (default: ./settings.json when present)",
        value_hint = ValueHint::FilePath
    )]
    config: Option<PathBuf>,
    #[arg(
        long = "spells-dir",
        global = true,
        value_name = "DIR[=NAMESPACE]",
        help = "Directory of spell manifests; repeat to add namespaces in order"
    )]
    spells_dirs: Vec<String>,
    #[arg(long, global = true, value_name = "SPELL", help = "Skip a spell entirely; repeatable")]
    forbid: Vec<String>,
    #[arg(long, global = true, default_value = "spellbook", help = "Application name used in logs")]
    app_name: String,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Initialize every spell, report what loaded, then stop")]
    Check,
    #[command(about = "Print the loaded settings tree")]
    Settings {
        #[arg(long, help = "Print registered descriptors instead of values")]
        descriptors: bool,
    },
    #[command(about = "Run a named entry point and print its JSON result")]
    Run {
        #[arg(help = "Entry point name")]
        entry: String,
        #[arg(long = "arg", value_name = "JSON", help = "Positional argument; repeatable")]
        args: Vec<String>,
        #[arg(long = "kwarg", value_name = "NAME=JSON", help = "Keyword argument; repeatable")]
        kwargs: Vec<String>,
    },
    #[command(about = "Keep settings in sync until SIGTERM or Ctrl-C")]
    Serve,
    #[command(about = "Write a setting value to a backend (administrative)")]
    Publish {
        #[arg(help = "Setting key as group.option")]
        key: String,
        #[arg(help = "JSON value")]
        value: String,
        #[arg(long, value_name = "URI", help = "Backend as <scheme>+<details>")]
        backend: String,
    },
    #[command(about = "Print version info")]
    Version,
    #[command(about = "Generate shell completions")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(err.kind().as_str()));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(key) = err.key() {
        inner.insert("key".to_string(), json!(key));
    }
    if let Some(spell) = err.spell() {
        inner.insert("spell".to_string(), json!(spell));
    }
    if let Some(expected) = err.expected() {
        inner.insert("expected".to_string(), json!(expected.as_str()));
    }
    if let Some(actual) = err.actual() {
        inner.insert("actual".to_string(), json!(actual));
    }
    if !err.cycle().is_empty() {
        inner.insert("cycle".to_string(), json!(err.cycle()));
    }
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {err}")];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

fn error_message(err: &Error) -> String {
    err.message()
        .map(str::to_string)
        .unwrap_or_else(|| err.kind().as_str().to_string())
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut current = err.source();
    while let Some(source) = current {
        causes.push(source.to_string());
        current = source.source();
    }
    causes
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}
