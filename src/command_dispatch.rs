//! Purpose: Hold top-level CLI command dispatch for `spellbook`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Every command that initializes a core stops it before returning.

use std::io;
use std::sync::Arc;

use clap::CommandFactory;
use serde_json::{Value, json};

use spellbook::core::backend::SettingsBackend;
use spellbook::core::entry::EntryArgs;
use spellbook::core::namespace::Namespace;
use spellbook::core::orchestrator::{Core, CoreOptions, version_string};
use spellbook::core::settings::SettingKey;
use spellbook::{runtime, spells};

use super::*;

pub(super) fn dispatch_command(command: Command, globals: GlobalArgs) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "spellbook", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_json(json!({
                "name": "spellbook",
                "version": version_string(),
            }));
            Ok(RunOutcome::ok())
        }
        Command::Check => {
            let core = Core::init(core_options(&globals)?)?;
            let spells = core
                .spells()
                .iter()
                .map(|spell| spell.name().to_string())
                .collect::<Vec<_>>();
            emit_json(json!({
                "app": core.app_name(),
                "version": core.version_string(),
                "spells": spells,
                "settings": core.settings().len(),
                "entry_points": core.entry_point_names(),
            }));
            core.stop();
            Ok(RunOutcome::ok())
        }
        Command::Settings { descriptors } => {
            let core = Core::init(core_options(&globals)?)?;
            let output = if descriptors {
                let rows = core
                    .settings()
                    .descriptors()?
                    .into_iter()
                    .map(|descriptor| {
                        json!({
                            "key": descriptor.fqn(),
                            "type": descriptor.value_type.as_str(),
                            "read_only": descriptor.read_only,
                            "comment": descriptor.comment,
                            "default": descriptor.default,
                        })
                    })
                    .collect::<Vec<_>>();
                json!({ "descriptors": rows })
            } else {
                core.settings().snapshot()?
            };
            emit_json(output);
            core.stop();
            Ok(RunOutcome::ok())
        }
        Command::Run {
            entry,
            args,
            kwargs,
        } => {
            let entry_args = entry_args(&args, &kwargs)?;
            let core = Core::init(core_options(&globals)?)?;
            let result = core.run_entry_point(&entry, entry_args);
            core.stop();
            let result = result?;
            emit_json(json!({ "entry_point": entry, "result": result }));
            Ok(RunOutcome::ok())
        }
        Command::Serve => {
            let core = Core::init(core_options(&globals)?)?;
            runtime::serve(Arc::clone(&core))?;
            Ok(RunOutcome::ok())
        }
        Command::Publish {
            key,
            value,
            backend,
        } => {
            let key = SettingKey::parse(&key)?;
            if key.read_only {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("publish takes a plain key; read-only settings never sync")
                    .with_key(key.fqn()));
            }
            let value = parse_json_arg(&value, "value")?;
            let backend = SettingsBackend::from_uri(&backend)?;
            if let SettingsBackend::Memory(_) = backend {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("memory backends live inside one process; nothing would be stored")
                    .with_key(key.fqn())
                    .with_hint("Publish to a shared backend, e.g. `--backend file+/var/lib/app/live.json`."));
            }
            backend.store(&key.fqn(), value.clone())?;
            emit_json(json!({
                "stored": key.fqn(),
                "value": value,
                "backend": backend.describe(),
            }));
            Ok(RunOutcome::ok())
        }
    }
}

fn core_options(globals: &GlobalArgs) -> Result<CoreOptions, Error> {
    let kinds = spells::default_kinds();
    let mut options = CoreOptions::new(&globals.app_name).namespace(spells::builtin_namespace());
    for raw in &globals.spells_dirs {
        let arg = spell_paths::parse_namespace_arg(raw)?;
        options = options.namespace(Namespace::scan(&arg.dir, arg.name, &kinds)?);
    }
    for spell in &globals.forbid {
        options = options.forbid(spell);
    }
    let cwd = std::env::current_dir().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read working directory")
            .with_source(err)
    })?;
    if let Some(path) = spell_paths::resolve_config(globals.config.as_deref(), &cwd) {
        options = options.settings_file(path);
    }
    Ok(options)
}

fn entry_args(args: &[String], kwargs: &[String]) -> Result<EntryArgs, Error> {
    let mut entry_args = EntryArgs::new();
    for raw in args {
        entry_args = entry_args.arg(parse_json_arg(raw, "--arg")?);
    }
    for raw in kwargs {
        let (name, value) = raw.split_once('=').ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("keyword argument `{raw}` has no `=`"))
                .with_hint("Use `--kwarg NAME=JSON`, e.g. `--kwarg limit=10`.")
        })?;
        entry_args = entry_args.kwarg(name, parse_json_arg(value, "--kwarg")?);
    }
    Ok(entry_args)
}

fn parse_json_arg(raw: &str, what: &str) -> Result<Value, Error> {
    serde_json::from_str(raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("{what} must be JSON"))
            .with_hint("Quote strings as JSON, e.g. '\"text\"'.")
            .with_source(err)
    })
}
