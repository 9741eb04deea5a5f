//! Purpose: Hold top-level CLI command dispatch for `datablock`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Once setup succeeds, cleanup runs exactly once, whatever execute returns.

use super::*;
use datablock::api::{ForeignPlugin, Key, PluginInstance};
use serde::Serialize;

#[derive(Serialize)]
struct RunReport {
    plugin: String,
    name: String,
    iterations: u64,
    data: Value,
}

pub(super) fn dispatch_command(command: Command) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "datablock", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_version_output();
            Ok(RunOutcome::ok())
        }
        Command::Run(args) => run_plugin(args),
        Command::Show(args) => show_block(args),
    }
}

fn run_plugin(args: RunArgs) -> Result<RunOutcome, Error> {
    let aliases = load_mapping(args.mapping.as_deref(), &args.sep)?;
    let config = load_block(args.config.as_deref(), AliasTable::new())?;
    let data = load_block(args.data.as_deref(), aliases)?;
    let name = match args.name {
        Some(name) => name,
        None => args
            .library
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(|stem| stem.strip_prefix("lib").unwrap_or(stem).to_string())
            .unwrap_or_else(|| "plugin".to_string()),
    };

    let plugin = ForeignPlugin::load(&args.library)?;
    let label = plugin.label().to_string();
    let mut instance = PluginInstance::new(name.clone(), plugin, config, data.clone());
    instance.setup()?;

    let mut executed = Ok(());
    for _ in 0..args.iterations {
        executed = instance.execute();
        if executed.is_err() {
            break;
        }
    }
    let cleaned = instance.cleanup();
    executed?;
    cleaned?;

    let report = RunReport {
        plugin: label,
        name,
        iterations: instance.executions(),
        data: block_json::block_to_json(&data),
    };
    let value = serde_json::to_value(&report).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode run report")
            .with_source(err)
    })?;
    emit_json(value);
    Ok(RunOutcome::ok())
}

fn show_block(args: ShowArgs) -> Result<RunOutcome, Error> {
    let aliases = load_mapping(args.mapping.as_deref(), &args.sep)?;
    let block = load_block(Some(args.file.as_path()), aliases)?;

    if let Some(key) = args.get.as_deref() {
        // Entry keys resolve aliases; section keys name a stored section directly.
        let value = block.get_item(&Key::parse(key, &args.sep)?)?;
        emit_json(block_json::value_to_json(&value));
        return Ok(RunOutcome::ok());
    }

    if let Some(section) = args.section.as_deref() {
        let names = block.get_section(section)?.names();
        emit_json(json!({ "section": section, "names": names }));
        return Ok(RunOutcome::ok());
    }

    let mut document = Map::new();
    document.insert("data".to_string(), block_json::block_to_json(&block));
    if !block.aliases().is_empty() {
        document.insert(
            "mapping".to_string(),
            block_json::aliases_to_json(block.aliases(), &args.sep),
        );
    }
    emit_json(Value::Object(document));
    Ok(RunOutcome::ok())
}
