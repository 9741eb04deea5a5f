//! Purpose: `datablock` CLI entry point: host a plugin library or inspect a block.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Logs go to stderr through `tracing`; stdout carries only command output.
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};

use clap::{
    Args, CommandFactory, Parser, Subcommand, ValueEnum, ValueHint,
    error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;

mod block_json;
mod command_dispatch;

use datablock::api::{AliasTable, DataBlock, Error, ErrorKind, to_exit_code};
use datablock::capsule::ABI_VERSION;
use datablock::logging::init_tracing;

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
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Internal)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
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
                let message = clap_error_summary(&err);
                let hint = clap_error_hint(&err);
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(message)
                        .with_hint(hint),
                    ColorMode::Auto,
                ));
            }
        },
    };

    init_tracing(tracing_directive(cli.verbose));
    let color_mode = cli.color;

    command_dispatch::dispatch_command(cli.command)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "datablock",
    version,
    about = "Sectioned key/value blocks shared between pipeline plugins",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Plugins exchange configuration and runtime data through blocks of
(section, name) -> value entries. An alias mapping lets producers and consumers
use different names for the same datum.

Mental model:
  - `run` loads a plugin library and drives setup, execute, cleanup
  - `show` prints a JSON block, optionally through an alias mapping
"#,
    after_help = r#"EXAMPLES
  $ datablock run ./libgrowth.so --config growth.json --data params.json
  $ datablock show params.json --get cosmological_parameters::omega_m
  $ datablock show params.json --mapping aliases.json --section cosmology

LEARN MORE
  $ datablock <command> --help"#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[arg(
        long,
        global = true,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[arg(
        short = 'v',
        long = "verbose",
        global = true,
        action = clap::ArgAction::Count,
        help = "Raise log verbosity on stderr (-v info, -vv debug); RUST_LOG overrides"
    )]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        arg_required_else_help = true,
        about = "Run a plugin library against config and data blocks",
        long_about = r#"Load a plugin shared library and run its lifecycle.

The library must export `setup`, `execute`, and `cleanup` with C linkage. When it
also exports `dblk_plugin_init`, the host passes it the block export table first.
Cleanup always runs once setup has succeeded, even if an execute call fails."#,
        after_help = r#"EXAMPLES
  $ datablock run ./libgrowth.so --data params.json
  $ datablock run ./libgrowth.so --name growth --config growth.json --iterations 3
  $ datablock run ./libgrowth.so --data params.json --mapping aliases.json --sep /

NOTES
  - The resulting data block is printed as JSON on stdout
  - Plugin log records go to stderr; use -v or RUST_LOG to see them"#
    )]
    Run(RunArgs),
    #[command(
        arg_required_else_help = true,
        about = "Print a JSON block, a section listing, or one value",
        after_help = r#"EXAMPLES
  $ datablock show params.json
  $ datablock show params.json --section cosmological_parameters
  $ datablock show params.json --mapping aliases.json --get old::omega"#
    )]
    Show(ShowArgs),
    #[command(
        about = "Print version info as JSON",
        long_about = r#"Emit version info as JSON (stable, machine-readable)."#,
        after_help = r#"EXAMPLES
  $ datablock version"#
    )]
    Version,
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completions",
        after_help = r#"EXAMPLES
  $ datablock completion bash > ~/.local/share/bash-completion/completions/datablock
  $ datablock completion zsh > ~/.zfunc/_datablock"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(Args)]
struct RunArgs {
    #[arg(help = "Plugin shared library", value_hint = ValueHint::FilePath)]
    library: PathBuf,
    #[arg(long, help = "Instance name passed to each phase (default: library file stem)")]
    name: Option<String>,
    #[arg(long, help = "Config block as JSON", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,
    #[arg(long, help = "Initial data block as JSON", value_hint = ValueHint::FilePath)]
    data: Option<PathBuf>,
    #[arg(long, help = "Alias mapping for the data block as JSON", value_hint = ValueHint::FilePath)]
    mapping: Option<PathBuf>,
    #[arg(long, default_value = "::", help = "Separator between section and name in keys")]
    sep: String,
    #[arg(long, default_value_t = 1, help = "Number of execute calls")]
    iterations: u64,
}

#[derive(Args)]
struct ShowArgs {
    #[arg(help = "Block as JSON", value_hint = ValueHint::FilePath)]
    file: PathBuf,
    #[arg(long, help = "Alias mapping as JSON", value_hint = ValueHint::FilePath)]
    mapping: Option<PathBuf>,
    #[arg(long, default_value = "::", help = "Separator between section and name in keys")]
    sep: String,
    #[arg(long, help = "List the names stored in one section", conflicts_with = "get")]
    section: Option<String>,
    #[arg(
        long,
        help = "Print SECTION<sep>NAME (aliases resolved) or a whole stored SECTION"
    )]
    get: Option<String>,
}

fn tracing_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

fn read_json_file(path: &Path) -> Result<Value, Error> {
    let text = std::fs::read_to_string(path).map_err(|err| {
        let kind = if err.kind() == io::ErrorKind::NotFound {
            ErrorKind::NotFound
        } else {
            ErrorKind::Internal
        };
        Error::new(kind)
            .with_message(format!("failed to read {}", path.display()))
            .with_source(err)
    })?;
    serde_json::from_str(&text).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("{} is not valid JSON", path.display()))
            .with_source(err)
    })
}

fn load_mapping(path: Option<&Path>, sep: &str) -> Result<AliasTable, Error> {
    match path {
        Some(path) => block_json::aliases_from_json(&read_json_file(path)?, sep),
        None => Ok(AliasTable::new()),
    }
}

fn load_block(path: Option<&Path>, aliases: AliasTable) -> Result<DataBlock, Error> {
    match path {
        Some(path) => block_json::block_from_json(&read_json_file(path)?, aliases),
        None => Ok(DataBlock::with_aliases(aliases)),
    }
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint("Rerun with -vv (or RUST_LOG=debug) to see plugin and ABI log records.")
}

fn emit_version_output() {
    if io::stdout().is_terminal() {
        println!("datablock {} (abi {ABI_VERSION})", env!("CARGO_PKG_VERSION"));
    } else {
        emit_json(json!({
            "name": "datablock",
            "version": env!("CARGO_PKG_VERSION"),
            "abi_version": ABI_VERSION,
        }));
    }
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

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::TypeMismatch => "type mismatch".to_string(),
        ErrorKind::Conversion => "conversion failed".to_string(),
        ErrorKind::AbiResolution => "abi resolution failed".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(section) = err.section() {
        inner.insert("section".to_string(), json!(section));
    }
    if let Some(name) = err.name() {
        inner.insert("name".to_string(), json!(name));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(section) = err.section() {
        let key = match err.name() {
            Some(name) => format!("{section} / {name}"),
            None => section.to_string(),
        };
        lines.push(format!(
            "{} {key}",
            colorize_label("key:", use_color, AnsiColor::Yellow)
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
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

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);
    let subcommand = usage.and_then(|usage| {
        let mut tokens = usage.split_whitespace();
        tokens.find(|token| *token == "datablock")?;
        tokens.next().filter(|token| {
            !token.starts_with('-') && !token.starts_with('<') && !token.starts_with('[')
        })
    });
    match subcommand {
        Some(subcommand) => format!("Try `datablock {subcommand} --help`."),
        None => "Try `datablock --help`.".to_string(),
    }
}
