//! Purpose: `queuefile` CLI entry point for inspecting and administering queue files.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Command results are JSON on stdout; diagnostics and logs go to stderr.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use queuefile::api::{
    Error, ErrorKind, QueueFile, Storage, ValidationReport, ValidationStatus, to_exit_code,
};

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
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
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
                    .with_hint("Try `queuefile --help`."));
            }
        },
    };

    command_dispatch::dispatch_command(cli.command)
        .map_err(add_corrupt_hint)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
}

#[derive(Parser)]
#[command(
    name = "queuefile",
    version,
    about = "Crash-safe FIFO byte queue stored in a single file",
    long_about = None,
    after_help = r#"EXAMPLES
  $ queuefile add jobs.queue 'first job' 'second job'
  $ queuefile peek jobs.queue
  $ queuefile remove jobs.queue
  $ queuefile list jobs.queue --limit 10
  $ queuefile doctor jobs.queue

NOTES
  - Results are JSON on stdout; errors are JSON on stderr when not a terminal.
  - Set RUST_LOG=debug to see queue file events on stderr."#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(
        arg_required_else_help = true,
        about = "Append elements (creates the queue file if missing)",
        after_help = r#"EXAMPLES
  $ queuefile add jobs.queue 'hello'
  $ printf 'raw bytes' | queuefile add jobs.queue --stdin"#
    )]
    Add {
        #[arg(help = "Queue file path", value_hint = ValueHint::FilePath)]
        file: PathBuf,
        #[arg(help = "Element payloads, one element per argument")]
        data: Vec<String>,
        #[arg(long, conflicts_with = "data", help = "Read one element from stdin")]
        stdin: bool,
    },
    #[command(arg_required_else_help = true, about = "Show the eldest element")]
    Peek {
        #[arg(help = "Queue file path", value_hint = ValueHint::FilePath)]
        file: PathBuf,
        #[arg(long, help = "Always print payloads as hex")]
        hex: bool,
    },
    #[command(arg_required_else_help = true, about = "Remove the eldest element(s)")]
    Remove {
        #[arg(help = "Queue file path", value_hint = ValueHint::FilePath)]
        file: PathBuf,
        #[arg(long, default_value_t = 1, help = "Number of elements to remove")]
        count: u32,
    },
    #[command(arg_required_else_help = true, about = "List elements, eldest first")]
    List {
        #[arg(help = "Queue file path", value_hint = ValueHint::FilePath)]
        file: PathBuf,
        #[arg(long, help = "Stop after this many elements")]
        limit: Option<u32>,
        #[arg(long, help = "Always print payloads as hex")]
        hex: bool,
    },
    #[command(arg_required_else_help = true, about = "Show header and space usage")]
    Info {
        #[arg(help = "Queue file path", value_hint = ValueHint::FilePath)]
        file: PathBuf,
    },
    #[command(
        arg_required_else_help = true,
        about = "Validate every element against the header",
        long_about = r#"Walk the whole queue file and check it against its header.

The file is never modified. Exit code is non-zero when corruption is found."#
    )]
    Doctor {
        #[arg(help = "Queue file path", value_hint = ValueHint::FilePath)]
        file: PathBuf,
        #[arg(long, help = "Emit the report as JSON")]
        json: bool,
    },
    #[command(arg_required_else_help = true, about = "Remove every element")]
    Clear {
        #[arg(help = "Queue file path", value_hint = ValueHint::FilePath)]
        file: PathBuf,
    },
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completions",
        after_help = r#"EXAMPLES
  $ queuefile completion bash > ~/.local/share/bash-completion/completions/queuefile
  $ queuefile completion zsh > ~/.zfunc/_queuefile"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

/// Opens an existing queue; read-only commands never create files.
fn open_existing(path: &Path) -> Result<QueueFile, Error> {
    let exists = path
        .try_exists()
        .map_err(|err| Error::io(err).with_path(path))?;
    if !exists {
        return Err(Error::new(ErrorKind::NotFound)
            .with_message("queue file does not exist")
            .with_path(path)
            .with_hint("Create it with `queuefile add <FILE> <DATA>`."));
    }
    QueueFile::open(path)
}

/// Closes `queue` and only then hands back the result to print, so a failed
/// final sync never reports success on stdout.
fn close_with<S: Storage>(queue: QueueFile<S>, summary: Value) -> Result<Value, Error> {
    queue.close()?;
    Ok(summary)
}

fn read_stdin() -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    io::stdin().lock().read_to_end(&mut buf).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read stdin")
            .with_source(err)
    })?;
    Ok(buf)
}

fn payload_json(index: u32, bytes: &[u8], force_hex: bool) -> Value {
    let mut inner = Map::new();
    inner.insert("index".to_string(), json!(index));
    inner.insert("length".to_string(), json!(bytes.len()));
    match std::str::from_utf8(bytes) {
        Ok(text) if !force_hex => {
            inner.insert("text".to_string(), json!(text));
        }
        _ => {
            inner.insert("hex".to_string(), json!(hex(bytes)));
        }
    }
    Value::Object(inner)
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Permission => {
            err.with_hint("Permission denied. Check the file and directory permissions.")
        }
        ErrorKind::Busy => {
            err.with_hint("Queue file is busy (another process holds the lock). Retry later.")
        }
        ErrorKind::Io => err.with_hint("I/O error. Check the path, filesystem, and disk space."),
        ErrorKind::Empty => err.with_hint("Add elements with `queuefile add <FILE> <DATA>`."),
        _ => err,
    }
}

fn add_corrupt_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Corrupt || err.hint().is_some() {
        return err;
    }
    err.with_hint("Queue file appears corrupt. Inspect it with `queuefile doctor <FILE>`.")
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_LOG=debug and share command/context if it persists.",
    )
}

fn emit_doctor_human(report: &ValidationReport) {
    let label = report.path.display();
    match report.status {
        ValidationStatus::Ok => {
            println!(
                "OK: {label} ({} elements, {} bytes)",
                report.element_count.unwrap_or(0),
                report.file_length.unwrap_or(0)
            );
        }
        ValidationStatus::Corrupt => {
            println!("CORRUPT: {label}");
            for issue in &report.issues {
                match issue.offset {
                    Some(offset) => println!("  - {} (offset {offset})", issue.message),
                    None => println!("  - {}", issue.message),
                }
            }
            for hint in &report.remediation_hints {
                println!("  hint: {hint}");
            }
        }
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

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
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
        ErrorKind::Busy => "resource is busy".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Empty => "queue is empty".to_string(),
        ErrorKind::Corrupt => "corrupt data".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
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
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
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
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(path) = err.path() {
        lines.push(format!("path: {}", path.display()));
    }
    if let Some(offset) = err.offset() {
        lines.push(format!("offset: {offset}"));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!("caused by: {cause}"));
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
