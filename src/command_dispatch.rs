//! Purpose: Hold top-level CLI command dispatch for `queuefile`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Every queue mutation goes through `api::QueueFile`.
//! Invariants: Read-only commands fail with `NotFound` instead of creating the file.

use super::*;
use queuefile::api::validate_queue_file;
use std::ops::ControlFlow;

pub(super) fn dispatch_command(command: Command) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "queuefile", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Add { file, data, stdin } => {
            let elements = if stdin {
                vec![read_stdin()?]
            } else {
                data.into_iter().map(String::into_bytes).collect::<Vec<_>>()
            };
            if elements.is_empty() {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("no elements given")
                    .with_hint("Pass one or more DATA arguments, or use --stdin."));
            }
            let mut queue = QueueFile::open(&file)?;
            for element in &elements {
                queue.add(element)?;
            }
            let summary = json!({
                "added": elements.len(),
                "size": queue.size(),
                "file_length": queue.file_length(),
            });
            emit_json(close_with(queue, summary)?);
            Ok(RunOutcome::ok())
        }
        Command::Peek { file, hex } => {
            let queue = open_existing(&file)?;
            let element = queue
                .peek()?
                .map(|bytes| payload_json(0, &bytes, hex))
                .unwrap_or(Value::Null);
            emit_json(json!({ "size": queue.size(), "element": element }));
            Ok(RunOutcome::ok())
        }
        Command::Remove { file, count } => {
            let mut queue = open_existing(&file)?;
            if count > queue.size() {
                return Err(Error::new(ErrorKind::Empty)
                    .with_message(format!(
                        "cannot remove {count} elements from a queue of {}",
                        queue.size()
                    ))
                    .with_path(&file));
            }
            for _ in 0..count {
                queue.remove()?;
            }
            let summary = json!({ "removed": count, "size": queue.size() });
            emit_json(close_with(queue, summary)?);
            Ok(RunOutcome::ok())
        }
        Command::List { file, limit, hex } => {
            let queue = open_existing(&file)?;
            let limit = limit.unwrap_or(u32::MAX);
            let mut elements = Vec::new();
            let mut index = 0u32;
            if limit > 0 {
                queue.for_each(|reader, length| {
                    let mut bytes = Vec::with_capacity(length as usize);
                    reader.read_to_end(&mut bytes)?;
                    elements.push(payload_json(index, &bytes, hex));
                    index += 1;
                    if index >= limit {
                        return Ok(ControlFlow::Break(()));
                    }
                    Ok(ControlFlow::Continue(()))
                })?;
            }
            emit_json(json!({ "size": queue.size(), "elements": elements }));
            Ok(RunOutcome::ok())
        }
        Command::Info { file } => {
            let queue = open_existing(&file)?;
            let info = serde_json::to_value(queue.info()).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode queue info")
                    .with_source(err)
            })?;
            emit_json(info);
            Ok(RunOutcome::ok())
        }
        Command::Doctor { file, json } => {
            let report = validate_queue_file(&file)?;
            if json {
                let value = serde_json::to_value(&report).map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to encode validation report")
                        .with_source(err)
                })?;
                emit_json(value);
            } else {
                emit_doctor_human(&report);
            }
            let exit_code = match report.status {
                ValidationStatus::Ok => 0,
                ValidationStatus::Corrupt => to_exit_code(ErrorKind::Corrupt),
            };
            Ok(RunOutcome::with_code(exit_code))
        }
        Command::Clear { file } => {
            let mut queue = open_existing(&file)?;
            let cleared = queue.size();
            queue.clear()?;
            emit_json(close_with(queue, json!({ "cleared": cleared, "size": 0 }))?);
            Ok(RunOutcome::ok())
        }
    }
}
