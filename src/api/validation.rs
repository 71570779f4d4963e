//! Purpose: Provide a stable, serializable validation report for queue files.
//! Exports: `ValidationReport`, `ValidationStatus`, `ValidationIssue`, `validate_queue_file`.
//! Role: Shared contract for the CLI `doctor` command and API users.
//! Invariants: Validation never creates, repairs or rewrites the file it inspects.
//! Invariants: Corruption becomes a report; other failures (missing, busy, I/O) stay errors.

use crate::core::error::{Error, ErrorKind};
use crate::core::queue::QueueFile;
use crate::core::queue::QueueOptions;
use crate::core::store::{FileStore, Storage};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Ok,
    Corrupt,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub code: String,
    pub message: String,
    pub offset: Option<u64>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ValidationReport {
    pub path: PathBuf,
    pub status: ValidationStatus,
    pub file_length: Option<u32>,
    pub element_count: Option<u32>,
    pub issues: Vec<ValidationIssue>,
    pub issue_count: usize,
    pub remediation_hints: Vec<String>,
}

impl ValidationReport {
    pub fn ok(path: PathBuf) -> Self {
        Self {
            path,
            status: ValidationStatus::Ok,
            file_length: None,
            element_count: None,
            issues: Vec::new(),
            issue_count: 0,
            remediation_hints: Vec::new(),
        }
    }

    pub fn corrupt(path: PathBuf, issue: ValidationIssue) -> Self {
        let remediation_hints = vec![
            "Queue file appears corrupt. Move it aside and recreate the queue; elements cannot be recovered safely.".to_string(),
        ];
        Self {
            path,
            status: ValidationStatus::Corrupt,
            file_length: None,
            element_count: None,
            issues: vec![issue],
            issue_count: 1,
            remediation_hints,
        }
    }

    fn with_counts(mut self, file_length: u32, element_count: u32) -> Self {
        self.file_length = Some(file_length);
        self.element_count = Some(element_count);
        self
    }
}

/// Opens `path` without creating it and walks every element.
pub fn validate_queue_file(path: impl AsRef<Path>) -> Result<ValidationReport, Error> {
    let path = path.as_ref();
    let store = FileStore::open(path)?;
    let len = store
        .len()
        .map_err(|err| Error::io(err).with_path(path))?;
    if len == 0 {
        return Ok(ValidationReport::corrupt(
            path.to_path_buf(),
            issue("empty_file", "file has no queue header", None),
        ));
    }

    let queue = match QueueFile::with_store(store, QueueOptions::new()) {
        Ok(queue) => queue,
        Err(err) if err.kind() == ErrorKind::Corrupt => {
            return Ok(ValidationReport::corrupt(path.to_path_buf(), corrupt_issue("header", &err)));
        }
        Err(err) => return Err(err),
    };

    let report = match queue.validate() {
        Ok(()) => ValidationReport::ok(path.to_path_buf()),
        Err(err) if err.kind() == ErrorKind::Corrupt => {
            ValidationReport::corrupt(path.to_path_buf(), corrupt_issue("elements", &err))
        }
        Err(err) => return Err(err),
    };
    Ok(report.with_counts(queue.file_length(), queue.size()))
}

fn corrupt_issue(code: &str, err: &Error) -> ValidationIssue {
    issue(code, err.message().unwrap_or("corrupt"), err.offset())
}

fn issue(code: &str, message: &str, offset: Option<u64>) -> ValidationIssue {
    ValidationIssue {
        code: code.to_string(),
        message: message.to_string(),
        offset,
    }
}
