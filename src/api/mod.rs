//! Purpose: Define the stable public Rust API boundary for queue files.
//! Exports: Queue handle, options, storage backends, errors and validation reports.
//! Role: Public, additive-only surface used by the CLI and embedding applications.
//! Invariants: This module is the only public path to storage primitives.
//! Invariants: Planning and ring arithmetic stay internal to `core`.

mod validation;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::element::{Element, ElementReader};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::header::{HEADER_LENGTH, INITIAL_LENGTH, QueueHeader};
pub use crate::core::queue::{Durability, ElementInfo, QueueFile, QueueInfo, QueueOptions};
pub use crate::core::store::{FileStore, MemoryStore, Storage};
pub use validation::{ValidationIssue, ValidationReport, ValidationStatus, validate_queue_file};
