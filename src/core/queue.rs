//! Purpose: File-backed FIFO queue of byte elements with atomic header commits.
//! Exports: `QueueFile`, `QueueOptions`, `Durability`, `QueueInfo`.
//! Role: Orchestrates header, ring codec and storage; every mutation is data writes then one commit.
//! Invariants: The in-memory header only changes after a successful commit.
//! Invariants: A failed mutation resyncs from the committed header or poisons the instance.
use std::fmt;
use std::fs;
use std::io;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::element::{self, ELEMENT_HEADER_LEN, Element, ElementReader};
use crate::core::error::{Error, ErrorKind};
use crate::core::header::{BLOCK_LENGTH, HEADER_LENGTH, INITIAL_LENGTH, QueueHeader};
use crate::core::plan::{self, AppendPlan, ExpansionPlan};
use crate::core::ring;
use crate::core::store::{FileStore, Storage};
use crate::core::validate;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Durability {
    /// Sync element data before the commit and the header after it.
    #[default]
    Flush,
    /// Skip syncs; the header write stays the commit point.
    Fast,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct QueueOptions {
    pub initial_length: u32,
    pub durability: Durability,
}

impl QueueOptions {
    pub fn new() -> Self {
        Self {
            initial_length: INITIAL_LENGTH,
            durability: Durability::Flush,
        }
    }

    pub fn with_initial_length(mut self, initial_length: u32) -> Self {
        self.initial_length = initial_length;
        self
    }

    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    fn validate(&self) -> Result<(), Error> {
        if self.initial_length < INITIAL_LENGTH || self.initial_length % BLOCK_LENGTH != 0 {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "initial length {} must be a positive multiple of {BLOCK_LENGTH}",
                self.initial_length
            )));
        }
        Ok(())
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the queue's metadata.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct QueueInfo {
    pub path: Option<PathBuf>,
    pub file_length: u32,
    pub element_count: u32,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub first: ElementInfo,
    pub last: ElementInfo,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct ElementInfo {
    pub position: u32,
    pub length: u32,
}

impl From<Element> for ElementInfo {
    fn from(element: Element) -> Self {
        Self {
            position: element.position,
            length: element.length,
        }
    }
}

/// A reliable FIFO queue stored in one file.
///
/// Elements are opaque byte strings. `peek` and `remove` are separate so a
/// consumer can process the eldest element and only then drop it; if the
/// process dies in between, the element is still there after reopening.
///
/// Writes land in space the committed header does not reference yet, then a
/// single header write publishes them. A crash or I/O error before that write
/// leaves the previous queue state intact on disk.
///
/// The queue assumes a single owner; it does no internal locking.
pub struct QueueFile<S: Storage = FileStore> {
    store: S,
    header: QueueHeader,
    durability: Durability,
    poisoned: bool,
}

impl QueueFile<FileStore> {
    /// Opens the queue at `path`, creating it if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::open_with(path, QueueOptions::new())
    }

    pub fn open_with(path: impl AsRef<Path>, options: QueueOptions) -> Result<Self, Error> {
        options.validate()?;
        let path = path.as_ref();
        let exists = path
            .try_exists()
            .map_err(|err| Error::io(err).with_path(path))?;
        if !exists {
            initialize(path, options)?;
        }
        let store = FileStore::open(path)?;
        Self::load(store, options.durability)
    }
}

impl<S: Storage> QueueFile<S> {
    /// Wraps an already opened store. An empty store is initialized in place.
    pub fn with_store(mut store: S, options: QueueOptions) -> Result<Self, Error> {
        options.validate()?;
        let len = store.len().map_err(|err| store_error(&store, err))?;
        if len == 0 {
            let header = QueueHeader::new(options.initial_length);
            store
                .set_len(u64::from(options.initial_length))
                .and_then(|()| store.write_at(0, &header.encode()))
                .and_then(|()| store.sync_all())
                .map_err(|err| store_error(&store, err))?;
        }
        Self::load(store, options.durability)
    }

    fn load(store: S, durability: Durability) -> Result<Self, Error> {
        let header = read_committed_header(&store)?;
        tracing::debug!(
            file_length = header.file_length,
            element_count = header.element_count,
            "opened queue file"
        );
        Ok(Self {
            store,
            header,
            durability,
            poisoned: false,
        })
    }

    /// Appends `data` as the newest element.
    pub fn add(&mut self, data: &[u8]) -> Result<(), Error> {
        self.check_usable()?;
        let plan = plan::plan_append(self.header, data.len())?;
        match self.apply_append(&plan, data) {
            Ok(()) => {
                self.header = plan.next_header;
                Ok(())
            }
            Err(err) => Err(self.recover(err)),
        }
    }

    /// Returns a copy of the eldest element, or `None` when the queue is empty.
    pub fn peek(&self) -> Result<Option<Vec<u8>>, Error> {
        self.check_usable()?;
        if self.header.is_empty() {
            return Ok(None);
        }
        element::read_payload(&self.store, self.header.first, self.header.file_length)
            .map(Some)
            .map_err(|err| {
                self.store_error(err)
                    .with_message("failed to read eldest element")
                    .with_offset(u64::from(self.header.first.position))
            })
    }

    /// Calls `reader` with a stream over the eldest element and its length.
    /// Returns `None` without calling it when the queue is empty.
    pub fn peek_with<R, F>(&self, reader: F) -> Result<Option<R>, Error>
    where
        F: FnOnce(&mut ElementReader<'_, S>, u32) -> io::Result<R>,
    {
        self.check_usable()?;
        if self.header.is_empty() {
            return Ok(None);
        }
        let first = self.header.first;
        let mut stream = ElementReader::new(&self.store, first, self.header.file_length);
        reader(&mut stream, first.length)
            .map(Some)
            .map_err(|err| self.store_error(err).with_message("element reader failed"))
    }

    /// Calls `reader` once per element, eldest first, until it breaks.
    pub fn for_each<F>(&self, mut reader: F) -> Result<(), Error>
    where
        F: FnMut(&mut ElementReader<'_, S>, u32) -> io::Result<ControlFlow<()>>,
    {
        self.check_usable()?;
        let file_length = self.header.file_length;
        let mut position = self.header.first.position;
        for _ in 0..self.header.element_count {
            let current = self.element_at(position)?;
            let mut stream = ElementReader::new(&self.store, current, file_length);
            let flow = reader(&mut stream, current.length)
                .map_err(|err| self.store_error(err).with_message("element reader failed"))?;
            if flow.is_break() {
                break;
            }
            position = ring::next_position(current, file_length);
        }
        Ok(())
    }

    /// Removes the eldest element.
    pub fn remove(&mut self) -> Result<(), Error> {
        self.check_usable()?;
        let next = plan::plan_remove(self.header, &self.store)
            .map_err(|err| self.with_store_path(err))?;
        match self.commit(&next) {
            Ok(()) => {
                self.header = next;
                Ok(())
            }
            Err(err) => Err(self.recover(err)),
        }
    }

    /// Removes every element. The file keeps its current length.
    pub fn clear(&mut self) -> Result<(), Error> {
        self.check_usable()?;
        let next = QueueHeader::new(self.header.file_length);
        match self.commit(&next) {
            Ok(()) => {
                tracing::debug!(
                    removed = self.header.element_count,
                    file_length = next.file_length,
                    "cleared queue file"
                );
                self.header = next;
                Ok(())
            }
            Err(err) => Err(self.recover(err)),
        }
    }

    pub fn size(&self) -> u32 {
        self.header.element_count
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_empty()
    }

    pub fn file_length(&self) -> u32 {
        self.header.file_length
    }

    pub fn used_bytes(&self) -> u64 {
        ring::used_bytes(&self.header)
    }

    pub fn remaining_bytes(&self) -> u64 {
        ring::remaining_bytes(&self.header)
    }

    pub fn header(&self) -> QueueHeader {
        self.header
    }

    pub fn path(&self) -> Option<&Path> {
        self.store.path()
    }

    pub fn info(&self) -> QueueInfo {
        QueueInfo {
            path: self.store.path().map(Path::to_path_buf),
            file_length: self.header.file_length,
            element_count: self.header.element_count,
            used_bytes: self.used_bytes(),
            free_bytes: self.remaining_bytes(),
            first: self.header.first.into(),
            last: self.header.last.into(),
        }
    }

    /// Walks every live element and checks it against the header.
    pub fn validate(&self) -> Result<(), Error> {
        self.check_usable()?;
        validate::validate_queue_state(self.header, &self.store)
            .map_err(|err| self.with_store_path(err))
    }

    /// Flushes and releases the file.
    pub fn close(mut self) -> Result<(), Error> {
        self.store.sync_all().map_err(|err| self.store_error(err))
    }

    fn apply_append(&mut self, plan: &AppendPlan, data: &[u8]) -> Result<(), Error> {
        if let Some(expansion) = &plan.expansion {
            self.expand(expansion)?;
        }
        let file_length = plan.next_header.file_length;
        element::write_element(&mut self.store, plan.element, data, file_length).map_err(|err| {
            self.store_error(err)
                .with_message("failed to write element")
                .with_offset(u64::from(plan.element.position))
        })?;
        self.sync_data()?;
        self.commit(&plan.next_header)
    }

    fn expand(&mut self, expansion: &ExpansionPlan) -> Result<(), Error> {
        self.store
            .set_len(u64::from(expansion.new_length))
            .and_then(|()| self.sync_len())
            .map_err(|err| self.store_error(err).with_message("failed to grow queue file"))?;

        if let Some(relocation) = expansion.relocation {
            self.store
                .copy_within(
                    u64::from(relocation.source),
                    u64::from(relocation.len),
                    u64::from(relocation.destination),
                )
                .map_err(|err| {
                    self.store_error(err)
                        .with_message("failed to relocate wrapped elements")
                        .with_offset(u64::from(relocation.destination))
                })?;
            self.sync_data()?;
        }

        self.commit(&expansion.next_header)?;
        tracing::debug!(
            from = self.header.file_length,
            to = expansion.new_length,
            relocated = expansion.relocation.map_or(0, |relocation| relocation.len),
            "expanded queue file"
        );
        // The grown header is committed; a failed element write rolls back to it.
        self.header = expansion.next_header;
        Ok(())
    }

    /// Writes `next` over the header in one write, then syncs. A failed write
    /// may have torn the header, so the committed one is written back.
    fn commit(&mut self, next: &QueueHeader) -> Result<(), Error> {
        if let Err(err) = self.store.write_at(0, &next.encode()) {
            self.restore_header();
            return Err(self.store_error(err).with_message("failed to commit header"));
        }
        self.sync_data()
    }

    fn restore_header(&mut self) {
        let committed = self.header.encode();
        let restored = self
            .store
            .write_at(0, &committed)
            .and_then(|()| self.store.sync_data());
        if let Err(err) = restored {
            tracing::warn!(error = %err, "failed to restore committed queue header");
        }
    }

    fn sync_data(&mut self) -> Result<(), Error> {
        if self.durability == Durability::Fast {
            return Ok(());
        }
        self.store
            .sync_data()
            .map_err(|err| self.store_error(err).with_message("failed to sync queue file"))
    }

    fn sync_len(&mut self) -> io::Result<()> {
        if self.durability == Durability::Fast {
            return Ok(());
        }
        self.store.sync_all()
    }

    /// Brings the cached header back in line with what is committed after a
    /// failed mutation. If that is impossible the instance stops serving.
    fn recover(&mut self, err: Error) -> Error {
        match read_committed_header(&self.store) {
            Ok(header) => {
                if header != self.header {
                    tracing::warn!(
                        error = %err,
                        "queue header changed during failed mutation; resynced"
                    );
                }
                self.header = header;
            }
            Err(resync) => {
                tracing::warn!(
                    error = %err,
                    resync_error = %resync,
                    "queue header unreadable after failed mutation; reopen required"
                );
                self.poisoned = true;
            }
        }
        err
    }

    fn check_usable(&self) -> Result<(), Error> {
        if self.poisoned {
            return Err(self.with_store_path(
                Error::new(ErrorKind::Internal)
                    .with_message("queue state is unknown after a failed write")
                    .with_hint("Drop this instance and reopen the queue file."),
            ));
        }
        Ok(())
    }

    fn element_at(&self, position: u32) -> Result<Element, Error> {
        let file_length = self.header.file_length;
        let length = element::read_length(&self.store, position, file_length).map_err(|err| {
            self.store_error(err)
                .with_message("failed to read element length")
                .with_offset(u64::from(position))
        })?;
        if u64::from(length) > ring::ring_capacity(file_length) - u64::from(ELEMENT_HEADER_LEN) {
            return Err(self.with_store_path(
                Error::new(ErrorKind::Corrupt)
                    .with_message(format!("element length {length} exceeds ring"))
                    .with_offset(u64::from(position)),
            ));
        }
        Ok(Element::new(position, length))
    }

    fn store_error(&self, err: io::Error) -> Error {
        store_error(&self.store, err)
    }

    fn with_store_path(&self, err: Error) -> Error {
        match (err.path(), self.store.path()) {
            (None, Some(path)) => err.with_path(path),
            _ => err,
        }
    }
}

impl<S: Storage> fmt::Display for QueueFile<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lengths = Vec::new();
        let walked = self.for_each(|_, length| {
            lengths.push(length.to_string());
            Ok(ControlFlow::Continue(()))
        });
        if let Err(err) = walked {
            tracing::warn!(error = %err, "failed to read element lengths");
        }
        write!(
            f,
            "QueueFile[file_length={}, size={}, first={}, last={}, element_lengths=[{}]]",
            self.header.file_length,
            self.header.element_count,
            self.header.first,
            self.header.last,
            lengths.join(", ")
        )
    }
}

impl<S: Storage> fmt::Debug for QueueFile<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueFile")
            .field("path", &self.store.path())
            .field("header", &self.header)
            .field("durability", &self.durability)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

fn store_error<S: Storage + ?Sized>(store: &S, err: io::Error) -> Error {
    let error = Error::io(err);
    match store.path() {
        Some(path) => error.with_path(path),
        None => error,
    }
}

fn read_committed_header<S: Storage + ?Sized>(store: &S) -> Result<QueueHeader, Error> {
    let with_path = |err: Error| match store.path() {
        Some(path) => err.with_path(path),
        None => err,
    };
    let actual_length = store.len().map_err(|err| store_error(store, err))?;
    if actual_length < u64::from(HEADER_LENGTH) {
        return Err(with_path(Error::new(ErrorKind::Corrupt).with_message(format!(
            "file of {actual_length} bytes is shorter than the queue header"
        ))));
    }

    let mut buf = [0u8; HEADER_LENGTH as usize];
    store
        .read_at(0, &mut buf)
        .map_err(|err| store_error(store, err).with_message("failed to read header"))?;
    let header = QueueHeader::decode(&buf).map_err(with_path)?;
    header.validate(actual_length).map_err(with_path)?;

    // The stored pointers must agree with the length prefixes they point at.
    if !header.is_empty() {
        for (label, pointer) in [("first", header.first), ("last", header.last)] {
            let length = element::read_length(store, pointer.position, header.file_length)
                .map_err(|err| store_error(store, err).with_message("failed to read element"))?;
            if length != pointer.length {
                return Err(with_path(
                    Error::new(ErrorKind::Corrupt)
                        .with_message(format!(
                            "{label} element length {length} does not match header ({})",
                            pointer.length
                        ))
                        .with_offset(u64::from(pointer.position)),
                ));
            }
        }
    }
    Ok(header)
}

/// Creates a new queue file through a temporary file and a rename, so a
/// half-initialized file never appears at `path`.
fn initialize(path: &Path, options: QueueOptions) -> Result<(), Error> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    {
        let mut store = FileStore::create(&temp, u64::from(options.initial_length))?;
        let header = QueueHeader::new(options.initial_length);
        store
            .write_at(0, &header.encode())
            .and_then(|()| store.sync_all())
            .map_err(|err| store_error(&store, err).with_message("failed to initialize queue"))?;
    }

    fs::rename(&temp, path).map_err(|err| {
        Error::io(err)
            .with_path(path)
            .with_message("failed to move initialized queue into place")
    })?;
    tracing::debug!(
        path = %path.display(),
        file_length = options.initial_length,
        "created queue file"
    );
    Ok(())
}
