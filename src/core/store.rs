//! Purpose: Positioned byte storage underneath a queue file.
//! Exports: `Storage`, `FileStore`, `MemoryStore`.
//! Role: The only layer that touches the file; the engine reads and writes through it.
//! Invariants: `FileStore` holds an exclusive advisory lock for as long as it lives.
//! Invariants: Reads fail with `UnexpectedEof` rather than returning short data.
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::core::error::{Error, ErrorKind, io_error_kind};

const COPY_CHUNK: usize = 64 * 1024;

/// Random-access storage for one queue.
pub trait Storage {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;

    fn len(&self) -> io::Result<u64>;

    fn set_len(&mut self, len: u64) -> io::Result<()>;

    /// Flushes written bytes to durable storage.
    fn sync_data(&mut self) -> io::Result<()>;

    /// Flushes written bytes and metadata such as the length.
    fn sync_all(&mut self) -> io::Result<()>;

    /// Copies `len` bytes from `src` to `dst`. The ranges must not overlap.
    fn copy_within(&mut self, src: u64, len: u64, dst: u64) -> io::Result<()> {
        let mut buf = vec![0u8; COPY_CHUNK.min(len as usize)];
        let mut copied = 0u64;
        while copied < len {
            let count = (len - copied).min(buf.len() as u64) as usize;
            self.read_at(src + copied, &mut buf[..count])?;
            self.write_at(dst + copied, &buf[..count])?;
            copied += count as u64;
        }
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        None
    }
}

/// A queue file on disk.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    file: File,
}

impl FileStore {
    /// Opens an existing file for reading and writing and locks it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| Error::io(err).with_path(&path))?;

        file.try_lock_exclusive().map_err(|err| {
            let kind = lock_error_kind(&err);
            let error = Error::new(kind).with_path(&path).with_source(err);
            if kind == ErrorKind::Busy {
                error
                    .with_message("queue file is locked by another owner")
                    .with_hint("Close the other queue instance before opening this file.")
            } else {
                error
            }
        })?;

        Ok(Self { path, file })
    }

    /// Creates (or truncates) `path` with `len` zero bytes and locks it.
    pub fn create(path: impl AsRef<Path>, len: u64) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| Error::io(err).with_path(&path))?;
        file.set_len(len)
            .map_err(|err| Error::io(err).with_path(&path))?;
        file.try_lock_exclusive()
            .map_err(|err| Error::new(lock_error_kind(&err)).with_path(&path).with_source(err))?;
        Ok(Self { path, file })
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl Storage for FileStore {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        read_exact_at(&self.file, buf, offset)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        write_all_at(&self.file, buf, offset)
    }

    fn len(&self) -> io::Result<u64> {
        self.file.metadata().map(|meta| meta.len())
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    fn sync_data(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }

    fn sync_all(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    match io_error_kind(err) {
        ErrorKind::Permission => ErrorKind::Permission,
        _ => ErrorKind::Busy,
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::read_exact_at(file, buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::write_all_at(file, buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt as _;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ));
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt as _;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ));
            }
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// In-memory storage; writes past the end extend the buffer like a file would.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    bytes: Vec<u8>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_len(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Storage for MemoryStore {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        let src = self.bytes.get(start..end).ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of store")
        })?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.bytes.len() {
            self.bytes.resize(end, 0);
        }
        self.bytes[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.bytes.len() as u64)
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.bytes.resize(len as usize, 0);
        Ok(())
    }

    fn sync_data(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn sync_all(&mut self) -> io::Result<()> {
        Ok(())
    }
}
