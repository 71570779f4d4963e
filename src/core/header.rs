// Queue header layout, checksum, and load-time invariant checks.
use crate::core::element::{ELEMENT_HEADER_LEN, Element};
use crate::core::error::{Error, ErrorKind};
use crate::core::ring;

/// Length of the header in bytes. The ring region starts right after it.
pub const HEADER_LENGTH: u32 = 32;
/// Allocation granule; the file length is always a multiple of this.
pub const BLOCK_LENGTH: u32 = 4096;
/// Length of a freshly created queue file.
pub const INITIAL_LENGTH: u32 = BLOCK_LENGTH;

const CHECKSUM_OFFSET: usize = 24;

/// In-memory mirror of the committed header.
///
/// ```text
///   [0,4)   file length
///   [4,8)   element count
///   [8,16)  first element (position, length)
///   [16,24) last element (position, length)
///   [24,28) crc32 of [0,24)
///   [28,32) reserved
/// ```
///
/// All fields are big-endian.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct QueueHeader {
    pub file_length: u32,
    pub element_count: u32,
    pub first: Element,
    pub last: Element,
}

impl QueueHeader {
    pub fn new(file_length: u32) -> Self {
        Self {
            file_length,
            element_count: 0,
            first: Element::NULL,
            last: Element::NULL,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.element_count == 0
    }

    pub fn encode(&self) -> [u8; HEADER_LENGTH as usize] {
        let mut buf = [0u8; HEADER_LENGTH as usize];
        write_u32(&mut buf, 0, self.file_length);
        write_u32(&mut buf, 4, self.element_count);
        write_u32(&mut buf, 8, self.first.position);
        write_u32(&mut buf, 12, self.first.length);
        write_u32(&mut buf, 16, self.last.position);
        write_u32(&mut buf, 20, self.last.length);
        let checksum = crc32fast::hash(&buf[..CHECKSUM_OFFSET]);
        write_u32(&mut buf, CHECKSUM_OFFSET, checksum);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < HEADER_LENGTH as usize {
            return Err(Error::new(ErrorKind::Corrupt).with_message("header too small"));
        }
        let stored = read_u32(buf, CHECKSUM_OFFSET);
        if crc32fast::hash(&buf[..CHECKSUM_OFFSET]) != stored {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message("header checksum mismatch")
                .with_offset(CHECKSUM_OFFSET as u64));
        }

        Ok(Self {
            file_length: read_u32(buf, 0),
            element_count: read_u32(buf, 4),
            first: Element::new(read_u32(buf, 8), read_u32(buf, 12)),
            last: Element::new(read_u32(buf, 16), read_u32(buf, 20)),
        })
    }

    /// Checks the header against itself and against the real file length.
    pub fn validate(&self, actual_file_length: u64) -> Result<(), Error> {
        if self.file_length < INITIAL_LENGTH || self.file_length % BLOCK_LENGTH != 0 {
            return Err(Error::new(ErrorKind::Corrupt).with_message(format!(
                "invalid file length {} (must be a multiple of {BLOCK_LENGTH})",
                self.file_length
            )));
        }
        if u64::from(self.file_length) > actual_file_length {
            return Err(Error::new(ErrorKind::Corrupt).with_message(format!(
                "file is truncated: expected {} bytes, found {actual_file_length}",
                self.file_length
            )));
        }

        if self.element_count == 0 {
            if self.first != Element::NULL || self.last != Element::NULL {
                return Err(Error::new(ErrorKind::Corrupt)
                    .with_message("empty queue has element pointers"));
            }
            return Ok(());
        }

        self.validate_pointer("first", self.first, 8)?;
        self.validate_pointer("last", self.last, 16)?;
        if self.element_count == 1 && self.first != self.last {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message("single element queue has distinct first and last"));
        }
        if self.element_count > 1 && self.first.position == self.last.position {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message(format!(
                    "{} elements but first and last share position {}",
                    self.element_count, self.first.position
                ))
                .with_offset(4));
        }
        let live_span = ring::live_span(self);
        if u64::from(self.element_count) * u64::from(ELEMENT_HEADER_LEN) > live_span {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message(format!(
                    "{} elements cannot fit in {live_span} live bytes",
                    self.element_count
                ))
                .with_offset(4));
        }
        if ring::used_bytes(self) > u64::from(self.file_length) {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message("live elements exceed file length"));
        }
        Ok(())
    }

    fn validate_pointer(&self, label: &str, element: Element, offset: u64) -> Result<(), Error> {
        if element.position < HEADER_LENGTH || element.position >= self.file_length {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message(format!(
                    "{label} element position {} outside ring [{HEADER_LENGTH}, {})",
                    element.position, self.file_length
                ))
                .with_offset(offset));
        }
        let max_length = ring::ring_capacity(self.file_length) - u64::from(ELEMENT_HEADER_LEN);
        if u64::from(element.length) > max_length {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message(format!("{label} element length {} exceeds ring", element.length))
                .with_offset(offset + 4));
        }
        Ok(())
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_be_bytes(out)
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}
