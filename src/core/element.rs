// Element pointers plus the wrap-aware codec for length-prefixed elements.
use std::fmt;
use std::io::{self, Read};

use crate::core::header::HEADER_LENGTH;
use crate::core::ring;
use crate::core::store::Storage;

/// Length of an element's length prefix in bytes.
pub const ELEMENT_HEADER_LEN: u32 = 4;

/// Pointer to an element stored in the ring.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Element {
    pub position: u32,
    pub length: u32,
}

impl Element {
    pub const NULL: Element = Element {
        position: 0,
        length: 0,
    };

    pub fn new(position: u32, length: u32) -> Self {
        Self { position, length }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Element[position={}, length={}]", self.position, self.length)
    }
}

/// Writes `data` at `position`, continuing at `HEADER_LENGTH` if it crosses
/// the end of the file.
pub(crate) fn ring_write<S: Storage + ?Sized>(
    store: &mut S,
    position: u32,
    data: &[u8],
    file_length: u32,
) -> io::Result<()> {
    let position = ring::wrap_position(u64::from(position), file_length);
    let (before_eof, _) = ring::split_at_eof(position, data.len() as u64, file_length);
    let (head, tail) = data.split_at(before_eof as usize);
    if !head.is_empty() {
        store.write_at(u64::from(position), head)?;
    }
    if !tail.is_empty() {
        store.write_at(u64::from(HEADER_LENGTH), tail)?;
    }
    Ok(())
}

pub(crate) fn ring_read<S: Storage + ?Sized>(
    store: &S,
    position: u32,
    buf: &mut [u8],
    file_length: u32,
) -> io::Result<()> {
    let position = ring::wrap_position(u64::from(position), file_length);
    let (before_eof, _) = ring::split_at_eof(position, buf.len() as u64, file_length);
    let (head, tail) = buf.split_at_mut(before_eof as usize);
    if !head.is_empty() {
        store.read_at(u64::from(position), head)?;
    }
    if !tail.is_empty() {
        store.read_at(u64::from(HEADER_LENGTH), tail)?;
    }
    Ok(())
}

/// Writes the length prefix and payload of `element`. The bytes stay
/// unreachable until a header naming them is committed.
pub(crate) fn write_element<S: Storage + ?Sized>(
    store: &mut S,
    element: Element,
    data: &[u8],
    file_length: u32,
) -> io::Result<()> {
    ring_write(store, element.position, &element.length.to_be_bytes(), file_length)?;
    let payload = ring::advance(element.position, u64::from(ELEMENT_HEADER_LEN), file_length);
    ring_write(store, payload, data, file_length)
}

pub(crate) fn read_length<S: Storage + ?Sized>(
    store: &S,
    position: u32,
    file_length: u32,
) -> io::Result<u32> {
    let mut buf = [0u8; ELEMENT_HEADER_LEN as usize];
    ring_read(store, position, &mut buf, file_length)?;
    Ok(u32::from_be_bytes(buf))
}

pub(crate) fn read_payload<S: Storage + ?Sized>(
    store: &S,
    element: Element,
    file_length: u32,
) -> io::Result<Vec<u8>> {
    let mut data = vec![0u8; element.length as usize];
    let payload = ring::advance(element.position, u64::from(ELEMENT_HEADER_LEN), file_length);
    ring_read(store, payload, &mut data, file_length)?;
    Ok(data)
}

/// Read-only stream over exactly one element's payload.
///
/// Reads never go past the element, and bytes that wrapped around the end of
/// the file come back in logical order.
pub struct ElementReader<'a, S: ?Sized> {
    store: &'a S,
    file_length: u32,
    position: u32,
    remaining: u32,
}

impl<'a, S: Storage + ?Sized> ElementReader<'a, S> {
    pub(crate) fn new(store: &'a S, element: Element, file_length: u32) -> Self {
        Self {
            store,
            file_length,
            position: ring::advance(element.position, u64::from(ELEMENT_HEADER_LEN), file_length),
            remaining: element.length,
        }
    }

    /// Payload bytes not read yet.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

impl<S: Storage + ?Sized> Read for ElementReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = buf.len().min(self.remaining as usize);
        if count == 0 {
            return Ok(0);
        }
        ring_read(self.store, self.position, &mut buf[..count], self.file_length)?;
        self.position = ring::advance(self.position, count as u64, self.file_length);
        self.remaining -= count as u32;
        Ok(count)
    }
}

impl<S: ?Sized> fmt::Debug for ElementReader<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementReader")
            .field("position", &self.position)
            .field("remaining", &self.remaining)
            .finish()
    }
}
