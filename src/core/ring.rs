//! Purpose: Circular addressing over the ring region that follows the header.
//! Exports: `wrap_position`, `advance`, `next_position`, `split_at_eof`, `used_bytes`, `remaining_bytes`.
//! Role: Pure arithmetic shared by the element codec, the planner and validation.
//! Invariants: The ring spans `[HEADER_LENGTH, file_length)`; positions past the end wrap to `HEADER_LENGTH`.
//! Invariants: Callers never advance by more than one full ring from a valid position.
use crate::core::element::{ELEMENT_HEADER_LEN, Element};
use crate::core::header::{HEADER_LENGTH, QueueHeader};

/// Bytes available to elements in a file of `file_length` bytes.
pub fn ring_capacity(file_length: u32) -> u64 {
    u64::from(file_length).saturating_sub(u64::from(HEADER_LENGTH))
}

/// Bytes an element occupies in the ring, length prefix included.
pub fn element_span(length: u32) -> u64 {
    u64::from(ELEMENT_HEADER_LEN) + u64::from(length)
}

pub fn wrap_position(position: u64, file_length: u32) -> u32 {
    let file_length = u64::from(file_length);
    let wrapped = if position < file_length {
        position
    } else {
        u64::from(HEADER_LENGTH) + position - file_length
    };
    wrapped as u32
}

pub fn advance(position: u32, by: u64, file_length: u32) -> u32 {
    wrap_position(u64::from(position) + by, file_length)
}

/// Position of the element stored right after `element`.
pub fn next_position(element: Element, file_length: u32) -> u32 {
    advance(element.position, element_span(element.length), file_length)
}

/// Splits `count` bytes starting at `position` into the run before the end of
/// the file and the run that wraps to `HEADER_LENGTH`.
pub fn split_at_eof(position: u32, count: u64, file_length: u32) -> (u64, u64) {
    let before_eof = u64::from(file_length).saturating_sub(u64::from(position));
    if count <= before_eof {
        (count, 0)
    } else {
        (before_eof, count - before_eof)
    }
}

/// Bytes of the ring covered by live elements, measured from `first` to the
/// end of `last` in ring order.
pub fn live_span(header: &QueueHeader) -> u64 {
    if header.element_count == 0 {
        return 0;
    }
    let first = u64::from(header.first.position);
    let last = u64::from(header.last.position);
    let last_span = element_span(header.last.length);
    if last >= first {
        last - first + last_span
    } else {
        u64::from(header.file_length) - first + (last - u64::from(HEADER_LENGTH)) + last_span
    }
}

/// Used bytes of the whole file, header included.
pub fn used_bytes(header: &QueueHeader) -> u64 {
    u64::from(HEADER_LENGTH) + live_span(header)
}

pub fn remaining_bytes(header: &QueueHeader) -> u64 {
    u64::from(header.file_length).saturating_sub(used_bytes(header))
}
