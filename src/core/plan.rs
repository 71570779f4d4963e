//! Purpose: Plan add/remove/expand transitions of the queue header without writing anything.
//! Exports: `plan_append`, `plan_expansion`, `plan_remove`, `AppendPlan`, `ExpansionPlan`, `Relocation`.
//! Role: Pure planning layer; `queue` applies the plans as data writes followed by one commit.
//! Invariants: Output depends only on the header, the payload length, and (for removal) stored lengths.
//! Invariants: A planned header never names bytes that the plan has not written first.
use crate::core::element::{self, ELEMENT_HEADER_LEN, Element};
use crate::core::error::{Error, ErrorKind};
use crate::core::header::{HEADER_LENGTH, QueueHeader};
use crate::core::ring;
use crate::core::store::Storage;

/// Largest file the 32-bit positions can address.
pub const MAX_FILE_LENGTH: u64 = u32::MAX as u64;

/// Bytes that wrapped to the start of the ring and must move past the old end
/// of the file before the new length is committed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Relocation {
    pub source: u32,
    pub len: u32,
    pub destination: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExpansionPlan {
    pub new_length: u32,
    pub relocation: Option<Relocation>,
    pub next_header: QueueHeader,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AppendPlan {
    pub expansion: Option<ExpansionPlan>,
    pub element: Element,
    pub next_header: QueueHeader,
}

/// Plans growth of the file so an element of `data_len` bytes fits. Returns
/// `None` when the current ring already has room.
pub fn plan_expansion(header: QueueHeader, data_len: u32) -> Result<Option<ExpansionPlan>, Error> {
    let needed = ring::element_span(data_len);
    let mut remaining = ring::remaining_bytes(&header);
    if remaining >= needed {
        return Ok(None);
    }

    let old_length = u64::from(header.file_length);
    let mut new_length = old_length;
    while remaining < needed {
        remaining += new_length;
        new_length *= 2;
        if new_length > MAX_FILE_LENGTH {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!(
                    "element of {data_len} bytes would grow the queue past {MAX_FILE_LENGTH} bytes"
                ))
                .with_hint("Drain the queue or store smaller elements."));
        }
    }
    let new_length = new_length as u32;

    // Live data that ran past the old end continues at HEADER_LENGTH. Once the
    // file is longer that continuation has to sit right after the old end.
    let end_of_live = u64::from(header.first.position) + ring::live_span(&header);
    let wrapped = if header.is_empty() {
        0
    } else {
        end_of_live.saturating_sub(old_length)
    };

    let mut last = header.last;
    let relocation = if wrapped > 0 {
        if last.position < header.first.position {
            last.position = last.position + header.file_length - HEADER_LENGTH;
        }
        Some(Relocation {
            source: HEADER_LENGTH,
            len: wrapped as u32,
            destination: header.file_length,
        })
    } else {
        None
    };

    Ok(Some(ExpansionPlan {
        new_length,
        relocation,
        next_header: QueueHeader {
            file_length: new_length,
            last,
            ..header
        },
    }))
}

pub fn plan_append(header: QueueHeader, data_len: usize) -> Result<AppendPlan, Error> {
    let data_len = u32::try_from(data_len)
        .ok()
        .filter(|len| u64::from(*len) + u64::from(ELEMENT_HEADER_LEN) <= MAX_FILE_LENGTH)
        .ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("element of {data_len} bytes is too large"))
        })?;
    if header.element_count == u32::MAX {
        return Err(Error::new(ErrorKind::Usage).with_message("queue element count is at its limit"));
    }

    let expansion = plan_expansion(header, data_len)?;
    let base = expansion.map_or(header, |plan| plan.next_header);

    let position = if base.is_empty() {
        HEADER_LENGTH
    } else {
        ring::next_position(base.last, base.file_length)
    };
    let element = Element::new(position, data_len);
    let first = if base.is_empty() { element } else { base.first };

    Ok(AppendPlan {
        expansion,
        element,
        next_header: QueueHeader {
            element_count: base.element_count + 1,
            first,
            last: element,
            ..base
        },
    })
}

/// Plans removal of the eldest element. Reads the length prefix of the element
/// that becomes the new first one.
pub fn plan_remove<S: Storage + ?Sized>(
    header: QueueHeader,
    store: &S,
) -> Result<QueueHeader, Error> {
    if header.is_empty() {
        return Err(Error::new(ErrorKind::Empty).with_message("queue is empty"));
    }
    if header.element_count == 1 {
        return Ok(QueueHeader::new(header.file_length));
    }

    let position = ring::next_position(header.first, header.file_length);
    let length = element::read_length(store, position, header.file_length).map_err(|err| {
        Error::io(err)
            .with_message("failed to read next element length")
            .with_offset(u64::from(position))
    })?;
    let max_length = ring::ring_capacity(header.file_length) - u64::from(ELEMENT_HEADER_LEN);
    if u64::from(length) > max_length {
        return Err(Error::new(ErrorKind::Corrupt)
            .with_message(format!("element length {length} exceeds ring"))
            .with_offset(u64::from(position)));
    }

    Ok(QueueHeader {
        element_count: header.element_count - 1,
        first: Element::new(position, length),
        ..header
    })
}

#[cfg(test)]
mod tests {
    use super::{Relocation, plan_append, plan_expansion, plan_remove};
    use crate::core::element::{self, Element};
    use crate::core::error::ErrorKind;
    use crate::core::header::{HEADER_LENGTH, INITIAL_LENGTH, QueueHeader};
    use crate::core::ring;
    use crate::core::store::MemoryStore;

    const LEN: u32 = INITIAL_LENGTH;

    fn header(count: u32, first: Element, last: Element) -> QueueHeader {
        QueueHeader {
            file_length: LEN,
            element_count: count,
            first,
            last,
        }
    }

    #[test]
    fn first_append_lands_at_ring_start() {
        let plan = plan_append(QueueHeader::new(LEN), 10).expect("plan");
        assert_eq!(plan.expansion, None);
        assert_eq!(plan.element, Element::new(HEADER_LENGTH, 10));
        assert_eq!(plan.next_header.element_count, 1);
        assert_eq!(plan.next_header.first, plan.element);
        assert_eq!(plan.next_header.last, plan.element);
    }

    #[test]
    fn append_follows_last_element() {
        let only = Element::new(HEADER_LENGTH, 10);
        let plan = plan_append(header(1, only, only), 3).expect("plan");
        assert_eq!(plan.element.position, HEADER_LENGTH + 14);
        assert_eq!(plan.next_header.first, only);
        assert_eq!(plan.next_header.element_count, 2);
    }

    #[test]
    fn append_wraps_after_last_element_at_eof() {
        let first = Element::new(2000, 100);
        let last = Element::new(LEN - 20, 16);
        let plan = plan_append(header(2, first, last), 8).expect("plan");
        assert_eq!(plan.expansion, None);
        assert_eq!(plan.element.position, HEADER_LENGTH);
    }

    #[test]
    fn exact_fit_does_not_expand() {
        let first = Element::new(HEADER_LENGTH, 4000);
        let remaining = ring::remaining_bytes(&header(1, first, first));
        assert_eq!(remaining, 60);
        let plan = plan_append(header(1, first, first), 56).expect("plan");
        assert_eq!(plan.expansion, None);
        assert_eq!(ring::remaining_bytes(&plan.next_header), 0);
    }

    #[test]
    fn contiguous_expansion_has_no_relocation() {
        let first = Element::new(HEADER_LENGTH, 3000);
        let plan = plan_expansion(header(1, first, first), 2000)
            .expect("plan")
            .expect("expansion");
        assert_eq!(plan.new_length, LEN * 2);
        assert_eq!(plan.relocation, None);
        assert_eq!(plan.next_header.last, first);
    }

    #[test]
    fn expansion_doubles_until_element_fits() {
        let first = Element::new(HEADER_LENGTH, 253);
        let plan = plan_expansion(header(1, first, first), 8000)
            .expect("plan")
            .expect("expansion");
        assert_eq!(plan.new_length, LEN * 4);
    }

    #[test]
    fn expansion_moves_tail_of_element_crossing_eof() {
        // Blocks 2..4 from the wrap scenario: block 4 straddles the old end.
        let first = Element::new(1060, 1024);
        let last = Element::new(3116, 1024);
        let plan = plan_expansion(header(3, first, last), 1024)
            .expect("plan")
            .expect("expansion");
        assert_eq!(plan.new_length, 8192);
        assert_eq!(
            plan.relocation,
            Some(Relocation {
                source: HEADER_LENGTH,
                len: 48,
                destination: LEN,
            })
        );
        assert_eq!(plan.next_header.last, last);
        assert_eq!(ring::next_position(last, plan.new_length), 4144);
    }

    #[test]
    fn expansion_moves_every_wrapped_element() {
        let first = Element::new(1060, 1024);
        let last = Element::new(600, 256);
        let plan = plan_expansion(header(6, first, last), 1024)
            .expect("plan")
            .expect("expansion");
        assert_eq!(
            plan.relocation,
            Some(Relocation {
                source: HEADER_LENGTH,
                len: 828,
                destination: LEN,
            })
        );
        assert_eq!(plan.next_header.last, Element::new(4664, 256));
        assert_eq!(plan.next_header.first, first);
    }

    #[test]
    fn live_data_ending_at_eof_is_not_moved() {
        let first = Element::new(2000, 100);
        let last = Element::new(LEN - 20, 16);
        let plan = plan_expansion(header(2, first, last), 4000)
            .expect("plan")
            .expect("expansion");
        assert_eq!(plan.relocation, None);
        assert_eq!(ring::next_position(last, plan.new_length), LEN);
    }

    #[test]
    fn remove_advances_first() {
        let mut store = MemoryStore::with_len(LEN as usize);
        let first = Element::new(HEADER_LENGTH, 2);
        let second = Element::new(HEADER_LENGTH + 6, 3);
        element::write_element(&mut store, first, &[1, 2], LEN).expect("write");
        element::write_element(&mut store, second, &[3, 4, 5], LEN).expect("write");

        let next = plan_remove(header(2, first, second), &store).expect("plan");
        assert_eq!(next.element_count, 1);
        assert_eq!(next.first, second);
        assert_eq!(next.last, second);
    }

    #[test]
    fn removing_last_element_resets_pointers() {
        let store = MemoryStore::with_len(LEN as usize);
        let only = Element::new(HEADER_LENGTH, 2);
        let mut grown = header(1, only, only);
        grown.file_length = LEN * 2;
        let next = plan_remove(grown, &store).expect("plan");
        assert_eq!(next, QueueHeader::new(LEN * 2));
    }

    #[test]
    fn remove_from_empty_queue_fails() {
        let store = MemoryStore::with_len(LEN as usize);
        let err = plan_remove(QueueHeader::new(LEN), &store).expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::Empty);
    }

    #[test]
    fn remove_rejects_corrupt_length() {
        let mut store = MemoryStore::with_len(LEN as usize);
        let first = Element::new(HEADER_LENGTH, 2);
        element::write_element(&mut store, first, &[1, 2], LEN).expect("write");
        element::ring_write(&mut store, HEADER_LENGTH + 6, &u32::MAX.to_be_bytes(), LEN)
            .expect("write");
        let last = Element::new(HEADER_LENGTH + 6, 3);
        let err = plan_remove(header(2, first, last), &store).expect_err("corrupt");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }
}
