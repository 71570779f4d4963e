// Full-walk validation of the live elements against the committed header.
// Open only checks the header and its two pointers; this scans everything.
use crate::core::element::{self, ELEMENT_HEADER_LEN};
use crate::core::error::{Error, ErrorKind};
use crate::core::header::QueueHeader;
use crate::core::ring;
use crate::core::store::Storage;

pub fn validate_queue_state<S: Storage + ?Sized>(
    header: QueueHeader,
    store: &S,
) -> Result<(), Error> {
    let actual_length = store.len().map_err(Error::io)?;
    header.validate(actual_length)?;
    if header.is_empty() {
        return Ok(());
    }

    let file_length = header.file_length;
    let capacity = ring::ring_capacity(file_length);
    let max_length = capacity - u64::from(ELEMENT_HEADER_LEN);
    let mut position = header.first.position;
    let mut consumed = 0u64;

    for index in 0..header.element_count {
        let length = element::read_length(store, position, file_length).map_err(|err| {
            Error::io(err)
                .with_message(format!("failed to read element {index}"))
                .with_offset(u64::from(position))
        })?;
        if u64::from(length) > max_length {
            return Err(corrupt(format!("element {index} length {length} exceeds ring"), position));
        }
        if index == 0 && length != header.first.length {
            return Err(corrupt("first element length does not match header", position));
        }

        consumed += ring::element_span(length);
        if consumed > capacity {
            return Err(corrupt(format!("elements overrun the ring at element {index}"), position));
        }

        if index + 1 == header.element_count {
            if position != header.last.position {
                return Err(corrupt(
                    format!(
                        "walk ended at {position} but header names {} as last",
                        header.last.position
                    ),
                    position,
                ));
            }
            if length != header.last.length {
                return Err(corrupt("last element length does not match header", position));
            }
        } else {
            position = ring::advance(position, ring::element_span(length), file_length);
        }
    }

    if consumed != ring::live_span(&header) {
        return Err(Error::new(ErrorKind::Corrupt).with_message(format!(
            "elements cover {consumed} bytes but header implies {}",
            ring::live_span(&header)
        )));
    }
    Ok(())
}

fn corrupt(message: impl Into<String>, position: u32) -> Error {
    Error::new(ErrorKind::Corrupt)
        .with_message(message)
        .with_offset(u64::from(position))
}
