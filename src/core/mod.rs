// Core modules implementing the queue file: storage, layout, planning, errors.
pub mod element;
pub mod error;
pub mod header;
pub mod plan;
pub mod queue;
pub mod ring;
pub mod store;
pub mod validate;
