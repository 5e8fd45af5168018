//! Address book: per-view offsets into probe, object, exit-wave and
//! diffraction buffers.
//!
//! Rows are plain records validated once when the book is built. The book
//! also carries the rows grouped by destination pattern (see [`segments`]),
//! which is what lets the parallel backend reduce without write contention.

pub mod book;
pub mod segments;
pub mod types;

pub use book::AddressBook;
pub use segments::DestinationSegments;
pub use types::{AddressEntry, KernelGeometry, ObjectExtent, Placement};
