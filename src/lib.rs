//! A collaborative interval collection layered over an external sequence
//! CRDT (list/text merge tree). Intervals are tagged with endpoints that
//! survive concurrent removal of the positions they once pointed at by
//! sliding to a neighboring live position, so annotations (comments, rich
//! text formatting ranges, selections) stay meaningful as the underlying
//! sequence mutates underneath them.
//!
//! This crate does not implement the sequence CRDT itself — it consumes
//! one through [`sequence::SequenceClient`]. [`merge_tree::InMemorySequence`]
//! is a reference/test implementation of that trait.
//!
//! The public surface is [`collection::Collection`]; [`ops`] exposes the
//! value-factory/store/op-handler seam a generic container plugs into.

#![deny(unsafe_code)]

use std::sync::Arc;

pub mod collection;
pub mod error;
pub mod indices;
pub mod interval;
pub mod local_collection;
pub mod merge_tree;
pub mod ops;
pub mod position;
pub mod rebase;
pub mod sequence;
pub mod serde_forms;
#[cfg(feature = "test")]
pub mod test_utils;

pub use collection::{Collection, CollectionOptions};
pub use error::Error;
pub use interval::{Interval, IntervalId, IntervalType, Stickiness};
pub use position::{PositionReference, PropertyBag};
pub use sequence::{SequenceClient, SlidingPreference};

/// Property keys and type tags are short, frequently-cloned strings; an
/// `Arc<str>` is cheap to clone and orders/hashes like any other string,
/// with no need for an interning table sized for a whole-document string
/// pool the way a rich-text type tag cache would be.
pub(crate) type InternalString = Arc<str>;
