//! The consumed sequence-CRDT surface. Everything in this
//! module is a contract the interval engine calls *into*; the engine never
//! mutates the sequence and never assumes anything about how a `Segment` is
//! represented beyond `Clone + Eq + Hash + Debug`.
//!
//! A reference implementation of this trait lives in [`crate::merge_tree`]
//! for tests and demos. Production embedders are expected to back this
//! trait with their own merge-tree (that CRDT's design is explicitly a
//! non-goal of this crate).

use std::{fmt::Debug, hash::Hash, rc::Rc};

pub type ClientId = u64;
pub type LocalSeq = u64;
pub type SeqNum = u64;

/// A handle identifying a reference the engine asked a [`SequenceClient`] to
/// track. Opaque outside the client implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceId(pub u64);

bitflags::bitflags! {
    /// Reference-type flags. `SlideOnRemove` and `StayOnRemove` are
    /// mutually exclusive; callers must not set both.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ReferenceType: u16 {
        const RANGE_BEGIN    = 1 << 0;
        const RANGE_END      = 1 << 1;
        const NEST_BEGIN     = 1 << 2;
        const NEST_END       = 1 << 3;
        const SLIDE_ON_REMOVE = 1 << 4;
        const STAY_ON_REMOVE  = 1 << 5;
        const TRANSIENT       = 1 << 6;
    }
}

impl ReferenceType {
    pub fn is_begin(self) -> bool {
        self.intersects(Self::RANGE_BEGIN | Self::NEST_BEGIN)
    }

    pub fn is_end(self) -> bool {
        self.intersects(Self::RANGE_END | Self::NEST_END)
    }

    #[track_caller]
    pub fn assert_valid(self) {
        crate::error::assert_invariant(
            !(self.contains(Self::SLIDE_ON_REMOVE) && self.contains(Self::STAY_ON_REMOVE)),
            "SlideOnRemove and StayOnRemove are mutually exclusive",
        );
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlidingPreference {
    Forward,
    Backward,
}

impl SlidingPreference {
    pub fn opposite(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
        }
    }
}

/// `Local` resolves containment against the client's live current state;
/// `AsOf` resolves it against the state as of a previously observed
/// sequence number (used by interval rebase).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Perspective {
    Local,
    AsOf(SeqNum),
}

/// The sentinel used throughout the engine for "this reference's anchor
/// segment is gone and no slide target exists". Ordered after every live position so that detached
/// endpoints never satisfy an overlap test.
pub const DETACHED_SENTINEL: i64 = i64::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolvedPosition {
    At(i64),
    Detached,
}

impl ResolvedPosition {
    pub fn as_i64(self) -> i64 {
        match self {
            ResolvedPosition::At(p) => p,
            ResolvedPosition::Detached => DETACHED_SENTINEL,
        }
    }

    pub fn is_detached(self) -> bool {
        matches!(self, ResolvedPosition::Detached)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlideTarget<S> {
    Attached { segment: S, offset: usize },
    Detached,
}

/// Fired when a tracked reference is about to move (`Before`) or has
/// finished moving (`After`). `LocalCollection` installs a single shared
/// listener and dispatches by id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlideNotice {
    Before(ReferenceId),
    After(ReferenceId),
}

pub type SlideListener = Rc<dyn Fn(SlideNotice)>;

/// The trait surface consumed from the sequence CRDT. Generic
/// over the opaque segment handle type the embedding CRDT uses.
pub trait SequenceClient {
    type Segment: Clone + Eq + Hash + Debug;

    fn client_id(&self) -> ClientId;
    fn current_seq(&self) -> SeqNum;

    /// The client's collab-window local-seq counter, mutable as ops submit.
    fn peek_local_seq(&self) -> LocalSeq;
    fn alloc_local_seq(&self) -> LocalSeq;

    fn long_client_id(&self, client: ClientId) -> String;

    /// `findReconnectionPosition(segment, localSeq)`.
    fn find_reconnection_position(&self, segment: &Self::Segment, local_seq: LocalSeq) -> i64;

    /// `getContainingSegment(pos, perspective, localSeq?)`.
    fn containing_segment(
        &self,
        pos: i64,
        perspective: Perspective,
    ) -> Option<(Self::Segment, usize)>;

    /// `getSlideToSegment({segment, offset})`, given an explicit preferred
    /// direction. Tries the preferred direction first, then the opposite,
    /// then reports detached — that fallback order is owned by the
    /// implementation (it alone knows segment adjacency).
    fn slide_to_segment(
        &self,
        segment: &Self::Segment,
        offset: usize,
        preferred: SlidingPreference,
    ) -> SlideTarget<Self::Segment>;

    /// `createLocalReferencePosition`.
    fn create_local_reference(
        &self,
        segment: &Self::Segment,
        offset: usize,
        ref_type: ReferenceType,
        preferred: SlidingPreference,
    ) -> ReferenceId;

    /// `createDetachedLocalReferencePosition`.
    fn create_detached_reference(&self, ref_type: ReferenceType) -> ReferenceId;

    /// `removeLocalReferencePosition`.
    fn remove_local_reference(&self, reference: ReferenceId);

    /// Current `(segment, offset)` for a tracked reference, or `None` if it
    /// has gone detached.
    fn reference_location(&self, reference: ReferenceId) -> Option<(Self::Segment, usize)>;

    /// `Resolve(ref)`.
    fn resolve(&self, reference: ReferenceId) -> ResolvedPosition;

    /// Resolves an arbitrary, possibly-untracked `(segment, offset)` pair —
    /// used for transient clones and probe
    /// endpoints that were never registered via `create_local_reference`.
    fn resolve_location(&self, segment: Option<&Self::Segment>, offset: usize) -> ResolvedPosition;

    /// `Compare(a, b)`.
    fn compare(&self, a: ReferenceId, b: ReferenceId) -> std::cmp::Ordering {
        self.resolve(a).as_i64().cmp(&self.resolve(b).as_i64())
    }

    /// Registers the single listener that receives every slide notice for
    /// every reference this client tracks. Installing a new listener
    /// replaces the previous one.
    fn set_slide_listener(&self, listener: SlideListener);

    /// Fired when the sequence rebases pending ops. Same replace-on-set semantics as `set_slide_listener`.
    fn set_normalize_listener(&self, listener: Rc<dyn Fn()>);
}
