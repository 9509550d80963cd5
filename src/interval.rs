//! [`Interval`]: a pair of endpoints plus properties and a stable id.
//! Modeled as a tagged variant rather than an
//! inheritance hierarchy: helpers dispatch on the
//! variant tag instead of virtual calls.

use std::{cmp::Ordering, collections::VecDeque, fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::position::{PositionReference, PropertyBag};
use crate::sequence::{ReferenceId, ReferenceType, SeqNum, SequenceClient, SlidingPreference};

/// A collection-scoped stable id. Immutable once attached. Lexicographic
/// `Ord` gives the deterministic cross-site tie-break every ordered index
/// requires.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntervalId(Arc<str>);

impl IntervalId {
    pub fn new_uuid() -> Self {
        Self(uuid::Uuid::new_v4().to_string().into())
    }

    /// Deterministic id synthesized for inbound data that omits one, so
    /// every site agrees on the id of an unlabeled interval without needing
    /// to exchange it.
    pub fn legacy(start: i64, end: i64) -> Self {
        Self(format!("legacy{start}-{end}").into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for IntervalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IntervalId({})", self.0)
    }
}

impl fmt::Display for IntervalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialOrd for IntervalId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IntervalId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.as_ref().cmp(other.0.as_ref())
    }
}

impl From<&str> for IntervalId {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntervalType {
    Simple,
    Nest,
    SlideOnRemove,
    Transient,
}

impl IntervalType {
    pub fn is_transient(self) -> bool {
        matches!(self, IntervalType::Transient)
    }

    pub(crate) fn start_ref_type(self, acked_or_snapshot: bool) -> ReferenceType {
        let base = match self {
            IntervalType::Simple | IntervalType::SlideOnRemove => ReferenceType::RANGE_BEGIN,
            IntervalType::Nest => ReferenceType::NEST_BEGIN,
            IntervalType::Transient => return ReferenceType::TRANSIENT,
        };
        base | Self::lifecycle_bit(acked_or_snapshot)
    }

    pub(crate) fn end_ref_type(self, acked_or_snapshot: bool) -> ReferenceType {
        let base = match self {
            IntervalType::Simple | IntervalType::SlideOnRemove => ReferenceType::RANGE_END,
            IntervalType::Nest => ReferenceType::NEST_END,
            IntervalType::Transient => return ReferenceType::TRANSIENT,
        };
        base | Self::lifecycle_bit(acked_or_snapshot)
    }

    fn lifecycle_bit(acked_or_snapshot: bool) -> ReferenceType {
        if acked_or_snapshot {
            ReferenceType::SLIDE_ON_REMOVE
        } else {
            ReferenceType::STAY_ON_REMOVE
        }
    }
}

bitflags::bitflags! {
    /// 2-bit stickiness mask. `END` is the wire-compression
    /// default.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Stickiness: u8 {
        const START = 1 << 0;
        const END   = 1 << 1;
        const FULL  = Self::START.bits() | Self::END.bits();
    }
}

impl Default for Stickiness {
    fn default() -> Self {
        Stickiness::END
    }
}

impl Stickiness {
    /// Start's sliding preference is `Backward` when the `Start` bit is set,
    /// `Forward` otherwise.
    pub fn start_preference(self) -> SlidingPreference {
        if self.contains(Stickiness::START) {
            SlidingPreference::Backward
        } else {
            SlidingPreference::Forward
        }
    }

    /// Symmetric rule for `End`: sticky end absorbs trailing inserts, so it
    /// slides `Forward` (away from the range) when the `End` bit is set,
    /// `Backward` (toward the range) otherwise.
    pub fn end_preference(self) -> SlidingPreference {
        if self.contains(Stickiness::END) {
            SlidingPreference::Forward
        } else {
            SlidingPreference::Backward
        }
    }
}

/// Tracks pending property annotations by sequence number.
/// Concurrent property changes are resolved last-write-wins by sequence
/// number per key, and locally queued changes are promoted from a
/// placeholder to their real sequence number on ack, FIFO per id.
#[derive(Debug, Default, Clone)]
pub struct PropertyManager {
    last_applied_seq: std::collections::BTreeMap<String, SeqNum>,
    pending_local: VecDeque<PropertyBag>,
}

impl PropertyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a local `changeProperties` delta with an as-yet-unknown
    /// sequence number; queued FIFO so `ack_pending_properties` knows which
    /// delta a given ack corresponds to.
    pub fn queue_local(&mut self, delta: PropertyBag) {
        self.pending_local.push_back(delta);
    }

    pub fn has_pending_local(&self) -> bool {
        !self.pending_local.is_empty()
    }

    /// Applies the oldest queued local delta now that its op has been
    /// acked with a real sequence number. Fatal if called with nothing
    /// pending.
    pub fn ack_pending_properties(&mut self, seq: SeqNum, props: &mut PropertyBag) -> PropertyBag {
        let delta = self
            .pending_local
            .pop_front()
            .unwrap_or_else(|| panic!("ack_pending_properties: no pending local property change"));
        self.apply_delta(seq, delta, props)
    }

    /// Applies a remote (or just-acked local) delta, skipping any key whose
    /// last-applied sequence number is newer — this is the concurrent
    /// property-change ordering rule.
    pub fn apply_delta(&mut self, seq: SeqNum, delta: PropertyBag, props: &mut PropertyBag) -> PropertyBag {
        let mut applied = PropertyBag::new();
        for (key, value) in delta {
            let last = self.last_applied_seq.get(key.as_ref()).copied().unwrap_or(0);
            if seq >= last {
                self.last_applied_seq.insert(key.to_string(), seq);
                props.insert(key.clone(), value.clone());
                applied.insert(key, value);
            }
        }
        applied
    }
}

#[derive(Debug, Clone)]
pub struct NumericInterval {
    pub start: i64,
    pub end: i64,
    pub stickiness: Stickiness,
    pub properties: PropertyBag,
    pub property_manager: PropertyManager,
    pub id: Option<IntervalId>,
}

impl NumericInterval {
    pub fn new(start: i64, end: i64, stickiness: Stickiness, properties: PropertyBag) -> Self {
        Self {
            start,
            end,
            stickiness,
            properties,
            property_manager: PropertyManager::new(),
            id: None,
        }
    }

    pub fn overlaps(&self, other: &NumericInterval) -> bool {
        self.start <= other.end && self.end >= other.start
    }
}

#[derive(Debug, Clone)]
pub struct SequenceInterval<S> {
    pub start: PositionReference<S>,
    pub end: PositionReference<S>,
    pub interval_type: IntervalType,
    pub stickiness: Stickiness,
    pub properties: PropertyBag,
    pub property_manager: PropertyManager,
    pub id: Option<IntervalId>,
}

impl<S: Clone> SequenceInterval<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        start: PositionReference<S>,
        end: PositionReference<S>,
        interval_type: IntervalType,
        stickiness: Stickiness,
        properties: PropertyBag,
    ) -> Self {
        Self {
            start,
            end,
            interval_type,
            stickiness,
            properties,
            property_manager: PropertyManager::new(),
            id: None,
        }
    }

    pub fn overlaps<C: SequenceClient<Segment = S>>(&self, other: &SequenceInterval<S>, client: &C) -> bool {
        let this_start = self.start.resolve(client).as_i64();
        let this_end = self.end.resolve(client).as_i64();
        let other_start = other.start.resolve(client).as_i64();
        let other_end = other.end.resolve(client).as_i64();
        this_start <= other_end && this_end >= other_start
    }

    pub fn resolved_start<C: SequenceClient<Segment = S>>(&self, client: &C) -> i64 {
        self.start.resolve(client).as_i64()
    }

    pub fn resolved_end<C: SequenceClient<Segment = S>>(&self, client: &C) -> i64 {
        self.end.resolve(client).as_i64()
    }
}

#[derive(Debug, Clone)]
pub enum Interval<S> {
    Numeric(NumericInterval),
    Sequence(SequenceInterval<S>),
}

impl<S: Clone> Interval<S> {
    pub fn id(&self) -> Option<&IntervalId> {
        match self {
            Interval::Numeric(n) => n.id.as_ref(),
            Interval::Sequence(s) => s.id.as_ref(),
        }
    }

    /// Assigns the id once, on attach. Fatal if already set.
    pub fn set_id(&mut self, id: IntervalId) {
        let slot = match self {
            Interval::Numeric(n) => &mut n.id,
            Interval::Sequence(s) => &mut s.id,
        };
        crate::error::assert_invariant(slot.is_none(), "interval id is immutable once assigned");
        *slot = Some(id);
    }

    pub fn properties(&self) -> &PropertyBag {
        match self {
            Interval::Numeric(n) => &n.properties,
            Interval::Sequence(s) => &s.properties,
        }
    }

    pub fn properties_mut(&mut self) -> &mut PropertyBag {
        match self {
            Interval::Numeric(n) => &mut n.properties,
            Interval::Sequence(s) => &mut s.properties,
        }
    }

    pub fn property_manager_mut(&mut self) -> &mut PropertyManager {
        match self {
            Interval::Numeric(n) => &mut n.property_manager,
            Interval::Sequence(s) => &mut s.property_manager,
        }
    }

    pub fn stickiness(&self) -> Stickiness {
        match self {
            Interval::Numeric(n) => n.stickiness,
            Interval::Sequence(s) => s.stickiness,
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Interval::Numeric(_) => false,
            Interval::Sequence(s) => s.interval_type.is_transient(),
        }
    }

    pub fn as_sequence(&self) -> Option<&SequenceInterval<S>> {
        match self {
            Interval::Sequence(s) => Some(s),
            Interval::Numeric(_) => None,
        }
    }

    pub fn as_sequence_mut(&mut self) -> Option<&mut SequenceInterval<S>> {
        match self {
            Interval::Sequence(s) => Some(s),
            Interval::Numeric(_) => None,
        }
    }

    pub fn as_numeric(&self) -> Option<&NumericInterval> {
        match self {
            Interval::Numeric(n) => Some(n),
            Interval::Sequence(_) => None,
        }
    }

    /// `resolved_start`/`resolved_end` use `DETACHED_SENTINEL` for detached
    /// sequence endpoints and plain integers for numeric ones, so every
    /// index can order on a single `i64` regardless of variant.
    pub fn resolved_start<C: SequenceClient<Segment = S>>(&self, client: &C) -> i64 {
        match self {
            Interval::Numeric(n) => n.start,
            Interval::Sequence(s) => s.resolved_start(client),
        }
    }

    pub fn resolved_end<C: SequenceClient<Segment = S>>(&self, client: &C) -> i64 {
        match self {
            Interval::Numeric(n) => n.end,
            Interval::Sequence(s) => s.resolved_end(client),
        }
    }

    pub fn overlaps<C: SequenceClient<Segment = S>>(&self, other: &Interval<S>, client: &C) -> bool {
        self.resolved_start(client) <= other.resolved_end(client)
            && self.resolved_end(client) >= other.resolved_start(client)
    }

    pub fn reference_ids(&self) -> Option<(ReferenceId, ReferenceId)> {
        self.as_sequence().map(|s| (s.start.reference_id(), s.end.reference_id()))
    }
}
