//! [`PositionReference`]: an anchor into the sequence that survives segment
//! splits/removals.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::sequence::{ReferenceId, ReferenceType, ResolvedPosition, SequenceClient, SlidingPreference};
use crate::InternalString;
use crate::interval::IntervalId;

pub type PropertyBag = BTreeMap<InternalString, Value>;

/// Reserved property key under which a reference's owning collection's
/// label is stashed, so an endpoint can be located back to its collection.
/// It is a lookup relation, not ownership: the collection exclusively owns
/// intervals.
pub const RANGE_LABELS_KEY: &str = "rangeLabels";

#[derive(Clone, Debug)]
pub struct PositionReference<S> {
    pub(crate) id: ReferenceId,
    segment: Option<S>,
    offset: usize,
    ref_type: ReferenceType,
    sliding_preference: SlidingPreference,
    properties: PropertyBag,
    owner: Option<IntervalId>,
}

impl<S: Clone> PositionReference<S> {
    pub fn new_attached(
        id: ReferenceId,
        segment: S,
        offset: usize,
        ref_type: ReferenceType,
        sliding_preference: SlidingPreference,
    ) -> Self {
        ref_type.assert_valid();
        Self {
            id,
            segment: Some(segment),
            offset,
            ref_type,
            sliding_preference,
            properties: PropertyBag::new(),
            owner: None,
        }
    }

    pub fn new_detached(id: ReferenceId, ref_type: ReferenceType, sliding_preference: SlidingPreference) -> Self {
        ref_type.assert_valid();
        Self {
            id,
            segment: None,
            offset: 0,
            ref_type,
            sliding_preference,
            properties: PropertyBag::new(),
            owner: None,
        }
    }

    pub fn reference_id(&self) -> ReferenceId {
        self.id
    }

    pub fn segment(&self) -> Option<&S> {
        self.segment.as_ref()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_detached(&self) -> bool {
        self.segment.is_none()
    }

    pub fn ref_type(&self) -> ReferenceType {
        self.ref_type
    }

    pub fn sliding_preference(&self) -> SlidingPreference {
        self.sliding_preference
    }

    pub fn is_transient(&self) -> bool {
        self.ref_type.contains(ReferenceType::TRANSIENT)
    }

    pub fn is_slide_on_remove(&self) -> bool {
        self.ref_type.contains(ReferenceType::SLIDE_ON_REMOVE)
    }

    pub fn is_stay_on_remove(&self) -> bool {
        self.ref_type.contains(ReferenceType::STAY_ON_REMOVE)
    }

    /// Promotes a pending (`StayOnRemove`) endpoint to `SlideOnRemove`, as
    /// happens on ack of the owning interval's add op.
    pub fn promote_to_slide_on_remove(&mut self) {
        self.ref_type.remove(ReferenceType::STAY_ON_REMOVE);
        self.ref_type.insert(ReferenceType::SLIDE_ON_REMOVE);
    }

    pub fn set_location(&mut self, segment: Option<S>, offset: usize) {
        self.segment = segment;
        self.offset = offset;
    }

    pub fn owner(&self) -> Option<&IntervalId> {
        self.owner.as_ref()
    }

    pub fn set_owner(&mut self, id: IntervalId) {
        self.owner = Some(id);
    }

    /// Stamps the reserved `rangeLabels` property with this reference's
    /// owning collection's label, so the endpoint can be located back to its
    /// collection.
    pub fn set_range_label(&mut self, label: &str) {
        self.properties.insert(
            RANGE_LABELS_KEY.into(),
            Value::Array(vec![Value::String(label.to_string())]),
        );
    }

    pub fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PropertyBag {
        &mut self.properties
    }

    /// A transient clone sharing this reference's current `segment`/`offset`
    /// but not tracked by the sequence client — used for `previousInterval`
    /// snapshots during slide bursts and for emitted-event
    /// positions that must resolve even after the live endpoint moved on.
    pub fn clone_transient(&self, id: ReferenceId) -> Self {
        Self {
            id,
            segment: self.segment.clone(),
            offset: self.offset,
            ref_type: ReferenceType::TRANSIENT,
            sliding_preference: self.sliding_preference,
            properties: self.properties.clone(),
            owner: self.owner.clone(),
        }
    }

    pub fn resolve<C>(&self, client: &C) -> ResolvedPosition
    where
        C: SequenceClient<Segment = S>,
    {
        client.resolve_location(self.segment.as_ref(), self.offset)
    }
}
