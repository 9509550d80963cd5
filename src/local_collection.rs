//! [`LocalCollection`]: owns intervals and indices, wires endpoint slide
//! callbacks, serializes/deserializes.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use fxhash::FxHashMap;

use crate::error::Error;
use crate::indices::{EndpointIndex, ExternalIndex, IdIndex, IntervalRef, IntervalVec, OverlapIndex, RangeIndex, RangeIndexKind};
use crate::interval::{Interval, IntervalId, IntervalType, SequenceInterval, Stickiness};
use crate::position::{PositionReference, PropertyBag, RANGE_LABELS_KEY};
use crate::sequence::{ReferenceId, ReferenceType, SeqNum, SequenceClient, SlideNotice, SlidingPreference};

pub const INTERVAL_ID_KEY: &str = "intervalId";

/// Where an existing endpoint should land after a `changeInterval`/ack-slide
/// rebuild. Plain `Option` isn't
/// enough here because "unchanged" and "slid off the sequence entirely" are
/// both real outcomes that must be told apart from "moved to a new spot".
#[derive(Debug, Clone)]
pub enum Placement<S> {
    Keep,
    Move(S, usize),
    Detach,
}

struct PendingSlide<S> {
    count: u32,
    previous: IntervalRef<S>,
}

/// The burst-counted slide protocol: `beforeSlide` on the first endpoint of
/// a burst snapshots the interval and pulls it out of every order-sensitive
/// index; `afterSlide` on the last endpoint re-inserts it and fires
/// `on_position_change`.
pub struct LocalCollection<C: SequenceClient> {
    label: String,
    client: Rc<C>,
    id_index: RefCell<IdIndex<C::Segment>>,
    endpoint_index: RefCell<EndpointIndex<C::Segment>>,
    overlap_index: RefCell<OverlapIndex<C::Segment>>,
    start_in_range: RefCell<RangeIndex<C::Segment>>,
    end_in_range: RefCell<RangeIndex<C::Segment>>,
    extra_indices: RefCell<Vec<Box<dyn ExternalIndex<C::Segment>>>>,
    ref_owner: RefCell<FxHashMap<ReferenceId, IntervalId>>,
    pending_slide: RefCell<FxHashMap<IntervalId, PendingSlide<C::Segment>>>,
    probe_ref_counter: Cell<u64>,
    #[allow(clippy::type_complexity)]
    on_position_change: RefCell<Option<Box<dyn Fn(&IntervalRef<C::Segment>, &IntervalRef<C::Segment>)>>>,
}

impl<C: SequenceClient> LocalCollection<C> {
    pub fn new(label: impl Into<String>, client: Rc<C>) -> Rc<Self> {
        let this = Rc::new(Self {
            label: label.into(),
            client,
            id_index: RefCell::new(IdIndex::new()),
            endpoint_index: RefCell::new(EndpointIndex::new()),
            overlap_index: RefCell::new(OverlapIndex::new()),
            start_in_range: RefCell::new(RangeIndex::new(RangeIndexKind::Start)),
            end_in_range: RefCell::new(RangeIndex::new(RangeIndexKind::End)),
            extra_indices: RefCell::new(Vec::new()),
            ref_owner: RefCell::new(FxHashMap::default()),
            pending_slide: RefCell::new(FxHashMap::default()),
            probe_ref_counter: Cell::new(u64::MAX / 2),
            on_position_change: RefCell::new(None),
        });

        let weak = Rc::downgrade(&this);
        this.client.set_slide_listener(Rc::new(move |notice| {
            if let Some(strong) = weak.upgrade() {
                match notice {
                    SlideNotice::Before(id) => strong.handle_before_slide(id),
                    SlideNotice::After(id) => strong.handle_after_slide(id),
                }
            }
        }));

        this
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn client(&self) -> &Rc<C> {
        &self.client
    }

    pub fn set_on_position_change(
        &self,
        callback: impl Fn(&IntervalRef<C::Segment>, &IntervalRef<C::Segment>) + 'static,
    ) {
        *self.on_position_change.borrow_mut() = Some(Box::new(callback));
    }

    // ---- slide protocol -------------------------------------------------

    fn handle_before_slide(&self, reference: ReferenceId) {
        let Some(interval_id) = self.ref_owner.borrow().get(&reference).cloned() else {
            return;
        };
        let mut pending = self.pending_slide.borrow_mut();
        if let Some(entry) = pending.get_mut(&interval_id) {
            entry.count += 1;
            return;
        }
        let interval = self
            .id_index
            .borrow()
            .get(&interval_id)
            .unwrap_or_else(|| panic!("beforeSlide fired for an interval not in the id index"));
        let previous = self.clone_transient_snapshot(&interval);
        self.remove_from_indices_only(&interval);
        pending.insert(interval_id, PendingSlide { count: 1, previous });
    }

    fn handle_after_slide(&self, reference: ReferenceId) {
        let Some(interval_id) = self.ref_owner.borrow().get(&reference).cloned() else {
            return;
        };
        let finished = {
            let mut pending = self.pending_slide.borrow_mut();
            let entry = pending
                .get_mut(&interval_id)
                .unwrap_or_else(|| panic!("afterSlide fired without a matching beforeSlide"));
            entry.count = entry
                .count
                .checked_sub(1)
                .unwrap_or_else(|| panic!("afterSlide/beforeSlide pairing is unbalanced"));
            entry.count == 0
        };

        if !finished {
            return;
        }

        let PendingSlide { previous, .. } = self.pending_slide.borrow_mut().remove(&interval_id).unwrap();
        let interval = self.id_index.borrow().get(&interval_id).unwrap();
        self.resync_endpoint_locations(&interval);
        self.add_to_indices_only(&interval);

        if let Some(callback) = &*self.on_position_change.borrow() {
            callback(&interval, &previous);
        }
    }

    fn resync_endpoint_locations(&self, interval: &IntervalRef<C::Segment>) {
        let mut borrowed = interval.borrow_mut();
        let Some(seq) = borrowed.as_sequence_mut() else { return };
        for endpoint in [&mut seq.start, &mut seq.end] {
            match self.client.reference_location(endpoint.reference_id()) {
                Some((segment, offset)) => endpoint.set_location(Some(segment), offset),
                None => endpoint.set_location(None, 0),
            }
        }
    }

    fn next_probe_ref_id(&self) -> ReferenceId {
        let id = self.probe_ref_counter.get();
        self.probe_ref_counter.set(id + 1);
        ReferenceId(id)
    }

    /// Public entry point for `Collection` to take an event-safe snapshot of
    /// an interval's current endpoints.
    pub fn snapshot_for_event(&self, interval: &IntervalRef<C::Segment>) -> IntervalRef<C::Segment> {
        self.clone_transient_snapshot(interval)
    }

    fn clone_transient_snapshot(&self, interval: &IntervalRef<C::Segment>) -> IntervalRef<C::Segment> {
        let borrowed = interval.borrow();
        let cloned = match &*borrowed {
            Interval::Numeric(n) => Interval::Numeric(n.clone()),
            Interval::Sequence(s) => {
                let start = s.start.clone_transient(self.next_probe_ref_id());
                let end = s.end.clone_transient(self.next_probe_ref_id());
                let mut clone = SequenceInterval::new(start, end, s.interval_type, s.stickiness, s.properties.clone());
                clone.id = s.id.clone();
                clone.property_manager = s.property_manager.clone();
                Interval::Sequence(clone)
            }
        };
        Rc::new(RefCell::new(cloned))
    }

    // ---- index plumbing --------------------------------------------------

    fn add_to_indices_only(&self, interval: &IntervalRef<C::Segment>) {
        self.id_index.borrow_mut().add(interval.clone());
        self.endpoint_index.borrow_mut().add(interval, &*self.client);
        self.overlap_index.borrow_mut().add(interval, &*self.client);
        self.start_in_range.borrow_mut().add(interval, &*self.client);
        self.end_in_range.borrow_mut().add(interval, &*self.client);
        for idx in self.extra_indices.borrow_mut().iter_mut() {
            idx.on_add(interval);
        }
    }

    fn remove_from_indices_only(&self, interval: &IntervalRef<C::Segment>) {
        let id = interval.borrow().id().cloned().unwrap();
        self.id_index.borrow_mut().remove(&id);
        self.endpoint_index.borrow_mut().remove(interval, &*self.client);
        self.overlap_index.borrow_mut().remove(interval, &*self.client);
        self.start_in_range.borrow_mut().remove(interval, &*self.client);
        self.end_in_range.borrow_mut().remove(interval, &*self.client);
        for idx in self.extra_indices.borrow_mut().iter_mut() {
            idx.on_remove(&id);
        }
    }

    fn register_endpoints(&self, interval: &IntervalRef<C::Segment>) {
        if let Some((s, e)) = interval.borrow().reference_ids() {
            let id = interval.borrow().id().cloned().unwrap();
            self.ref_owner.borrow_mut().insert(s, id.clone());
            self.ref_owner.borrow_mut().insert(e, id);
        }
    }

    /// Adds to every index atomically and links slide tracking.
    fn add_to_indices(&self, interval: &IntervalRef<C::Segment>) {
        self.register_endpoints(interval);
        self.add_to_indices_only(interval);
    }

    pub fn attach_index(&self, mut index: Box<dyn ExternalIndex<C::Segment>>) {
        for interval in self.id_index.borrow().iter() {
            index.on_add(interval);
        }
        self.extra_indices.borrow_mut().push(index);
    }

    // ---- reference construction ------------------------------------------

    fn create_reference(
        &self,
        location: Option<(C::Segment, usize)>,
        ref_type: ReferenceType,
        preferred: SlidingPreference,
    ) -> PositionReference<C::Segment> {
        match location {
            Some((segment, offset)) => {
                let id = self.client.create_local_reference(&segment, offset, ref_type, preferred);
                PositionReference::new_attached(id, segment, offset, ref_type, preferred)
            }
            None => {
                let id = self.client.create_detached_reference(ref_type);
                PositionReference::new_detached(id, ref_type, preferred)
            }
        }
    }

    fn tag_owner(&self, reference: &mut PositionReference<C::Segment>, id: &IntervalId) {
        reference.set_owner(id.clone());
        reference.set_range_label(&self.label);
    }

    fn extract_or_assign_id(&self, properties: &mut PropertyBag) -> IntervalId {
        if let Some(value) = properties.get(INTERVAL_ID_KEY) {
            if let Some(s) = value.as_str() {
                return IntervalId::from(s);
            }
        }
        let id = IntervalId::new_uuid();
        properties.insert(INTERVAL_ID_KEY.into(), serde_json::Value::String(id.as_str().to_string()));
        id
    }

    fn check_range_label(&self, properties: &PropertyBag) -> Result<(), Error> {
        let Some(value) = properties.get(RANGE_LABELS_KEY) else {
            return Ok(());
        };
        let names_this_collection = value
            .as_array()
            .map(|arr| arr.iter().any(|v| v.as_str() == Some(self.label.as_str())))
            .unwrap_or(false);
        if names_this_collection {
            Ok(())
        } else {
            Err(Error::WrongCollectionLabel {
                expected: self.label.clone(),
                found: value.to_string(),
            })
        }
    }

    /// `addInterval(start, end, intervalType, props?, op?, stickiness)`.
    #[allow(clippy::too_many_arguments)]
    pub fn add_interval(
        &self,
        start: Option<(C::Segment, usize)>,
        end: Option<(C::Segment, usize)>,
        interval_type: IntervalType,
        mut properties: PropertyBag,
        op_seq: Option<SeqNum>,
        stickiness: Stickiness,
    ) -> Result<IntervalRef<C::Segment>, Error> {
        self.check_range_label(&properties)?;
        properties.remove(RANGE_LABELS_KEY);
        let id = self.extract_or_assign_id(&mut properties);

        let acked = op_seq.is_some();
        let mut start_ref = self.create_reference(start, interval_type.start_ref_type(acked), stickiness.start_preference());
        let mut end_ref = self.create_reference(end, interval_type.end_ref_type(acked), stickiness.end_preference());
        self.tag_owner(&mut start_ref, &id);
        self.tag_owner(&mut end_ref, &id);

        let mut seq_interval = SequenceInterval::new(start_ref, end_ref, interval_type, stickiness, properties);
        seq_interval.id = Some(id);
        let interval_ref: IntervalRef<C::Segment> = Rc::new(RefCell::new(Interval::Sequence(seq_interval)));
        self.add_to_indices(&interval_ref);
        Ok(interval_ref)
    }

    /// `removeExistingInterval(interval)`.
    pub fn remove_existing_interval(&self, interval: &IntervalRef<C::Segment>) {
        self.remove_from_indices_only(interval);
        if let Some((s, e)) = interval.borrow().reference_ids() {
            self.ref_owner.borrow_mut().remove(&s);
            self.ref_owner.borrow_mut().remove(&e);
            self.client.remove_local_reference(s);
            self.client.remove_local_reference(e);
        }
    }

    /// `changeInterval(interval, start?, end?, op?, localSeq?)`. Builds a
    /// fresh reference only for an endpoint that actually moved; the other endpoint's existing reference is reused
    /// verbatim, so its `ReferenceId` and slide tracking carry over
    /// unchanged.
    pub fn change_interval(
        &self,
        interval: &IntervalRef<C::Segment>,
        new_start: Placement<C::Segment>,
        new_end: Placement<C::Segment>,
        op_seq: Option<SeqNum>,
        stickiness: Stickiness,
    ) -> Option<IntervalRef<C::Segment>> {
        if matches!(new_start, Placement::Keep) && matches!(new_end, Placement::Keep) {
            return None;
        }

        let id = interval.borrow().id().cloned().unwrap();
        let (old_start, old_end, interval_type, properties, property_manager) = {
            let borrowed = interval.borrow();
            let seq = borrowed
                .as_sequence()
                .expect("change_interval only applies to sequence-anchored intervals");
            (
                seq.start.clone(),
                seq.end.clone(),
                seq.interval_type,
                seq.properties.clone(),
                seq.property_manager.clone(),
            )
        };

        self.remove_from_indices_only(interval);
        let acked = op_seq.is_some();

        let start_ref = self.rebuild_endpoint(
            &old_start,
            new_start,
            &id,
            interval_type.start_ref_type(acked),
            stickiness.start_preference(),
        );
        let end_ref = self.rebuild_endpoint(
            &old_end,
            new_end,
            &id,
            interval_type.end_ref_type(acked),
            stickiness.end_preference(),
        );

        let mut seq_interval = SequenceInterval::new(start_ref, end_ref, interval_type, stickiness, properties);
        seq_interval.id = Some(id);
        seq_interval.property_manager = property_manager;
        let new_interval: IntervalRef<C::Segment> = Rc::new(RefCell::new(Interval::Sequence(seq_interval)));
        self.add_to_indices(&new_interval);
        Some(new_interval)
    }

    /// Rebuilds both endpoints on new segments while preserving their exact
    /// `ReferenceType`/sliding preference — used by ack-slide promotion
    /// where the flags themselves (not the
    /// interval type) dictate what gets rebuilt.
    pub fn rebuild_endpoints(
        &self,
        interval: &IntervalRef<C::Segment>,
        new_start: Placement<C::Segment>,
        new_end: Placement<C::Segment>,
    ) -> IntervalRef<C::Segment> {
        let id = interval.borrow().id().cloned().unwrap();
        let (old_start, old_end, interval_type, stickiness, properties, property_manager) = {
            let borrowed = interval.borrow();
            let seq = borrowed.as_sequence().expect("rebuild_endpoints only applies to sequence intervals");
            (
                seq.start.clone(),
                seq.end.clone(),
                seq.interval_type,
                seq.stickiness,
                seq.properties.clone(),
                seq.property_manager.clone(),
            )
        };

        self.remove_from_indices_only(interval);

        let start_ref = self.rebuild_endpoint(&old_start, new_start, &id, old_start.ref_type(), old_start.sliding_preference());
        let end_ref = self.rebuild_endpoint(&old_end, new_end, &id, old_end.ref_type(), old_end.sliding_preference());

        let mut seq_interval = SequenceInterval::new(start_ref, end_ref, interval_type, stickiness, properties);
        seq_interval.id = Some(id);
        seq_interval.property_manager = property_manager;
        let new_interval: IntervalRef<C::Segment> = Rc::new(RefCell::new(Interval::Sequence(seq_interval)));
        self.add_to_indices(&new_interval);
        new_interval
    }

    /// Shared endpoint-rebuild logic for `change_interval`/`rebuild_endpoints`:
    /// `Keep` reuses the existing reference untouched, `Move`/`Detach` retire
    /// the old reference and create a fresh one with the given flags.
    fn rebuild_endpoint(
        &self,
        old: &PositionReference<C::Segment>,
        placement: Placement<C::Segment>,
        id: &IntervalId,
        ref_type: ReferenceType,
        preferred: SlidingPreference,
    ) -> PositionReference<C::Segment> {
        let location = match placement {
            Placement::Keep => return old.clone(),
            Placement::Move(segment, offset) => Some((segment, offset)),
            Placement::Detach => None,
        };
        self.ref_owner.borrow_mut().remove(&old.reference_id());
        self.client.remove_local_reference(old.reference_id());
        let mut r = self.create_reference(location, ref_type, preferred);
        self.tag_owner(&mut r, id);
        r
    }

    /// In place promotion of each endpoint's `ReferenceType` flags from
    /// `StayOnRemove` to `SlideOnRemove`, skipping an endpoint that still
    /// has a local pending change against it (see `ackInterval`).
    pub fn promote_endpoints_in_place(&self, interval: &IntervalRef<C::Segment>, skip_start: bool, skip_end: bool) {
        let mut borrowed = interval.borrow_mut();
        if let Some(seq) = borrowed.as_sequence_mut() {
            if !skip_start && seq.start.is_stay_on_remove() {
                seq.start.promote_to_slide_on_remove();
            }
            if !skip_end && seq.end.is_stay_on_remove() {
                seq.end.promote_to_slide_on_remove();
            }
        }
    }

    // ---- queries -----------------------------------------------------------

    pub fn get_by_id(&self, id: &IntervalId) -> Option<IntervalRef<C::Segment>> {
        self.id_index.borrow().get(id)
    }

    pub fn len(&self) -> usize {
        self.id_index.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_index.borrow().is_empty()
    }

    pub fn iter(&self) -> Vec<IntervalRef<C::Segment>> {
        self.id_index.borrow().iter().cloned().collect()
    }

    pub fn previous_interval(&self, pos: i64) -> Option<IntervalRef<C::Segment>> {
        self.endpoint_index.borrow().previous_interval(pos)
    }

    pub fn next_interval(&self, pos: i64) -> Option<IntervalRef<C::Segment>> {
        self.endpoint_index.borrow().next_interval(pos)
    }

    pub fn find_overlapping(&self, start_pos: i64, end_pos: i64) -> IntervalVec<C::Segment> {
        self.overlap_index.borrow().find_overlapping(start_pos, end_pos, &*self.client)
    }

    pub fn find_start_in_range(&self, start_pos: i64, end_pos: i64) -> IntervalVec<C::Segment> {
        self.start_in_range.borrow().query(start_pos, end_pos)
    }

    pub fn find_end_in_range(&self, start_pos: i64, end_pos: i64) -> IntervalVec<C::Segment> {
        self.end_in_range.borrow().query(start_pos, end_pos)
    }
}

/// Legacy id synthesis for inbound data that omits an id: deterministic so
/// every site agrees.
pub fn ensure_serialized_id(properties: &mut PropertyBag, start: i64, end: i64) -> IntervalId {
    if let Some(value) = properties.get(INTERVAL_ID_KEY) {
        if let Some(s) = value.as_str() {
            return IntervalId::from(s);
        }
    }
    let id = IntervalId::legacy(start, end);
    properties.insert(INTERVAL_ID_KEY.into(), serde_json::Value::String(id.as_str().to_string()));
    id
}
