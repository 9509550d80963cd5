//! [`Collection`]: the public surface — add/remove/change,
//! property change, op emission, ack, rebase, events, iterators. Wraps a
//! [`LocalCollection`] and the pending-change bookkeeping that makes
//! concurrent local/remote reconciliation converge.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::Rc,
};

use fxhash::FxHashMap;

use crate::error::Error;
use crate::indices::{ExternalIndex, IntervalRef, IntervalVec};
use crate::interval::{IntervalId, IntervalType, Stickiness};
use crate::local_collection::{ensure_serialized_id, LocalCollection, Placement, INTERVAL_ID_KEY};
use crate::position::PropertyBag;
use crate::rebase::{rebase_local_interval, PendingIntervalOp, PendingOpKind, RebaseOutcome};
use crate::sequence::{LocalSeq, Perspective, SeqNum, SequenceClient};
use crate::serde_forms::{AddOpPayload, ChangeOpPayload, DeleteOpPayload};

#[derive(Debug, Clone, Copy)]
pub struct CollectionOptions {
    pub interval_stickiness_enabled: bool,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self { interval_stickiness_enabled: false }
    }
}

pub struct AddEvent<S> {
    pub interval: IntervalRef<S>,
    pub local: bool,
}

pub struct DeleteEvent<S> {
    pub interval: IntervalRef<S>,
    pub local: bool,
}

pub struct ChangeEvent<S> {
    pub interval: IntervalRef<S>,
    pub previous: IntervalRef<S>,
    pub local: bool,
    pub slide: bool,
}

pub struct PropertyChangedEvent<S> {
    pub interval: IntervalRef<S>,
    pub deltas: PropertyBag,
    pub local: bool,
}

/// An outbound op the embedder is expected to broadcast.
#[derive(Debug, Clone)]
pub struct OutboundOp {
    pub local_seq: LocalSeq,
    pub payload: OutboundPayload,
}

#[derive(Debug, Clone)]
pub enum OutboundPayload {
    Add(AddOpPayload),
    Delete(DeleteOpPayload),
    Change(ChangeOpPayload),
}

/// A pending local op, kept around long enough to rebase on reconnect
/// and to correlate an inbound ack back to its submission.
#[derive(Debug, Clone)]
struct PendingLocalOp {
    id: IntervalId,
    kind: PendingOpKind,
    start: Option<i64>,
    end: Option<i64>,
    reference_seq: SeqNum,
    interval_type: IntervalType,
    stickiness: Stickiness,
    properties: PropertyBag,
}

type PendingQueue = FxHashMap<IntervalId, VecDeque<(LocalSeq, i64)>>;

/// The public collaborative-interval-collection surface.
pub struct Collection<C: SequenceClient> {
    local: Rc<LocalCollection<C>>,
    client: Rc<C>,
    options: CollectionOptions,
    connected: Cell<bool>,
    pending_ops: RefCell<FxHashMap<LocalSeq, PendingLocalOp>>,
    pending_start: RefCell<PendingQueue>,
    pending_end: RefCell<PendingQueue>,
    add_listeners: RefCell<Vec<Box<dyn Fn(&AddEvent<C::Segment>)>>>,
    delete_listeners: RefCell<Vec<Box<dyn Fn(&DeleteEvent<C::Segment>)>>>,
    change_listeners: RefCell<Vec<Box<dyn Fn(&ChangeEvent<C::Segment>)>>>,
    property_listeners: RefCell<Vec<Box<dyn Fn(&PropertyChangedEvent<C::Segment>)>>>,
    #[allow(clippy::type_complexity)]
    emitter: RefCell<Option<Box<dyn Fn(OutboundOp)>>>,
}

impl<C: SequenceClient> Collection<C> {
    pub fn new(label: impl Into<String>, client: Rc<C>, options: CollectionOptions) -> Rc<Self> {
        let local = LocalCollection::new(label, client.clone());
        let this = Rc::new(Self {
            local,
            client,
            options,
            connected: Cell::new(true),
            pending_ops: RefCell::new(FxHashMap::default()),
            pending_start: RefCell::new(FxHashMap::default()),
            pending_end: RefCell::new(FxHashMap::default()),
            add_listeners: RefCell::new(Vec::new()),
            delete_listeners: RefCell::new(Vec::new()),
            change_listeners: RefCell::new(Vec::new()),
            property_listeners: RefCell::new(Vec::new()),
            emitter: RefCell::new(None),
        });

        // Every slide burst driven by the underlying sequence's own removal
        // processing (not by this Collection's own ack-slide promotion,
        // which rebuilds references directly and fires its own event) is
        // observed here and surfaced as a non-local change. See DESIGN.md for why `local` is always
        // `false` for this path.
        let weak = Rc::downgrade(&this);
        this.local.set_on_position_change(move |interval, previous| {
            if let Some(strong) = weak.upgrade() {
                strong.fire_change(interval.clone(), previous.clone(), false, true);
            }
        });

        let weak = Rc::downgrade(&this);
        this.client.set_normalize_listener(Rc::new(move || {
            if let Some(strong) = weak.upgrade() {
                strong.rebase_pending();
            }
        }));

        this
    }

    pub fn label(&self) -> &str {
        self.local.label()
    }

    pub fn client(&self) -> &Rc<C> {
        &self.client
    }

    pub fn is_connected(&self) -> bool {
        self.connected.get()
    }

    /// Models the outer host setting `connected=false` on disconnect.
    /// Local ops keep queuing while disconnected; reconnect
    /// (passing `true`) triggers rebase of pending ops.
    pub fn set_connected(&self, connected: bool) {
        let was_connected = self.connected.replace(connected);
        if connected && !was_connected {
            self.rebase_pending();
        }
    }

    pub fn set_emitter(&self, f: impl Fn(OutboundOp) + 'static) {
        *self.emitter.borrow_mut() = Some(Box::new(f));
    }

    fn emit(&self, op: OutboundOp) {
        if let Some(emitter) = &*self.emitter.borrow() {
            emitter(op);
        }
    }

    pub fn on_add(&self, f: impl Fn(&AddEvent<C::Segment>) + 'static) {
        self.add_listeners.borrow_mut().push(Box::new(f));
    }

    pub fn on_delete(&self, f: impl Fn(&DeleteEvent<C::Segment>) + 'static) {
        self.delete_listeners.borrow_mut().push(Box::new(f));
    }

    pub fn on_change(&self, f: impl Fn(&ChangeEvent<C::Segment>) + 'static) {
        self.change_listeners.borrow_mut().push(Box::new(f));
    }

    pub fn on_property_changed(&self, f: impl Fn(&PropertyChangedEvent<C::Segment>) + 'static) {
        self.property_listeners.borrow_mut().push(Box::new(f));
    }

    fn fire_add(&self, interval: IntervalRef<C::Segment>, local: bool) {
        let event = AddEvent { interval, local };
        for listener in self.add_listeners.borrow().iter() {
            listener(&event);
        }
    }

    fn fire_delete(&self, interval: IntervalRef<C::Segment>, local: bool) {
        let event = DeleteEvent { interval, local };
        for listener in self.delete_listeners.borrow().iter() {
            listener(&event);
        }
    }

    /// `previousInterval`'s endpoint references are snapshotted as
    /// `Transient` before emission so position queries on them still
    /// resolve after the live endpoint has moved on.
    fn fire_change(&self, interval: IntervalRef<C::Segment>, previous: IntervalRef<C::Segment>, local: bool, slide: bool) {
        let event = ChangeEvent { interval, previous, local, slide };
        for listener in self.change_listeners.borrow().iter() {
            listener(&event);
        }
    }

    fn fire_property_changed(&self, interval: IntervalRef<C::Segment>, deltas: PropertyBag, local: bool) {
        if deltas.is_empty() {
            return;
        }
        let event = PropertyChangedEvent { interval, deltas, local };
        for listener in self.property_listeners.borrow().iter() {
            listener(&event);
        }
    }

    // ---- indices -----------------------------------------------------------

    pub fn attach_index(&self, index: Box<dyn ExternalIndex<C::Segment>>) {
        self.local.attach_index(index);
    }

    pub fn get_interval_by_id(&self, id: &IntervalId) -> Option<IntervalRef<C::Segment>> {
        self.local.get_by_id(id)
    }

    pub fn len(&self) -> usize {
        self.local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }

    pub fn iter(&self) -> Vec<IntervalRef<C::Segment>> {
        self.local.iter()
    }

    pub fn find_overlapping(&self, start: i64, end: i64) -> IntervalVec<C::Segment> {
        self.local.find_overlapping(start, end)
    }

    pub fn find_start_in_range(&self, start: i64, end: i64) -> IntervalVec<C::Segment> {
        self.local.find_start_in_range(start, end)
    }

    pub fn find_end_in_range(&self, start: i64, end: i64) -> IntervalVec<C::Segment> {
        self.local.find_end_in_range(start, end)
    }

    fn resolve_position(&self, pos: i64) -> Option<(C::Segment, usize)> {
        self.client.containing_segment(pos, Perspective::Local)
    }

    /// Resolves a remote op's `start`/`end` against the document as it stood
    /// at that op's `sequenceNumber`, not the receiver's current (possibly
    /// already-advanced) view — otherwise a position submitted before a
    /// concurrent edit lands on the wrong segment once that edit has since
    /// been applied locally.
    fn resolve_position_as_of(&self, pos: i64, seq: SeqNum) -> Option<(C::Segment, usize)> {
        self.client.containing_segment(pos, Perspective::AsOf(seq))
    }

    // ---- local submission ---------------------------------------------------

    /// `add(start, end, intervalType, props?, stickiness?)`.
    pub fn add(
        &self,
        start: i64,
        end: i64,
        interval_type: IntervalType,
        properties: PropertyBag,
        stickiness: Stickiness,
    ) -> Result<IntervalRef<C::Segment>, Error> {
        if interval_type.is_transient() {
            return Err(Error::TransientIntervalRejected);
        }
        if stickiness != Stickiness::default() && !self.options.interval_stickiness_enabled {
            return Err(Error::StickinessDisabled);
        }

        let start_loc = self.resolve_position(start).ok_or(Error::PositionOutOfRange(start))?;
        let end_loc = self.resolve_position(end).ok_or(Error::PositionOutOfRange(end))?;

        let interval = self.local.add_interval(
            Some(start_loc),
            Some(end_loc),
            interval_type,
            properties,
            None,
            stickiness,
        )?;

        let id = interval.borrow().id().cloned().unwrap();
        let properties_for_wire = interval.borrow().properties().clone();
        let local_seq = self.client.alloc_local_seq();
        let reference_seq = self.client.current_seq();

        self.pending_ops.borrow_mut().insert(
            local_seq,
            PendingLocalOp {
                id,
                kind: PendingOpKind::Add,
                start: Some(start),
                end: Some(end),
                reference_seq,
                interval_type,
                stickiness,
                properties: properties_for_wire.clone(),
            },
        );

        self.emit(OutboundOp {
            local_seq,
            payload: OutboundPayload::Add(AddOpPayload {
                start,
                end,
                sequence_number: reference_seq,
                interval_type,
                properties: properties_for_wire,
                stickiness: crate::serde_forms::compress_stickiness(stickiness),
            }),
        });

        self.fire_add(interval.clone(), true);
        Ok(interval)
    }

    /// `removeIntervalById(id)`.
    pub fn remove_interval_by_id(&self, id: &IntervalId) -> Option<IntervalRef<C::Segment>> {
        let interval = self.local.get_by_id(id)?;
        self.local.remove_existing_interval(&interval);
        self.pending_start.borrow_mut().remove(id);
        self.pending_end.borrow_mut().remove(id);

        self.emit(OutboundOp {
            local_seq: self.client.alloc_local_seq(),
            payload: OutboundPayload::Delete(DeleteOpPayload {
                properties: [(INTERVAL_ID_KEY.to_string().into(), serde_json::Value::String(id.as_str().to_string()))]
                    .into_iter()
                    .collect(),
            }),
        });

        self.fire_delete(interval.clone(), true);
        Some(interval)
    }

    /// `change(id, start?, end?)`.
    pub fn change(&self, id: &IntervalId, start: Option<i64>, end: Option<i64>) -> Option<IntervalRef<C::Segment>> {
        if start.is_none() && end.is_none() {
            return None;
        }
        let interval = self.local.get_by_id(id)?;
        let stickiness = interval.borrow().stickiness();

        let start_placement = match start {
            None => Placement::Keep,
            Some(pos) => match self.resolve_position(pos) {
                Some(loc) => Placement::Move(loc.0, loc.1),
                None => return None,
            },
        };
        let end_placement = match end {
            None => Placement::Keep,
            Some(pos) => match self.resolve_position(pos) {
                Some(loc) => Placement::Move(loc.0, loc.1),
                None => return None,
            },
        };

        let new_interval = self.local.change_interval(&interval, start_placement, end_placement, None, stickiness)?;

        let local_seq = self.client.alloc_local_seq();
        let reference_seq = self.client.current_seq();
        self.pending_ops.borrow_mut().insert(
            local_seq,
            PendingLocalOp {
                id: id.clone(),
                kind: PendingOpKind::Change,
                start,
                end,
                reference_seq,
                interval_type: IntervalType::Simple,
                stickiness,
                properties: PropertyBag::new(),
            },
        );
        if let Some(pos) = start {
            self.pending_start.borrow_mut().entry(id.clone()).or_default().push_back((local_seq, pos));
        }
        if let Some(pos) = end {
            self.pending_end.borrow_mut().entry(id.clone()).or_default().push_back((local_seq, pos));
        }

        let mut properties = PropertyBag::new();
        properties.insert(INTERVAL_ID_KEY.into(), serde_json::Value::String(id.as_str().to_string()));
        self.emit(OutboundOp {
            local_seq,
            payload: OutboundPayload::Change(ChangeOpPayload {
                interval_type: IntervalType::Simple,
                sequence_number: reference_seq,
                properties,
                start,
                end,
            }),
        });

        self.fire_change(new_interval.clone(), interval, true, false);
        Some(new_interval)
    }

    /// `changeProperties(id, props)`.
    pub fn change_properties(&self, id: &IntervalId, props: PropertyBag) -> Result<(), Error> {
        if props.contains_key(crate::position::RANGE_LABELS_KEY) {
            return Err(Error::RangeLabelsImmutable);
        }
        let Some(interval) = self.local.get_by_id(id) else { return Ok(()) };

        {
            let mut borrowed = interval.borrow_mut();
            borrowed.property_manager_mut().queue_local(props.clone());
        }

        let local_seq = self.client.alloc_local_seq();
        let reference_seq = self.client.current_seq();

        let mut wire_properties = props.clone();
        wire_properties.insert(INTERVAL_ID_KEY.into(), serde_json::Value::String(id.as_str().to_string()));

        self.emit(OutboundOp {
            local_seq,
            payload: OutboundPayload::Change(ChangeOpPayload {
                interval_type: IntervalType::Simple,
                sequence_number: reference_seq,
                properties: wire_properties,
                start: None,
                end: None,
            }),
        });

        self.fire_property_changed(interval, props, true);
        Ok(())
    }

    // ---- acknowledgement -----------------------------------------------------

    /// `ackAdd(serialized, local, op, metadata)`.
    pub fn ack_add(&self, mut payload: AddOpPayload, local: bool, local_seq: Option<LocalSeq>, seq: SeqNum) {
        if local {
            let local_seq = local_seq.expect("local ack_add requires a local_seq");
            let Some(pending) = self.pending_ops.borrow_mut().remove(&local_seq) else { return };
            if let Some(interval) = self.local.get_by_id(&pending.id) {
                self.ack_interval(&interval, seq);
            }
            return;
        }

        let id = ensure_serialized_id(&mut payload.properties, payload.start, payload.end);
        let Some(start_loc) = self.resolve_position_as_of(payload.start, payload.sequence_number) else { return };
        let Some(end_loc) = self.resolve_position_as_of(payload.end, payload.sequence_number) else { return };
        let stickiness = crate::serde_forms::decompress_stickiness(payload.stickiness);

        let interval = match self.local.add_interval(
            Some(start_loc),
            Some(end_loc),
            payload.interval_type,
            payload.properties,
            Some(seq),
            stickiness,
        ) {
            Ok(interval) => interval,
            Err(_) => return,
        };
        debug_assert_eq!(interval.borrow().id(), Some(&id));
        self.fire_add(interval, false);
    }

    /// `ackChange(serialized, local, op, metadata)`.
    pub fn ack_change(&self, payload: ChangeOpPayload, local: bool, local_seq: Option<LocalSeq>, seq: SeqNum) {
        let Some(id) = payload.interval_id() else { return };
        let delta = payload.property_delta();

        if local {
            let local_seq = local_seq.expect("local ack_change requires a local_seq");
            self.pending_ops.borrow_mut().remove(&local_seq);
            if payload.start.is_some() {
                self.dequeue_pending(&self.pending_start, &id, payload.start, local_seq);
            }
            if payload.end.is_some() {
                self.dequeue_pending(&self.pending_end, &id, payload.end, local_seq);
            }

            let Some(interval) = self.local.get_by_id(&id) else { return };
            let applied = if !delta.is_empty() {
                let mut borrowed = interval.borrow_mut();
                let mut props = borrowed.properties().clone();
                let applied = borrowed.property_manager_mut().ack_pending_properties(seq, &mut props);
                *borrowed.properties_mut() = props;
                applied
            } else {
                PropertyBag::new()
            };
            self.ack_interval(&interval, seq);
            if !applied.is_empty() {
                self.fire_property_changed(interval, applied, true);
            }
            return;
        }

        let Some(interval) = self.local.get_by_id(&id) else { return };
        let has_pending_start = self.pending_start.borrow().get(&id).map_or(false, |q| !q.is_empty());
        let has_pending_end = self.pending_end.borrow().get(&id).map_or(false, |q| !q.is_empty());

        let start = if has_pending_start { None } else { payload.start };
        let end = if has_pending_end { None } else { payload.end };

        let mut changed_interval = None;
        if start.is_some() || end.is_some() {
            let stickiness = interval.borrow().stickiness();
            let start_placement = match start {
                None => Placement::Keep,
                Some(pos) => match self.resolve_position_as_of(pos, payload.sequence_number) {
                    Some(loc) => Placement::Move(loc.0, loc.1),
                    None => Placement::Detach,
                },
            };
            let end_placement = match end {
                None => Placement::Keep,
                Some(pos) => match self.resolve_position_as_of(pos, payload.sequence_number) {
                    Some(loc) => Placement::Move(loc.0, loc.1),
                    None => Placement::Detach,
                },
            };
            changed_interval = self.local.change_interval(&interval, start_placement, end_placement, Some(seq), stickiness);
        }

        let mut properties_applied = PropertyBag::new();
        if !delta.is_empty() {
            let target = changed_interval.clone().unwrap_or_else(|| interval.clone());
            let mut borrowed = target.borrow_mut();
            let mut props = borrowed.properties().clone();
            properties_applied = borrowed.property_manager_mut().apply_delta(seq, delta, &mut props);
            *borrowed.properties_mut() = props;
        }

        if let Some(new_interval) = &changed_interval {
            self.fire_change(new_interval.clone(), interval.clone(), false, false);
        }
        let event_target = changed_interval.unwrap_or(interval);
        if !properties_applied.is_empty() {
            self.fire_property_changed(event_target, properties_applied, false);
        }
    }

    /// `ackDelete(serialized, local, op)`. Local acks are no-ops — the
    /// removal already happened on submit.
    pub fn ack_delete(&self, payload: DeleteOpPayload, local: bool) {
        if local {
            return;
        }
        let id = payload.interval_id();
        if let Some(interval) = self.local.get_by_id(&id) {
            self.local.remove_existing_interval(&interval);
            self.pending_start.borrow_mut().remove(&id);
            self.pending_end.borrow_mut().remove(&id);
            self.fire_delete(interval, false);
        }
    }

    fn dequeue_pending(&self, queue: &RefCell<PendingQueue>, id: &IntervalId, acked: Option<i64>, local_seq: LocalSeq) {
        let mut queues = queue.borrow_mut();
        let Some(deque) = queues.get_mut(id) else {
            panic!("ack mismatch: no pending-change entry queued for {id:?}");
        };
        let head = deque.pop_front().unwrap_or_else(|| panic!("ack mismatch: pending-change queue for {id:?} is empty"));
        crate::error::assert_invariant(
            head.0 == local_seq && Some(head.1) == acked,
            "ack_change endpoint delta does not match the head of its pending-change queue",
        );
        if deque.is_empty() {
            queues.remove(id);
        }
    }

    /// `ackInterval`: promotes every endpoint that has no local pending
    /// change from `StayOnRemove` to `SlideOnRemove`, sliding it to where
    /// the sequence says it now belongs.
    fn ack_interval(&self, interval: &IntervalRef<C::Segment>, _seq: SeqNum) {
        let id = interval.borrow().id().cloned().unwrap();
        let skip_start = self.pending_start.borrow().get(&id).map_or(false, |q| !q.is_empty());
        let skip_end = self.pending_end.borrow().get(&id).map_or(false, |q| !q.is_empty());

        let (needs_promotion, before_start, before_end) = {
            let borrowed = interval.borrow();
            let Some(seq_interval) = borrowed.as_sequence() else { return };
            let needs = (!skip_start && seq_interval.start.is_stay_on_remove()) || (!skip_end && seq_interval.end.is_stay_on_remove());
            (needs, seq_interval.resolved_start(&*self.client), seq_interval.resolved_end(&*self.client))
        };
        if !needs_promotion {
            return;
        }

        let previous = self.local.snapshot_for_event(interval);

        self.local.promote_endpoints_in_place(interval, skip_start, skip_end);

        let start_placement = if skip_start {
            Placement::Keep
        } else {
            self.slide_placement(interval, true)
        };
        let end_placement = if skip_end {
            Placement::Keep
        } else {
            self.slide_placement(interval, false)
        };

        let new_interval = self.local.rebuild_endpoints(interval, start_placement, end_placement);

        let after_start = new_interval.borrow().resolved_start(&*self.client);
        let after_end = new_interval.borrow().resolved_end(&*self.client);
        if after_start != before_start || after_end != before_end {
            self.fire_change(new_interval, previous, true, true);
        }
    }

    fn slide_placement(&self, interval: &IntervalRef<C::Segment>, is_start: bool) -> Placement<C::Segment> {
        let borrowed = interval.borrow();
        let Some(seq_interval) = borrowed.as_sequence() else { return Placement::Keep };
        let endpoint = if is_start { &seq_interval.start } else { &seq_interval.end };
        let Some((segment, offset)) = self.client.reference_location(endpoint.reference_id()) else {
            return Placement::Detach;
        };
        match self.client.slide_to_segment(&segment, offset, endpoint.sliding_preference()) {
            crate::sequence::SlideTarget::Attached { segment, offset } => Placement::Move(segment, offset),
            crate::sequence::SlideTarget::Detached => Placement::Detach,
        }
    }

    // ---- rebase --------------------------------------------------------------

    /// Rebases a single pending local op by its local-seq, used by the
    /// per-op `"rebase"` handlers in [`crate::ops`].
    pub fn rebase_local_seq(&self, local_seq: LocalSeq) {
        if let Some(pending) = self.pending_ops.borrow().get(&local_seq).cloned() {
            self.rebase_one(local_seq, pending);
        }
    }

    /// Interval rebase over every still-pending local op, in submission
    /// order.
    pub fn rebase_pending(&self) {
        let mut seqs: Vec<LocalSeq> = self.pending_ops.borrow().keys().copied().collect();
        seqs.sort_unstable();

        for local_seq in seqs {
            let Some(pending) = self.pending_ops.borrow().get(&local_seq).cloned() else { continue };
            self.rebase_one(local_seq, pending);
        }
    }

    fn rebase_one(&self, local_seq: LocalSeq, pending: PendingLocalOp) {
        let op = PendingIntervalOp {
            id: pending.id.clone(),
            kind: pending.kind,
            start: pending.start,
            end: pending.end,
            reference_seq: pending.reference_seq,
            local_seq,
            stickiness: pending.stickiness,
        };

        match rebase_local_interval(&*self.client, &op) {
            RebaseOutcome::Detached => {
                self.pending_ops.borrow_mut().remove(&local_seq);
                self.pending_start.borrow_mut().remove(&pending.id);
                self.pending_end.borrow_mut().remove(&pending.id);
                if let Some(interval) = self.local.get_by_id(&pending.id) {
                    self.local.remove_existing_interval(&interval);
                    self.fire_delete(interval, true);
                }
            }
            RebaseOutcome::Rebased(delta) => {
                let new_start = delta.start.map(|e| e.position);
                let new_end = delta.end.map(|e| e.position);

                if let Some(interval) = self.local.get_by_id(&pending.id) {
                    let stickiness = interval.borrow().stickiness();
                    let start_placement = match new_start {
                        Some(pos) => self.resolve_position(pos).map_or(Placement::Detach, |l| Placement::Move(l.0, l.1)),
                        None => Placement::Keep,
                    };
                    let end_placement = match new_end {
                        Some(pos) => self.resolve_position(pos).map_or(Placement::Detach, |l| Placement::Move(l.0, l.1)),
                        None => Placement::Keep,
                    };
                    if let Some(updated) = self.local.change_interval(&interval, start_placement, end_placement, None, stickiness) {
                        self.fire_change(updated, interval, true, false);
                    }
                }

                self.replace_pending_entry(&mut self.pending_start.borrow_mut(), &pending.id, local_seq, new_start);
                self.replace_pending_entry(&mut self.pending_end.borrow_mut(), &pending.id, local_seq, new_end);

                // The rebased positions are only valid as of *now* — a later
                // rebase pass (e.g. a second `"normalize"` before this op is
                // acked) must resolve them against this seq, not the
                // original submission-time one, or it will look for
                // `new_end` in a historical view that predates it.
                let reference_seq = self.client.current_seq();
                let kind = pending.kind;
                let properties = pending.properties.clone();
                let interval_type = pending.interval_type;
                let stickiness = pending.stickiness;
                self.pending_ops.borrow_mut().insert(
                    local_seq,
                    PendingLocalOp { start: new_start, end: new_end, reference_seq, ..pending },
                );

                let payload = match kind {
                    PendingOpKind::Add => OutboundPayload::Add(AddOpPayload {
                        start: new_start.unwrap(),
                        end: new_end.unwrap(),
                        sequence_number: reference_seq,
                        interval_type,
                        properties,
                        stickiness: crate::serde_forms::compress_stickiness(stickiness),
                    }),
                    PendingOpKind::Change => {
                        let mut wire_properties = PropertyBag::new();
                        wire_properties.insert(INTERVAL_ID_KEY.into(), serde_json::Value::String(pending.id.as_str().to_string()));
                        OutboundPayload::Change(ChangeOpPayload {
                            interval_type,
                            sequence_number: reference_seq,
                            properties: wire_properties,
                            start: new_start,
                            end: new_end,
                        })
                    }
                };
                self.emit(OutboundOp { local_seq, payload });
            }
        }
    }

    fn replace_pending_entry(&self, queue: &mut PendingQueue, id: &IntervalId, local_seq: LocalSeq, new_pos: Option<i64>) {
        let Some(deque) = queue.get_mut(id) else { return };
        let Some(pos) = new_pos else { return };
        if let Some(entry) = deque.iter_mut().find(|(seq, _)| *seq == local_seq) {
            entry.1 = pos;
        }
    }
}
