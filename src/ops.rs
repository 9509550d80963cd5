//! The "exposed value-type surface": a value factory producing
//! a [`Collection`] from a serialized form plus an op emitter, a store
//! function producing the serialized form back, and an ops map registering
//! the three op handlers (`"add"`, `"delete"`, `"change"`) by name, each
//! with `process`/`rebase`. This is the seam a generic map/CRDT container
//! plugs into; it is deliberately thin — everything interesting lives in
//! [`Collection`].

use std::rc::Rc;

use crate::collection::{Collection, CollectionOptions, OutboundOp};
use crate::local_collection::INTERVAL_ID_KEY;
use crate::sequence::{LocalSeq, SeqNum, SequenceClient};
use crate::serde_forms::{AddOpPayload, ChangeOpPayload, DeleteOpPayload, SerializedCollectionV2, SerializedIntervalV2};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpName {
    Add,
    Delete,
    Change,
}

impl OpName {
    pub fn as_str(self) -> &'static str {
        match self {
            OpName::Add => "add",
            OpName::Delete => "delete",
            OpName::Change => "change",
        }
    }
}

/// A single registered op handler: `process` applies an inbound op,
/// `rebase` recomputes a still-pending local op's payload. Delete's
/// `rebase` is identity — deletes are addressed by id, so nothing about a
/// pending delete ever needs recomputing against new sequence state.
pub trait OpHandler<C: SequenceClient> {
    fn name(&self) -> OpName;
    fn process(&self, collection: &Collection<C>, params: serde_json::Value, local: bool, local_seq: Option<LocalSeq>, sequence_number: SeqNum);
    fn rebase(&self, collection: &Collection<C>, local_seq: LocalSeq);
}

pub struct AddHandler;
impl<C: SequenceClient> OpHandler<C> for AddHandler {
    fn name(&self) -> OpName {
        OpName::Add
    }
    fn process(&self, collection: &Collection<C>, params: serde_json::Value, local: bool, local_seq: Option<LocalSeq>, sequence_number: SeqNum) {
        let payload: AddOpPayload = serde_json::from_value(params).expect("malformed add op payload");
        collection.ack_add(payload, local, local_seq, sequence_number);
    }
    fn rebase(&self, collection: &Collection<C>, local_seq: LocalSeq) {
        collection.rebase_local_seq(local_seq);
    }
}

pub struct DeleteHandler;
impl<C: SequenceClient> OpHandler<C> for DeleteHandler {
    fn name(&self) -> OpName {
        OpName::Delete
    }
    fn process(&self, collection: &Collection<C>, params: serde_json::Value, local: bool, _local_seq: Option<LocalSeq>, _sequence_number: SeqNum) {
        let payload: DeleteOpPayload = serde_json::from_value(params).expect("malformed delete op payload");
        collection.ack_delete(payload, local);
    }
    fn rebase(&self, _collection: &Collection<C>, _local_seq: LocalSeq) {
        // identity: a pending delete addresses an id, not a position.
    }
}

pub struct ChangeHandler;
impl<C: SequenceClient> OpHandler<C> for ChangeHandler {
    fn name(&self) -> OpName {
        OpName::Change
    }
    fn process(&self, collection: &Collection<C>, params: serde_json::Value, local: bool, local_seq: Option<LocalSeq>, sequence_number: SeqNum) {
        let payload: ChangeOpPayload = serde_json::from_value(params).expect("malformed change op payload");
        collection.ack_change(payload, local, local_seq, sequence_number);
    }
    fn rebase(&self, collection: &Collection<C>, local_seq: LocalSeq) {
        collection.rebase_local_seq(local_seq);
    }
}

/// The three op handlers, keyed by name, registered against the outer
/// container.
pub struct OpsMap<C: SequenceClient> {
    add: AddHandler,
    delete: DeleteHandler,
    change: ChangeHandler,
    _marker: std::marker::PhantomData<C>,
}

impl<C: SequenceClient> Default for OpsMap<C> {
    fn default() -> Self {
        Self { add: AddHandler, delete: DeleteHandler, change: ChangeHandler, _marker: std::marker::PhantomData }
    }
}

impl<C: SequenceClient> OpsMap<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&self, collection: &Collection<C>, name: OpName, params: serde_json::Value, local: bool, local_seq: Option<LocalSeq>, sequence_number: SeqNum) {
        match name {
            OpName::Add => self.add.process(collection, params, local, local_seq, sequence_number),
            OpName::Delete => self.delete.process(collection, params, local, local_seq, sequence_number),
            OpName::Change => self.change.process(collection, params, local, local_seq, sequence_number),
        }
    }

    pub fn rebase(&self, collection: &Collection<C>, name: OpName, local_seq: LocalSeq) {
        match name {
            OpName::Add => self.add.rebase(collection, local_seq),
            OpName::Delete => self.delete.rebase(collection, local_seq),
            OpName::Change => self.change.rebase(collection, local_seq),
        }
    }
}

/// An op ready to cross the wire: the op name plus its JSON-encoded
/// payload, as handed to the outer container's emitter.
#[derive(Debug, Clone)]
pub struct WireOp {
    pub name: OpName,
    pub local_seq: LocalSeq,
    pub params: serde_json::Value,
}

/// Converts a [`Collection`]'s typed [`OutboundOp`] into the `(name,
/// params)` shape an outer container's wire protocol expects.
pub fn to_wire_op(op: OutboundOp) -> WireOp {
    use crate::collection::OutboundPayload;
    match op.payload {
        OutboundPayload::Add(payload) => WireOp {
            name: OpName::Add,
            local_seq: op.local_seq,
            params: serde_json::to_value(payload).expect("add payload is always representable as JSON"),
        },
        OutboundPayload::Delete(payload) => WireOp {
            name: OpName::Delete,
            local_seq: op.local_seq,
            params: serde_json::to_value(payload).expect("delete payload is always representable as JSON"),
        },
        OutboundPayload::Change(payload) => WireOp {
            name: OpName::Change,
            local_seq: op.local_seq,
            params: serde_json::to_value(payload).expect("change payload is always representable as JSON"),
        },
    }
}

/// The value factory: builds a live [`Collection`] from its serialized V2
/// form plus an op emitter.
pub fn load<C: SequenceClient>(
    serialized: SerializedCollectionV2,
    client: Rc<C>,
    options: CollectionOptions,
    emitter: impl Fn(WireOp) + 'static,
) -> Rc<Collection<C>> {
    let collection = Collection::new(serialized.label.clone(), client, options);
    collection.set_emitter(move |op| emitter(to_wire_op(op)));

    for (start, end, seq, interval_type, mut properties, stickiness) in serialized.intervals {
        crate::serde_forms::inject_range_label(&mut properties, &serialized.label);
        let payload = AddOpPayload {
            start,
            end,
            sequence_number: seq,
            interval_type,
            properties,
            stickiness,
        };
        collection.ack_add(payload, false, None, seq);
    }

    collection
}

/// The store function: the inverse of [`load`].
pub fn store<C: SequenceClient>(collection: &Collection<C>) -> SerializedCollectionV2 {
    let mut out = SerializedCollectionV2::new(collection.label());
    for interval in collection.iter() {
        let borrowed = interval.borrow();
        let Some(seq_interval) = borrowed.as_sequence() else { continue };
        let id = borrowed.id().expect("attached interval always has an id");
        let mut properties = crate::serde_forms::strip_range_label(borrowed.properties().clone());
        properties.insert(INTERVAL_ID_KEY.into(), serde_json::Value::String(id.as_str().to_string()));
        let entry: SerializedIntervalV2 = (
            seq_interval.resolved_start(collection.client().as_ref()),
            seq_interval.resolved_end(collection.client().as_ref()),
            0,
            seq_interval.interval_type,
            properties,
            crate::serde_forms::compress_stickiness(seq_interval.stickiness),
        );
        out.intervals.push(entry);
    }
    out
}
