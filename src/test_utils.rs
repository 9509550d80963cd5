//! Arbitrary-driven property fuzzing harness: a sequence of
//! `Arbitrary`-derived actions is applied to a single site and a handful of
//! invariants are checked after every step and at the end.
//!
//! Multi-site convergence is exercised directly in `tests/scenarios.rs`
//! instead of here, by hand-replicating text edits across two
//! [`InMemorySequence`]s the way a real merge-tree would — building an
//! actual multi-site merge-tree CRDT to drive this fuzzer is out of scope.
//! What this harness can fuzz on a single site is the interval engine's own
//! bookkeeping: id lookup identity, index coherence across slide bursts, and
//! pending-change ordering across submit/ack/disconnect/reconnect.

use std::cell::RefCell;
use std::rc::Rc;

use arbitrary::Arbitrary;
use fxhash::FxHashMap;

use crate::collection::{Collection, CollectionOptions, OutboundOp, OutboundPayload};
use crate::interval::{IntervalId, IntervalType, Stickiness};
use crate::merge_tree::InMemorySequence;
use crate::ops;
use crate::position::PropertyBag;
use crate::sequence::{LocalSeq, SeqNum, SequenceClient};

#[derive(Arbitrary, Clone, Copy, Debug)]
pub enum Action {
    InsertText { pos: u8, len: u8 },
    RemoveText { pos: u8, len: u8 },
    AddInterval { start: u8, end: u8 },
    ChangeInterval { which: u8, start: u8, end: u8 },
    RemoveInterval { which: u8 },
    ChangeProperties { which: u8, value: u8 },
    Disconnect,
    Reconnect,
}

/// A single site: an [`InMemorySequence`] paired with a [`Collection`] over
/// it, plus the harness's stand-in for "the server acked this op" — a
/// held-by-local-seq map of the latest payload emitted for each still-live
/// local op, drained into a real `ack_*` call whenever the site is
/// connected.
pub struct Actor {
    pub client: Rc<InMemorySequence>,
    pub collection: Rc<Collection<InMemorySequence>>,
    outbound: Rc<RefCell<FxHashMap<LocalSeq, OutboundOp>>>,
    next_op_seq: std::cell::Cell<SeqNum>,
}

impl Actor {
    pub fn new(id: u64) -> Self {
        let client = InMemorySequence::new(id);
        let collection = Collection::new("fuzz", client.clone(), CollectionOptions::default());
        let outbound: Rc<RefCell<FxHashMap<LocalSeq, OutboundOp>>> = Rc::new(RefCell::new(FxHashMap::default()));
        let store = outbound.clone();
        collection.set_emitter(move |op| {
            store.borrow_mut().insert(op.local_seq, op);
        });
        Self { client, collection, outbound, next_op_seq: std::cell::Cell::new(0) }
    }

    fn next_seq(&self) -> SeqNum {
        let seq = self.next_op_seq.get() + 1;
        self.next_op_seq.set(seq);
        seq
    }

    /// Drains every currently-held outbound op and acks it locally, as if a
    /// server immediately echoed it back. Only called while connected; a
    /// disconnected site just keeps accumulating.
    pub fn sync(&self) {
        if !self.collection.is_connected() {
            return;
        }
        let pending: Vec<OutboundOp> = self.outbound.borrow_mut().drain().map(|(_, op)| op).collect();
        for op in pending {
            let seq = self.next_seq();
            match op.payload {
                OutboundPayload::Add(payload) => {
                    self.collection.ack_add(payload, true, Some(op.local_seq), seq);
                }
                OutboundPayload::Change(payload) => {
                    self.collection.ack_change(payload, true, Some(op.local_seq), seq);
                }
                OutboundPayload::Delete(_) => {
                    // local delete acks are a no-op.
                }
            }
        }
    }

    fn len(&self) -> i64 {
        self.client.len()
    }

    fn ids(&self) -> Vec<IntervalId> {
        self.collection.iter().iter().map(|i| i.borrow().id().cloned().unwrap()).collect()
    }

    fn pick_id(&self, which: u8) -> Option<IntervalId> {
        let ids = self.ids();
        if ids.is_empty() {
            None
        } else {
            Some(ids[which as usize % ids.len()].clone())
        }
    }
}

/// Asserts the invariants that hold at any quiescent point for a single
/// site: id-index identity, and serialize/deserialize being a faithful
/// round trip.
fn check_invariants(actor: &Actor) {
    for interval in actor.collection.iter() {
        let id = interval.borrow().id().cloned().expect("attached interval always has an id");
        let looked_up = actor.collection.get_interval_by_id(&id).expect("id index must find every attached interval");
        assert!(Rc::ptr_eq(&interval, &looked_up), "getIntervalById must return the same interval object");
    }

    let serialized = ops::store(&actor.collection);
    let reloaded_client = actor.client.clone();
    let reloaded = ops::load(serialized.clone(), reloaded_client, CollectionOptions::default(), |_| {});
    let mut before: Vec<_> = actor
        .collection
        .iter()
        .iter()
        .map(|i| {
            let b = i.borrow();
            (b.id().cloned(), b.resolved_start(actor.client.as_ref()), b.resolved_end(actor.client.as_ref()))
        })
        .collect();
    let mut after: Vec<_> = reloaded
        .iter()
        .iter()
        .map(|i| {
            let b = i.borrow();
            (b.id().cloned(), b.resolved_start(reloaded.client().as_ref()), b.resolved_end(reloaded.client().as_ref()))
        })
        .collect();
    before.sort_by(|a, b| a.0.cmp(&b.0));
    after.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(before, after, "load(store(c)) must reproduce the same (id, start, end) tuples");
}

fn clamp_range(len: i64, a: u8, b: u8) -> Option<(i64, i64)> {
    if len <= 0 {
        return None;
    }
    let lo = (a as i64 % len).max(0);
    let hi = (b as i64 % len).max(0);
    let (start, end) = if lo <= hi { (lo, hi) } else { (hi, lo) };
    if start == end {
        None
    } else {
        Some((start + 1, end + 1))
    }
}

pub fn apply_action(actor: &Actor, action: Action) {
    match action {
        Action::InsertText { pos, len } => {
            if len == 0 {
                return;
            }
            let pos = pos as i64 % (actor.len() + 1);
            let text: String = (0..(len % 8).max(1)).map(|_| 'x').collect();
            actor.client.insert(pos, &text);
        }
        Action::RemoveText { pos, len } => {
            let live = actor.len();
            if live == 0 {
                return;
            }
            let pos = pos as i64 % live;
            let len = (len as i64 % (live - pos)).max(1);
            actor.client.remove(pos, pos + len);
        }
        Action::AddInterval { start, end } => {
            let Some((start, end)) = clamp_range(actor.len(), start, end) else { return };
            let _ = actor.collection.add(start, end, IntervalType::Simple, PropertyBag::new(), Stickiness::default());
        }
        Action::ChangeInterval { which, start, end } => {
            let Some(id) = actor.pick_id(which) else { return };
            let Some((start, end)) = clamp_range(actor.len(), start, end) else { return };
            actor.collection.change(&id, Some(start), Some(end));
        }
        Action::RemoveInterval { which } => {
            let Some(id) = actor.pick_id(which) else { return };
            actor.collection.remove_interval_by_id(&id);
        }
        Action::ChangeProperties { which, value } => {
            let Some(id) = actor.pick_id(which) else { return };
            let mut props = PropertyBag::new();
            props.insert("fuzz".into(), serde_json::Value::Number(value.into()));
            let _ = actor.collection.change_properties(&id, props);
        }
        Action::Disconnect => actor.collection.set_connected(false),
        Action::Reconnect => {
            actor.collection.set_connected(true);
            actor.client.fire_normalize();
        }
    }
}

pub fn fuzzing(actions: Vec<Action>) {
    let actor = Actor::new(1);
    for action in actions {
        debug_log::group!("{:?}", &action);
        apply_action(&actor, action);
        actor.sync();
        check_invariants(&actor);
        debug_log::group_end!();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use Action::*;

    #[test]
    fn fuzz_basic() {
        fuzzing(vec![
            InsertText { pos: 0, len: 6 },
            AddInterval { start: 1, end: 4 },
            RemoveText { pos: 1, len: 1 },
            ChangeProperties { which: 0, value: 3 },
        ]);
    }

    #[test]
    fn fuzz_disconnect_reconnect() {
        fuzzing(vec![
            InsertText { pos: 0, len: 8 },
            AddInterval { start: 1, end: 6 },
            Disconnect,
            ChangeInterval { which: 0, start: 2, end: 5 },
            InsertText { pos: 0, len: 2 },
            Reconnect,
        ]);
    }

    #[test]
    fn fuzz_remove_then_readd() {
        fuzzing(vec![
            InsertText { pos: 0, len: 4 },
            AddInterval { start: 1, end: 2 },
            RemoveInterval { which: 0 },
            AddInterval { start: 1, end: 3 },
            RemoveText { pos: 0, len: 1 },
        ]);
    }
}
