//! Shared multi-site test harness for `tests/scenarios.rs`. Each [`Site`]
//! owns its own [`InMemorySequence`] and [`Collection`]; relaying an op from
//! one site to another is done explicitly by the scenario (rather than a
//! generic broadcaster) so each test reads as its own step-by-step script.
//! Text replication between sites is likewise done by calling
//! `insert`/`remove` on every site that is supposed to see the edit at that
//! point in the scenario — an actual multi-site merge-tree CRDT is out of
//! scope, so these tests stand in for it with the minimum needed to drive
//! the interval engine through the same positions a real one would produce.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use interval_collection::collection::{CollectionOptions, OutboundOp, OutboundPayload};
use interval_collection::merge_tree::InMemorySequence;
use interval_collection::sequence::{LocalSeq, SeqNum};
use interval_collection::Collection;

pub struct Site {
    pub client: Rc<InMemorySequence>,
    pub collection: Rc<Collection<InMemorySequence>>,
    outbound: Rc<RefCell<HashMap<LocalSeq, OutboundOp>>>,
}

impl Site {
    pub fn new(id: u64, label: &str) -> Self {
        let client = InMemorySequence::new(id);
        let collection = Collection::new(label, client.clone(), CollectionOptions::default());
        let outbound: Rc<RefCell<HashMap<LocalSeq, OutboundOp>>> = Rc::new(RefCell::new(HashMap::new()));
        let store = outbound.clone();
        collection.set_emitter(move |op| {
            store.borrow_mut().insert(op.local_seq, op);
        });
        Self { client, collection, outbound }
    }

    /// Drains every op currently held for this site, in local-seq order:
    /// local ops are assigned strictly increasing local-seq values and stay
    /// FIFO.
    pub fn take_outbound(&self) -> Vec<OutboundOp> {
        let mut ops: Vec<OutboundOp> = self.outbound.borrow_mut().drain().map(|(_, v)| v).collect();
        ops.sort_by_key(|op| op.local_seq);
        ops
    }
}

/// Delivers one op to `site`: `local = true` when `site` is the op's own
/// originator.
pub fn ack_on(site: &Site, op: &OutboundOp, local: bool, seq: SeqNum) {
    let local_seq = if local { Some(op.local_seq) } else { None };
    match op.payload.clone() {
        OutboundPayload::Add(payload) => site.collection.ack_add(payload, local, local_seq, seq),
        OutboundPayload::Change(payload) => site.collection.ack_change(payload, local, local_seq, seq),
        OutboundPayload::Delete(payload) => site.collection.ack_delete(payload, local),
    }
}

/// A monotonic stand-in for the shared document sequence number a real
/// server would stamp every op with on ack.
#[derive(Default)]
pub struct SeqClock(std::cell::Cell<SeqNum>);

impl SeqClock {
    pub fn next(&self) -> SeqNum {
        let s = self.0.get() + 1;
        self.0.set(s);
        s
    }
}

/// Takes every op currently held by `from` and delivers it to every site in
/// `to` (including `from` itself, with `local` set accordingly) — the
/// common case where everyone is connected and acks arrive in submission
/// order.
pub fn broadcast(from: &Site, to: &[&Site], clock: &SeqClock) {
    for op in from.take_outbound() {
        let seq = clock.next();
        for site in to {
            let local = Rc::ptr_eq(&site.client, &from.client);
            ack_on(site, &op, local, seq);
        }
    }
}
