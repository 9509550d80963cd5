use std::collections::BTreeMap;

use crate::sequence::SequenceClient;

use super::{is_valid_query_range, key_at, lower_bound, upper_bound, IntervalRef, IntervalVec, OrderKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeIndexKind {
    Start,
    End,
}

/// The endpoint-in-range / startpoint-in-range index: an
/// ordered tree keyed by end or start position, with the probe
/// (`NegInf`/`PosInf`) and id-lexicographic tie-breaks folded into
/// `OrderKey`.
#[derive(Debug)]
pub struct RangeIndex<S> {
    kind: RangeIndexKind,
    tree: BTreeMap<OrderKey, IntervalRef<S>>,
}

impl<S> RangeIndex<S> {
    pub fn new(kind: RangeIndexKind) -> Self {
        Self { kind, tree: BTreeMap::new() }
    }

    fn position<C: SequenceClient<Segment = S>>(&self, interval: &IntervalRef<S>, client: &C) -> i64 {
        let borrowed = interval.borrow();
        match self.kind {
            RangeIndexKind::Start => borrowed.resolved_start(client),
            RangeIndexKind::End => borrowed.resolved_end(client),
        }
    }

    fn key_of<C: SequenceClient<Segment = S>>(&self, interval: &IntervalRef<S>, client: &C) -> OrderKey {
        let pos = self.position(interval, client);
        let id = interval.borrow().id().expect("range index: interval must have an id").clone();
        key_at(pos, &id)
    }

    pub fn add<C: SequenceClient<Segment = S>>(&mut self, interval: &IntervalRef<S>, client: &C) {
        self.tree.insert(self.key_of(interval, client), interval.clone());
    }

    pub fn remove<C: SequenceClient<Segment = S>>(&mut self, interval: &IntervalRef<S>, client: &C) {
        self.tree.remove(&self.key_of(interval, client));
    }

    /// Every interval whose tracked endpoint falls in `[start_pos, end_pos]`.
    /// Rejects `start_pos <= 0 || start_pos > end_pos` by returning no
    /// results.
    pub fn query(&self, start_pos: i64, end_pos: i64) -> IntervalVec<S> {
        if !is_valid_query_range(start_pos, end_pos) {
            return IntervalVec::new();
        }

        self.tree
            .range(lower_bound(start_pos)..=upper_bound(end_pos))
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}
