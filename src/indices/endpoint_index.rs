use std::collections::BTreeMap;

use crate::sequence::SequenceClient;

use super::{key_at, lower_bound, upper_bound, IntervalRef, OrderKey};

/// Ordered by end reference position; supports `previousInterval`/
/// `nextInterval`.
#[derive(Debug)]
pub struct EndpointIndex<S> {
    tree: BTreeMap<OrderKey, IntervalRef<S>>,
}

impl<S> Default for EndpointIndex<S> {
    fn default() -> Self {
        Self { tree: BTreeMap::new() }
    }
}

impl<S> EndpointIndex<S> {
    pub fn new() -> Self {
        Self::default()
    }

    fn key_of<C: SequenceClient<Segment = S>>(interval: &IntervalRef<S>, client: &C) -> OrderKey {
        let borrowed = interval.borrow();
        let pos = borrowed.resolved_end(client);
        let id = borrowed.id().expect("endpoint index: interval must have an id").clone();
        key_at(pos, &id)
    }

    pub fn add<C: SequenceClient<Segment = S>>(&mut self, interval: &IntervalRef<S>, client: &C) {
        self.tree.insert(Self::key_of(interval, client), interval.clone());
    }

    pub fn remove<C: SequenceClient<Segment = S>>(&mut self, interval: &IntervalRef<S>, client: &C) {
        self.tree.remove(&Self::key_of(interval, client));
    }

    /// The interval with the greatest end position `<= pos`.
    pub fn previous_interval(&self, pos: i64) -> Option<IntervalRef<S>> {
        self.tree
            .range(..=upper_bound(pos))
            .next_back()
            .map(|(_, v)| v.clone())
    }

    /// The interval with the smallest end position `>= pos`.
    pub fn next_interval(&self, pos: i64) -> Option<IntervalRef<S>> {
        self.tree
            .range(lower_bound(pos)..)
            .next()
            .map(|(_, v)| v.clone())
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}
