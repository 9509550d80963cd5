use std::collections::BTreeMap;

use crate::sequence::SequenceClient;

use super::{is_valid_query_range, key_at, upper_bound, IntervalRef, IntervalVec, OrderKey};

/// Interval tree keyed by `(start, end)`, supporting
/// `findOverlappingIntervals`. Kept deliberately simple — a
/// `start`-ordered map scanned up to the query's upper bound — since this
/// crate's goals are correctness and convergence, not performance tuning of
/// the sequence/index layer.
#[derive(Debug)]
pub struct OverlapIndex<S> {
    by_start: BTreeMap<OrderKey, IntervalRef<S>>,
}

impl<S> Default for OverlapIndex<S> {
    fn default() -> Self {
        Self { by_start: BTreeMap::new() }
    }
}

impl<S> OverlapIndex<S> {
    pub fn new() -> Self {
        Self::default()
    }

    fn key_of<C: SequenceClient<Segment = S>>(interval: &IntervalRef<S>, client: &C) -> OrderKey {
        let borrowed = interval.borrow();
        let pos = borrowed.resolved_start(client);
        let id = borrowed.id().expect("overlap index: interval must have an id").clone();
        key_at(pos, &id)
    }

    pub fn add<C: SequenceClient<Segment = S>>(&mut self, interval: &IntervalRef<S>, client: &C) {
        self.by_start.insert(Self::key_of(interval, client), interval.clone());
    }

    pub fn remove<C: SequenceClient<Segment = S>>(&mut self, interval: &IntervalRef<S>, client: &C) {
        self.by_start.remove(&Self::key_of(interval, client));
    }

    pub fn find_overlapping<C: SequenceClient<Segment = S>>(
        &self,
        start_pos: i64,
        end_pos: i64,
        client: &C,
    ) -> IntervalVec<S> {
        if !is_valid_query_range(start_pos, end_pos) {
            return IntervalVec::new();
        }

        self.by_start
            .range(..=upper_bound(end_pos))
            .filter_map(|(_, interval)| {
                let borrowed = interval.borrow();
                if borrowed.resolved_end(client) >= start_pos {
                    Some(interval.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_start.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_start.is_empty()
    }
}
