use fxhash::FxHashMap;

use crate::interval::IntervalId;

use super::IntervalRef;

/// `id -> interval`. On `add`, asserts the id is present.
#[derive(Debug, Default)]
pub struct IdIndex<S> {
    map: FxHashMap<IntervalId, IntervalRef<S>>,
}

impl<S> IdIndex<S> {
    pub fn new() -> Self {
        Self { map: FxHashMap::default() }
    }

    pub fn add(&mut self, interval: IntervalRef<S>) {
        let id = interval
            .borrow()
            .id()
            .cloned()
            .unwrap_or_else(|| panic!("id index: interval added without an id"));
        let previous = self.map.insert(id, interval);
        crate::error::assert_invariant(previous.is_none(), "id index: duplicate interval id");
    }

    pub fn remove(&mut self, id: &IntervalId) -> Option<IntervalRef<S>> {
        self.map.remove(id)
    }

    pub fn get(&self, id: &IntervalId) -> Option<IntervalRef<S>> {
        self.map.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IntervalRef<S>> {
        self.map.values()
    }
}
