//! A reference [`SequenceClient`] implementation for tests and demos. This
//! is intentionally a test/demo-grade sequence: every inserted character
//! becomes its own single-character segment, there is no run-length merging
//! and no structural sharing. Production embedders supply their own
//! `SequenceClient`, backed by a real merge-tree.
//!
//! Per-client isolation: each [`InMemorySequence`] owns its own segment
//! table. Replicating text edits across sites is outside this crate's
//! scope; tests drive convergence by applying the same sequence of
//! `insert`/`remove` calls to each site's instance at the point in the
//! scenario the text edit is meant to become visible there.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use fxhash::FxHashMap;

use crate::sequence::{
    ClientId, LocalSeq, Perspective, ReferenceId, ReferenceType, ResolvedPosition, SeqNum,
    SequenceClient, SlideListener, SlideNotice, SlideTarget, SlidingPreference,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SegmentId(u64);

struct SegmentRecord {
    id: SegmentId,
    ch: char,
    created_at_seq: SeqNum,
    removed_at_seq: Cell<Option<SeqNum>>,
}

struct RefState {
    segment: Option<SegmentId>,
    ref_type: ReferenceType,
    preferred: SlidingPreference,
}

/// A single-site, in-memory reference sequence. `insert`/`remove` positions
/// are plain character offsets into the currently-live text.
pub struct InMemorySequence {
    client: ClientId,
    segments: RefCell<Vec<SegmentRecord>>,
    next_segment_id: Cell<u64>,
    seq: Cell<SeqNum>,
    local_seq: Cell<LocalSeq>,
    references: RefCell<FxHashMap<ReferenceId, RefState>>,
    references_by_segment: RefCell<FxHashMap<SegmentId, Vec<ReferenceId>>>,
    next_reference_id: Cell<u64>,
    slide_listener: RefCell<Option<SlideListener>>,
    normalize_listener: RefCell<Option<Rc<dyn Fn()>>>,
}

impl InMemorySequence {
    pub fn new(client: ClientId) -> Rc<Self> {
        Rc::new(Self {
            client,
            segments: RefCell::new(Vec::new()),
            next_segment_id: Cell::new(0),
            seq: Cell::new(0),
            local_seq: Cell::new(0),
            references: RefCell::new(FxHashMap::default()),
            references_by_segment: RefCell::new(FxHashMap::default()),
            next_reference_id: Cell::new(0),
            slide_listener: RefCell::new(None),
            normalize_listener: RefCell::new(None),
        })
    }

    fn next_segment_id(&self) -> SegmentId {
        let id = self.next_segment_id.get();
        self.next_segment_id.set(id + 1);
        SegmentId(id)
    }

    fn bump_seq(&self) -> SeqNum {
        let seq = self.seq.get() + 1;
        self.seq.set(seq);
        seq
    }

    /// Inserts `text` so that its first character becomes the `pos`-th live
    /// character. `pos` must be in `0..=len()`.
    pub fn insert(&self, pos: i64, text: &str) -> Vec<SegmentId> {
        crate::error::assert_invariant(pos >= 0 && pos <= self.len(), "insert position out of range");
        let seq = self.bump_seq();
        let idx = self.live_index_for_insert(pos);
        let mut segments = self.segments.borrow_mut();
        let mut ids = Vec::new();
        for (offset, ch) in text.chars().enumerate() {
            let id = self.next_segment_id();
            segments.insert(
                idx + offset,
                SegmentRecord { id, ch, created_at_seq: seq, removed_at_seq: Cell::new(None) },
            );
            ids.push(id);
        }
        ids
    }

    /// Removes the live characters in `[start, end)`, sliding any
    /// `SlideOnRemove` reference anchored within that range. `StayOnRemove` references are left attached to their
    /// now-dead segment.
    pub fn remove(&self, start: i64, end: i64) {
        if start >= end {
            return;
        }
        let seq = self.bump_seq();
        let removed_ids = {
            let segments = self.segments.borrow();
            let mut live_count = 0i64;
            let mut removed = Vec::new();
            for seg in segments.iter() {
                if seg.removed_at_seq.get().is_none() {
                    if live_count >= start && live_count < end {
                        seg.removed_at_seq.set(Some(seq));
                        removed.push(seg.id);
                    }
                    live_count += 1;
                }
            }
            removed
        };
        self.slide_affected(&removed_ids);
    }

    pub fn len(&self) -> i64 {
        self.segments.borrow().iter().filter(|s| s.removed_at_seq.get().is_none()).count() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The currently-live text, for assertions in tests.
    pub fn text(&self) -> String {
        self.segments
            .borrow()
            .iter()
            .filter(|s| s.removed_at_seq.get().is_none())
            .map(|s| s.ch)
            .collect()
    }

    fn live_index_for_insert(&self, pos: i64) -> usize {
        let segments = self.segments.borrow();
        let mut count = 0i64;
        for (i, seg) in segments.iter().enumerate() {
            if seg.removed_at_seq.get().is_none() {
                if count == pos {
                    return i;
                }
                count += 1;
            }
        }
        segments.len()
    }

    fn nth_matching(&self, pos: i64, matches: impl Fn(&SegmentRecord) -> bool) -> Option<SegmentId> {
        let segments = self.segments.borrow();
        let mut count = 0i64;
        for seg in segments.iter() {
            if matches(seg) {
                if count == pos {
                    return Some(seg.id);
                }
                count += 1;
            }
        }
        None
    }

    fn resolve_segment(&self, segment: &SegmentId) -> Option<i64> {
        let segments = self.segments.borrow();
        let mut count = 0i64;
        for seg in segments.iter() {
            if seg.id == *segment {
                return Some(count);
            }
            if seg.removed_at_seq.get().is_none() {
                count += 1;
            }
        }
        None
    }

    fn register_ref_segment(&self, reference: ReferenceId, segment: SegmentId) {
        self.references_by_segment.borrow_mut().entry(segment).or_default().push(reference);
    }

    fn unregister_ref_segment(&self, reference: ReferenceId, segment: SegmentId) {
        if let Some(list) = self.references_by_segment.borrow_mut().get_mut(&segment) {
            list.retain(|r| *r != reference);
        }
    }

    fn notify(&self, notice: SlideNotice) {
        if let Some(listener) = &*self.slide_listener.borrow() {
            listener(notice);
        }
    }

    fn should_slide(&self, reference: ReferenceId) -> bool {
        self.references
            .borrow()
            .get(&reference)
            .map(|r| r.ref_type.contains(ReferenceType::SLIDE_ON_REMOVE))
            .unwrap_or(false)
    }

    fn slide_affected(&self, removed_ids: &[SegmentId]) {
        let mut affected = Vec::new();
        {
            let refs_by_seg = self.references_by_segment.borrow();
            for seg_id in removed_ids {
                if let Some(list) = refs_by_seg.get(seg_id) {
                    for r in list {
                        if self.should_slide(*r) {
                            affected.push(*r);
                        }
                    }
                }
            }
        }

        for r in &affected {
            self.notify(SlideNotice::Before(*r));
        }

        let targets: Vec<(ReferenceId, SlideTarget<SegmentId>)> = affected
            .iter()
            .map(|r| {
                let (old_segment, preferred) = {
                    let refs = self.references.borrow();
                    let state = refs.get(r).expect("slide affected a reference that vanished mid-burst");
                    (state.segment.expect("sliding reference must have had a segment"), state.preferred)
                };
                (*r, self.slide_to_segment(&old_segment, 0, preferred))
            })
            .collect();

        for (r, target) in targets {
            let old_segment = self.references.borrow().get(&r).and_then(|s| s.segment);
            if let Some(old) = old_segment {
                self.unregister_ref_segment(r, old);
            }
            let new_segment = match target {
                SlideTarget::Attached { segment, .. } => Some(segment),
                SlideTarget::Detached => None,
            };
            if let Some(new) = new_segment {
                self.register_ref_segment(r, new);
            }
            if let Some(state) = self.references.borrow_mut().get_mut(&r) {
                state.segment = new_segment;
            }
        }

        for r in &affected {
            self.notify(SlideNotice::After(*r));
        }
    }
}

impl SequenceClient for InMemorySequence {
    type Segment = SegmentId;

    fn client_id(&self) -> ClientId {
        self.client
    }

    fn current_seq(&self) -> SeqNum {
        self.seq.get()
    }

    fn peek_local_seq(&self) -> LocalSeq {
        self.local_seq.get()
    }

    fn alloc_local_seq(&self) -> LocalSeq {
        let next = self.local_seq.get() + 1;
        self.local_seq.set(next);
        next
    }

    fn long_client_id(&self, client: ClientId) -> String {
        format!("client-{client}")
    }

    fn find_reconnection_position(&self, segment: &Self::Segment, _local_seq: LocalSeq) -> i64 {
        self.resolve_segment(segment).unwrap_or(0)
    }

    fn containing_segment(&self, pos: i64, perspective: Perspective) -> Option<(Self::Segment, usize)> {
        if pos < 0 {
            return None;
        }
        let id = match perspective {
            Perspective::Local => self.nth_matching(pos, |s| s.removed_at_seq.get().is_none()),
            Perspective::AsOf(seq) => self.nth_matching(pos, |s| {
                s.created_at_seq <= seq && s.removed_at_seq.get().map_or(true, |r| r > seq)
            }),
        };
        id.map(|id| (id, 0))
    }

    fn slide_to_segment(&self, segment: &Self::Segment, offset: usize, preferred: SlidingPreference) -> SlideTarget<Self::Segment> {
        let segments = self.segments.borrow();
        let Some(idx) = segments.iter().position(|s| s.id == *segment) else {
            return SlideTarget::Detached;
        };
        if segments[idx].removed_at_seq.get().is_none() {
            return SlideTarget::Attached { segment: *segment, offset };
        }
        // A candidate must already have existed in the document at the moment
        // this segment was removed — content inserted afterward, anywhere in
        // the document, never becomes a neighbor of an already-dead segment.
        // Without this a fully-deleted-then-reinserted document would wrongly slide onto the new text.
        let removed_at = segments[idx].removed_at_seq.get().expect("checked above");
        let existed_in_time = |s: &SegmentRecord| s.removed_at_seq.get().is_none() && s.created_at_seq <= removed_at;
        let search = |dir: SlidingPreference| -> Option<SegmentId> {
            match dir {
                SlidingPreference::Forward => segments[idx + 1..].iter().find(|s| existed_in_time(s)).map(|s| s.id),
                SlidingPreference::Backward => segments[..idx].iter().rev().find(|s| existed_in_time(s)).map(|s| s.id),
            }
        };
        search(preferred)
            .or_else(|| search(preferred.opposite()))
            .map(|segment| SlideTarget::Attached { segment, offset: 0 })
            .unwrap_or(SlideTarget::Detached)
    }

    fn create_local_reference(
        &self,
        segment: &Self::Segment,
        offset: usize,
        ref_type: ReferenceType,
        preferred: SlidingPreference,
    ) -> ReferenceId {
        let id = self.next_reference_id.get();
        self.next_reference_id.set(id + 1);
        let reference = ReferenceId(id);
        // A reference can be created directly on an already-removed segment —
        // e.g. a remote add op whose position was resolved `AsOf` a seq at
        // which the segment was still live. A `SlideOnRemove` reference slides immediately rather
        // than sitting on dead content waiting for a removal that already
        // happened; `StayOnRemove` keeps the raw anchor as usual.
        let already_removed = self.segments.borrow().iter().any(|s| s.id == *segment && s.removed_at_seq.get().is_some());
        let initial = if already_removed && ref_type.contains(ReferenceType::SLIDE_ON_REMOVE) {
            match self.slide_to_segment(segment, offset, preferred) {
                SlideTarget::Attached { segment, .. } => Some(segment),
                SlideTarget::Detached => None,
            }
        } else {
            Some(*segment)
        };
        self.references.borrow_mut().insert(reference, RefState { segment: initial, ref_type, preferred });
        if let Some(initial) = initial {
            self.register_ref_segment(reference, initial);
        }
        reference
    }

    fn create_detached_reference(&self, ref_type: ReferenceType) -> ReferenceId {
        let id = self.next_reference_id.get();
        self.next_reference_id.set(id + 1);
        let reference = ReferenceId(id);
        self.references
            .borrow_mut()
            .insert(reference, RefState { segment: None, ref_type, preferred: SlidingPreference::Forward });
        reference
    }

    fn remove_local_reference(&self, reference: ReferenceId) {
        if let Some(state) = self.references.borrow_mut().remove(&reference) {
            if let Some(segment) = state.segment {
                self.unregister_ref_segment(reference, segment);
            }
        }
    }

    fn reference_location(&self, reference: ReferenceId) -> Option<(Self::Segment, usize)> {
        self.references.borrow().get(&reference).and_then(|s| s.segment).map(|s| (s, 0))
    }

    fn resolve(&self, reference: ReferenceId) -> ResolvedPosition {
        let segment = self.references.borrow().get(&reference).and_then(|s| s.segment);
        match segment {
            None => ResolvedPosition::Detached,
            Some(segment) => self.resolve_location(Some(&segment), 0),
        }
    }

    fn resolve_location(&self, segment: Option<&Self::Segment>, _offset: usize) -> ResolvedPosition {
        match segment.and_then(|s| self.resolve_segment(s)) {
            Some(pos) => ResolvedPosition::At(pos),
            None => ResolvedPosition::Detached,
        }
    }

    fn set_slide_listener(&self, listener: SlideListener) {
        *self.slide_listener.borrow_mut() = Some(listener);
    }

    fn set_normalize_listener(&self, listener: Rc<dyn Fn()>) {
        *self.normalize_listener.borrow_mut() = Some(listener);
    }
}

impl InMemorySequence {
    /// Fires the registered `"normalize"` listener, simulating
    /// the sequence CRDT rebasing pending ops on reconnect.
    pub fn fire_normalize(&self) {
        if let Some(listener) = &*self.normalize_listener.borrow() {
            listener();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::Perspective;

    #[test]
    fn insert_and_resolve() {
        let seq = InMemorySequence::new(1);
        seq.insert(0, "ABCD");
        assert_eq!(seq.text(), "ABCD");
        let (segment, _) = seq.containing_segment(1, Perspective::Local).unwrap();
        assert_eq!(seq.resolve_location(Some(&segment), 0), ResolvedPosition::At(1));
    }

    #[test]
    fn remove_shifts_positions() {
        let seq = InMemorySequence::new(1);
        seq.insert(0, "ABCD");
        let (c_segment, _) = seq.containing_segment(2, Perspective::Local).unwrap();
        seq.remove(2, 3);
        assert_eq!(seq.text(), "ABD");
        // the removed segment is still resolvable relative to its neighbors
        assert!(matches!(seq.resolve_location(Some(&c_segment), 0), ResolvedPosition::At(2)));
    }

    #[test]
    fn slide_on_remove_relocates_reference() {
        let seq = InMemorySequence::new(1);
        seq.insert(0, "ABCD");
        let (b_segment, _) = seq.containing_segment(1, Perspective::Local).unwrap();
        let reference = seq.create_local_reference(&b_segment, 0, ReferenceType::RANGE_BEGIN | ReferenceType::SLIDE_ON_REMOVE, SlidingPreference::Forward);
        seq.remove(1, 2);
        assert_eq!(seq.resolve(reference), ResolvedPosition::At(1));
    }

    #[test]
    fn slide_with_no_forward_target_falls_back_then_detaches() {
        let seq = InMemorySequence::new(1);
        seq.insert(0, "A");
        let (a_segment, _) = seq.containing_segment(0, Perspective::Local).unwrap();
        let reference = seq.create_local_reference(&a_segment, 0, ReferenceType::RANGE_END | ReferenceType::SLIDE_ON_REMOVE, SlidingPreference::Forward);
        seq.remove(0, 1);
        assert_eq!(seq.resolve(reference), ResolvedPosition::Detached);
    }

    #[test]
    fn slide_ignores_segments_inserted_after_the_removal() {
        let seq = InMemorySequence::new(1);
        seq.insert(0, "ABCDEF");
        let (b_segment, _) = seq.containing_segment(1, Perspective::Local).unwrap();
        let reference = seq.create_local_reference(&b_segment, 0, ReferenceType::RANGE_BEGIN | ReferenceType::SLIDE_ON_REMOVE, SlidingPreference::Forward);
        seq.remove(0, 6);
        assert_eq!(seq.resolve(reference), ResolvedPosition::Detached);
        seq.insert(0, "X");
        assert_eq!(seq.resolve(reference), ResolvedPosition::Detached);
    }

    #[test]
    fn as_of_perspective_sees_historical_state() {
        let seq = InMemorySequence::new(1);
        seq.insert(0, "AB");
        let seq_at_ab = seq.current_seq();
        seq.insert(2, "C");
        seq.remove(0, 1);
        // as-of the earlier seq number, position 0 still resolves to the
        // segment that held 'A' (now removed), not the post-remove layout.
        let (segment, _) = seq.containing_segment(0, Perspective::AsOf(seq_at_ab)).unwrap();
        let (current_segment, _) = seq.containing_segment(0, Perspective::Local).unwrap();
        assert_ne!(segment, current_segment);
    }
}
