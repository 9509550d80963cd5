//! Interval rebase: pure
//! recomputation of a pending local op's endpoint positions against the
//! sequence's current state. The branch (commit-graph) rebase used for the
//! same reconnect flow lives in [`branch`].

pub mod branch;

use crate::interval::{IntervalId, Stickiness};
use crate::sequence::{LocalSeq, Perspective, SeqNum, SequenceClient, SlideTarget, SlidingPreference};

/// Which op this pending entry came from, and which endpoints it actually
/// carries (a `"change"` op may touch only one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOpKind {
    Add,
    Change,
}

/// A local op still awaiting ack, as tracked by the collection layer.
/// Positions are the raw integers that were serialized onto the wire at
/// submission time — rebase starts from these, not from a live
/// segment handle, since that's all a reconnecting client has to go on.
#[derive(Debug, Clone)]
pub struct PendingIntervalOp {
    pub id: IntervalId,
    pub kind: PendingOpKind,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub reference_seq: SeqNum,
    pub local_seq: LocalSeq,
    pub stickiness: Stickiness,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebasedEndpoint {
    pub position: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebasedDelta {
    pub start: Option<RebasedEndpoint>,
    pub end: Option<RebasedEndpoint>,
}

/// Outcome of rebasing a single pending op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebaseOutcome {
    /// Produces a rebased serialized delta; `None` fields were not part of
    /// the original op and remain untouched.
    Rebased(RebasedDelta),
    /// Either endpoint slid off the sequence entirely. The op becomes a
    /// no-op and any surviving local interval for this id must be removed.
    Detached,
}

/// Steps 1.a-1.d for a single endpoint: find the segment that held this
/// position as of `reference_seq`, slide it to where it lives now, and
/// convert that back into an absolute position via
/// `findReconnectionPosition`.
fn rebase_endpoint<C: SequenceClient>(
    client: &C,
    position: i64,
    reference_seq: SeqNum,
    local_seq: LocalSeq,
    preferred: SlidingPreference,
) -> Option<i64> {
    let (segment, offset) = client.containing_segment(position, Perspective::AsOf(reference_seq))?;
    match client.slide_to_segment(&segment, offset, preferred) {
        SlideTarget::Detached => None,
        SlideTarget::Attached { segment, offset } => {
            let base = client.find_reconnection_position(&segment, local_seq);
            Some(base + offset as i64)
        }
    }
}

/// `rebaseLocalInterval` minus the collection-level bookkeeping (queue
/// replacement, `changeInterval` call, event firing) — those live in
/// `Collection`, which owns the pending-change maps this consults.
pub fn rebase_local_interval<C: SequenceClient>(client: &C, op: &PendingIntervalOp) -> RebaseOutcome {
    let start = match op.start {
        Some(pos) => {
            match rebase_endpoint(client, pos, op.reference_seq, op.local_seq, op.stickiness.start_preference()) {
                Some(position) => Some(RebasedEndpoint { position }),
                None => return RebaseOutcome::Detached,
            }
        }
        None => None,
    };

    let end = match op.end {
        Some(pos) => {
            match rebase_endpoint(client, pos, op.reference_seq, op.local_seq, op.stickiness.end_preference()) {
                Some(position) => Some(RebasedEndpoint { position }),
                None => return RebaseOutcome::Detached,
            }
        }
        None => None,
    };

    RebaseOutcome::Rebased(RebasedDelta { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{ClientId, ReferenceId, ReferenceType, ResolvedPosition};
    use std::rc::Rc;

    #[derive(Clone, Eq, PartialEq, Hash, Debug)]
    struct Seg(u64);

    struct FakeClient {
        fail_start: bool,
    }

    impl SequenceClient for FakeClient {
        type Segment = Seg;

        fn client_id(&self) -> ClientId {
            1
        }
        fn current_seq(&self) -> SeqNum {
            10
        }
        fn peek_local_seq(&self) -> LocalSeq {
            0
        }
        fn alloc_local_seq(&self) -> LocalSeq {
            0
        }
        fn long_client_id(&self, _client: ClientId) -> String {
            "fake".into()
        }
        fn find_reconnection_position(&self, _segment: &Seg, _local_seq: LocalSeq) -> i64 {
            5
        }
        fn containing_segment(&self, pos: i64, _perspective: Perspective) -> Option<(Seg, usize)> {
            if self.fail_start && pos == 0 {
                None
            } else {
                Some((Seg(pos as u64), 0))
            }
        }
        fn slide_to_segment(&self, segment: &Seg, offset: usize, _preferred: SlidingPreference) -> SlideTarget<Seg> {
            SlideTarget::Attached { segment: segment.clone(), offset }
        }
        fn create_local_reference(&self, _segment: &Seg, _offset: usize, _ref_type: ReferenceType, _preferred: SlidingPreference) -> ReferenceId {
            ReferenceId(0)
        }
        fn create_detached_reference(&self, _ref_type: ReferenceType) -> ReferenceId {
            ReferenceId(0)
        }
        fn remove_local_reference(&self, _reference: ReferenceId) {}
        fn reference_location(&self, _reference: ReferenceId) -> Option<(Seg, usize)> {
            None
        }
        fn resolve(&self, _reference: ReferenceId) -> ResolvedPosition {
            ResolvedPosition::Detached
        }
        fn resolve_location(&self, _segment: Option<&Seg>, _offset: usize) -> ResolvedPosition {
            ResolvedPosition::Detached
        }
        fn set_slide_listener(&self, _listener: crate::sequence::SlideListener) {}
        fn set_normalize_listener(&self, _listener: Rc<dyn Fn()>) {}
    }

    #[test]
    fn rebases_both_endpoints() {
        let client = FakeClient { fail_start: false };
        let op = PendingIntervalOp {
            id: IntervalId::from("test-1"),
            kind: PendingOpKind::Add,
            start: Some(3),
            end: Some(8),
            reference_seq: 1,
            local_seq: 1,
            stickiness: Stickiness::default(),
        };
        match rebase_local_interval(&client, &op) {
            RebaseOutcome::Rebased(delta) => {
                assert_eq!(delta.start.unwrap().position, 5);
                assert_eq!(delta.end.unwrap().position, 5);
            }
            RebaseOutcome::Detached => panic!("expected a rebased delta"),
        }
    }

    #[test]
    fn detaches_when_segment_is_gone() {
        let client = FakeClient { fail_start: true };
        let op = PendingIntervalOp {
            id: IntervalId::from("test-2"),
            kind: PendingOpKind::Add,
            start: Some(0),
            end: Some(8),
            reference_seq: 1,
            local_seq: 1,
            stickiness: Stickiness::default(),
        };
        assert!(matches!(rebase_local_interval(&client, &op), RebaseOutcome::Detached));
    }

    #[test]
    fn change_op_leaves_untouched_endpoint_alone() {
        let client = FakeClient { fail_start: false };
        let op = PendingIntervalOp {
            id: IntervalId::from("test-3"),
            kind: PendingOpKind::Change,
            start: None,
            end: Some(8),
            reference_seq: 1,
            local_seq: 1,
            stickiness: Stickiness::default(),
        };
        match rebase_local_interval(&client, &op) {
            RebaseOutcome::Rebased(delta) => {
                assert!(delta.start.is_none());
                assert!(delta.end.is_some());
            }
            RebaseOutcome::Detached => panic!("expected a rebased delta"),
        }
    }
}
