//! Branch rebase: a commit-graph operation on a separate
//! changeset layer, used to recompute pending interval ops during reconnect
//! before the connected submission loop replays them. Generic over whatever
//! a "commit" means to the embedder — this module only needs parent links
//! and a revision tag to detect identity.

use std::collections::HashSet;
use std::hash::Hash;

use crate::error::Error;

/// A single commit in a linear branch history. `Tag` is the identity
/// carried across a rebase, so a re-minted commit on one branch can be
/// recognized as "the same change" as a commit on another.
pub trait GraphCommit: Clone {
    type Id: Clone + Eq + Hash;
    type Tag: Clone + PartialEq;

    fn id(&self) -> Self::Id;
    fn parent(&self) -> Option<Self::Id>;
    fn revision_tag(&self) -> Self::Tag;
}

/// Read-only access to commit-graph storage. Branch rebase never mutates
/// this directly; re-minted commits are handed back to the caller to store.
pub trait CommitStore<C: GraphCommit> {
    fn get(&self, id: &C::Id) -> Option<C>;
}

/// Re-mints `source` on top of `new_parent`'s output context, threading
/// `Context` from one re-minted commit to the next.
pub trait Rebaser<C: GraphCommit> {
    type Context;
    fn rebase_onto(&mut self, source: &C, new_parent: Option<&C::Id>, context: Self::Context) -> (C, Self::Context);
}

#[derive(Debug, Clone)]
pub struct BranchRebaseOutcome<C: GraphCommit, Ctx> {
    pub new_head: C::Id,
    pub composite_change: Option<Ctx>,
    pub deleted_source_commits: Vec<C::Id>,
    pub new_source_commits: Vec<C::Id>,
    pub new_base: C::Id,
}

fn chain_to_root<C: GraphCommit>(store: &impl CommitStore<C>, head: C::Id) -> Vec<C::Id> {
    let mut chain = vec![head.clone()];
    let mut current = head;
    while let Some(commit) = store.get(&current) {
        match commit.parent() {
            Some(parent) => {
                chain.push(parent.clone());
                current = parent;
            }
            None => break,
        }
    }
    chain
}

/// Commits strictly between (exclusive) `ancestor` and `head` (inclusive),
/// in root-to-head order. `full_chain` is `head`'s ancestor chain in
/// head-to-root order, as returned by [`chain_to_root`].
fn segment_from_ancestor<Id: Clone + Eq>(full_chain: &[Id], ancestor: &Id) -> Vec<Id> {
    let mut segment: Vec<Id> = full_chain.iter().take_while(|id| *id != ancestor).cloned().collect();
    segment.reverse();
    segment
}

/// Rebases the commits unique to `source_head` onto `new_base`, skipping
/// any prefix that the target branch already carries under the same
/// revision tag.
pub fn rebase_branch<C, S, R>(
    store: &S,
    rebaser: &mut R,
    source_head: C::Id,
    new_base: C::Id,
    new_base_limit: Option<C::Id>,
    initial_context: R::Context,
) -> Result<BranchRebaseOutcome<C, R::Context>, Error>
where
    C: GraphCommit,
    S: CommitStore<C>,
    R: Rebaser<C>,
{
    let source_chain = chain_to_root(store, source_head.clone());

    let target_ceiling = new_base_limit.unwrap_or_else(|| new_base.clone());
    let target_ceiling_chain = chain_to_root(store, target_ceiling);
    if !target_ceiling_chain.contains(&new_base) {
        return Err(Error::TargetNotInBranch);
    }

    let target_chain = chain_to_root(store, new_base.clone());
    let target_set: HashSet<C::Id> = target_chain.iter().cloned().collect();

    let common_ancestor = source_chain
        .iter()
        .find(|id| target_set.contains(id))
        .cloned()
        .ok_or(Error::UnrelatedBranches)?;

    if source_chain.contains(&new_base) {
        return Ok(BranchRebaseOutcome {
            new_head: source_head,
            composite_change: None,
            deleted_source_commits: Vec::new(),
            new_source_commits: Vec::new(),
            new_base,
        });
    }

    let source_segment = segment_from_ancestor(&source_chain, &common_ancestor);
    let target_segment = segment_from_ancestor(&target_chain, &common_ancestor);

    let matched_prefix_len = source_segment
        .iter()
        .zip(target_segment.iter())
        .take_while(|(s, t)| {
            let source_commit = store.get(s).expect("branch rebase: missing source commit");
            let target_commit = store.get(t).expect("branch rebase: missing target commit");
            source_commit.revision_tag() == target_commit.revision_tag()
        })
        .count();

    let remaining = &source_segment[matched_prefix_len..];

    let mut new_source_commits = target_segment.clone();
    let mut parent_id = new_base.clone();
    let mut context = initial_context;
    let mut reminted_any = false;

    for source_id in remaining {
        let commit = store.get(source_id).expect("branch rebase: missing source commit");
        let (new_commit, next_context) = rebaser.rebase_onto(&commit, Some(&parent_id), context);
        context = next_context;
        let new_id = new_commit.id();
        parent_id = new_id.clone();
        new_source_commits.push(new_id);
        reminted_any = true;
    }

    Ok(BranchRebaseOutcome {
        new_head: parent_id,
        composite_change: if reminted_any { Some(context) } else { None },
        deleted_source_commits: source_segment,
        new_source_commits,
        new_base,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug)]
    struct TestCommit {
        id: u64,
        parent: Option<u64>,
        tag: u64,
    }

    impl GraphCommit for TestCommit {
        type Id = u64;
        type Tag = u64;

        fn id(&self) -> u64 {
            self.id
        }
        fn parent(&self) -> Option<u64> {
            self.parent
        }
        fn revision_tag(&self) -> u64 {
            self.tag
        }
    }

    struct TestStore(Vec<TestCommit>);

    impl CommitStore<TestCommit> for TestStore {
        fn get(&self, id: &u64) -> Option<TestCommit> {
            self.0.iter().find(|c| c.id == *id).cloned()
        }
    }

    struct IdentityRebaser {
        next_id: u64,
    }

    impl Rebaser<TestCommit> for IdentityRebaser {
        type Context = ();
        fn rebase_onto(&mut self, source: &TestCommit, new_parent: Option<&u64>, _context: ()) -> (TestCommit, ()) {
            let new_id = self.next_id;
            self.next_id += 1;
            (
                TestCommit {
                    id: new_id,
                    parent: new_parent.copied(),
                    tag: source.tag,
                },
                (),
            )
        }
    }

    /// Source holds [2',3',5] where 2' and 3' carry the same revision tags
    /// as target commits 2 and 3; rebasing onto target commit 4 skips
    /// re-minting 2' and 3' and only re-mints 5.
    #[test]
    fn identity_skip_reuses_matching_target_commits() {
        let store = TestStore(vec![
            TestCommit { id: 1, parent: None, tag: 1 },
            TestCommit { id: 2, parent: Some(1), tag: 100 },
            TestCommit { id: 3, parent: Some(2), tag: 101 },
            TestCommit { id: 4, parent: Some(3), tag: 102 },
            TestCommit { id: 21, parent: Some(1), tag: 100 },
            TestCommit { id: 31, parent: Some(21), tag: 101 },
            TestCommit { id: 5, parent: Some(31), tag: 999 },
        ]);
        let mut rebaser = IdentityRebaser { next_id: 1000 };

        let outcome = rebase_branch(&store, &mut rebaser, 5, 4, None, ()).unwrap();

        assert_eq!(outcome.deleted_source_commits, vec![21, 31, 5]);
        assert_eq!(outcome.new_source_commits, vec![2, 3, 4, 1000]);
        assert_eq!(outcome.new_head, 1000);
        assert!(outcome.composite_change.is_some());
    }

    #[test]
    fn already_descendant_is_a_no_op() {
        let store = TestStore(vec![
            TestCommit { id: 1, parent: None, tag: 1 },
            TestCommit { id: 2, parent: Some(1), tag: 100 },
            TestCommit { id: 3, parent: Some(2), tag: 101 },
        ]);
        let mut rebaser = IdentityRebaser { next_id: 1000 };

        let outcome = rebase_branch(&store, &mut rebaser, 3, 2, None, ()).unwrap();
        assert_eq!(outcome.new_head, 3);
        assert!(outcome.composite_change.is_none());
        assert!(outcome.deleted_source_commits.is_empty());
        assert!(outcome.new_source_commits.is_empty());
    }

    #[test]
    fn unrelated_branches_fail() {
        let store = TestStore(vec![
            TestCommit { id: 1, parent: None, tag: 1 },
            TestCommit { id: 2, parent: None, tag: 2 },
        ]);
        let mut rebaser = IdentityRebaser { next_id: 1000 };

        let err = rebase_branch(&store, &mut rebaser, 1, 2, None, ()).unwrap_err();
        assert!(matches!(err, Error::UnrelatedBranches));
    }
}
