//! Mutation Gate
//!
//! Decides when a container's attached structure is republished.
//!
//! Every publish is a single `ArcSwap` store, so the traversal actor sees
//! either the old snapshot or the new one. What the gate adds is *when*:
//!
//! - [`GatePolicy::Immediate`]: publish as part of the edit.
//! - [`GatePolicy::EndOfFrame`]: record the container as dirty and publish in
//!   [`Scene::end_frame`](crate::Scene::end_frame), under the write side of the
//!   [`TraversalGate`], so no frame observes two edits of one batch apart.
//!
//! While a build or a resolution is running the gate batches regardless of
//! policy; each touched container is published once when the batch closes.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rustc_hash::FxHashSet;

use trellis_core::NodeHandle;

use crate::config::GatePolicy;

/// Handle given to the traversal actor. Holding a frame guard keeps
/// end-of-frame publishing out until the frame is done.
#[derive(Debug, Clone, Default)]
pub struct TraversalGate {
    lock: Arc<RwLock<()>>,
}

impl TraversalGate {
    /// Enters a frame. Multiple readers may traverse at once.
    #[inline]
    pub fn begin_frame(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read()
    }

    pub(crate) fn safe_point(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write()
    }
}

#[derive(Debug)]
pub(crate) struct MutationGate {
    policy: GatePolicy,
    traversal: TraversalGate,
    dirty: Vec<NodeHandle>,
    dirty_set: FxHashSet<NodeHandle>,
    batch_depth: usize,
}

impl MutationGate {
    pub(crate) fn new(policy: GatePolicy) -> Self {
        Self {
            policy,
            traversal: TraversalGate::default(),
            dirty: Vec::new(),
            dirty_set: FxHashSet::default(),
            batch_depth: 0,
        }
    }

    #[inline]
    pub(crate) fn policy(&self) -> GatePolicy {
        self.policy
    }

    #[inline]
    pub(crate) fn traversal(&self) -> &TraversalGate {
        &self.traversal
    }

    /// Returns `true` if publishing `handle` must wait; the handle is then
    /// recorded as dirty.
    pub(crate) fn defer(&mut self, handle: NodeHandle) -> bool {
        if self.batch_depth == 0 && self.policy == GatePolicy::Immediate {
            return false;
        }
        if self.dirty_set.insert(handle) {
            self.dirty.push(handle);
        }
        true
    }

    pub(crate) fn begin_batch(&mut self) {
        self.batch_depth += 1;
    }

    /// Closes a batch. Returns the handles to publish now, which is empty while
    /// an outer batch is still open or the policy waits for end of frame.
    pub(crate) fn end_batch(&mut self) -> Vec<NodeHandle> {
        self.batch_depth = self.batch_depth.saturating_sub(1);
        if self.batch_depth > 0 || self.policy == GatePolicy::EndOfFrame {
            return Vec::new();
        }
        self.take_dirty()
    }

    /// Dirty handles in the order they were first recorded.
    pub(crate) fn take_dirty(&mut self) -> Vec<NodeHandle> {
        self.dirty_set.clear();
        std::mem::take(&mut self.dirty)
    }

    #[inline]
    pub(crate) fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::KeyData;

    fn handle(n: u64) -> NodeHandle {
        NodeHandle::from(KeyData::from_ffi(n | (1 << 32)))
    }

    #[test]
    fn test_immediate_publishes_outside_batch() {
        let mut gate = MutationGate::new(GatePolicy::Immediate);
        assert!(!gate.defer(handle(1)));
        assert!(!gate.has_dirty());
    }

    #[test]
    fn test_batch_coalesces() {
        let mut gate = MutationGate::new(GatePolicy::Immediate);
        gate.begin_batch();
        gate.begin_batch();
        assert!(gate.defer(handle(1)));
        assert!(gate.defer(handle(2)));
        assert!(gate.defer(handle(1)));

        assert!(gate.end_batch().is_empty());
        assert_eq!(gate.end_batch(), vec![handle(1), handle(2)]);
        assert!(!gate.has_dirty());
    }

    #[test]
    fn test_end_of_frame_holds_until_taken() {
        let mut gate = MutationGate::new(GatePolicy::EndOfFrame);
        gate.begin_batch();
        gate.defer(handle(3));
        assert!(gate.end_batch().is_empty());
        assert!(gate.has_dirty());
        assert_eq!(gate.take_dirty(), vec![handle(3)]);
    }

    #[test]
    fn test_safe_point_excludes_frames() {
        let gate = TraversalGate::default();
        let frame = gate.begin_frame();
        assert!(gate.lock.try_write().is_none());
        drop(frame);
        assert!(gate.lock.try_write().is_some());
    }
}
