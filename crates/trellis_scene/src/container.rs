//! Live Container Operations
//!
//! Structural edits on group, transform, switch and root nodes. Each edit
//! updates the child list, the ownership tags of the nodes involved and then
//! republishes the attached structure of every container whose projection
//! changed.
//!
//! Rejected edits return an error and leave the container untouched.
//! "Already present" and "already absent" are no-ops.

use smallvec::{SmallVec, smallvec};

use rustc_hash::FxHashSet;
use trellis_core::errors::{Result, SceneError};
use trellis_core::field::FieldValue;
use trellis_core::NodeHandle;

use crate::node::{Construction, NodeRole, Ownership, ParentSlot, RuntimeNode, Slot};
use crate::render::AttachedChild;
use crate::resolver::PatchSite;
use crate::scene::Scene;

impl Scene {
    // ========================================================================
    // Public structural edits
    // ========================================================================

    /// Appends `child` to `parent`. No-op if it is already a child.
    pub fn add_child(&mut self, parent: NodeHandle, child: NodeHandle) -> Result<()> {
        self.check_container(parent)?;
        self.ensure_mutable(parent)?;
        if self.nodes[parent].children.contains(&child) {
            return Ok(());
        }
        self.append_child_internal(parent, child)
    }

    /// Removes the first occurrence of `child`. No-op if it is not a child.
    /// The removed node stays alive and can be attached again.
    pub fn remove_child(&mut self, parent: NodeHandle, child: NodeHandle) -> Result<()> {
        self.check_container(parent)?;
        self.ensure_mutable(parent)?;
        let Some(index) = self.nodes[parent].children.iter().position(|&c| c == child) else {
            return Ok(());
        };

        self.nodes[parent].children.remove(index);
        self.detach(child, parent);
        self.reindex(parent);
        self.invalidate(parent);
        Ok(())
    }

    /// Puts `node` into child slot `slot`, releasing the previous occupant.
    pub fn replace_child(&mut self, parent: NodeHandle, slot: usize, node: NodeHandle) -> Result<()> {
        self.check_container(parent)?;
        self.ensure_mutable(parent)?;
        let len = self.nodes[parent].children.len();
        if slot >= len {
            return Err(SceneError::Range { index: slot, len });
        }
        self.check_attachable(parent, node)?;
        self.replace_child_internal(parent, slot, node);
        Ok(())
    }

    pub fn clear_children(&mut self, parent: NodeHandle) -> Result<()> {
        self.check_container(parent)?;
        self.ensure_mutable(parent)?;
        self.clear_children_internal(parent);
        Ok(())
    }

    /// Selects which child of a switch is attached. `None` attaches nothing
    /// but keeps the child list.
    pub fn set_active_index(&mut self, switch: NodeHandle, index: Option<usize>) -> Result<()> {
        let node = self.nodes.get_mut(switch).ok_or(SceneError::StaleHandle)?;
        if node.role != NodeRole::Switch {
            return Err(SceneError::InvalidUse(format!(
                "{} is not a switch",
                node.type_name()
            )));
        }
        let len = node.children.len();
        let choice = match index {
            Some(i) if i >= len => return Err(SceneError::Range { index: i, len }),
            Some(i) => i32::try_from(i).map_err(|_| SceneError::Range { index: i, len })?,
            None => -1,
        };
        node.fields.set_internal("whichChoice", FieldValue::Int32(choice))?;
        self.invalidate(switch);
        Ok(())
    }

    /// Currently selected child index of a switch.
    #[must_use]
    pub fn active_index(&self, switch: NodeHandle) -> Option<usize> {
        self.nodes.get(switch).and_then(selected_index)
    }

    // ========================================================================
    // Internal edits (builder and resolver)
    // ========================================================================

    /// Appends without the presence and detachable checks, so a template can
    /// list the same node twice.
    pub(crate) fn append_child_internal(&mut self, parent: NodeHandle, child: NodeHandle) -> Result<()> {
        self.check_attachable(parent, child)?;
        let slot = {
            let children = &mut self.nodes[parent].children;
            children.push(child);
            children.len() - 1
        };
        self.attach(child, parent, Slot::Child(slot));
        self.invalidate(parent);
        Ok(())
    }

    pub(crate) fn replace_child_internal(&mut self, parent: NodeHandle, slot: usize, node: NodeHandle) {
        let Some(old) = self
            .nodes
            .get(parent)
            .and_then(|p| p.children.get(slot).copied())
        else {
            return;
        };
        if old == node {
            return;
        }
        self.nodes[parent].children[slot] = node;
        self.detach(old, parent);
        self.attach(node, parent, Slot::Child(slot));
        self.invalidate(parent);
    }

    pub(crate) fn clear_children_internal(&mut self, parent: NodeHandle) {
        let Some(p) = self.nodes.get_mut(parent) else {
            return;
        };
        let children = std::mem::take(&mut p.children);
        for child in children {
            self.detach(child, parent);
        }
        self.invalidate(parent);
    }

    // ========================================================================
    // Checks
    // ========================================================================

    fn check_container(&self, handle: NodeHandle) -> Result<&RuntimeNode> {
        let node = self.nodes.get(handle).ok_or(SceneError::StaleHandle)?;
        if !node.role.is_container() {
            return Err(SceneError::InvalidUse(format!(
                "{} cannot hold children",
                node.type_name()
            )));
        }
        if node.is_placeholder() {
            return Err(placeholder_edit(node));
        }
        Ok(node)
    }

    /// Validates attaching `child` anywhere below `parent`.
    pub(crate) fn check_attachable(&self, parent: NodeHandle, child: NodeHandle) -> Result<()> {
        let node = self.nodes.get(child).ok_or(SceneError::StaleHandle)?;
        if node.role == NodeRole::Root {
            return Err(SceneError::InvalidUse("the root cannot be attached".to_string()));
        }
        if self.would_cycle(parent, child) {
            return Err(SceneError::Cycle {
                parent: self.describe(parent),
                child: self.describe(child),
            });
        }
        Ok(())
    }

    /// Whether `parent` is `child` or one of its descendants.
    fn would_cycle(&self, parent: NodeHandle, child: NodeHandle) -> bool {
        let mut stack = vec![child];
        let mut seen = FxHashSet::default();
        while let Some(current) = stack.pop() {
            if current == parent {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(node) = self.nodes.get(current) {
                stack.extend(node.attachments());
            }
        }
        false
    }

    /// Node-valued fields of a placeholder stay empty until it is replaced.
    pub(crate) fn check_not_placeholder(&self, handle: NodeHandle) -> Result<()> {
        let node = self.nodes.get(handle).ok_or(SceneError::StaleHandle)?;
        if node.is_placeholder() {
            return Err(placeholder_edit(node));
        }
        Ok(())
    }

    pub(crate) fn describe(&self, handle: NodeHandle) -> String {
        match self.nodes.get(handle) {
            Some(node) => format!("{} {handle:?}", node.type_name()),
            None => format!("{handle:?}"),
        }
    }

    // ========================================================================
    // Ownership
    // ========================================================================

    /// Records a new attachment point of `child`. The caller republishes
    /// `parent`; other parents whose entry turns shared are republished here.
    pub(crate) fn attach(&mut self, child: NodeHandle, parent: NodeHandle, slot: Slot) {
        let Some(node) = self.nodes.get_mut(child) else {
            return;
        };
        let (ownership, republish) = match std::mem::take(&mut node.ownership) {
            Ownership::Detached => (Ownership::Exclusive(ParentSlot { parent, slot }), None),
            Ownership::Exclusive(previous) => (
                Ownership::Shared {
                    parents: smallvec![previous.parent, parent],
                },
                Some(previous.parent),
            ),
            Ownership::Shared { mut parents } => {
                parents.push(parent);
                (Ownership::Shared { parents }, None)
            }
        };
        node.ownership = ownership;
        let pending = node.construction == Construction::Placeholder;

        if let Some(previous) = republish {
            self.invalidate(previous);
        }
        if pending {
            let site = match slot {
                Slot::Child(index) => PatchSite::Child { parent, slot: index },
                Slot::Field(field) => PatchSite::Field { node: parent, field },
            };
            self.resolver.add_patch(child, site);
        }
    }

    /// Removes one attachment point of `child` under `parent`.
    pub(crate) fn detach(&mut self, child: NodeHandle, parent: NodeHandle) {
        let Some(node) = self.nodes.get_mut(child) else {
            return;
        };
        match &node.ownership {
            Ownership::Exclusive(ps) if ps.parent == parent => {
                node.ownership = Ownership::Detached;
            }
            Ownership::Shared { parents } => {
                let mut parents = parents.clone();
                if let Some(index) = parents.iter().position(|&p| p == parent) {
                    parents.remove(index);
                }
                self.settle(child, parents);
            }
            _ => {}
        }
        self.resolver.drop_patch(child, parent);
    }

    /// Removes every attachment point of `child` under `parent`.
    pub(crate) fn release(&mut self, child: NodeHandle, parent: NodeHandle) {
        let Some(node) = self.nodes.get_mut(child) else {
            return;
        };
        match &node.ownership {
            Ownership::Exclusive(ps) if ps.parent == parent => {
                node.ownership = Ownership::Detached;
            }
            Ownership::Shared { parents } => {
                let parents: SmallVec<[NodeHandle; 2]> =
                    parents.iter().copied().filter(|&p| p != parent).collect();
                self.settle(child, parents);
            }
            _ => {}
        }
        self.resolver.drop_patches(child, Some(parent));
    }

    /// Normalises the ownership tag after attachment points were removed.
    fn settle(&mut self, child: NodeHandle, parents: SmallVec<[NodeHandle; 2]>) {
        let ownership = match parents.len() {
            0 => Ownership::Detached,
            1 => {
                let parent = parents[0];
                match self.nodes.get(parent).and_then(|p| p.slot_of(child)) {
                    Some(slot) => {
                        // The remaining parent now attaches it directly.
                        self.invalidate(parent);
                        Ownership::Exclusive(ParentSlot { parent, slot })
                    }
                    None => {
                        log::debug!("Lost attachment of {child:?} under {parent:?}");
                        Ownership::Detached
                    }
                }
            }
            _ => Ownership::Shared { parents },
        };
        if let Some(node) = self.nodes.get_mut(child) {
            node.ownership = ownership;
        }
    }

    /// Rewrites the exclusive child slots of `parent`'s children after the
    /// child list shifted.
    pub(crate) fn reindex(&mut self, parent: NodeHandle) {
        let Some(children) = self.nodes.get(parent).map(|p| p.children.clone()) else {
            return;
        };
        for (index, child) in children.into_iter().enumerate() {
            if let Some(node) = self.nodes.get_mut(child)
                && let Ownership::Exclusive(ps) = &mut node.ownership
                && ps.parent == parent
                && matches!(ps.slot, Slot::Child(_))
            {
                ps.slot = Slot::Child(index);
            }
        }
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    /// Schedules or performs the republish of `handle`'s attached structure.
    pub(crate) fn invalidate(&mut self, handle: NodeHandle) {
        if !self.nodes.contains_key(handle) || self.gate.defer(handle) {
            return;
        }
        self.publish(handle);
    }

    pub(crate) fn invalidate_parents(&mut self, handle: NodeHandle) {
        let Some(node) = self.nodes.get(handle) else {
            return;
        };
        let mut parents = node.ownership.parents();
        parents.sort_unstable();
        parents.dedup();
        for parent in parents {
            self.invalidate(parent);
        }
    }

    pub(crate) fn publish(&self, handle: NodeHandle) {
        if let Some(render) = self.nodes.get(handle).and_then(|n| n.render.as_ref()) {
            render.publish(self.projection(handle));
        }
    }

    /// The attached structure `handle` should expose right now.
    fn projection(&self, handle: NodeHandle) -> Vec<AttachedChild> {
        let Some(node) = self.nodes.get(handle) else {
            return Vec::new();
        };
        let entry = |c: &NodeHandle| self.nodes.get(*c).and_then(RuntimeNode::attached_entry);

        let mut out = Vec::with_capacity(node.children.len());
        match node.role {
            NodeRole::Switch => {
                if let Some(child) = selected_index(node).and_then(|i| node.children.get(i)) {
                    out.extend(entry(child));
                }
            }
            NodeRole::Leaf => {}
            NodeRole::Group | NodeRole::Transform | NodeRole::Root => {
                out.extend(node.children.iter().filter_map(entry));
            }
        }
        out.extend(node.fields.referenced_nodes().iter().filter_map(entry));
        out
    }
}

fn selected_index(node: &RuntimeNode) -> Option<usize> {
    if node.role != NodeRole::Switch {
        return None;
    }
    node.fields
        .get("whichChoice")
        .and_then(FieldValue::as_i32)
        .and_then(|i| usize::try_from(i).ok())
}

fn placeholder_edit(node: &RuntimeNode) -> SceneError {
    SceneError::InvalidUse(format!(
        "placeholder for {} holds no nodes until it resolves",
        node.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(scene: &mut Scene, type_name: &str) -> NodeHandle {
        let h = scene.create_node(type_name).unwrap();
        scene.finish_setup(h).unwrap();
        h
    }

    #[test]
    fn test_reindex_after_removal() {
        let mut scene = Scene::default();
        let group = complete(&mut scene, "Group");
        let a = complete(&mut scene, "Sphere");
        let b = complete(&mut scene, "Box");
        scene.add_child(group, a).unwrap();
        scene.add_child(group, b).unwrap();

        scene.remove_child(group, a).unwrap();
        assert_eq!(
            scene.get_node(b).unwrap().ownership(),
            &Ownership::Exclusive(ParentSlot {
                parent: group,
                slot: Slot::Child(0)
            })
        );
    }

    #[test]
    fn test_shared_back_to_exclusive() {
        let mut scene = Scene::default();
        let g1 = complete(&mut scene, "Group");
        let g2 = complete(&mut scene, "Group");
        let leaf = complete(&mut scene, "Box");

        scene.add_child(g1, leaf).unwrap();
        scene.add_child(g2, leaf).unwrap();
        assert!(scene.get_node(leaf).unwrap().ownership().is_shared());
        assert!(scene.attached_children(g1).unwrap()[0].is_shared());

        scene.remove_child(g2, leaf).unwrap();
        assert!(!scene.get_node(leaf).unwrap().ownership().is_shared());
        assert!(!scene.attached_children(g1).unwrap()[0].is_shared());
    }

    #[test]
    fn test_leaf_is_not_a_container() {
        let mut scene = Scene::default();
        let leaf = complete(&mut scene, "Sphere");
        let other = complete(&mut scene, "Box");
        assert!(matches!(
            scene.add_child(leaf, other),
            Err(SceneError::InvalidUse(_))
        ));
    }

    #[test]
    fn test_root_cannot_be_attached() {
        let mut scene = Scene::default();
        let group = complete(&mut scene, "Group");
        let root = scene.root();
        assert!(matches!(
            scene.add_child(group, root),
            Err(SceneError::InvalidUse(_))
        ));
    }

    #[test]
    fn test_incomplete_child_is_not_attached() {
        let mut scene = Scene::default();
        let group = complete(&mut scene, "Group");
        let pending = scene.create_node("Group").unwrap();

        scene.add_child(group, pending).unwrap();
        assert_eq!(scene.children(group).unwrap(), &[pending]);
        assert!(scene.attached_sources(group).is_empty());

        scene.finish_setup(pending).unwrap();
        assert_eq!(scene.attached_sources(group), vec![pending]);
    }
}
