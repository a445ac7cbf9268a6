use std::sync::Arc;

use bitflags::bitflags;
use smallvec::SmallVec;

use trellis_core::field::FieldStore;
use trellis_core::interner::{self, Symbol};
use trellis_core::{NodeHandle, Template};

use crate::render::{AttachedChild, RenderNode, SharedGroup};

bitflags! {
    /// Capability set of a runtime node.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u8 {
        /// Owns an ordered child list.
        const CONTAINER    = 1 << 0;
        /// Has no children.
        const LEAF         = 1 << 1;
        /// Exposes a field store.
        const FIELD_HOLDER = 1 << 2;
        /// Attaches at most one child at a time.
        const SELECTOR     = 1 << 3;
        /// Carries a local coordinate frame.
        const TRANSFORM    = 1 << 4;
        /// Top of a scene; never attachable.
        const ROOT         = 1 << 5;
    }
}

/// Structural role of a node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    Group,
    Transform,
    Switch,
    Root,
    Leaf,
}

impl NodeRole {
    #[must_use]
    pub fn capabilities(self) -> Capabilities {
        let base = Capabilities::FIELD_HOLDER;
        match self {
            NodeRole::Group => base | Capabilities::CONTAINER,
            NodeRole::Transform => base | Capabilities::CONTAINER | Capabilities::TRANSFORM,
            NodeRole::Switch => base | Capabilities::CONTAINER | Capabilities::SELECTOR,
            NodeRole::Root => base | Capabilities::CONTAINER | Capabilities::ROOT,
            NodeRole::Leaf => base | Capabilities::LEAF,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_container(self) -> bool {
        self.capabilities().contains(Capabilities::CONTAINER)
    }
}

/// Where a node is attached within one parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Index into the parent's child list.
    Child(usize),
    /// A node-typed field of the parent.
    Field(Symbol),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentSlot {
    pub parent: NodeHandle,
    pub slot: Slot,
}

/// Ownership tag of a runtime node.
///
/// `Shared` lists one entry per attachment point, so a parent that holds the
/// node twice appears twice.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Ownership {
    #[default]
    Detached,
    Exclusive(ParentSlot),
    Shared {
        parents: SmallVec<[NodeHandle; 2]>,
    },
}

impl Ownership {
    /// Every attachment point's parent, with repetition.
    #[must_use]
    pub fn parents(&self) -> SmallVec<[NodeHandle; 2]> {
        match self {
            Ownership::Detached => SmallVec::new(),
            Ownership::Exclusive(ps) => smallvec::smallvec![ps.parent],
            Ownership::Shared { parents } => parents.clone(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_shared(&self) -> bool {
        matches!(self, Ownership::Shared { .. })
    }

    #[inline]
    #[must_use]
    pub fn is_detached(&self) -> bool {
        matches!(self, Ownership::Detached)
    }
}

/// Construction state of a runtime node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Construction {
    /// Fields and children are still being assigned.
    Setup,
    /// Fully built; visible to the renderer once attached.
    Complete,
    /// Stand-in for an external template that has not resolved yet.
    Placeholder,
    /// Stand-in for an external template that failed; stays empty.
    Failed,
}

/// A live scene node.
///
/// Every node has a field store. Containers also own an ordered child list.
/// Nodes that the renderer can see carry a [`RenderNode`] and the
/// [`SharedGroup`] used when they are attached at more than one point.
#[derive(Debug)]
pub struct RuntimeNode {
    pub(crate) type_name: Symbol,
    pub(crate) role: NodeRole,
    pub(crate) fields: FieldStore,
    pub(crate) children: Vec<NodeHandle>,
    pub(crate) ownership: Ownership,
    pub(crate) construction: Construction,
    pub(crate) detachable: bool,
    pub(crate) template: Option<Arc<Template>>,
    pub(crate) render: Option<Arc<RenderNode>>,
    pub(crate) shared: Option<Arc<SharedGroup>>,
}

impl RuntimeNode {
    pub(crate) fn new(type_name: Symbol, role: NodeRole, fields: FieldStore) -> Self {
        Self {
            type_name,
            role,
            fields,
            children: Vec::new(),
            ownership: Ownership::Detached,
            construction: Construction::Setup,
            detachable: true,
            template: None,
            render: None,
            shared: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        interner::resolve(self.type_name)
    }

    #[inline]
    #[must_use]
    pub fn role(&self) -> NodeRole {
        self.role
    }

    #[inline]
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.role.capabilities()
    }

    #[inline]
    #[must_use]
    pub fn fields(&self) -> &FieldStore {
        &self.fields
    }

    #[inline]
    #[must_use]
    pub fn children(&self) -> &[NodeHandle] {
        &self.children
    }

    #[inline]
    #[must_use]
    pub fn ownership(&self) -> &Ownership {
        &self.ownership
    }

    #[inline]
    #[must_use]
    pub fn construction(&self) -> Construction {
        self.construction
    }

    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.construction == Construction::Complete
    }

    #[inline]
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        matches!(
            self.construction,
            Construction::Placeholder | Construction::Failed
        )
    }

    #[inline]
    #[must_use]
    pub fn is_detachable(&self) -> bool {
        self.detachable
    }

    /// The template this node instantiates, if any.
    #[must_use]
    pub fn template(&self) -> Option<&Arc<Template>> {
        self.template.as_ref()
    }

    #[must_use]
    pub fn render_node(&self) -> Option<&Arc<RenderNode>> {
        self.render.as_ref()
    }

    /// Entry this node contributes to a parent's attached structure.
    pub(crate) fn attached_entry(&self) -> Option<AttachedChild> {
        if !self.is_complete() {
            return None;
        }
        if self.ownership.is_shared() {
            self.shared.as_ref().map(|g| AttachedChild::Shared(Arc::clone(g)))
        } else {
            self.render.as_ref().map(|r| AttachedChild::Direct(Arc::clone(r)))
        }
    }

    /// Every node this one attaches: children first, then node-field references.
    pub(crate) fn attachments(&self) -> Vec<NodeHandle> {
        let mut out = self.children.clone();
        out.extend(self.fields.referenced_nodes());
        out
    }

    /// Locates `child` within this node.
    pub(crate) fn slot_of(&self, child: NodeHandle) -> Option<Slot> {
        if let Some(index) = self.children.iter().position(|&c| c == child) {
            return Some(Slot::Child(index));
        }
        self.fields
            .field_referencing(child)
            .map(|name| Slot::Field(interner::intern(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_capabilities() {
        assert!(NodeRole::Switch.capabilities().contains(Capabilities::SELECTOR));
        assert!(NodeRole::Root.is_container());
        assert!(!NodeRole::Leaf.is_container());
        assert!(NodeRole::Leaf.capabilities().contains(Capabilities::FIELD_HOLDER));
    }

    #[test]
    fn test_ownership_parents() {
        assert!(Ownership::Detached.parents().is_empty());
        let shared = Ownership::Shared {
            parents: SmallVec::new(),
        };
        assert!(shared.is_shared());
    }
}
