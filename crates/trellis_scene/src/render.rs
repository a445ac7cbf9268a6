//! Renderer-Native Structure
//!
//! The traversal actor never touches the scene arena. It walks
//! [`RenderNode`]s, whose attached children are immutable snapshots published
//! through `ArcSwap`. A traversal that loaded a snapshot keeps seeing it in
//! full, even if the mutator publishes a new one meanwhile.
//!
//! A node attached at several points (DEF/USE) is referenced through one
//! [`SharedGroup`], so the renderer holds one underlying resource for it.

use std::sync::Arc;

use arc_swap::ArcSwap;
use glam::{Affine3A, Quat, Vec3, Vec4};

use trellis_core::field::{FieldStore, FieldValue};
use trellis_core::interner::{self, Symbol};
use trellis_core::NodeHandle;

use crate::node::NodeRole;

/// One entry of an attached structure.
#[derive(Debug, Clone)]
pub enum AttachedChild {
    Direct(Arc<RenderNode>),
    Shared(Arc<SharedGroup>),
}

impl AttachedChild {
    #[inline]
    #[must_use]
    pub fn node(&self) -> &Arc<RenderNode> {
        match self {
            AttachedChild::Direct(node) => node,
            AttachedChild::Shared(group) => &group.node,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_shared(&self) -> bool {
        matches!(self, AttachedChild::Shared(_))
    }

    /// Handle of the scene node this entry renders.
    #[inline]
    #[must_use]
    pub fn source(&self) -> NodeHandle {
        self.node().source
    }
}

/// Indirection used for every attachment point of a shared node.
#[derive(Debug)]
pub struct SharedGroup {
    node: Arc<RenderNode>,
}

impl SharedGroup {
    pub(crate) fn new(node: Arc<RenderNode>) -> Self {
        Self { node }
    }

    #[inline]
    #[must_use]
    pub fn node(&self) -> &Arc<RenderNode> {
        &self.node
    }
}

/// Renderer-side mirror of a scene node.
#[derive(Debug)]
pub struct RenderNode {
    source: NodeHandle,
    type_name: Symbol,
    role: NodeRole,
    children: ArcSwap<Vec<AttachedChild>>,
    local: ArcSwap<Affine3A>,
}

impl RenderNode {
    pub(crate) fn new(source: NodeHandle, type_name: Symbol, role: NodeRole) -> Self {
        Self {
            source,
            type_name,
            role,
            children: ArcSwap::from_pointee(Vec::new()),
            local: ArcSwap::from_pointee(Affine3A::IDENTITY),
        }
    }

    #[inline]
    #[must_use]
    pub fn source(&self) -> NodeHandle {
        self.source
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

    /// Current snapshot of the attached children. Wait-free.
    #[inline]
    #[must_use]
    pub fn attached_children(&self) -> Arc<Vec<AttachedChild>> {
        self.children.load_full()
    }

    /// Local transform relative to the parent.
    #[inline]
    #[must_use]
    pub fn local_matrix(&self) -> Affine3A {
        **self.local.load()
    }

    pub(crate) fn publish(&self, children: Vec<AttachedChild>) {
        self.children.store(Arc::new(children));
    }

    pub(crate) fn set_local_matrix(&self, matrix: Affine3A) {
        self.local.store(Arc::new(matrix));
    }
}

/// Local matrix of a transform node from its fields:
/// `T(translation + center) * R(rotation) * S(scale) * T(-center)`.
#[must_use]
pub fn transform_matrix(fields: &FieldStore) -> Affine3A {
    let vec3 = |name: &str, fallback: Vec3| {
        fields
            .get(name)
            .and_then(FieldValue::as_vec3)
            .unwrap_or(fallback)
    };

    let translation = vec3("translation", Vec3::ZERO);
    let center = vec3("center", Vec3::ZERO);
    let scale = vec3("scale", Vec3::ONE);
    let rotation = match fields.get("rotation") {
        Some(FieldValue::Rotation(r)) => axis_angle(*r),
        _ => Quat::IDENTITY,
    };

    Affine3A::from_translation(translation + center)
        * Affine3A::from_quat(rotation)
        * Affine3A::from_scale(scale)
        * Affine3A::from_translation(-center)
}

fn axis_angle(r: Vec4) -> Quat {
    let axis = r.truncate();
    if axis.length_squared() <= f32::EPSILON {
        return Quat::IDENTITY;
    }
    Quat::from_axis_angle(axis.normalize(), r.w)
}

/// Depth-first walk over attached snapshots, accumulating world matrices.
///
/// A shared node is visited once per attachment point.
pub fn traverse(root: &Arc<RenderNode>, visit: &mut impl FnMut(&RenderNode, &Affine3A)) {
    fn walk(node: &RenderNode, parent: &Affine3A, visit: &mut impl FnMut(&RenderNode, &Affine3A)) {
        let world = *parent * node.local_matrix();
        visit(node, &world);
        for child in node.attached_children().iter() {
            walk(child.node(), &world, visit);
        }
    }
    walk(root, &Affine3A::IDENTITY, visit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;
    use std::sync::Arc;

    use slotmap::KeyData;
    use trellis_core::field::{AccessType, FieldDecl, FieldType};

    fn handle(n: u64) -> NodeHandle {
        NodeHandle::from(KeyData::from_ffi(n | (1 << 32)))
    }

    fn transform_fields() -> FieldStore {
        let decls: Arc<[FieldDecl]> = Arc::from(vec![
            FieldDecl::new("translation", FieldType::SFVec3f, AccessType::InputOutput),
            FieldDecl::new("rotation", FieldType::SFRotation, AccessType::InputOutput),
            FieldDecl::new("scale", FieldType::SFVec3f, AccessType::InputOutput)
                .with_default(FieldValue::Vec3f(Vec3::ONE)),
            FieldDecl::new("center", FieldType::SFVec3f, AccessType::InputOutput),
        ]);
        FieldStore::new(interner::intern("Transform"), decls)
    }

    #[test]
    fn test_default_transform_is_identity() {
        let m = transform_matrix(&transform_fields());
        assert!(m.abs_diff_eq(Affine3A::IDENTITY, 1e-6));
    }

    #[test]
    fn test_rotation_about_center() {
        let mut fields = transform_fields();
        fields
            .assign("rotation", FieldValue::Rotation(Vec4::new(0.0, 0.0, 1.0, FRAC_PI_2)))
            .unwrap();
        fields.assign("center", FieldValue::Vec3f(Vec3::X)).unwrap();

        let m = transform_matrix(&fields);
        // The center itself does not move.
        assert!(m.transform_point3(Vec3::X).abs_diff_eq(Vec3::X, 1e-5));
        assert!(m.transform_point3(Vec3::ZERO).abs_diff_eq(Vec3::new(1.0, -1.0, 0.0), 1e-5));
    }

    #[test]
    fn test_zero_axis_is_identity_rotation() {
        assert_eq!(axis_angle(Vec4::new(0.0, 0.0, 0.0, 1.0)), Quat::IDENTITY);
    }

    #[test]
    fn test_snapshot_survives_publish() {
        let parent = RenderNode::new(handle(1), interner::intern("Group"), NodeRole::Group);
        let child = Arc::new(RenderNode::new(handle(2), interner::intern("Shape"), NodeRole::Leaf));

        parent.publish(vec![AttachedChild::Direct(Arc::clone(&child))]);
        let before = parent.attached_children();
        parent.publish(Vec::new());

        assert_eq!(before.len(), 1);
        assert_eq!(before[0].source(), handle(2));
        assert!(parent.attached_children().is_empty());
    }

    #[test]
    fn test_traverse_accumulates_world() {
        let root = Arc::new(RenderNode::new(handle(1), interner::intern("Root"), NodeRole::Root));
        let moved = Arc::new(RenderNode::new(handle(2), interner::intern("Transform"), NodeRole::Transform));
        moved.set_local_matrix(Affine3A::from_translation(Vec3::Y));
        let leaf = Arc::new(RenderNode::new(handle(3), interner::intern("Shape"), NodeRole::Leaf));

        let group = Arc::new(SharedGroup::new(Arc::clone(&leaf)));
        moved.publish(vec![
            AttachedChild::Shared(Arc::clone(&group)),
            AttachedChild::Shared(group),
        ]);
        root.publish(vec![AttachedChild::Direct(moved)]);

        let mut seen = Vec::new();
        traverse(&root, &mut |node, world| {
            seen.push((node.source(), world.translation));
        });
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[2].0, handle(3));
        assert!(seen[3].1.abs_diff_eq(glam::Vec3A::Y, 1e-6));
    }
}
