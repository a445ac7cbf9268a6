//! Scene
//!
//! The live scene graph: a slot-map arena of runtime nodes under one root,
//! field access, construction completion and node removal. Structural edits
//! live in `container`, template instantiation in `builder` and external
//! resolution in `resolver`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use slotmap::SlotMap;

use trellis_core::diagnostics::{Diagnostic, Diagnostics, Severity};
use trellis_core::errors::{Result, SceneError};
use trellis_core::field::FieldValue;
use trellis_core::interner;
use trellis_core::NodeHandle;

use crate::config::{GatePolicy, SceneConfig};
use crate::factory::NodeFactory;
use crate::gate::{MutationGate, TraversalGate};
use crate::node::{Construction, NodeRole, Ownership, RuntimeNode, Slot};
use crate::render::{self, AttachedChild, RenderNode, SharedGroup};
use crate::resolver::Resolver;

static NEXT_SCENE_ID: AtomicU32 = AtomicU32::new(1);

/// Live scene graph.
///
/// The scene owns every runtime node in a slot-map arena and is driven by a
/// single mutator (`&mut self`). The renderer reads the graph through
/// [`Scene::render_root`] from any thread; what it sees is governed by the
/// mutation gate (see [`GatePolicy`]).
pub struct Scene {
    pub id: u32,
    pub(crate) config: SceneConfig,
    pub(crate) factory: NodeFactory,
    pub(crate) nodes: SlotMap<NodeHandle, RuntimeNode>,
    pub(crate) root: NodeHandle,
    render_root: Arc<RenderNode>,
    pub(crate) gate: MutationGate,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) resolver: Resolver,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new(SceneConfig::default())
    }
}

impl Scene {
    #[must_use]
    pub fn new(config: SceneConfig) -> Self {
        let factory = NodeFactory::with_builtins(config.profile);
        Self::with_factory(config, factory)
    }

    /// A scene using a caller-prepared factory (e.g. with extra node types).
    #[must_use]
    pub fn with_factory(config: SceneConfig, factory: NodeFactory) -> Self {
        let mut nodes: SlotMap<NodeHandle, RuntimeNode> = SlotMap::with_key();
        let mut root_node = factory.root();
        root_node.construction = Construction::Complete;
        let type_name = root_node.type_name;
        let root = nodes.insert(root_node);

        let render_root = Arc::new(RenderNode::new(root, type_name, NodeRole::Root));
        if let Some(node) = nodes.get_mut(root) {
            node.shared = Some(Arc::new(SharedGroup::new(Arc::clone(&render_root))));
            node.render = Some(Arc::clone(&render_root));
        }

        let id = NEXT_SCENE_ID.fetch_add(1, Ordering::Relaxed);
        log::debug!("Scene {id} created with {:?}", config.profile);

        Self {
            id,
            gate: MutationGate::new(config.gate_policy),
            diagnostics: Diagnostics::new(config.diagnostics_capacity),
            config,
            factory,
            nodes,
            root,
            render_root,
            resolver: Resolver::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn factory(&self) -> &NodeFactory {
        &self.factory
    }

    /// Mutable factory, for registering application node types.
    #[inline]
    pub fn factory_mut(&mut self) -> &mut NodeFactory {
        &mut self.factory
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> NodeHandle {
        self.root
    }

    /// Renderer-side root. Safe to hand to another thread.
    #[inline]
    #[must_use]
    pub fn render_root(&self) -> Arc<RenderNode> {
        Arc::clone(&self.render_root)
    }

    /// Gate the traversal actor enters once per frame.
    #[inline]
    #[must_use]
    pub fn traversal_gate(&self) -> TraversalGate {
        self.gate.traversal().clone()
    }

    #[inline]
    #[must_use]
    pub fn gate_policy(&self) -> GatePolicy {
        self.gate.policy()
    }

    #[inline]
    #[must_use]
    pub fn get_node(&self, handle: NodeHandle) -> Option<&RuntimeNode> {
        self.nodes.get(handle)
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.nodes.contains_key(handle)
    }

    /// Number of live nodes, the root included.
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn children(&self, handle: NodeHandle) -> Option<&[NodeHandle]> {
        self.nodes.get(handle).map(RuntimeNode::children)
    }

    /// Published attached structure of `handle`.
    #[must_use]
    pub fn attached_children(&self, handle: NodeHandle) -> Option<Arc<Vec<AttachedChild>>> {
        self.nodes
            .get(handle)
            .and_then(|n| n.render.as_ref())
            .map(|r| r.attached_children())
    }

    /// Source handles of the published attached structure of `handle`.
    #[must_use]
    pub fn attached_sources(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        self.attached_children(handle)
            .map(|list| list.iter().map(AttachedChild::source).collect())
            .unwrap_or_default()
    }

    #[inline]
    #[must_use]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Drains the diagnostics recorded so far.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.diagnostics.take()
    }

    // ========================================================================
    // Nodes and fields
    // ========================================================================

    /// Creates a detached node of `type_name` in the `Setup` state.
    pub fn create_node(&mut self, type_name: &str) -> Result<NodeHandle> {
        let mut node = self.factory.create(type_name)?;
        node.detachable = self.config.detachable_by_default;
        Ok(self.insert_node(node))
    }

    /// Marks a node's construction complete and publishes it to its parents.
    pub fn finish_setup(&mut self, handle: NodeHandle) -> Result<()> {
        let node = self.nodes.get(handle).ok_or(SceneError::StaleHandle)?;
        match node.construction {
            Construction::Setup => {
                self.complete(handle);
                Ok(())
            }
            Construction::Complete => Ok(()),
            Construction::Placeholder | Construction::Failed => Err(SceneError::InvalidUse(
                format!("placeholder for {} completes through resolution", node.type_name()),
            )),
        }
    }

    pub fn set_detachable(&mut self, handle: NodeHandle, detachable: bool) -> Result<()> {
        let node = self.nodes.get_mut(handle).ok_or(SceneError::StaleHandle)?;
        if node.is_complete() && !node.detachable && detachable {
            return Err(SceneError::MutationSafety(format!(
                "{} was completed as non-detachable",
                node.type_name()
            )));
        }
        node.detachable = detachable;
        Ok(())
    }

    pub fn get_field(&self, handle: NodeHandle, name: &str) -> Result<&FieldValue> {
        let node = self.nodes.get(handle).ok_or(SceneError::StaleHandle)?;
        node.fields
            .get(name)
            .ok_or_else(|| SceneError::unknown_field(node.type_name(), name))
    }

    /// Writes a field. During `Setup` initialize-only fields are writable;
    /// afterwards only input fields are. Node-typed fields rewire ownership
    /// of the referenced nodes.
    pub fn set_field(&mut self, handle: NodeHandle, name: &str, value: FieldValue) -> Result<()> {
        let node = self.nodes.get(handle).ok_or(SceneError::StaleHandle)?;
        let decl = node
            .fields
            .decl(name)
            .ok_or_else(|| SceneError::unknown_field(node.type_name(), name))?;
        if decl.field_type.is_node() {
            return self.set_node_field(handle, name, value);
        }

        let node = self.nodes.get_mut(handle).ok_or(SceneError::StaleHandle)?;
        if node.construction == Construction::Setup {
            node.fields.assign(name, value)?;
        } else {
            node.fields.set(name, value)?;
        }

        let role = node.role;
        match role {
            NodeRole::Switch if name == "whichChoice" => self.invalidate(handle),
            NodeRole::Transform => self.refresh_transform(handle),
            _ => {}
        }
        Ok(())
    }

    fn set_node_field(&mut self, handle: NodeHandle, name: &str, value: FieldValue) -> Result<()> {
        let new_refs: Vec<NodeHandle> = match &value {
            FieldValue::Node(h) => h.iter().copied().collect(),
            FieldValue::Nodes(list) => list.clone(),
            _ => Vec::new(),
        };
        self.check_not_placeholder(handle)?;
        for &r in &new_refs {
            self.check_attachable(handle, r)?;
        }
        self.ensure_mutable(handle)?;

        let node = self.nodes.get_mut(handle).ok_or(SceneError::StaleHandle)?;
        let old_refs: Vec<NodeHandle> = match node.fields.get(name) {
            Some(FieldValue::Node(h)) => h.iter().copied().collect(),
            Some(FieldValue::Nodes(list)) => list.clone(),
            _ => Vec::new(),
        };
        if node.construction == Construction::Setup {
            node.fields.assign(name, value)?;
        } else {
            node.fields.set(name, value)?;
        }

        let slot = Slot::Field(interner::intern(name));
        for old in old_refs {
            self.detach(old, handle);
        }
        for new in new_refs {
            self.attach(new, handle, slot);
        }
        self.invalidate(handle);
        Ok(())
    }

    /// Removes `handle` from every parent and frees it together with every
    /// descendant that is not attached anywhere else.
    pub fn remove_node(&mut self, handle: NodeHandle) -> Result<()> {
        if handle == self.root {
            return Err(SceneError::InvalidUse("the root cannot be removed".to_string()));
        }
        let node = self.nodes.get(handle).ok_or(SceneError::StaleHandle)?;
        let mut parents = node.ownership.parents();
        parents.sort_unstable();
        parents.dedup();
        for &parent in &parents {
            self.ensure_mutable(parent)?;
        }

        self.with_batch(|scene| {
            scene.unlink_everywhere(handle);
            scene.free_subtree(handle);
        });
        Ok(())
    }

    /// Safe point of the traversal actor. Publishes every container edited
    /// since the previous call while no frame is in progress.
    pub fn end_frame(&mut self) {
        if !self.gate.has_dirty() {
            return;
        }
        let traversal = self.gate.traversal().clone();
        let _frame = traversal.safe_point();
        for handle in self.gate.take_dirty() {
            self.publish(handle);
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    pub(crate) fn insert_node(&mut self, node: RuntimeNode) -> NodeHandle {
        self.nodes.insert_with_key(|handle| with_render_node(handle, node))
    }

    /// Marks `handle` complete and republishes it and its parents.
    pub(crate) fn complete(&mut self, handle: NodeHandle) {
        let Some(node) = self.nodes.get_mut(handle) else {
            return;
        };
        node.construction = Construction::Complete;
        self.refresh_transform(handle);
        self.invalidate(handle);
        self.invalidate_parents(handle);
    }

    pub(crate) fn refresh_transform(&self, handle: NodeHandle) {
        if let Some(node) = self.nodes.get(handle)
            && node.role == NodeRole::Transform
            && let Some(render) = &node.render
        {
            render.set_local_matrix(render::transform_matrix(&node.fields));
        }
    }

    pub(crate) fn ensure_mutable(&self, handle: NodeHandle) -> Result<()> {
        let node = self.nodes.get(handle).ok_or(SceneError::StaleHandle)?;
        if node.is_complete() && !node.detachable {
            return Err(SceneError::MutationSafety(format!(
                "{} is not detachable",
                node.type_name()
            )));
        }
        Ok(())
    }

    /// Runs `f` with publishing batched; each touched container is published
    /// once at the end (or at end of frame).
    pub(crate) fn with_batch<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.gate.begin_batch();
        let result = f(self);
        for handle in self.gate.end_batch() {
            self.publish(handle);
        }
        result
    }

    pub(crate) fn report(&mut self, severity: Severity, error: SceneError, context: &str) {
        self.diagnostics.report(severity, error, context);
    }

    /// Removes every attachment of `handle` from all of its parents.
    pub(crate) fn unlink_everywhere(&mut self, handle: NodeHandle) {
        let Some(node) = self.nodes.get(handle) else {
            return;
        };
        let mut parents = node.ownership.parents();
        parents.sort_unstable();
        parents.dedup();

        for parent in parents {
            let Some(p) = self.nodes.get_mut(parent) else {
                continue;
            };
            p.children.retain(|&c| c != handle);
            p.fields.drop_node_ref(handle);
            self.resolver.drop_patches(handle, Some(parent));
            self.reindex(parent);
            self.invalidate(parent);
        }
        if let Some(node) = self.nodes.get_mut(handle) {
            node.ownership = Ownership::Detached;
        }
    }

    /// Frees a detached node and every descendant left without a parent.
    pub(crate) fn free_subtree(&mut self, handle: NodeHandle) {
        let Some(node) = self.nodes.remove(handle) else {
            return;
        };
        let mut released = node.attachments();
        released.extend(self.resolver.forget(handle));
        released.sort_unstable();
        released.dedup();

        for child in released {
            self.release(child, handle);
            if self
                .nodes
                .get(child)
                .is_some_and(|c| c.ownership.is_detached() && child != self.root)
            {
                self.free_subtree(child);
            }
        }
        log::trace!("Freed node {handle:?}");
    }
}

fn with_render_node(handle: NodeHandle, mut node: RuntimeNode) -> RuntimeNode {
    if !node.is_placeholder() {
        let render = Arc::new(RenderNode::new(handle, node.type_name, node.role));
        node.shared = Some(Arc::new(SharedGroup::new(Arc::clone(&render))));
        node.render = Some(render);
    }
    node
}
