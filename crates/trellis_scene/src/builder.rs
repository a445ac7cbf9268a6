//! Instance Builder
//!
//! Walks a template body and produces runtime nodes in document order.
//!
//! Each template instantiation owns an [`IdentityMap`] from template node ids
//! to runtime nodes. A node is recorded before its children are built, so a
//! second reference to the same id (USE) attaches the existing node instead
//! of building another one. Nested instances get their own map; the chain of
//! templates being instantiated guards against recursion.
//!
//! Body nodes may bind their fields to the interface of the template being
//! instantiated (`field IS interface`). The bound value is read from the
//! instance node after copy-down, so values recorded on the reference reach
//! the body.
//!
//! Construction errors never abort the walk. They are reported to the scene's
//! diagnostics and the affected slot stays empty.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use trellis_core::diagnostics::Severity;
use trellis_core::errors::{Result, SceneError};
use trellis_core::field::{FieldType, FieldValue};
use trellis_core::interner;
use trellis_core::template::{
    BodyState, Template, TemplateBody, TemplateNode, TemplateNodeId, TemplateNodeKind,
};
use trellis_core::NodeHandle;

use crate::node::{Construction, Slot};
use crate::scene::Scene;

/// Template node id -> runtime node, scoped to one template instantiation.
pub type IdentityMap = FxHashMap<TemplateNodeId, NodeHandle>;

struct Scope<'b> {
    body: &'b TemplateBody,
    identity: IdentityMap,
    /// Instance whose interface fields the body binds to. `None` at scene
    /// level, where bindings read the template defaults.
    interface: Option<NodeHandle>,
}

/// Templates currently being instantiated, outermost first.
pub(crate) struct Chain(Vec<Arc<Template>>);

impl Chain {
    fn new() -> Self {
        Self(Vec::new())
    }

    pub(crate) fn root(template: &Arc<Template>) -> Self {
        Self(vec![Arc::clone(template)])
    }

    fn contains(&self, template: &Arc<Template>) -> bool {
        self.0.iter().any(|t| Arc::ptr_eq(t, template))
    }

    fn depth(&self) -> usize {
        self.0.len()
    }

    fn current(&self) -> Option<&Arc<Template>> {
        self.0.last()
    }

    fn context(&self) -> String {
        match self.0.last() {
            Some(t) => format!("instantiating {}", t.name()),
            None => "instantiating scene".to_string(),
        }
    }

    fn describe(&self, next: &Template) -> String {
        let mut names: Vec<&str> = self.0.iter().map(|t| t.name()).collect();
        names.push(next.name());
        names.join(" -> ")
    }
}

impl Scene {
    // ========================================================================
    // Entry points
    // ========================================================================

    /// Replaces the scene content with an instance of `template`, built into
    /// the root. External branches that have not resolved are left as
    /// placeholders and patched in later.
    pub fn build(&mut self, template: &Arc<Template>) -> NodeHandle {
        let root = self.root;
        self.with_batch(|scene| {
            let previous = scene.nodes[root].children.clone();
            scene.clear_children_internal(root);
            for old in previous {
                if scene.nodes.get(old).is_some_and(|n| n.ownership.is_detached()) {
                    scene.free_subtree(old);
                }
            }

            match template.body() {
                BodyState::Ready(body) => {
                    let mut chain = Chain::root(template);
                    scene.build_body_into(&body, root, &mut chain, None);
                }
                BodyState::Pending => {
                    let mut node = scene.factory.placeholder(template);
                    node.detachable = scene.config.detachable_by_default;
                    let placeholder = scene.insert_node(node);
                    scene.track_placeholder(placeholder, template, Vec::new());
                    scene.append_built(root, placeholder, "building scene");
                }
                BodyState::Failed(reason) => {
                    scene.report(
                        Severity::Error,
                        SceneError::ExternalResolutionFailure {
                            template: template.name().to_string(),
                            reason,
                        },
                        "building scene",
                    );
                }
            }
        });
        log::debug!("Scene {} built from {}", self.id, template.name());
        root
    }

    /// Builds a detached, complete instance of `template`. The caller attaches
    /// it where it wants with [`Scene::add_child`].
    pub fn instantiate(&mut self, template: &Arc<Template>) -> Result<NodeHandle> {
        let body = match template.body() {
            BodyState::Ready(body) => body,
            BodyState::Pending => {
                self.resolver.request(template);
                return Err(SceneError::ExternalResolutionFailure {
                    template: template.name().to_string(),
                    reason: "template has not resolved yet".to_string(),
                });
            }
            BodyState::Failed(reason) => {
                return Err(SceneError::ExternalResolutionFailure {
                    template: template.name().to_string(),
                    reason,
                });
            }
        };

        Ok(self.with_batch(|scene| {
            let mut node = scene.factory.instance(template);
            node.detachable = scene.config.detachable_by_default;
            let handle = scene.insert_node(node);
            scene.populate_instance(handle, template, &body, &mut Chain::new());
            scene.complete(handle);
            handle
        }))
    }

    // ========================================================================
    // Walk
    // ========================================================================

    /// Builds every top-level node of `body` into `container`, with a fresh
    /// identity map.
    pub(crate) fn build_body_into(
        &mut self,
        body: &TemplateBody,
        container: NodeHandle,
        chain: &mut Chain,
        interface: Option<NodeHandle>,
    ) {
        let mut scope = Scope {
            body,
            identity: IdentityMap::default(),
            interface,
        };
        let context = chain.context();
        for &id in body.roots() {
            if let Some(child) = self.build_ref(&mut scope, id, chain) {
                self.append_built(container, child, &context);
            }
        }
    }

    fn populate_instance(&mut self, handle: NodeHandle, template: &Arc<Template>, body: &TemplateBody, chain: &mut Chain) {
        chain.0.push(Arc::clone(template));
        self.build_body_into(body, handle, chain, Some(handle));
        chain.0.pop();
    }

    fn build_ref(&mut self, scope: &mut Scope<'_>, id: TemplateNodeId, chain: &mut Chain) -> Option<NodeHandle> {
        if let Some(&existing) = scope.identity.get(&id) {
            return Some(existing);
        }
        let body = scope.body;
        let Some(tnode) = body.node(id) else {
            self.report(
                Severity::Error,
                SceneError::InvalidUse(format!("template node #{} does not exist", id.index())),
                &chain.context(),
            );
            return None;
        };

        match &tnode.kind {
            TemplateNodeKind::Builtin(type_name) => self.build_builtin(scope, id, tnode, type_name, chain),
            TemplateNodeKind::Instance(template) => self.build_nested(scope, id, tnode, template, chain),
        }
    }

    fn build_builtin(
        &mut self,
        scope: &mut Scope<'_>,
        id: TemplateNodeId,
        tnode: &TemplateNode,
        type_name: &str,
        chain: &mut Chain,
    ) -> Option<NodeHandle> {
        let context = chain.context();
        let mut node = match self.factory.create(type_name) {
            Ok(node) => node,
            Err(err) => {
                self.report(Severity::Error, err, &context);
                return None;
            }
        };
        node.detachable = tnode.detachable.unwrap_or(self.config.detachable_by_default);
        let handle = self.insert_node(node);
        scope.identity.insert(id, handle);

        self.assign_fields(handle, &tnode.fields, &context);
        self.apply_bindings(scope, handle, tnode, chain, &context);
        self.build_node_fields(scope, handle, tnode, chain, &context);
        self.complete(handle);
        Some(handle)
    }

    fn build_nested(
        &mut self,
        scope: &mut Scope<'_>,
        id: TemplateNodeId,
        tnode: &TemplateNode,
        template: &Arc<Template>,
        chain: &mut Chain,
    ) -> Option<NodeHandle> {
        let context = chain.context();
        if chain.contains(template) || chain.depth() >= self.config.max_template_depth {
            self.report(
                Severity::Error,
                SceneError::TemplateRecursion {
                    template: template.name().to_string(),
                    chain: chain.describe(template),
                },
                &context,
            );
            return None;
        }
        let detachable = tnode.detachable.unwrap_or(self.config.detachable_by_default);

        match template.body() {
            BodyState::Ready(body) => {
                let mut node = self.factory.instance(template);
                node.detachable = detachable;
                let handle = self.insert_node(node);
                scope.identity.insert(id, handle);

                self.copy_down(handle, template, &tnode.fields, &context);
                self.apply_bindings(scope, handle, tnode, chain, &context);
                self.populate_instance(handle, template, &body, chain);
                self.build_node_fields(scope, handle, tnode, chain, &context);
                self.complete(handle);
                Some(handle)
            }
            BodyState::Pending => {
                let mut node = self.factory.placeholder(template);
                node.detachable = detachable;
                let handle = self.insert_node(node);
                scope.identity.insert(id, handle);
                self.copy_down(handle, template, &tnode.fields, &context);
                self.apply_bindings(scope, handle, tnode, chain, &context);

                // Built now, attached to the real instance once it exists.
                let mut wired = Vec::with_capacity(tnode.node_fields.len());
                for (name, ids) in &tnode.node_fields {
                    if let Err(err) = self.check_node_field(handle, name) {
                        self.report(Severity::Warning, err, &context);
                        continue;
                    }
                    let built: Vec<NodeHandle> =
                        ids.iter().filter_map(|&c| self.build_ref(scope, c, chain)).collect();
                    wired.push((name.clone(), built));
                }
                self.track_placeholder(handle, template, wired);
                Some(handle)
            }
            BodyState::Failed(reason) => {
                self.report(
                    Severity::Error,
                    SceneError::ExternalResolutionFailure {
                        template: template.name().to_string(),
                        reason,
                    },
                    &context,
                );
                let mut node = self.factory.placeholder(template);
                node.construction = Construction::Failed;
                node.detachable = detachable;
                let handle = self.insert_node(node);
                scope.identity.insert(id, handle);
                Some(handle)
            }
        }
    }

    // ========================================================================
    // Fields
    // ========================================================================

    fn assign_fields(&mut self, handle: NodeHandle, fields: &[(String, FieldValue)], context: &str) {
        for (name, value) in fields {
            let result = if value.field_type().is_node() {
                Err(SceneError::FieldMismatch {
                    node_type: self.describe(handle),
                    field: name.clone(),
                    reason: "node values are listed as node fields".to_string(),
                })
            } else {
                match self.nodes.get_mut(handle) {
                    Some(node) => node.fields.assign(name, value.clone()),
                    None => return,
                }
            };
            if let Err(err) = result {
                self.report(Severity::Warning, err, context);
            }
        }
    }

    /// Copies field values recorded on a template reference onto the
    /// instance. Input-only, output-only and node-typed fields are skipped.
    fn copy_down(&mut self, handle: NodeHandle, template: &Template, fields: &[(String, FieldValue)], context: &str) {
        for (name, value) in fields {
            let Some(decl) = template.field(name) else {
                self.report(
                    Severity::Warning,
                    SceneError::unknown_field(template.name(), name),
                    context,
                );
                continue;
            };
            if decl.field_type.is_node() || value.field_type().is_node() {
                continue;
            }
            if !decl.access.is_copied_down() {
                log::debug!("{}.{name} is {:?}; not copied", template.name(), decl.access);
                continue;
            }
            let result = match self.nodes.get_mut(handle) {
                Some(node) => node.fields.assign(name, value.clone()),
                None => return,
            };
            if let Err(err) = result {
                self.report(Severity::Warning, err, context);
            }
        }
    }

    /// Applies the `field IS interface` bindings of `tnode` to `handle`.
    /// Event-only fields on either side are left to the routing layer.
    fn apply_bindings(
        &mut self,
        scope: &Scope<'_>,
        handle: NodeHandle,
        tnode: &TemplateNode,
        chain: &Chain,
        context: &str,
    ) {
        let Some(template) = chain.current() else {
            return;
        };
        for (field, interface) in &tnode.bindings {
            let Some(decl) = template.field(interface) else {
                self.report(
                    Severity::Warning,
                    SceneError::unknown_field(template.name(), interface),
                    context,
                );
                continue;
            };
            if decl.field_type.is_node() {
                self.report(
                    Severity::Warning,
                    SceneError::FieldMismatch {
                        node_type: template.name().to_string(),
                        field: interface.clone(),
                        reason: "node-valued interface fields cannot be bound".to_string(),
                    },
                    context,
                );
                continue;
            }
            let target_access = self
                .nodes
                .get(handle)
                .and_then(|n| n.fields.decl(field))
                .map(|d| d.access);
            if !decl.access.is_copied_down() || target_access.is_some_and(|a| !a.is_copied_down()) {
                log::debug!("{field} IS {interface} carries events only; not bound");
                continue;
            }

            let value = match scope.interface {
                Some(instance) => self.nodes.get(instance).and_then(|n| n.fields.get(interface)).cloned(),
                None => Some(
                    decl.default
                        .clone()
                        .unwrap_or_else(|| decl.field_type.default_value()),
                ),
            };
            let Some(value) = value else {
                continue;
            };
            let result = match self.nodes.get_mut(handle) {
                Some(node) => node.fields.assign(field, value),
                None => return,
            };
            if let Err(err) = result {
                self.report(Severity::Warning, err, context);
            }
        }
    }

    /// Builds the node-valued fields of `tnode` (children included) and
    /// connects them to `handle`.
    fn build_node_fields(
        &mut self,
        scope: &mut Scope<'_>,
        handle: NodeHandle,
        tnode: &TemplateNode,
        chain: &mut Chain,
        context: &str,
    ) {
        for (name, ids) in &tnode.node_fields {
            if let Err(err) = self.check_node_field(handle, name) {
                self.report(Severity::Warning, err, context);
                continue;
            }
            let built: Vec<NodeHandle> =
                ids.iter().filter_map(|&c| self.build_ref(scope, c, chain)).collect();
            self.connect_node_field(handle, name, built, context);
        }
    }

    /// Whether `name` can receive nodes on `handle`.
    fn check_node_field(&self, handle: NodeHandle, name: &str) -> Result<()> {
        let node = self.nodes.get(handle).ok_or(SceneError::StaleHandle)?;
        if name == "children" {
            if node.role.is_container() {
                return Ok(());
            }
            return Err(SceneError::FieldMismatch {
                node_type: node.type_name().to_string(),
                field: name.to_string(),
                reason: "node cannot hold children".to_string(),
            });
        }
        let decl = node
            .fields
            .decl(name)
            .ok_or_else(|| SceneError::unknown_field(node.type_name(), name))?;
        if !decl.field_type.is_node() {
            return Err(SceneError::type_mismatch(
                node.type_name(),
                name,
                decl.field_type,
                FieldType::MFNode,
            ));
        }
        Ok(())
    }

    /// Attaches already-built nodes: appended as children for `children`,
    /// stored as references otherwise.
    pub(crate) fn connect_node_field(&mut self, handle: NodeHandle, name: &str, nodes: Vec<NodeHandle>, context: &str) {
        if let Err(err) = self.check_node_field(handle, name) {
            self.report(Severity::Warning, err, context);
            return;
        }
        if name == "children" {
            for child in nodes {
                self.append_built(handle, child, context);
            }
            return;
        }

        let mut accepted = Vec::with_capacity(nodes.len());
        for node in nodes {
            match self.check_attachable(handle, node) {
                Ok(()) => accepted.push(node),
                Err(err) => self.report(Severity::Error, err, context),
            }
        }

        let Some(target) = self.nodes.get_mut(handle) else {
            return;
        };
        let single = target
            .fields
            .decl(name)
            .is_some_and(|d| d.field_type == FieldType::SFNode);
        let mut extra = None;
        let value = if single {
            if accepted.len() > 1 {
                extra = Some(accepted.len() - 1);
                accepted.truncate(1);
            }
            FieldValue::Node(accepted.first().copied())
        } else {
            FieldValue::Nodes(accepted.clone())
        };
        let written = target.fields.set_internal(name, value);
        let type_name = target.type_name();

        if let Some(extra) = extra {
            self.report(
                Severity::Warning,
                SceneError::FieldMismatch {
                    node_type: type_name.to_string(),
                    field: name.to_string(),
                    reason: format!("single-node field given {extra} extra nodes"),
                },
                context,
            );
        }
        if let Err(err) = written {
            self.report(Severity::Warning, err, context);
            return;
        }

        let slot = Slot::Field(interner::intern(name));
        for node in accepted {
            self.attach(node, handle, slot);
        }
        self.invalidate(handle);
    }

    fn append_built(&mut self, parent: NodeHandle, child: NodeHandle, context: &str) {
        if let Err(err) = self.append_child_internal(parent, child) {
            self.report(Severity::Error, err, context);
        }
    }
}
