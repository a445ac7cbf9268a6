//! External Reference Resolver
//!
//! An instance of an external template that has not resolved yet is built as
//! a placeholder node. Every point where the placeholder is attached gets a
//! [`PendingPatch`]. The scene subscribes once per template; when the
//! template completes, the event arrives on the scene's channel and is
//! applied by [`Scene::poll_resolutions`] or [`Scene::wait_for_resolution`]:
//!
//! - resolved: one real instance is built per placeholder and spliced in at
//!   every patch site, then the placeholder is freed. A placeholder that only
//!   sits in the pending node fields of another placeholder is swapped there
//!   and attached when that one resolves;
//! - failed: the placeholder is marked failed and its slots stay empty.

use std::sync::Arc;

use flume::{Receiver, Sender};
use rustc_hash::FxHashMap;
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use trellis_core::diagnostics::Severity;
use trellis_core::errors::SceneError;
use trellis_core::interner::{self, Symbol};
use trellis_core::store::TemplateFetcher;
use trellis_core::template::{ResolutionEvent, Subscription, Template, TemplateBody};
use trellis_core::NodeHandle;

use crate::builder::Chain;
use crate::node::{Construction, Slot};
use crate::pending::Pending;
use crate::scene::Scene;

new_key_type! {
    pub struct PatchId;
}

/// Where a resolved instance must be spliced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchSite {
    Child { parent: NodeHandle, slot: usize },
    Field { node: NodeHandle, field: Symbol },
}

impl PatchSite {
    #[must_use]
    pub fn parent(&self) -> NodeHandle {
        match self {
            PatchSite::Child { parent, .. } => *parent,
            PatchSite::Field { node, .. } => *node,
        }
    }
}

/// Obligation to replace `placeholder` at `site` once `template` resolves.
#[derive(Debug, Clone)]
pub struct PendingPatch {
    pub placeholder: NodeHandle,
    pub site: PatchSite,
    pub template: Arc<Template>,
}

#[derive(Debug)]
struct PendingInstance {
    template: Arc<Template>,
    /// Node-valued fields of the template reference, built but not yet attached.
    wired: Vec<(String, Vec<NodeHandle>)>,
    patches: SmallVec<[PatchId; 2]>,
    outcome: Pending<NodeHandle>,
}

pub(crate) struct Resolver {
    tx: Sender<ResolutionEvent>,
    rx: Receiver<ResolutionEvent>,
    patches: SlotMap<PatchId, PendingPatch>,
    placeholders: FxHashMap<NodeHandle, PendingInstance>,
    /// Resolved instance -> the placeholder it replaced.
    resolved: FxHashMap<NodeHandle, NodeHandle>,
    /// One subscription per template, keyed by identity.
    subscribed: FxHashMap<usize, Arc<Template>>,
    fetcher: Option<Arc<dyn TemplateFetcher>>,
}

fn template_key(template: &Arc<Template>) -> usize {
    Arc::as_ptr(template) as usize
}

impl Resolver {
    pub(crate) fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            tx,
            rx,
            patches: SlotMap::with_key(),
            placeholders: FxHashMap::default(),
            resolved: FxHashMap::default(),
            subscribed: FxHashMap::default(),
            fetcher: None,
        }
    }

    /// Subscribes to `template` unless this scene already did; starts the
    /// fetch if this is the first request anywhere.
    pub(crate) fn request(&mut self, template: &Arc<Template>) {
        let key = template_key(template);
        if self.subscribed.contains_key(&key) {
            return;
        }
        self.subscribed.insert(key, Arc::clone(template));

        match template.subscribe(self.tx.clone()) {
            Subscription::Started => match &self.fetcher {
                Some(fetcher) => fetcher.fetch(Arc::clone(template)),
                None => log::warn!(
                    "No fetcher installed; {} waits for an external completion",
                    template.name()
                ),
            },
            Subscription::Joined | Subscription::Completed => {}
        }
    }

    fn track(&mut self, placeholder: NodeHandle, template: &Arc<Template>, wired: Vec<(String, Vec<NodeHandle>)>) {
        self.placeholders.insert(
            placeholder,
            PendingInstance {
                template: Arc::clone(template),
                wired,
                patches: SmallVec::new(),
                outcome: Pending::Waiting,
            },
        );
        self.request(template);
    }

    pub(crate) fn add_patch(&mut self, placeholder: NodeHandle, site: PatchSite) {
        let Some(pending) = self.placeholders.get_mut(&placeholder) else {
            return;
        };
        if !pending.outcome.is_waiting() {
            return;
        }
        let id = self.patches.insert(PendingPatch {
            placeholder,
            site,
            template: Arc::clone(&pending.template),
        });
        pending.patches.push(id);
    }

    /// Drops one patch of `placeholder` under `parent`.
    pub(crate) fn drop_patch(&mut self, placeholder: NodeHandle, parent: NodeHandle) {
        let Some(pending) = self.placeholders.get_mut(&placeholder) else {
            return;
        };
        let position = pending
            .patches
            .iter()
            .position(|id| self.patches.get(*id).is_some_and(|p| p.site.parent() == parent));
        if let Some(index) = position {
            let id = pending.patches.remove(index);
            self.patches.remove(id);
        }
    }

    /// Drops the patches of `placeholder`, all of them or those under `parent`.
    pub(crate) fn drop_patches(&mut self, placeholder: NodeHandle, parent: Option<NodeHandle>) {
        let Some(pending) = self.placeholders.get_mut(&placeholder) else {
            return;
        };
        let patches = &mut self.patches;
        pending.patches.retain(|id| {
            let matches = patches
                .get(*id)
                .is_some_and(|p| parent.is_none_or(|parent| p.site.parent() == parent));
            if matches {
                patches.remove(*id);
            }
            !matches
        });
    }

    fn take_patches(&mut self, placeholder: NodeHandle) -> Vec<PendingPatch> {
        let Some(pending) = self.placeholders.get_mut(&placeholder) else {
            return Vec::new();
        };
        pending
            .patches
            .drain(..)
            .filter_map(|id| self.patches.remove(id))
            .collect()
    }

    /// Waiting placeholders that hold `node` in a pending node field.
    fn wired_owners(&self, node: NodeHandle) -> Vec<NodeHandle> {
        self.placeholders
            .iter()
            .filter(|(_, p)| {
                p.outcome.is_waiting() && p.wired.iter().any(|(_, nodes)| nodes.contains(&node))
            })
            .map(|(&h, _)| h)
            .collect()
    }

    /// Replaces `old` with `new` in the pending node fields of `owners`.
    fn rewire(&mut self, owners: &[NodeHandle], old: NodeHandle, new: NodeHandle) {
        for owner in owners {
            let Some(pending) = self.placeholders.get_mut(owner) else {
                continue;
            };
            for (_, nodes) in &mut pending.wired {
                for node in nodes.iter_mut().filter(|n| **n == old) {
                    *node = new;
                }
            }
        }
    }

    /// Forgets a freed node. For a placeholder, returns its wired nodes for
    /// release; for a resolved instance, drops the record of its placeholder.
    pub(crate) fn forget(&mut self, handle: NodeHandle) -> Vec<NodeHandle> {
        if let Some(placeholder) = self.resolved.remove(&handle) {
            self.placeholders.remove(&placeholder);
        }
        self.drop_patches(handle, None);
        let Some(pending) = self.placeholders.remove(&handle) else {
            return Vec::new();
        };
        if pending.outcome.is_waiting() {
            log::debug!("Placeholder for {} dropped before resolution", pending.template.name());
        }
        pending.wired.into_iter().flat_map(|(_, nodes)| nodes).collect()
    }

    fn waiting_for(&self, template: &Arc<Template>) -> Vec<NodeHandle> {
        let mut out: Vec<NodeHandle> = self
            .placeholders
            .iter()
            .filter(|(_, p)| p.outcome.is_waiting() && Arc::ptr_eq(&p.template, template))
            .map(|(&h, _)| h)
            .collect();
        out.sort_unstable();
        out
    }

    fn waiting_count(&self) -> usize {
        self.placeholders
            .values()
            .filter(|p| p.outcome.is_waiting())
            .count()
    }
}

impl Scene {
    /// Installs the collaborator that fetches external templates.
    pub fn set_fetcher(&mut self, fetcher: Arc<dyn TemplateFetcher>) {
        self.resolver.fetcher = Some(fetcher);
    }

    /// Number of placeholders still waiting for their template.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.resolver.waiting_count()
    }

    pub fn pending_patches(&self) -> impl Iterator<Item = &PendingPatch> {
        self.resolver.patches.values()
    }

    /// Completion state of a placeholder. Kept after the placeholder itself
    /// has been replaced, until the instance that replaced it is freed.
    #[must_use]
    pub fn resolution(&self, placeholder: NodeHandle) -> Option<&Pending<NodeHandle>> {
        self.resolver.placeholders.get(&placeholder).map(|p| &p.outcome)
    }

    /// Applies every resolution event received so far without blocking.
    /// Returns the number of events applied.
    pub fn poll_resolutions(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.resolver.rx.try_recv() {
            self.apply_resolution(event);
            applied += 1;
        }
        applied
    }

    /// Suspends until at least one resolution event arrives, then applies it
    /// and any others already queued. Returns immediately with `0` when no
    /// placeholder is waiting.
    pub async fn wait_for_resolution(&mut self) -> usize {
        if self.resolver.waiting_count() == 0 {
            return self.poll_resolutions();
        }
        let rx = self.resolver.rx.clone();
        match rx.recv_async().await {
            Ok(event) => {
                self.apply_resolution(event);
                1 + self.poll_resolutions()
            }
            Err(_) => 0,
        }
    }

    /// Cancels every outstanding resolution. Placeholders and the subgraphs
    /// built for them are released; late events are ignored.
    pub fn abandon_pending(&mut self) {
        let waiting: Vec<NodeHandle> = self
            .resolver
            .placeholders
            .iter()
            .filter(|(_, p)| p.outcome.is_waiting())
            .map(|(&h, _)| h)
            .collect();

        self.with_batch(|scene| {
            for placeholder in waiting {
                scene.unlink_everywhere(placeholder);
                scene.free_subtree(placeholder);
            }
        });
        self.resolver.subscribed.clear();
        log::debug!("Scene {} abandoned pending resolutions", self.id);
    }

    /// Registers a placeholder built for `template`.
    pub(crate) fn track_placeholder(
        &mut self,
        placeholder: NodeHandle,
        template: &Arc<Template>,
        wired: Vec<(String, Vec<NodeHandle>)>,
    ) {
        self.resolver.track(placeholder, template, wired);
    }

    fn apply_resolution(&mut self, event: ResolutionEvent) {
        let ResolutionEvent { template, outcome } = event;
        self.resolver.subscribed.remove(&template_key(&template));

        let waiting = self.resolver.waiting_for(&template);
        if waiting.is_empty() {
            log::debug!("No placeholder waits for {}; event ignored", template.name());
            return;
        }

        self.with_batch(|scene| match outcome {
            Ok(body) => {
                for placeholder in waiting {
                    scene.resolve_placeholder(placeholder, &template, &body);
                }
            }
            Err(reason) => {
                for placeholder in waiting {
                    scene.fail_placeholder(placeholder, &template, &reason);
                }
            }
        });
    }

    fn resolve_placeholder(&mut self, placeholder: NodeHandle, template: &Arc<Template>, body: &TemplateBody) {
        let sites = self.locate_sites(placeholder);
        let owners = self.resolver.wired_owners(placeholder);
        if sites.is_empty() && owners.is_empty() {
            log::debug!("Placeholder for {} is no longer attached; discarded", template.name());
            self.free_subtree(placeholder);
            return;
        }

        let context = format!("resolving {}", template.name());
        let mut instance = self.factory.instance(template);
        instance.detachable = self.config.detachable_by_default;
        if let Some(stub) = self.nodes.get(placeholder) {
            // Carries both the copied-down reference values and later writes.
            for decl in template.fields().iter() {
                if decl.field_type.is_node() || !decl.access.is_copied_down() {
                    continue;
                }
                if let Some(value) = stub.fields.get(&decl.name)
                    && let Err(err) = instance.fields.set_internal(&decl.name, value.clone())
                {
                    log::debug!("Field {} not carried over: {err}", decl.name);
                }
            }
        }
        let handle = self.insert_node(instance);

        let mut chain = Chain::root(template);
        self.build_body_into(body, handle, &mut chain, Some(handle));

        let wired = self
            .resolver
            .placeholders
            .get_mut(&placeholder)
            .map(|p| std::mem::take(&mut p.wired))
            .unwrap_or_default();
        for (field, nodes) in wired {
            let nodes: Vec<NodeHandle> = nodes.into_iter().filter(|&n| self.contains(n)).collect();
            self.connect_node_field(handle, &field, nodes, &context);
        }
        self.complete(handle);

        for site in sites {
            match site {
                PatchSite::Child { parent, slot } => self.replace_child_internal(parent, slot, handle),
                PatchSite::Field { node, field } => {
                    let name = interner::resolve(field);
                    let replaced = self
                        .nodes
                        .get_mut(node)
                        .is_some_and(|n| n.fields.replace_node_ref(name, placeholder, handle));
                    if replaced {
                        self.detach(placeholder, node);
                        self.attach(handle, node, Slot::Field(field));
                        self.invalidate(node);
                    }
                }
            }
        }

        self.resolver.rewire(&owners, placeholder, handle);

        if let Some(pending) = self.resolver.placeholders.get_mut(&placeholder) {
            pending.outcome.resolve(handle);
            self.resolver.resolved.insert(handle, placeholder);
        }
        // Keep the resolved outcome; free only the stand-in node.
        self.unlink_everywhere(placeholder);
        self.nodes.remove(placeholder);
        log::debug!("Resolved placeholder {placeholder:?} as {handle:?}");
    }

    fn fail_placeholder(&mut self, placeholder: NodeHandle, template: &Arc<Template>, reason: &str) {
        self.report(
            Severity::Error,
            SceneError::ExternalResolutionFailure {
                template: template.name().to_string(),
                reason: reason.to_string(),
            },
            "external resolution",
        );

        self.resolver.drop_patches(placeholder, None);
        let wired = match self.resolver.placeholders.get_mut(&placeholder) {
            Some(pending) => {
                pending.outcome.fail(reason);
                std::mem::take(&mut pending.wired)
            }
            None => Vec::new(),
        };
        for node in wired.into_iter().flat_map(|(_, nodes)| nodes) {
            if self.nodes.get(node).is_some_and(|n| n.ownership.is_detached()) {
                self.free_subtree(node);
            }
        }
        if let Some(node) = self.nodes.get_mut(placeholder) {
            node.construction = Construction::Failed;
        }
    }

    /// Current patch sites of `placeholder`. A slot that shifted is found
    /// again by identity; a site that no longer holds the placeholder is
    /// dropped.
    fn locate_sites(&mut self, placeholder: NodeHandle) -> Vec<PatchSite> {
        let patches = self.resolver.take_patches(placeholder);
        let mut sites: Vec<PatchSite> = Vec::with_capacity(patches.len());

        for patch in patches {
            let located = match patch.site {
                PatchSite::Child { parent, slot } => {
                    let Some(p) = self.nodes.get(parent) else {
                        continue;
                    };
                    let claimed = |i: usize| sites.contains(&PatchSite::Child { parent, slot: i });
                    if p.children.get(slot) == Some(&placeholder) && !claimed(slot) {
                        Some(PatchSite::Child { parent, slot })
                    } else {
                        p.children
                            .iter()
                            .enumerate()
                            .find(|&(i, &c)| c == placeholder && !claimed(i))
                            .map(|(i, _)| PatchSite::Child { parent, slot: i })
                    }
                }
                PatchSite::Field { node, field } => self
                    .nodes
                    .get(node)
                    .filter(|n| n.fields.referenced_nodes().contains(&placeholder))
                    .map(|_| PatchSite::Field { node, field }),
            };
            match located {
                Some(site) => sites.push(site),
                None => log::debug!("Patch {:?} for {} is stale", patch.site, patch.template.name()),
            }
        }
        sites
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::template::{FetchSpec, TemplateNode};

    use crate::config::SceneConfig;

    fn cone_body() -> TemplateBody {
        let mut body = TemplateBody::new();
        body.add_root(TemplateNode::builtin("Cone"));
        body
    }

    #[test]
    fn test_records_follow_the_instance_lifetime() {
        let mut scene = Scene::new(SceneConfig::default());
        for _ in 0..50 {
            let ext = Template::external("Widget", Vec::new(), FetchSpec::new(["widget.proto"]));
            let mut body = TemplateBody::new();
            body.add_root(TemplateNode::instance(&ext));
            scene.build(&Template::new("Outer", Vec::new(), body));
            assert!(ext.on_resolved(cone_body()));
            assert_eq!(scene.poll_resolutions(), 1);
        }

        assert_eq!(scene.resolver.placeholders.len(), 1);
        assert_eq!(scene.resolver.resolved.len(), 1);
        assert!(scene.resolver.subscribed.is_empty());
        assert_eq!(scene.node_count(), 3);
    }

    #[test]
    fn test_wired_placeholder_is_swapped_for_its_instance() {
        let inner = Template::external("Inner", Vec::new(), FetchSpec::new(["inner.proto"]));
        let outer = Template::external("Outer", Vec::new(), FetchSpec::new(["outer.proto"]));
        let mut body = TemplateBody::new();
        let nested = body.add(TemplateNode::instance(&inner));
        body.add_root(TemplateNode::instance(&outer).with_children([nested]));

        let mut scene = Scene::new(SceneConfig::default());
        let root = scene.build(&Template::new("Nest", Vec::new(), body));
        let outer_placeholder = scene.children(root).unwrap()[0];
        let inner_placeholder = scene.resolver.placeholders[&outer_placeholder].wired[0].1[0];

        inner.on_resolved(cone_body());
        scene.poll_resolutions();

        let Some(Pending::Resolved(instance)) = scene.resolution(inner_placeholder).cloned() else {
            panic!("inner placeholder did not resolve");
        };
        assert_eq!(scene.resolver.wired_owners(instance), vec![outer_placeholder]);
        assert!(scene.resolver.wired_owners(inner_placeholder).is_empty());
        assert!(scene.get_node(instance).unwrap().ownership().is_detached());
    }
}
