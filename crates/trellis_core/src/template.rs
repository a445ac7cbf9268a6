//! Templates (prototypes)
//!
//! A [`Template`] is the parsed, immutable description of a reusable
//! sub-graph: a name, declared fields and a [`TemplateBody`]. The body is a
//! flat node table; children and node-valued fields refer to other entries of
//! the same table by [`TemplateNodeId`]. The same id appearing at two places
//! is a DEF/USE alias, never a copy.
//!
//! External templates start without a body. Their load state moves
//! `Unresolved -> Loading -> {Resolved, Failed}` exactly once; everybody
//! waiting on the transition is notified through a `flume` channel.

use std::sync::Arc;

use flume::Sender;
use parking_lot::Mutex;

use crate::field::{FieldDecl, FieldValue};

/// Index of a node inside one [`TemplateBody`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateNodeId(u32);

impl TemplateNodeId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// What a template node instantiates.
#[derive(Debug, Clone)]
pub enum TemplateNodeKind {
    /// A node type known to the node factory.
    Builtin(String),
    /// A nested template instance.
    Instance(Arc<Template>),
}

/// One entry of a template body.
#[derive(Debug, Clone)]
pub struct TemplateNode {
    pub kind: TemplateNodeKind,
    pub def_name: Option<String>,
    /// Scalar field values, in document order.
    pub fields: Vec<(String, FieldValue)>,
    /// Node-valued fields, in document order. `children` is the child list of
    /// grouping nodes.
    pub node_fields: Vec<(String, Vec<TemplateNodeId>)>,
    /// `(field, interface field)` pairs: `field` takes the value of the
    /// enclosing template's interface field when the body is instantiated.
    pub bindings: Vec<(String, String)>,
    /// Overrides the scene's default detachable flag.
    pub detachable: Option<bool>,
}

impl TemplateNode {
    fn with_kind(kind: TemplateNodeKind) -> Self {
        Self {
            kind,
            def_name: None,
            fields: Vec::new(),
            node_fields: Vec::new(),
            bindings: Vec::new(),
            detachable: None,
        }
    }

    #[must_use]
    pub fn builtin(type_name: &str) -> Self {
        Self::with_kind(TemplateNodeKind::Builtin(type_name.to_string()))
    }

    #[must_use]
    pub fn instance(template: &Arc<Template>) -> Self {
        Self::with_kind(TemplateNodeKind::Instance(Arc::clone(template)))
    }

    #[must_use]
    pub fn with_def(mut self, name: &str) -> Self {
        self.def_name = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn with_field(mut self, name: &str, value: FieldValue) -> Self {
        self.fields.push((name.to_string(), value));
        self
    }

    #[must_use]
    pub fn with_children(self, children: impl IntoIterator<Item = TemplateNodeId>) -> Self {
        self.with_node_field("children", children)
    }

    #[must_use]
    pub fn with_node_field(
        mut self,
        name: &str,
        nodes: impl IntoIterator<Item = TemplateNodeId>,
    ) -> Self {
        let nodes: Vec<_> = nodes.into_iter().collect();
        match self.node_fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => existing.extend(nodes),
            None => self.node_fields.push((name.to_string(), nodes)),
        }
        self
    }

    /// Binds `field` to `interface_field` of the template whose body holds
    /// this node (`field IS interface_field`).
    #[must_use]
    pub fn with_is(mut self, field: &str, interface_field: &str) -> Self {
        self.bindings.push((field.to_string(), interface_field.to_string()));
        self
    }

    #[must_use]
    pub fn with_detachable(mut self, detachable: bool) -> Self {
        self.detachable = Some(detachable);
        self
    }

    /// Type name as written in the document.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match &self.kind {
            TemplateNodeKind::Builtin(name) => name,
            TemplateNodeKind::Instance(template) => template.name(),
        }
    }

    #[must_use]
    pub fn children(&self) -> &[TemplateNodeId] {
        self.node_fields
            .iter()
            .find(|(n, _)| n == "children")
            .map_or(&[], |(_, ids)| ids.as_slice())
    }
}

/// Flat node table of a template plus its ordered top-level nodes.
#[derive(Debug, Clone, Default)]
pub struct TemplateBody {
    nodes: Vec<TemplateNode>,
    roots: Vec<TemplateNodeId>,
}

impl TemplateBody {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node to the table without placing it anywhere.
    pub fn add(&mut self, node: TemplateNode) -> TemplateNodeId {
        let id = TemplateNodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Appends `id` to the top-level node list. Pushing the same id twice is
    /// a USE of the first occurrence.
    pub fn push_root(&mut self, id: TemplateNodeId) {
        self.roots.push(id);
    }

    /// Convenience: adds a node and places it at top level.
    pub fn add_root(&mut self, node: TemplateNode) -> TemplateNodeId {
        let id = self.add(node);
        self.push_root(id);
        id
    }

    #[must_use]
    pub fn node(&self, id: TemplateNodeId) -> Option<&TemplateNode> {
        self.nodes.get(id.index())
    }

    #[must_use]
    pub fn roots(&self) -> &[TemplateNodeId] {
        &self.roots
    }

    #[must_use]
    pub fn nodes(&self) -> &[TemplateNode] {
        &self.nodes
    }

    /// Looks up a node by its DEF name.
    #[must_use]
    pub fn def(&self, name: &str) -> Option<TemplateNodeId> {
        self.nodes
            .iter()
            .position(|n| n.def_name.as_deref() == Some(name))
            .map(|i| TemplateNodeId(i as u32))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Where an external template's body lives: candidate URLs in order of
/// preference. The fragment after `#` names the template inside the fetched
/// document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSpec {
    pub urls: Vec<String>,
}

impl FetchSpec {
    #[must_use]
    pub fn new(urls: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
        }
    }

    /// The fragment of `url`, if it has one.
    #[must_use]
    pub fn fragment(url: &str) -> Option<&str> {
        url.split_once('#').map(|(_, f)| f).filter(|f| !f.is_empty())
    }

    /// Template name requested by the first URL that carries a fragment.
    #[must_use]
    pub fn template_name(&self) -> Option<&str> {
        self.urls.iter().find_map(|u| Self::fragment(u))
    }
}

/// Load state of a template. Inline templates are always `Resolved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    Unresolved,
    Loading,
    Resolved,
    Failed,
}

/// Result of a completed resolution.
pub type ResolutionOutcome = Result<Arc<TemplateBody>, String>;

/// Delivered to every waiter when an external template completes.
#[derive(Debug, Clone)]
pub struct ResolutionEvent {
    pub template: Arc<Template>,
    pub outcome: ResolutionOutcome,
}

/// Body availability at the moment of asking.
#[derive(Debug, Clone)]
pub enum BodyState {
    Ready(Arc<TemplateBody>),
    Pending,
    Failed(String),
}

/// What [`Template::subscribe`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    /// This call moved the template to `Loading`; the caller starts the fetch.
    Started,
    /// A fetch is already under way; the waiter joined it.
    Joined,
    /// The template had already completed; the event was sent immediately.
    Completed,
}

#[derive(Debug)]
enum ExternalState {
    Unresolved,
    Loading {
        waiters: Vec<Sender<ResolutionEvent>>,
    },
    Resolved(Arc<TemplateBody>),
    Failed(String),
}

#[derive(Debug)]
enum TemplateSource {
    Inline(Arc<TemplateBody>),
    External {
        fetch: FetchSpec,
        state: Mutex<ExternalState>,
    },
}

/// A reusable, named sub-graph description.
#[derive(Debug)]
pub struct Template {
    name: String,
    fields: Arc<[FieldDecl]>,
    source: TemplateSource,
}

impl Template {
    /// An inline template whose body is known at parse time.
    #[must_use]
    pub fn new(name: &str, fields: Vec<FieldDecl>, body: TemplateBody) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fields: Arc::from(fields),
            source: TemplateSource::Inline(Arc::new(body)),
        })
    }

    /// An external template whose body must be fetched.
    #[must_use]
    pub fn external(name: &str, fields: Vec<FieldDecl>, fetch: FetchSpec) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fields: Arc::from(fields),
            source: TemplateSource::External {
                fetch,
                state: Mutex::new(ExternalState::Unresolved),
            },
        })
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn fields(&self) -> &Arc<[FieldDecl]> {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.name == name)
    }

    #[inline]
    #[must_use]
    pub fn is_external(&self) -> bool {
        matches!(self.source, TemplateSource::External { .. })
    }

    #[must_use]
    pub fn fetch_spec(&self) -> Option<&FetchSpec> {
        match &self.source {
            TemplateSource::Inline(_) => None,
            TemplateSource::External { fetch, .. } => Some(fetch),
        }
    }

    #[must_use]
    pub fn load_state(&self) -> LoadState {
        match &self.source {
            TemplateSource::Inline(_) => LoadState::Resolved,
            TemplateSource::External { state, .. } => match &*state.lock() {
                ExternalState::Unresolved => LoadState::Unresolved,
                ExternalState::Loading { .. } => LoadState::Loading,
                ExternalState::Resolved(_) => LoadState::Resolved,
                ExternalState::Failed(_) => LoadState::Failed,
            },
        }
    }

    #[must_use]
    pub fn body(&self) -> BodyState {
        match &self.source {
            TemplateSource::Inline(body) => BodyState::Ready(Arc::clone(body)),
            TemplateSource::External { state, .. } => match &*state.lock() {
                ExternalState::Unresolved | ExternalState::Loading { .. } => BodyState::Pending,
                ExternalState::Resolved(body) => BodyState::Ready(Arc::clone(body)),
                ExternalState::Failed(reason) => BodyState::Failed(reason.clone()),
            },
        }
    }

    /// Registers `waiter` for the completion of this template.
    pub fn subscribe(self: &Arc<Self>, waiter: Sender<ResolutionEvent>) -> Subscription {
        let TemplateSource::External { state, .. } = &self.source else {
            self.notify(&[waiter], &self.completed_outcome());
            return Subscription::Completed;
        };

        let mut guard = state.lock();
        match &mut *guard {
            ExternalState::Unresolved => {
                *guard = ExternalState::Loading {
                    waiters: vec![waiter],
                };
                log::debug!("External template {} is now loading", self.name);
                Subscription::Started
            }
            ExternalState::Loading { waiters } => {
                waiters.push(waiter);
                Subscription::Joined
            }
            ExternalState::Resolved(_) | ExternalState::Failed(_) => {
                drop(guard);
                self.notify(&[waiter], &self.completed_outcome());
                Subscription::Completed
            }
        }
    }

    /// Completes the template with its fetched body. Returns `false` if it had
    /// already completed or is not external.
    pub fn on_resolved(self: &Arc<Self>, body: TemplateBody) -> bool {
        self.complete(Ok(Arc::new(body)))
    }

    /// Completes the template as failed. Returns `false` if it had already
    /// completed or is not external.
    pub fn on_failed(self: &Arc<Self>, reason: &str) -> bool {
        self.complete(Err(reason.to_string()))
    }

    fn complete(self: &Arc<Self>, outcome: ResolutionOutcome) -> bool {
        let TemplateSource::External { state, .. } = &self.source else {
            log::warn!("Ignoring completion of inline template {}", self.name);
            return false;
        };

        let waiters = {
            let mut guard = state.lock();
            let waiters = match &mut *guard {
                ExternalState::Unresolved => Vec::new(),
                ExternalState::Loading { waiters } => std::mem::take(waiters),
                ExternalState::Resolved(_) | ExternalState::Failed(_) => {
                    log::warn!("Duplicate completion of external template {} ignored", self.name);
                    return false;
                }
            };
            *guard = match &outcome {
                Ok(body) => ExternalState::Resolved(Arc::clone(body)),
                Err(reason) => ExternalState::Failed(reason.clone()),
            };
            waiters
        };

        match &outcome {
            Ok(_) => log::debug!("External template {} resolved", self.name),
            Err(reason) => log::warn!("External template {} failed: {reason}", self.name),
        }
        self.notify(&waiters, &outcome);
        true
    }

    fn completed_outcome(&self) -> ResolutionOutcome {
        match self.body() {
            BodyState::Ready(body) => Ok(body),
            BodyState::Failed(reason) => Err(reason),
            BodyState::Pending => Err("template has not completed".to_string()),
        }
    }

    fn notify(self: &Arc<Self>, waiters: &[Sender<ResolutionEvent>], outcome: &ResolutionOutcome) {
        for waiter in waiters {
            let event = ResolutionEvent {
                template: Arc::clone(self),
                outcome: outcome.clone(),
            };
            // A closed channel means the waiting scene was torn down.
            if waiter.send(event).is_err() {
                log::debug!("Waiter for {} is gone", self.name);
            }
        }
    }
}
