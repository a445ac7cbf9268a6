//! Trellis
//!
//! Template instantiation and live scene-graph mutation for declarative 3D
//! scenes. Templates (inline or fetched from elsewhere) are expanded into a
//! graph of runtime nodes; a traversal actor on another thread walks the
//! published render snapshot while the scene keeps being edited.
//!
//! ```rust,ignore
//! use trellis::{FieldValue, Scene, SceneConfig, Template, TemplateBody, TemplateNode};
//!
//! let mut body = TemplateBody::new();
//! let shape = body.add(TemplateNode::builtin("Shape").with_def("S"));
//! body.add_root(TemplateNode::builtin("Group").with_children([shape, shape]));
//! let template = Template::new("Twice", Vec::new(), body);
//!
//! let mut scene = Scene::new(SceneConfig::default());
//! let root = scene.build(&template);
//! ```
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub use trellis_core::{
    AccessType, BodyState, Diagnostic, Diagnostics, FetchQueue, FetchSpec, FieldDecl, FieldStore,
    FieldType, FieldValue, LoadState, NodeHandle, ResolutionOutcome, Result, SceneError, Severity,
    Template, TemplateBody, TemplateFetcher, TemplateNode, TemplateNodeId, TemplateNodeKind,
    TemplateStore,
};
pub use trellis_core::interner;
pub use trellis_scene::{
    AttachedChild, Capabilities, Construction, GatePolicy, LiveContainer, NodeFactory, NodeRole,
    NodeTypeInfo, Ownership, PatchSite, Pending, Profile, RenderNode, Scene, SceneConfig,
    TraversalGate, traverse,
};
