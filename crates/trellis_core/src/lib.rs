//! Trellis Core
//!
//! Foundation types shared by the Trellis scene crates:
//!
//! - [`errors`]: the [`SceneError`] taxonomy
//! - [`field`]: field declarations, values and per-node stores
//! - [`interner`]: interned node type names
//! - [`diagnostics`]: bounded sink for non-fatal construction errors
//! - [`template`]: templates, template bodies and the external load state machine
//! - [`store`]: the thread-safe [`TemplateStore`] and the fetch seam

pub mod diagnostics;
pub mod errors;
pub mod field;
pub mod interner;
pub mod store;
pub mod template;

pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use errors::{Result, SceneError};
pub use field::{AccessType, FieldDecl, FieldStore, FieldType, FieldValue};
pub use interner::Symbol;
pub use store::{FetchQueue, TemplateFetcher, TemplateStore};
pub use template::{
    BodyState, FetchSpec, LoadState, ResolutionEvent, ResolutionOutcome, Subscription, Template,
    TemplateBody, TemplateNode, TemplateNodeId, TemplateNodeKind,
};

use slotmap::new_key_type;

new_key_type! {
    /// Stable handle of a runtime node in a scene's arena.
    pub struct NodeHandle;
}
