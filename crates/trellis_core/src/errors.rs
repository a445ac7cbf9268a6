//! Error Types
//!
//! This module defines the error taxonomy shared by every Trellis crate.
//!
//! # Overview
//!
//! [`SceneError`] covers the failure modes of template instantiation and live
//! graph mutation:
//! - Construction errors (unknown node types, field mismatches, recursion)
//! - Structural-edit errors (ranges, cycles, illegal container roles)
//! - Deferred-resolution errors (external templates that never arrive)
//!
//! # Propagation
//!
//! Construction errors are recovered locally and reported through
//! [`Diagnostics`](crate::diagnostics::Diagnostics); the affected node is simply
//! absent from the built graph. Structural-edit errors are returned to the
//! caller and leave the edited container exactly as it was.
//!
//! ```rust,ignore
//! use trellis_core::errors::{Result, SceneError};
//!
//! fn edit(scene: &mut Scene) -> Result<()> {
//!     scene.add_child(group, shape)?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

use crate::field::{AccessType, FieldType};

/// The main error type for Trellis.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    // ========================================================================
    // Construction Errors
    // ========================================================================
    /// The node factory has no registration for this type under the active profile.
    #[error("Unknown node type: {type_name}")]
    UnknownType {
        /// The requested type name
        type_name: String,
    },

    /// A field-value entry names a field the target does not declare, or carries
    /// a value of the wrong type.
    #[error("Field mismatch on {node_type}.{field}: {reason}")]
    FieldMismatch {
        /// Type name of the node being assigned
        node_type: String,
        /// Offending field name
        field: String,
        /// What was wrong with it
        reason: String,
    },

    /// A field was written through an access mode that forbids it.
    #[error("Field {node_type}.{field} is {access:?} and cannot be written here")]
    FieldAccess {
        /// Type name of the node being assigned
        node_type: String,
        /// Offending field name
        field: String,
        /// Declared access mode of the field
        access: AccessType,
    },

    /// A template instantiates itself, directly or through nested templates,
    /// or nests deeper than the configured limit.
    #[error("Template recursion while instantiating {template}: {chain}")]
    TemplateRecursion {
        /// The template that would have been re-entered
        template: String,
        /// The instantiation chain, outermost first
        chain: String,
    },

    // ========================================================================
    // Structural-Edit Errors
    // ========================================================================
    /// A child slot or selector index lies outside the container.
    #[error("Index {index} out of range for container with {len} children")]
    Range {
        /// The requested index
        index: usize,
        /// Number of children at the time of the call
        len: usize,
    },

    /// Attaching the node would make a container its own descendant.
    #[error("Attaching {child} under {parent} would create a cycle")]
    Cycle {
        /// Description of the proposed parent
        parent: String,
        /// Description of the proposed child
        child: String,
    },

    /// Illegal container role, e.g. attaching a root or adding children to a leaf.
    #[error("Invalid use: {0}")]
    InvalidUse(String),

    /// Structural edit of a subgraph that was not flagged detachable.
    #[error("Mutation of non-detachable subgraph: {0}")]
    MutationSafety(String),

    /// The node handle no longer names a live node.
    #[error("Stale node handle")]
    StaleHandle,

    // ========================================================================
    // Deferred Resolution Errors
    // ========================================================================
    /// An external template could not be resolved; its slots stay empty.
    #[error("External template {template} failed to resolve: {reason}")]
    ExternalResolutionFailure {
        /// Name of the external template
        template: String,
        /// Reason reported by the fetch collaborator
        reason: String,
    },
}

impl SceneError {
    /// Builds a [`SceneError::FieldMismatch`] for a type conflict.
    #[must_use]
    pub fn type_mismatch(node_type: &str, field: &str, expected: FieldType, found: FieldType) -> Self {
        SceneError::FieldMismatch {
            node_type: node_type.to_string(),
            field: field.to_string(),
            reason: format!("expected {}, found {}", expected.name(), found.name()),
        }
    }

    /// Builds a [`SceneError::FieldMismatch`] for an undeclared field.
    #[must_use]
    pub fn unknown_field(node_type: &str, field: &str) -> Self {
        SceneError::FieldMismatch {
            node_type: node_type.to_string(),
            field: field.to_string(),
            reason: "no such field".to_string(),
        }
    }
}

/// Alias for `Result<T, SceneError>`.
pub type Result<T> = std::result::Result<T, SceneError>;
