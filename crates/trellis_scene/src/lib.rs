//! Trellis Scene
//!
//! The live scene graph and everything that edits it:
//!
//! - [`scene`]: the node arena, field writes and the frame boundary
//! - [`container`]: live child operations and ownership bookkeeping
//! - [`builder`]: template bodies to runtime nodes, with USE identity
//! - [`resolver`]: placeholders and patches for external templates
//! - [`render`]: the snapshot graph a traversal actor walks
//! - [`gate`]: when edits become visible to traversal

pub mod builder;
pub mod config;
pub mod container;
pub mod factory;
pub mod gate;
pub mod node;
pub mod pending;
pub mod render;
pub mod resolver;
pub mod scene;
pub mod wrapper;

pub use builder::IdentityMap;
pub use config::{GatePolicy, Profile, SceneConfig};
pub use factory::{NodeFactory, NodeTypeInfo};
pub use gate::TraversalGate;
pub use node::{Capabilities, Construction, NodeRole, Ownership, ParentSlot, RuntimeNode, Slot};
pub use pending::Pending;
pub use render::{AttachedChild, RenderNode, SharedGroup, transform_matrix, traverse};
pub use resolver::{PatchSite, PendingPatch};
pub use scene::Scene;
pub use wrapper::LiveContainer;
