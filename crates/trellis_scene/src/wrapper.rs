//! Chainable container editing.
//!
//! [`LiveContainer`] borrows a [`Scene`] mutably and exposes the live child
//! operations of one container so that edits can be chained with `?`.
//!
//! # Example
//!
//! ```rust,ignore
//! scene.container(group)
//!     .add_child(a)?
//!     .add_child(b)?
//!     .remove_child(a)?;
//! ```
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::must_use_candidate)]
use std::sync::Arc;

use trellis_core::errors::Result;
use trellis_core::NodeHandle;

use crate::render::AttachedChild;
use crate::scene::Scene;

/// Temporary mutable borrow of a container for chainable edits.
pub struct LiveContainer<'a> {
    scene: &'a mut Scene,
    handle: NodeHandle,
}

impl<'a> LiveContainer<'a> {
    #[inline]
    pub fn new(scene: &'a mut Scene, handle: NodeHandle) -> Self {
        Self { scene, handle }
    }

    /// Returns the underlying handle.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> NodeHandle {
        self.handle
    }

    #[inline]
    pub fn add_child(self, child: NodeHandle) -> Result<Self> {
        self.scene.add_child(self.handle, child)?;
        Ok(self)
    }

    #[inline]
    pub fn remove_child(self, child: NodeHandle) -> Result<Self> {
        self.scene.remove_child(self.handle, child)?;
        Ok(self)
    }

    #[inline]
    pub fn replace_child(self, slot: usize, node: NodeHandle) -> Result<Self> {
        self.scene.replace_child(self.handle, slot, node)?;
        Ok(self)
    }

    #[inline]
    pub fn clear_children(self) -> Result<Self> {
        self.scene.clear_children(self.handle)?;
        Ok(self)
    }

    /// Selects the visible choice. Only meaningful on a selector.
    #[inline]
    pub fn set_active_index(self, index: Option<usize>) -> Result<Self> {
        self.scene.set_active_index(self.handle, index)?;
        Ok(self)
    }

    /// Logical children, including unresolved placeholders.
    pub fn children(&self) -> Vec<NodeHandle> {
        self.scene.children(self.handle).map(<[_]>::to_vec).unwrap_or_default()
    }

    /// What the traversal actor currently sees under this container.
    pub fn attached_children(&self) -> Arc<Vec<AttachedChild>> {
        self.scene.attached_children(self.handle).unwrap_or_default()
    }
}

impl Scene {
    /// Chainable editing of the container `handle`. Every operation still
    /// validates the handle; a stale one surfaces as an error on first use.
    #[inline]
    pub fn container(&mut self, handle: NodeHandle) -> LiveContainer<'_> {
        LiveContainer::new(self, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SceneConfig;

    #[test]
    fn test_chained_edits() {
        let mut scene = Scene::new(SceneConfig::default());
        let group = scene.create_node("Group").unwrap();
        let a = scene.create_node("Group").unwrap();
        let b = scene.create_node("Group").unwrap();
        for h in [group, a, b] {
            scene.finish_setup(h).unwrap();
        }

        let live = scene
            .container(group)
            .add_child(a)
            .and_then(|c| c.add_child(b))
            .and_then(|c| c.remove_child(a))
            .unwrap();
        assert_eq!(live.children(), vec![b]);
        assert_eq!(live.attached_children().len(), 1);
    }

    #[test]
    fn test_error_stops_chain() {
        let mut scene = Scene::new(SceneConfig::default());
        let group = scene.create_node("Group").unwrap();
        scene.finish_setup(group).unwrap();

        assert!(scene.container(group).replace_child(3, group).is_err());
    }
}
